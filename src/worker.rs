use crate::error::SimError;
use crate::processor::RecordProcessor;
use crate::queue::QueueConsumerLike;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Claims one batch and processes it. Returns how many jobs were claimed.
pub fn run_worker_once<Q: QueueConsumerLike>(
    queue: &Q,
    processor: &RecordProcessor,
    batch_size: usize,
) -> Result<usize, SimError> {
    queue.try_consume_batch_once(batch_size, |job| {
        let span = tracing::info_span!("job", record_id = %job.record_id);
        let _enter = span.enter();
        processor.process(&job.record_id, &job.options).map(|_| ())
    })
}

/// Processes jobs until `shutdown` is set, sleeping `idle` whenever the queue is empty.
pub fn run_worker<Q: QueueConsumerLike>(
    queue: &Q,
    processor: &RecordProcessor,
    batch_size: usize,
    idle: Duration,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Acquire) {
        match run_worker_once(queue, processor, batch_size) {
            Ok(0) => thread::sleep(idle),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "worker iteration failed");
                thread::sleep(idle);
            }
        }
    }
}

/// In-process worker threads sharing one queue and one processor.
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<Q>(workers: usize, queue: Q, processor: Arc<RecordProcessor>, idle: Duration) -> Self
    where
        Q: QueueConsumerLike + Clone + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = (0..workers.max(1))
            .map(|i| {
                let queue = queue.clone();
                let processor = processor.clone();
                let shutdown = shutdown.clone();
                thread::spawn(move || {
                    tracing::debug!(worker = i, "worker started");
                    run_worker(&queue, &processor, DEFAULT_BATCH_SIZE, idle, &shutdown);
                    tracing::debug!(worker = i, "worker stopped");
                })
            })
            .collect();
        Self { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn shutdown(self) -> Result<(), SimError> {
        self.shutdown.store(true, Ordering::Release);
        self.join()
    }

    /// Blocks until every worker thread has exited.
    pub fn join(self) -> Result<(), SimError> {
        let mut panicked = 0;
        for handle in self.handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(SimError::Other(format!("{} worker thread(s) panicked", panicked)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::{SignatureFilter, StaticBlacklistSource};
    use crate::cluster::{GroupStoreLike, InMemoryGroupStore};
    use crate::config::MatchOptions;
    use crate::queue::{Job, MemoryQueue, QueueLenLike, QueueProducerLike};
    use crate::record::{Namespace, Record};
    use crate::search::InMemoryIndex;

    fn setup() -> (Arc<RecordProcessor>, Arc<InMemoryGroupStore>) {
        let index = Arc::new(InMemoryIndex::from_records(vec![
            Record::new("a", 1).with_signatures("sig_resources_100", ["x", "y"]),
            Record::new("b", 2).with_signatures("sig_resources_100", ["x", "y"]),
        ]));
        let groups = Arc::new(InMemoryGroupStore::new());
        let processor = Arc::new(RecordProcessor::new(
            index.clone(),
            index,
            groups.clone(),
            SignatureFilter::new(Box::new(StaticBlacklistSource::new())),
        ));
        (processor, groups)
    }

    #[test]
    fn test_run_worker_once_processes_and_acks() {
        let (processor, groups) = setup();
        let queue = MemoryQueue::new("q", 3);
        let options = MatchOptions::new(1.0, 100);
        queue
            .push_many(vec![Job::new("a", &options), Job::new("missing", &options)])
            .unwrap();

        assert_eq!(run_worker_once(&queue, &processor, 10).unwrap(), 2);

        assert!(queue.is_empty().unwrap());
        assert!(queue.dead_letters().unwrap().is_empty());
        assert_eq!(groups.groups(Namespace::Resources).unwrap()[0].root, "b");
    }

    #[test]
    fn test_option_errors_are_dead_lettered() {
        let (processor, _) = setup();
        let queue = MemoryQueue::new("q", 3);
        queue
            .push_many(vec![Job::new("a", &MatchOptions::default())])
            .unwrap();

        run_worker_once(&queue, &processor, 10).unwrap();

        assert!(queue.is_empty().unwrap());
        assert_eq!(queue.dead_letters().unwrap().len(), 1);
    }

    #[test]
    fn test_pool_drains_queue() {
        let (processor, groups) = setup();
        let queue = MemoryQueue::new("q", 3);
        let options = MatchOptions::new(1.0, 100);
        queue
            .push_many(vec![Job::new("a", &options), Job::new("b", &options)])
            .unwrap();

        let pool = WorkerPool::spawn(3, queue.clone(), processor, Duration::from_millis(5));
        assert_eq!(pool.len(), 3);
        for _ in 0..400 {
            if queue.is_empty().unwrap() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        pool.shutdown().unwrap();

        assert!(queue.is_empty().unwrap());
        let all = groups.groups(Namespace::All).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].members, vec!["a", "b"]);
    }
}
