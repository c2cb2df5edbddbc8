use crate::config::MatchOptions;
use crate::error::SimError;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// One record to match under one option set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Job {
    pub record_id: String,
    pub options: MatchOptions,
}

impl Job {
    pub fn new(record_id: &str, options: &MatchOptions) -> Self {
        Job {
            record_id: record_id.to_string(),
            options: options.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SimError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SimError> {
        let (job, _): (Job, usize) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(job)
    }
}

/// A job handed to a worker, identified by `ticket` until acked.
#[derive(Debug, Clone, PartialEq)]
pub struct Claimed {
    pub ticket: i64,
    pub job: Job,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadJob {
    pub job: Job,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeued,
    DeadLettered,
}

pub trait QueueLenLike {
    /// Jobs not yet finished: waiting plus claimed.
    fn len(&self) -> Result<usize, SimError>;
    fn is_empty(&self) -> Result<bool, SimError> {
        Ok(self.len()? == 0)
    }
}

pub trait QueueProducerLike: QueueLenLike {
    fn push_many(&self, jobs: Vec<Job>) -> Result<(), SimError>;
}

pub trait QueueConsumerLike: QueueLenLike {
    /// Claims up to `batch_size` jobs without blocking.
    fn claim_batch(&self, batch_size: usize) -> Result<Vec<Claimed>, SimError>;
    fn ack(&self, claimed: &Claimed) -> Result<(), SimError>;
    /// Puts the job back, or dead-letters it once it has used up its attempts.
    fn retry(&self, claimed: &Claimed, reason: &str) -> Result<RetryDecision, SimError>;
    fn dead_letter(&self, claimed: &Claimed, reason: &str) -> Result<(), SimError>;

    /// Claims one batch and runs `callback` on each job. Retryable failures go
    /// back on the queue, anything else is dead-lettered. Returns the number of
    /// jobs claimed (0 if none were available).
    fn try_consume_batch_once<F>(&self, batch_size: usize, mut callback: F) -> Result<usize, SimError>
    where
        Self: Sized,
        F: FnMut(&Job) -> Result<(), SimError>,
    {
        let batch = self.claim_batch(batch_size)?;
        for claimed in &batch {
            match callback(&claimed.job) {
                Ok(()) => self.ack(claimed)?,
                Err(e) if e.is_retryable() => {
                    let decision = self.retry(claimed, &e.to_string())?;
                    tracing::warn!(
                        record_id = %claimed.job.record_id,
                        attempts = claimed.attempts + 1,
                        ?decision,
                        error = %e,
                        "job failed"
                    );
                }
                Err(e) => {
                    tracing::error!(record_id = %claimed.job.record_id, error = %e, "job dead-lettered");
                    self.dead_letter(claimed, &e.to_string())?;
                }
            }
        }
        Ok(batch.len())
    }
}

#[derive(Default)]
struct QueueInner {
    ready: VecDeque<Claimed>,
    in_flight: FxHashMap<i64, Claimed>,
    dead: Vec<DeadJob>,
    next_ticket: i64,
}

/// In-process queue. Clones share the same jobs.
#[derive(Clone)]
pub struct MemoryQueue {
    pub name: String,
    max_attempts: u32,
    inner: Arc<Mutex<QueueInner>>,
}

impl MemoryQueue {
    pub fn new(name: &str, max_attempts: u32) -> Self {
        Self {
            name: name.to_string(),
            max_attempts: max_attempts.max(1),
            inner: Arc::new(Mutex::new(QueueInner::default())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueInner>, SimError> {
        self.inner
            .lock()
            .map_err(|_| SimError::Queue(format!("queue {} lock poisoned", self.name)))
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadJob>, SimError> {
        Ok(self.lock()?.dead.clone())
    }

    pub fn in_flight(&self) -> Result<usize, SimError> {
        Ok(self.lock()?.in_flight.len())
    }
}

impl QueueLenLike for MemoryQueue {
    fn len(&self) -> Result<usize, SimError> {
        let inner = self.lock()?;
        Ok(inner.ready.len() + inner.in_flight.len())
    }
}

impl QueueProducerLike for MemoryQueue {
    fn push_many(&self, jobs: Vec<Job>) -> Result<(), SimError> {
        let mut inner = self.lock()?;
        for job in jobs {
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.ready.push_back(Claimed {
                ticket,
                job,
                attempts: 0,
            });
        }
        Ok(())
    }
}

impl QueueConsumerLike for MemoryQueue {
    fn claim_batch(&self, batch_size: usize) -> Result<Vec<Claimed>, SimError> {
        let mut inner = self.lock()?;
        let take = usize::min(batch_size, inner.ready.len());
        let batch: Vec<Claimed> = inner.ready.drain(0..take).collect();
        for claimed in &batch {
            inner.in_flight.insert(claimed.ticket, claimed.clone());
        }
        Ok(batch)
    }

    fn ack(&self, claimed: &Claimed) -> Result<(), SimError> {
        self.lock()?.in_flight.remove(&claimed.ticket);
        Ok(())
    }

    fn retry(&self, claimed: &Claimed, reason: &str) -> Result<RetryDecision, SimError> {
        let mut inner = self.lock()?;
        let Some(mut entry) = inner.in_flight.remove(&claimed.ticket) else {
            return Err(SimError::Queue(format!("ticket {} is not claimed", claimed.ticket)));
        };
        entry.attempts += 1;
        if entry.attempts >= self.max_attempts {
            inner.dead.push(DeadJob {
                job: entry.job,
                attempts: entry.attempts,
                reason: reason.to_string(),
            });
            return Ok(RetryDecision::DeadLettered);
        }
        inner.ready.push_back(entry);
        Ok(RetryDecision::Requeued)
    }

    fn dead_letter(&self, claimed: &Claimed, reason: &str) -> Result<(), SimError> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner.in_flight.remove(&claimed.ticket) {
            inner.dead.push(DeadJob {
                job: entry.job,
                attempts: entry.attempts + 1,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs(ids: &[&str]) -> Vec<Job> {
        let options = MatchOptions::new(0.8, 100);
        ids.iter().map(|id| Job::new(id, &options)).collect()
    }

    #[test]
    fn test_push_many_and_claim_fifo() {
        let queue = MemoryQueue::new("match_similar_app", 3);
        queue.push_many(jobs(&["a", "b", "c"])).unwrap();
        let batch = queue.claim_batch(2).unwrap();
        let ids: Vec<_> = batch.iter().map(|c| c.job.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_len_counts_in_flight_until_ack() {
        let queue = MemoryQueue::new("q", 3);
        queue.push_many(jobs(&["a"])).unwrap();
        let batch = queue.claim_batch(10).unwrap();
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(queue.in_flight().unwrap(), 1);
        queue.ack(&batch[0]).unwrap();
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_retry_until_dead_letter() {
        let queue = MemoryQueue::new("q", 2);
        queue.push_many(jobs(&["a"])).unwrap();

        let first = queue.claim_batch(1).unwrap().remove(0);
        assert_eq!(queue.retry(&first, "store down").unwrap(), RetryDecision::Requeued);
        let second = queue.claim_batch(1).unwrap().remove(0);
        assert_eq!(second.attempts, 1);
        assert_eq!(queue.retry(&second, "store down").unwrap(), RetryDecision::DeadLettered);

        assert!(queue.is_empty().unwrap());
        let dead = queue.dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].reason, "store down");
    }

    #[test]
    fn test_try_consume_batch_once_routes_failures() {
        let queue = MemoryQueue::new("q", 5);
        queue.push_many(jobs(&["ok", "flaky", "broken"])).unwrap();

        let processed = queue
            .try_consume_batch_once(10, |job| match job.record_id.as_str() {
                "flaky" => Err(SimError::Store("timeout".to_string())),
                "broken" => Err(SimError::MissingOption("cutoff")),
                _ => Ok(()),
            })
            .unwrap();

        assert_eq!(processed, 3);
        assert_eq!(queue.len().unwrap(), 1);
        let dead = queue.dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.record_id, "broken");
        assert_eq!(queue.try_consume_batch_once(10, |_| Ok(())).unwrap(), 1);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_empty_queue_claims_nothing() {
        let queue = MemoryQueue::new("q", 1);
        assert_eq!(queue.try_consume_batch_once(4, |_| Ok(())).unwrap(), 0);
    }

    #[test]
    fn test_job_payload_roundtrip() {
        let job = Job::new("com.example.app", &MatchOptions::new(0.7, 300));
        assert_eq!(Job::decode(&job.encode().unwrap()).unwrap(), job);
    }
}
