use crate::cluster::GroupStoreLike;
use crate::config::{BATCH_CUTOFFS, BATCH_THRESHOLDS, MatchOptions, Settings};
use crate::error::SimError;
use crate::queue::{Job, QueueProducerLike};
use crate::record::Namespace;
use crate::results::MatchResult;
use crate::search::SearchLike;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    /// An artifact for this option set already exists.
    Skipped { artifact: PathBuf },
    Completed {
        artifact: PathBuf,
        records: usize,
        result: MatchResult,
    },
}

/// Fans a batch out over the work queue, waits for it to drain and persists the groups.
pub struct BatchOrchestrator<'a, Q: QueueProducerLike> {
    search: &'a dyn SearchLike,
    groups: &'a dyn GroupStoreLike,
    queue: &'a Q,
    matches_dir: PathBuf,
    poll_interval: Duration,
    stall_timeout: Option<Duration>,
}

impl<'a, Q: QueueProducerLike> BatchOrchestrator<'a, Q> {
    pub fn new(
        search: &'a dyn SearchLike,
        groups: &'a dyn GroupStoreLike,
        queue: &'a Q,
        settings: &Settings,
    ) -> Self {
        Self {
            search,
            groups,
            queue,
            matches_dir: settings.matches_dir.clone(),
            poll_interval: settings.poll_interval,
            stall_timeout: settings.stall_timeout,
        }
    }

    pub fn artifact_path(&self, options: &MatchOptions) -> Result<PathBuf, SimError> {
        Ok(self.matches_dir.join(options.artifact_name()?))
    }

    pub fn run(
        &self,
        options: &MatchOptions,
        ids: Option<Vec<String>>,
    ) -> Result<BatchStatus, SimError> {
        let artifact = self.artifact_path(options)?;
        if artifact.exists() {
            tracing::info!(artifact = %artifact.display(), ?options, "skipping, already computed");
            return Ok(BatchStatus::Skipped { artifact });
        }

        let ids = match ids {
            Some(ids) => ids,
            None => self.search.eligible_ids()?,
        };

        let pending = self.queue.len()?;
        if pending != 0 {
            return Err(SimError::QueueNotEmpty(pending));
        }
        self.groups.clear()?;

        let total = ids.len();
        tracing::info!(?options, records = total, "processing batch");
        let jobs = ids.iter().map(|id| Job::new(id, options)).collect();
        self.queue.push_many(jobs)?;

        self.wait_for_drain(total)?;

        let result = MatchResult::collect(self.groups)?;
        result.write_atomic(&artifact)?;
        for namespace in Namespace::ALL {
            tracing::info!(
                namespace = namespace.artifact_key(),
                groups = result.namespace(namespace).len(),
                "groups collected"
            );
        }
        tracing::info!(artifact = %artifact.display(), "batch complete");
        Ok(BatchStatus::Completed {
            artifact,
            records: total,
            result,
        })
    }

    /// Every cutoff, strictest threshold first. Ids are fetched once for the whole grid.
    pub fn run_all(&self, ids: Option<Vec<String>>) -> Result<Vec<BatchStatus>, SimError> {
        let ids = match ids {
            Some(ids) => ids,
            None => self.search.eligible_ids()?,
        };
        let mut statuses = Vec::new();
        for cutoff in BATCH_CUTOFFS {
            for threshold in BATCH_THRESHOLDS {
                let options = MatchOptions::new(threshold, cutoff);
                statuses.push(self.run(&options, Some(ids.clone()))?);
            }
        }
        Ok(statuses)
    }

    /// Polls the queue until nothing is pending. With a stall timeout set, gives
    /// up once the pending count has not dropped for that long.
    pub fn wait_for_drain(&self, total: usize) -> Result<(), SimError> {
        let started = Instant::now();
        let mut last_pending = usize::MAX;
        let mut last_progress = Instant::now();
        loop {
            let pending = self.queue.len()?;
            if pending == 0 {
                tracing::info!(total, elapsed_secs = started.elapsed().as_secs(), "queue drained");
                return Ok(());
            }
            if pending < last_pending {
                tracing::info!(
                    done = total.saturating_sub(pending),
                    total,
                    pending,
                    "matching"
                );
                last_pending = pending;
                last_progress = Instant::now();
            } else if let Some(timeout) = self.stall_timeout {
                let waited = last_progress.elapsed();
                if waited >= timeout {
                    return Err(SimError::Stalled {
                        pending,
                        waited_secs: waited.as_secs(),
                    });
                }
            }
            thread::sleep(self.poll_interval);
        }
    }
}
