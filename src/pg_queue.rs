use crate::error::SimError;
use crate::queue::{
    Claimed, DeadJob, Job, QueueConsumerLike, QueueLenLike, QueueProducerLike, RetryDecision,
};
use postgres::{Client, NoTls};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS match_jobs (
    ticket     BIGSERIAL PRIMARY KEY,
    queue      TEXT NOT NULL,
    payload    BYTEA NOT NULL,
    attempts   INTEGER NOT NULL DEFAULT 0,
    state      TEXT NOT NULL DEFAULT 'ready',
    claimed_at TIMESTAMPTZ,
    reason     TEXT
);
CREATE INDEX IF NOT EXISTS match_jobs_queue_state ON match_jobs (queue, state, ticket);
";

/// Job queue in a Postgres table. Jobs are claimed with `FOR UPDATE SKIP LOCKED`,
/// so any number of worker processes can share one queue. A claim whose lease
/// runs out counts as a failed attempt and becomes claimable again.
#[derive(Clone)]
pub struct PgJobQueue {
    name: String,
    max_attempts: u32,
    lease: Duration,
    client: Arc<Mutex<Client>>,
}

impl PgJobQueue {
    pub fn connect(url: &str, name: &str, max_attempts: u32, lease: Duration) -> Result<Self, SimError> {
        let mut client = Client::connect(url, NoTls)?;
        client.batch_execute(SCHEMA)?;
        Ok(Self {
            name: name.to_string(),
            max_attempts: max_attempts.max(1),
            lease,
            client: Arc::new(Mutex::new(client)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, Client>, SimError> {
        self.client
            .lock()
            .map_err(|_| SimError::Queue(format!("queue {} client lock poisoned", self.name)))
    }

    /// Returns expired claims to the queue, or dead-letters them when out of attempts.
    pub fn reap_expired(&self) -> Result<u64, SimError> {
        let max_attempts = self.max_attempts as i32;
        let lease = self.lease.as_secs_f64();
        let reaped = self.lock()?.execute(
            "UPDATE match_jobs
             SET attempts = attempts + 1,
                 state = CASE WHEN attempts + 1 >= $2 THEN 'dead' ELSE 'ready' END,
                 claimed_at = NULL,
                 reason = 'lease expired'
             WHERE queue = $1 AND state = 'claimed'
               AND claimed_at < now() - make_interval(secs => $3)",
            &[&self.name, &max_attempts, &lease],
        )?;
        if reaped > 0 {
            tracing::warn!(queue = %self.name, reaped, "reaped expired job leases");
        }
        Ok(reaped)
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadJob>, SimError> {
        let rows = self.lock()?.query(
            "SELECT payload, attempts, reason FROM match_jobs
             WHERE queue = $1 AND state = 'dead' ORDER BY ticket",
            &[&self.name],
        )?;
        rows.iter()
            .map(|row| {
                let payload: Vec<u8> = row.get(0);
                let attempts: i32 = row.get(1);
                let reason: Option<String> = row.get(2);
                Ok(DeadJob {
                    job: Job::decode(&payload)?,
                    attempts: attempts.max(0) as u32,
                    reason: reason.unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Drops every dead-lettered job. Returns how many were removed.
    pub fn purge_dead(&self) -> Result<u64, SimError> {
        Ok(self.lock()?.execute(
            "DELETE FROM match_jobs WHERE queue = $1 AND state = 'dead'",
            &[&self.name],
        )?)
    }
}

impl QueueLenLike for PgJobQueue {
    fn len(&self) -> Result<usize, SimError> {
        let row = self.lock()?.query_one(
            "SELECT count(*) FROM match_jobs WHERE queue = $1 AND state IN ('ready', 'claimed')",
            &[&self.name],
        )?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as usize)
    }
}

impl QueueProducerLike for PgJobQueue {
    fn push_many(&self, jobs: Vec<Job>) -> Result<(), SimError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let payloads = jobs.iter().map(Job::encode).collect::<Result<Vec<_>, _>>()?;
        self.lock()?.execute(
            "INSERT INTO match_jobs (queue, payload) SELECT $1, unnest($2::bytea[])",
            &[&self.name, &payloads],
        )?;
        Ok(())
    }
}

impl QueueConsumerLike for PgJobQueue {
    fn claim_batch(&self, batch_size: usize) -> Result<Vec<Claimed>, SimError> {
        self.reap_expired()?;
        let limit = batch_size as i64;
        let rows = self.lock()?.query(
            "UPDATE match_jobs SET state = 'claimed', claimed_at = now()
             WHERE ticket IN (
                 SELECT ticket FROM match_jobs
                 WHERE queue = $1 AND state = 'ready'
                 ORDER BY ticket
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING ticket, payload, attempts",
            &[&self.name, &limit],
        )?;
        let mut batch = rows
            .iter()
            .map(|row| {
                let payload: Vec<u8> = row.get(1);
                let attempts: i32 = row.get(2);
                Ok(Claimed {
                    ticket: row.get(0),
                    job: Job::decode(&payload)?,
                    attempts: attempts.max(0) as u32,
                })
            })
            .collect::<Result<Vec<_>, SimError>>()?;
        batch.sort_by_key(|c| c.ticket);
        Ok(batch)
    }

    fn ack(&self, claimed: &Claimed) -> Result<(), SimError> {
        self.lock()?
            .execute("DELETE FROM match_jobs WHERE ticket = $1", &[&claimed.ticket])?;
        Ok(())
    }

    fn retry(&self, claimed: &Claimed, reason: &str) -> Result<RetryDecision, SimError> {
        let max_attempts = self.max_attempts as i32;
        let row = self.lock()?.query_opt(
            "UPDATE match_jobs
             SET attempts = attempts + 1,
                 state = CASE WHEN attempts + 1 >= $2 THEN 'dead' ELSE 'ready' END,
                 claimed_at = NULL,
                 reason = $3
             WHERE ticket = $1 AND state = 'claimed'
             RETURNING state",
            &[&claimed.ticket, &max_attempts, &reason],
        )?;
        let Some(row) = row else {
            return Err(SimError::Queue(format!("ticket {} is not claimed", claimed.ticket)));
        };
        let state: String = row.get(0);
        Ok(if state == "dead" {
            RetryDecision::DeadLettered
        } else {
            RetryDecision::Requeued
        })
    }

    fn dead_letter(&self, claimed: &Claimed, reason: &str) -> Result<(), SimError> {
        self.lock()?.execute(
            "UPDATE match_jobs
             SET state = 'dead', attempts = attempts + 1, claimed_at = NULL, reason = $2
             WHERE ticket = $1 AND state = 'claimed'",
            &[&claimed.ticket, &reason],
        )?;
        Ok(())
    }
}
