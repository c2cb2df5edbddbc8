pub mod blacklist;
pub mod cluster;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod queue;
pub mod record;
pub mod results;
pub mod retriever;
pub mod scorer;
pub mod search;
pub mod telemetry;
pub mod worker;

#[cfg(feature = "distributed")]
pub mod elastic;
#[cfg(feature = "distributed")]
pub mod pg_queue;
#[cfg(feature = "distributed")]
pub mod pg_store;

pub use blacklist::{BlacklistSource, FileBlacklistSource, SignatureFilter, StaticBlacklistSource};
pub use cluster::{Group, GroupStoreLike, InMemoryGroupStore, MergeOutcome};
pub use config::{MatchOptions, Settings};
pub use error::*;
pub use orchestrator::{BatchOrchestrator, BatchStatus};
pub use processor::{ProcessOutcome, RecordProcessor};
pub use queue::{Job, MemoryQueue, QueueConsumerLike, QueueLenLike, QueueProducerLike};
pub use record::{Match, Namespace, Record, WeightedId};
pub use results::MatchResult;
pub use search::{InMemoryIndex, RecordStoreLike, SearchLike};
pub use worker::{WorkerPool, run_worker, run_worker_once};
