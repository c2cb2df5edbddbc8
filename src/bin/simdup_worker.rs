use dotenv::dotenv;
use simdup::elastic::ElasticIndex;
use simdup::pg_queue::PgJobQueue;
use simdup::pg_store::PgGroupStore;
use simdup::telemetry::init_tracing;
use simdup::{FileBlacklistSource, RecordProcessor, Settings, SignatureFilter, SimError, WorkerPool};
use std::sync::Arc;

fn main() -> Result<(), SimError> {
    dotenv().ok();
    let _telemetry = init_tracing("simdup-worker")?;
    let settings = Settings::from_env()?;

    let search = Arc::new(ElasticIndex::new(settings.require_search_url()?, &settings.search_index)?);
    let groups = Arc::new(PgGroupStore::connect(settings.require_database_url()?)?);
    let queue = PgJobQueue::connect(
        settings.require_database_url()?,
        &settings.queue_name,
        settings.max_attempts,
        settings.job_lease,
    )?;
    let processor = Arc::new(RecordProcessor::new(
        search.clone(),
        search,
        groups,
        SignatureFilter::new(Box::new(FileBlacklistSource::new(settings.blacklist_dir.clone()))),
    ));

    tracing::info!(queue = queue.name(), workers = settings.workers, "worker started");
    let pool = WorkerPool::spawn(settings.workers, queue, processor, settings.poll_interval);
    pool.join()
}
