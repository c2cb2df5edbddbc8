use clap::Parser;
use simdup::blacklist::BlacklistSource;
use simdup::config::DEFAULT_MIN_COUNT;
use simdup::telemetry::init_tracing;
use simdup::{
    BatchOrchestrator, BatchStatus, FileBlacklistSource, InMemoryGroupStore, InMemoryIndex,
    MatchOptions, MemoryQueue, RecordProcessor, Settings, SignatureFilter, SimError,
    StaticBlacklistSource, WorkerPool,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "simdup_single")]
#[command(about = "Cluster near-duplicate records from a JSONL dump in one process", long_about = None)]
struct Cli {
    /// Records, one JSON object per line
    records: PathBuf,
    /// Jaccard threshold in [0, 1]
    #[arg(long, default_value_t = 0.8)]
    threshold: f64,
    /// Signature truncation cutoff
    #[arg(long, default_value_t = 100)]
    cutoff: u32,
    #[arg(long, default_value_t = DEFAULT_MIN_COUNT)]
    min_count: usize,
    /// Run the whole cutoff x threshold grid instead of one option set
    #[arg(long)]
    all: bool,
    /// Directory of `<family>.blacklist` files (defaults to SIMDUP_BLACKLIST_DIR)
    #[arg(long)]
    blacklists: Option<PathBuf>,
    /// Skip blacklist filtering entirely
    #[arg(long, conflicts_with = "blacklists")]
    no_blacklist: bool,
    /// Output directory for result files (defaults to SIMDUP_MATCHES_DIR)
    #[arg(long)]
    matches: Option<PathBuf>,
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> Result<(), SimError> {
    let _telemetry = init_tracing("simdup-single")?;
    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.blacklists {
        settings.blacklist_dir = dir;
    }
    if let Some(dir) = cli.matches {
        settings.matches_dir = dir;
    }
    if let Some(workers) = cli.workers {
        settings.workers = workers.max(1);
    }

    let index = Arc::new(InMemoryIndex::from_jsonl(&cli.records)?);
    tracing::info!(records = index.len(), path = %cli.records.display(), "loaded records");

    let source: Box<dyn BlacklistSource> = if cli.no_blacklist {
        Box::new(StaticBlacklistSource::new())
    } else {
        Box::new(FileBlacklistSource::new(settings.blacklist_dir.clone()))
    };
    let groups = Arc::new(InMemoryGroupStore::new());
    let processor = Arc::new(RecordProcessor::new(
        index.clone(),
        index.clone(),
        groups.clone(),
        SignatureFilter::new(source),
    ));
    let queue = MemoryQueue::new(&settings.queue_name, settings.max_attempts);
    let pool = WorkerPool::spawn(settings.workers, queue.clone(), processor, settings.poll_interval);

    let orchestrator = BatchOrchestrator::new(index.as_ref(), groups.as_ref(), &queue, &settings);
    let statuses = if cli.all {
        orchestrator.run_all(None)
    } else {
        let mut options = MatchOptions::new(cli.threshold, cli.cutoff);
        options.min_count = cli.min_count;
        orchestrator.run(&options, None).map(|status| vec![status])
    };
    pool.shutdown()?;

    for dead in queue.dead_letters()? {
        tracing::error!(record_id = %dead.job.record_id, attempts = dead.attempts, reason = %dead.reason, "job failed");
    }
    for status in statuses? {
        match status {
            BatchStatus::Skipped { artifact } => println!("skipped {}", artifact.display()),
            BatchStatus::Completed {
                artifact, result, ..
            } => println!(
                "wrote {} ({} resource groups, {} asset hash groups, {} combined groups)",
                artifact.display(),
                result.resources.0.len(),
                result.asset_hashes.0.len(),
                result.all.0.len()
            ),
        }
    }
    Ok(())
}
