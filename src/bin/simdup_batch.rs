use clap::{Parser, Subcommand};
use dotenv::dotenv;
use simdup::config::DEFAULT_MIN_COUNT;
use simdup::elastic::ElasticIndex;
use simdup::pg_queue::PgJobQueue;
use simdup::pg_store::PgGroupStore;
use simdup::telemetry::init_tracing;
use simdup::{BatchOrchestrator, BatchStatus, MatchOptions, Settings, SimError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "simdup_batch")]
#[command(about = "Enqueue a matching batch and wait for the workers to finish it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one option set
    Run {
        #[arg(long)]
        threshold: f64,
        #[arg(long)]
        cutoff: u32,
        #[arg(long, default_value_t = DEFAULT_MIN_COUNT)]
        min_count: usize,
        /// Only these record ids, one per line (defaults to every decompiled record)
        #[arg(long)]
        ids: Option<PathBuf>,
    },
    /// Run every cutoff x threshold combination
    All {
        #[arg(long)]
        ids: Option<PathBuf>,
    },
}

fn read_ids(path: Option<PathBuf>) -> Result<Option<Vec<String>>, SimError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(&path)?;
    Ok(Some(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}

fn main() -> Result<(), SimError> {
    dotenv().ok();
    let _telemetry = init_tracing("simdup-batch")?;
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let search = ElasticIndex::new(settings.require_search_url()?, &settings.search_index)?;
    let groups = PgGroupStore::connect(settings.require_database_url()?)?;
    let queue = PgJobQueue::connect(
        settings.require_database_url()?,
        &settings.queue_name,
        settings.max_attempts,
        settings.job_lease,
    )?;
    let orchestrator = BatchOrchestrator::new(&search, &groups, &queue, &settings);

    let statuses = match cli.command {
        Commands::Run {
            threshold,
            cutoff,
            min_count,
            ids,
        } => {
            let mut options = MatchOptions::new(threshold, cutoff);
            options.min_count = min_count;
            vec![orchestrator.run(&options, read_ids(ids)?)?]
        }
        Commands::All { ids } => orchestrator.run_all(read_ids(ids)?)?,
    };

    for status in statuses {
        match status {
            BatchStatus::Skipped { artifact } => println!("skipped {}", artifact.display()),
            BatchStatus::Completed {
                artifact, records, ..
            } => println!("wrote {} ({} records)", artifact.display(), records),
        }
    }
    let dead = queue.dead_letters()?;
    if !dead.is_empty() {
        tracing::warn!(dead = dead.len(), "some jobs were dead-lettered; see queue_checker");
    }
    Ok(())
}
