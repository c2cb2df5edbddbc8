use clap::Parser;
use dotenv::dotenv;
use simdup::pg_queue::PgJobQueue;
use simdup::{QueueLenLike, Settings, SimError};

#[derive(Parser)]
#[command(name = "queue_checker")]
#[command(about = "Show pending and dead-lettered match jobs", long_about = None)]
struct Cli {
    /// Print every dead-lettered job
    #[arg(long)]
    dead: bool,
    /// Delete dead-lettered jobs after printing the counts
    #[arg(long)]
    purge_dead: bool,
}

fn main() -> Result<(), SimError> {
    dotenv().ok();
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let queue = PgJobQueue::connect(
        settings.require_database_url()?,
        &settings.queue_name,
        settings.max_attempts,
        settings.job_lease,
    )?;

    let dead = queue.dead_letters()?;
    println!("{} pending: {}", queue.name(), queue.len()?);
    println!("{} dead: {}", queue.name(), dead.len());
    if cli.dead {
        for job in &dead {
            println!(
                "  {} (attempts {}, {:?}): {}",
                job.job.record_id, job.attempts, job.job.options, job.reason
            );
        }
    }
    if cli.purge_dead {
        println!("purged {}", queue.purge_dead()?);
    }
    Ok(())
}
