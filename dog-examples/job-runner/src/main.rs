use anyhow::Result;
use dog_jobs::prelude::*;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = QueueConfig::from_env()?;
    info!(
        database_url = %config.database_url,
        workers = config.workers,
        "[job-runner] starting"
    );

    let runner = job_runner::JobRunner::new(config).await?;

    if std::env::args().any(|arg| arg == "--seed") {
        runner.seed_demo_jobs().await?;
    }

    let shutdown = CancellationToken::new();
    let events = runner.spawn_event_logger(shutdown.clone());
    let (workers, reaper) = runner.start(shutdown.clone()).await?;

    tokio::signal::ctrl_c().await?;
    info!("[job-runner] shutting down, waiting for in-flight jobs");

    workers.shutdown().await?;
    if let Some(reaper) = reaper {
        reaper.await?;
    }
    events.await?;

    let metrics = runner.observability().metrics().snapshot();
    info!(
        enqueued = metrics.global.jobs_enqueued,
        succeeded = metrics.global.jobs_succeeded,
        retried = metrics.global.jobs_retried,
        dead = metrics.global.jobs_dead,
        "[job-runner] stopped"
    );

    Ok(())
}
