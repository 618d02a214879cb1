mod aggregator;
mod batch;
mod cli;
mod config;
mod error;
mod fetcher;
mod notifier;
mod orchestrator;
mod persistence;
mod pool;
mod server;
mod state_machine;
mod storage;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use cli::{Cli, Command};
use config::BatchConfig;
use orchestrator::BatchOrchestrator;
use pool::{ImageRecompressor, TransformPool};
use state_machine::JobState;
use storage::{FileRecordStore, LocalBlobStore, RecordStore};
use ui::JobProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = BatchConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            let pool = start_pool(&config);
            let orchestrator = BatchOrchestrator::from_config(&config, Arc::clone(&pool))?;
            let served = server::serve(&addr, orchestrator).await;
            pool.shutdown().await;
            served.with_context(|| format!("HTTP service on {addr} failed"))?;
            info!("Stopped");
        }
        Command::Submit { table, callback } => {
            let bytes = tokio::fs::read(&table)
                .await
                .with_context(|| format!("failed to read {}", table.display()))?;

            let pool = start_pool(&config);
            let orchestrator =
                BatchOrchestrator::from_config(&config, Arc::clone(&pool))?.with_optional_callback();
            let submission = orchestrator.accept(&bytes, callback).await?;

            let progress = JobProgress::start(
                &submission.job.id,
                submission.job.items.len(),
                submission.job.reference_count(),
            );
            let record = orchestrator.run(submission).await;
            pool.shutdown().await;
            progress.complete(&record);
            ui::print_record(&record);

            if record.state == JobState::Failed {
                bail!("job {} failed", record.job_id);
            }
        }
        Command::Status { job_id } => {
            let records = FileRecordStore::new(config.record_dir());
            match records.status(&job_id).await? {
                Some(record) => {
                    ui::print_record(&record);
                    ui::print_items(&records.items(&job_id).await?);
                }
                None => bail!("job {job_id} not found"),
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn start_pool(config: &BatchConfig) -> Arc<TransformPool> {
    let blobs = LocalBlobStore::new(config.blob_dir())
        .with_public_base_url(config.public_base_url.clone());
    let recompressor = ImageRecompressor::new(config.quality);
    info!(
        storage = %blobs.root().display(),
        quality = recompressor.quality(),
        "Starting transform pool"
    );
    Arc::new(TransformPool::start(
        config.pool_size,
        Arc::new(recompressor),
        Arc::new(blobs),
    ))
}
