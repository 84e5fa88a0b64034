mod args;
mod broker;
mod scheduler;
mod server;
mod splitting;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use common::settings::{keys, Settings};

use args::Args;
use scheduler::Scheduler;
use server::{JobSchedulerServer, SchedulerService};
use splitting::SplitConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref(), &args.overrides())
        .context("failed to load settings")?;

    let state = state::from_settings(&settings).context("failed to open state store")?;
    let broker = broker::from_settings(&settings)
        .await
        .context("failed to connect to broker")?;

    let split_config = SplitConfig {
        input_chunk_size: settings.int(keys::INPUT_CHUNK_SIZE)? as u64,
        intermediate_root: PathBuf::from(settings.string(keys::INTERMEDIATE_DATA_LOCATION)?),
    };

    let (scheduler, jobs) = Scheduler::new(state, broker, split_config);
    tokio::spawn(Arc::clone(&scheduler).process_jobs(jobs));

    let addr = format!("[::]:{}", settings.int(keys::SERVER_PORT)?)
        .parse()
        .context("invalid server port")?;
    info!("JobScheduler server listening on {addr}");

    Server::builder()
        .add_service(JobSchedulerServer::new(SchedulerService::new(scheduler)))
        .serve(addr)
        .await?;

    Ok(())
}
