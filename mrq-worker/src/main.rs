mod args;
mod broker;
mod runner;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::error;

use common::settings::Settings;

use args::Args;
use runner::Runner;

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

    // The consumer runs for the lifetime of the process; the runner picks
    // up the task stream it opens.
    let listener = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            if let Err(err) = broker.listen().await {
                error!("broker consumer stopped: {err}");
            }
        })
    };
    broker.wait_until_listening().await;

    let runner = Runner::new(state, broker);
    runner.run().await?;

    listener.await?;
    Ok(())
}
