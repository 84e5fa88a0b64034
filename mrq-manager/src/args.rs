use clap::Parser;

use common::settings::keys;

#[derive(Parser, Debug)]
#[command(version, about = "Scheduling service for the mrq cluster", long_about = None)]
pub struct Args {
    /// Path to a configuration file (without extension), overriding the
    /// default `Mrq` lookup in the working directory.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Address of the AMQP broker, e.g. amqp://127.0.0.1:5672/%2f.
    #[arg(long)]
    pub broker_address: Option<String>,

    /// Name of the durable task queue.
    #[arg(long)]
    pub queue_name: Option<String>,

    /// Port for the scheduling RPC server.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Root directory of the file-backed state store.
    #[arg(long)]
    pub state_location: Option<String>,

    /// The size (in bytes) of the chunks created from the input files.
    /// Each chunk corresponds to one map task, so this can be used to
    /// scale the job.
    #[arg(long)]
    pub input_chunk_size: Option<u64>,

    /// Directory receiving intermediate partition files.
    #[arg(long)]
    pub intermediate_location: Option<String>,
}

impl Args {
    /// Settings overrides derived from the flags that were actually given.
    pub fn overrides(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            (keys::BROKER_ADDRESS, self.broker_address.clone()),
            (keys::BROKER_QUEUE_NAME, self.queue_name.clone()),
            (keys::SERVER_PORT, self.port.map(|p| p.to_string())),
            (keys::STATE_LOCATION, self.state_location.clone()),
            (
                keys::INPUT_CHUNK_SIZE,
                self.input_chunk_size.map(|s| s.to_string()),
            ),
            (
                keys::INTERMEDIATE_DATA_LOCATION,
                self.intermediate_location.clone(),
            ),
        ]
    }
}
