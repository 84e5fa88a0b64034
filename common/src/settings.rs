//! Layered configuration: built-in defaults, then an optional config file,
//! then command-line overrides (flags win).

use config::{Config, File};

use crate::error::Result;

/// Base name of the optional configuration file looked up in the working
/// directory. Any format the `config` crate understands will match, e.g.
/// `Mrq.toml` or `Mrq.yaml`.
pub const DEFAULT_CONFIG_FILE: &str = "Mrq";

/// Settings keys understood by the cluster binaries.
pub mod keys {
    pub const BROKER_ADDRESS: &str = "broker.address";
    pub const BROKER_QUEUE_NAME: &str = "broker.queue_name";
    pub const STATE_BACKEND: &str = "state.backend";
    pub const STATE_LOCATION: &str = "state.location";
    pub const SERVER_PORT: &str = "server.port";
    pub const INPUT_CHUNK_SIZE: &str = "scheduler.input_chunk_size";
    pub const INTERMEDIATE_DATA_LOCATION: &str = "scheduler.intermediate_data_location";
}

#[derive(Debug, Clone)]
pub struct Settings {
    inner: Config,
}

impl Settings {
    /// Load settings from defaults, the config file and the given
    /// command-line overrides, in increasing priority.
    ///
    /// Overrides with a `None` value are skipped, so callers can pass
    /// their optional clap flags through unchanged.
    pub fn load(
        config_file: Option<&str>,
        overrides: &[(&str, Option<String>)],
    ) -> Result<Settings> {
        let file = config_file.unwrap_or(DEFAULT_CONFIG_FILE);

        let mut builder = Config::builder()
            .set_default(keys::BROKER_ADDRESS, "amqp://127.0.0.1:5672/%2f")?
            .set_default(keys::BROKER_QUEUE_NAME, "heracles_tasks")?
            .set_default(keys::STATE_BACKEND, "file")?
            .set_default(keys::STATE_LOCATION, "/var/lib/mrq/state")?
            .set_default(keys::SERVER_PORT, 8081_i64)?
            // 64 MiB per map chunk.
            .set_default(keys::INPUT_CHUNK_SIZE, 67_108_864_i64)?
            .set_default(keys::INTERMEDIATE_DATA_LOCATION, "/var/lib/mrq/intermediate")?
            .add_source(File::with_name(file).required(config_file.is_some()));

        for (key, value) in overrides {
            builder = builder.set_override_option(*key, value.clone())?;
        }

        Ok(Settings {
            inner: builder.build()?,
        })
    }

    pub fn string(&self, key: &str) -> Result<String> {
        Ok(self.inner.get_string(key)?)
    }

    pub fn int(&self, key: &str) -> Result<i64> {
        Ok(self.inner.get_int(key)?)
    }
}
