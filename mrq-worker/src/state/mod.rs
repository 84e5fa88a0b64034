//! Worker view of the persistent task-state store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use common::pb::datatypes::Task;
use common::settings::{keys, Settings};
use common::{Error, Result};

mod file;

pub use file::FileStore;

/// The single capability a worker needs: record task progress.
#[async_trait]
pub trait State: Send + Sync {
    /// Overwrite the task's record with its current state. Removing the
    /// pending marker on a DONE save is the worker's only phase-progress
    /// signal, so it happens strictly after the record write.
    ///
    /// Fails with NotFound when the record or marker is missing, which is
    /// how a redelivered, already-completed task announces itself.
    async fn save_progress(&self, task: &Task) -> Result<()>;
}

/// Build the state backend selected by `state.backend`.
pub fn from_settings(settings: &Settings) -> Result<Arc<dyn State>> {
    match settings.string(keys::STATE_BACKEND)?.as_str() {
        "file" => {
            let location = PathBuf::from(settings.string(keys::STATE_LOCATION)?);
            Ok(Arc::new(FileStore::new(location)))
        }
        other => Err(Error::InvalidInput(format!(
            "unknown state backend `{other}`"
        ))),
    }
}
