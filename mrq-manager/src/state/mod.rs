//! Manager view of the persistent task-state store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use common::pb::datatypes::{Job, Task, TaskKind};
use common::settings::{keys, Settings};
use common::{Error, Result};

mod file;

pub use file::FileStore;

/// Capabilities the scheduler needs from a state backend.
#[async_trait]
pub trait State: Send + Sync {
    /// Persist a job descriptor, creating its directory skeleton on first
    /// save.
    async fn save_job(&self, job: &Job) -> Result<()>;

    /// Persist task records and their pending markers. Fails on the first
    /// error; partial creation is possible and the caller is expected to
    /// fail the job.
    async fn create_tasks(&self, tasks: &[Task]) -> Result<()>;

    /// Overwrite the record of an existing task.
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// Block until the pending directory of the given phase is empty.
    async fn wait_until_tasks_complete(&self, job_id: &str, kind: TaskKind) -> Result<()>;

    /// Read a job descriptor back.
    async fn load_job(&self, job_id: &str) -> Result<Job>;

    /// Read every job descriptor in the store.
    async fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Read every task record of a job.
    async fn load_tasks(&self, job_id: &str) -> Result<Vec<Task>>;

    /// Read the task records of one phase of a job.
    async fn load_tasks_of_kind(&self, job_id: &str, kind: TaskKind) -> Result<Vec<Task>>;
}

/// Build the state backend selected by `state.backend`.
pub fn from_settings(settings: &Settings) -> Result<Arc<dyn State>> {
    match settings.string(keys::STATE_BACKEND)?.as_str() {
        "file" => {
            let location = PathBuf::from(settings.string(keys::STATE_LOCATION)?);
            Ok(Arc::new(FileStore::new(location)?))
        }
        other => Err(Error::InvalidInput(format!(
            "unknown state backend `{other}`"
        ))),
    }
}
