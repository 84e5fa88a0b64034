//! File-backed state store, worker view.

use std::path::PathBuf;

use async_trait::async_trait;
use prost::Message;
use tokio::fs;
use tracing::{debug, info};

use common::layout;
use common::pb::datatypes::{Task, TaskStatus};
use common::{Error, Result};

use super::State;

pub struct FileStore {
    location: PathBuf,
}

impl FileStore {
    pub fn new(location: PathBuf) -> Self {
        info!("using file backed state at {}", location.display());
        FileStore { location }
    }
}

#[async_trait]
impl State for FileStore {
    async fn save_progress(&self, task: &Task) -> Result<()> {
        let record = layout::task_file(&self.location, &task.job_id, &task.id);
        if !fs::try_exists(&record).await? {
            return Err(Error::NotFound(format!("no record for task {}", task.id)));
        }

        let marker = layout::pending_marker(&self.location, &task.job_id, task.kind(), &task.id);
        if !fs::try_exists(&marker).await? {
            return Err(Error::NotFound(format!(
                "no pending marker for task {}",
                task.id
            )));
        }

        fs::write(&record, task.encode_to_vec()).await?;

        if task.status() == TaskStatus::TaskDone {
            debug!("removing pending marker of finished task {}", task.id);
            fs::remove_file(&marker).await?;
        }

        debug!("successfully saved task {}", task.id);
        Ok(())
    }
}
