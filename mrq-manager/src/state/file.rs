//! File-backed state store, manager view.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::{RecursiveMode, Watcher};
use prost::Message;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::layout;
use common::pb::datatypes::{Job, Task, TaskKind};
use common::{Error, Result};

use super::State;

/// How often the pending directory is re-listed even without a filesystem
/// event, to tolerate dropped notifications.
const RELIST_INTERVAL: Duration = Duration::from_secs(2);

pub struct FileStore {
    location: PathBuf,
}

impl FileStore {
    pub fn new(location: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(location.join(layout::JOBS_DIR))?;
        info!("using file backed state at {}", location.display());
        Ok(FileStore { location })
    }

    async fn write_job(&self, job_dir: &Path, job: &Job) -> Result<()> {
        fs::create_dir_all(job_dir.join(layout::TASKS_DIR)).await?;
        fs::create_dir_all(job_dir.join(layout::PENDING_MAP_DIR)).await?;
        fs::create_dir_all(job_dir.join(layout::PENDING_REDUCE_DIR)).await?;
        fs::write(job_dir.join(layout::JOB_REQUEST_FILE), job.encode_to_vec()).await?;
        Ok(())
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        let record = layout::task_file(&self.location, &task.job_id, &task.id);
        fs::write(&record, task.encode_to_vec()).await?;

        let marker = layout::pending_marker(&self.location, &task.job_id, task.kind(), &task.id);
        fs::write(&marker, []).await?;
        Ok(())
    }

    async fn dir_is_empty(dir: &Path) -> Result<bool> {
        let mut entries = fs::read_dir(dir).await?;
        Ok(entries.next_entry().await?.is_none())
    }

    async fn decode_tasks(&self, dir: PathBuf) -> Result<Vec<Task>> {
        let mut entries = fs::read_dir(&dir).await.map_err(|err| {
            Error::NotFound(format!("can't list tasks in {}: {err}", dir.display()))
        })?;

        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let bytes = fs::read(entry.path()).await?;
            tasks.push(Task::decode(bytes.as_slice())?);
        }
        Ok(tasks)
    }
}

#[async_trait]
impl State for FileStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        debug!("saving job {}", job.id);
        let job_dir = layout::job_dir(&self.location, &job.id);

        if let Err(err) = self.write_job(&job_dir, job).await {
            // Leave no half-created job directory behind.
            if let Err(cleanup) = fs::remove_dir_all(&job_dir).await {
                warn!("can't remove job directory {}: {cleanup}", job_dir.display());
            }
            return Err(err);
        }

        debug!("successfully saved job {}", job.id);
        Ok(())
    }

    async fn create_tasks(&self, tasks: &[Task]) -> Result<()> {
        for task in tasks {
            self.create_task(task).await?;
        }
        Ok(())
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let record = layout::task_file(&self.location, &task.job_id, &task.id);
        if !fs::try_exists(&record).await? {
            return Err(Error::NotFound(format!("no record for task {}", task.id)));
        }
        fs::write(&record, task.encode_to_vec()).await?;
        Ok(())
    }

    async fn wait_until_tasks_complete(&self, job_id: &str, kind: TaskKind) -> Result<()> {
        let pending = layout::pending_dir(&self.location, job_id, kind);

        // Bridge filesystem events onto a channel this task can await.
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(
            move |event: std::result::Result<notify::Event, notify::Error>| match event {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(err) => warn!("pending directory watcher error: {err}"),
            },
        )
        .map_err(|err| Error::Internal(format!("can't create watcher: {err}")))?;
        watcher
            .watch(&pending, RecursiveMode::NonRecursive)
            .map_err(|err| Error::Internal(format!("can't watch {}: {err}", pending.display())))?;

        debug!("watching {} for changes", pending.display());

        let mut ticker = tokio::time::interval(RELIST_INTERVAL);
        loop {
            // Both the watcher and the timer funnel into the same re-list,
            // so a dropped event only costs one interval of latency.
            if Self::dir_is_empty(&pending).await? {
                return Ok(());
            }
            tokio::select! {
                _ = events.recv() => {}
                _ = ticker.tick() => {}
            }
        }
    }

    async fn load_job(&self, job_id: &str) -> Result<Job> {
        let request = layout::job_request_file(&self.location, job_id);
        let bytes = fs::read(&request)
            .await
            .map_err(|err| Error::NotFound(format!("no descriptor for job {job_id}: {err}")))?;
        Ok(Job::decode(bytes.as_slice())?)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let jobs_dir = self.location.join(layout::JOBS_DIR);
        let mut entries = fs::read_dir(&jobs_dir).await?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let job_id = entry.file_name().to_string_lossy().into_owned();
            match self.load_job(&job_id).await {
                Ok(job) => jobs.push(job),
                // A job directory being created concurrently may not have
                // its descriptor yet.
                Err(Error::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(jobs)
    }

    async fn load_tasks(&self, job_id: &str) -> Result<Vec<Task>> {
        self.decode_tasks(layout::tasks_dir(&self.location, job_id))
            .await
    }

    async fn load_tasks_of_kind(&self, job_id: &str, kind: TaskKind) -> Result<Vec<Task>> {
        let mut tasks = self.load_tasks(job_id).await?;
        tasks.retain(|task| task.kind() == kind);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use common::pb::datatypes::TaskStatus;

    use super::*;

    fn store(root: &Path) -> FileStore {
        FileStore::new(root.to_path_buf()).unwrap()
    }

    fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            input_directory: "/in".to_string(),
            payload_path: "/bin/payload".to_string(),
            output_files: vec!["/out/0".to_string()],
            ..Default::default()
        }
    }

    fn task(id: &str, job_id: &str, kind: TaskKind) -> Task {
        Task {
            id: id.to_string(),
            job_id: job_id.to_string(),
            kind: kind as i32,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn save_job_builds_the_directory_skeleton() {
        let root = tempdir().unwrap();
        let store = store(root.path());

        store.save_job(&job("j1")).await.unwrap();

        let job_dir = root.path().join("jobs/j1");
        assert!(job_dir.join("tasks").is_dir());
        assert!(job_dir.join("pending_map_tasks").is_dir());
        assert!(job_dir.join("pending_reduce_tasks").is_dir());

        let restored = store.load_job("j1").await.unwrap();
        assert_eq!(restored, job("j1"));
    }

    #[tokio::test]
    async fn create_tasks_writes_records_and_markers() {
        let root = tempdir().unwrap();
        let store = store(root.path());
        store.save_job(&job("j1")).await.unwrap();

        let tasks = vec![
            task("m1", "j1", TaskKind::Map),
            task("r1", "j1", TaskKind::Reduce),
        ];
        store.create_tasks(&tasks).await.unwrap();

        let job_dir = root.path().join("jobs/j1");
        assert!(job_dir.join("tasks/m1").is_file());
        assert!(job_dir.join("tasks/r1").is_file());
        assert!(job_dir.join("pending_map_tasks/m1").is_file());
        assert!(job_dir.join("pending_reduce_tasks/r1").is_file());

        let map_tasks = store.load_tasks_of_kind("j1", TaskKind::Map).await.unwrap();
        assert_eq!(map_tasks.len(), 1);
        assert_eq!(map_tasks[0].id, "m1");
    }

    #[tokio::test]
    async fn save_task_requires_an_existing_record() {
        let root = tempdir().unwrap();
        let store = store(root.path());
        store.save_job(&job("j1")).await.unwrap();

        let mut t = task("m1", "j1", TaskKind::Map);
        let err = store.save_task(&t).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        store.create_tasks(std::slice::from_ref(&t)).await.unwrap();
        t.status = TaskStatus::TaskFailed as i32;
        store.save_task(&t).await.unwrap();

        let tasks = store.load_tasks("j1").await.unwrap();
        assert_eq!(tasks[0].status(), TaskStatus::TaskFailed);
    }

    #[tokio::test]
    async fn wait_returns_once_markers_are_gone() {
        let root = tempdir().unwrap();
        let store = store(root.path());
        store.save_job(&job("j1")).await.unwrap();

        let tasks = vec![
            task("m1", "j1", TaskKind::Map),
            task("m2", "j1", TaskKind::Map),
        ];
        store.create_tasks(&tasks).await.unwrap();

        let m1 = root.path().join("jobs/j1/pending_map_tasks/m1");
        let m2 = root.path().join("jobs/j1/pending_map_tasks/m2");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::remove_file(m1).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::remove_file(m2).unwrap();
        });

        tokio::time::timeout(
            Duration::from_secs(10),
            store.wait_until_tasks_complete("j1", TaskKind::Map),
        )
        .await
        .expect("phase wait timed out")
        .unwrap();
    }

    #[tokio::test]
    async fn wait_returns_immediately_on_an_empty_directory() {
        let root = tempdir().unwrap();
        let store = store(root.path());
        store.save_job(&job("j1")).await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(1),
            store.wait_until_tasks_complete("j1", TaskKind::Reduce),
        )
        .await
        .expect("phase wait timed out")
        .unwrap();
    }
}
