//! The task runner: consumes tasks from the broker, executes the payload
//! binary for each and reports the outcome to both the state store and
//! the broker.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use common::pb::datatypes::{Task, TaskKind, TaskStatus};
use common::utils::unix_now;
use common::{Error, Result};

use crate::broker::Broker;
use crate::state::State;

mod io;

/// Whether a delivery resulted in an execution or was recognized as a
/// duplicate of an already-completed task.
enum Handled {
    Executed,
    Duplicate,
}

pub struct Runner {
    state: Arc<dyn State>,
    broker: Arc<dyn Broker>,
}

impl Runner {
    pub fn new(state: Arc<dyn State>, broker: Arc<dyn Broker>) -> Self {
        Runner { state, broker }
    }

    /// Receive tasks until the broker stream closes, handling each one in
    /// its own concurrent task. Fails if the broker is not listening yet.
    pub async fn run(&self) -> Result<()> {
        let mut tasks = self.broker.tasks().await?;
        info!("listening for incoming tasks");

        while let Some(task) = tasks.recv().await {
            info!("got new task {}", task.id);
            let state = Arc::clone(&self.state);
            let broker = Arc::clone(&self.broker);
            tokio::spawn(async move {
                process(state, broker, task).await;
            });
        }

        info!("task stream closed");
        Ok(())
    }
}

/// Handle one delivery end-to-end: execute, then settle with the state
/// store and the broker. Every path acks or nacks exactly once.
async fn process(state: Arc<dyn State>, broker: Arc<dyn Broker>, mut task: Task) {
    match handle_task(state.as_ref(), &mut task).await {
        Ok(Handled::Executed) => {
            if let Err(err) = succeed_task(state.as_ref(), broker.as_ref(), &mut task).await {
                warn!("unable to record success of task {}: {err}", task.id);
                fail_task(state.as_ref(), broker.as_ref(), &mut task, &err).await;
            }
        }
        Ok(Handled::Duplicate) => {
            debug!("task {} already completed, acknowledging redelivery", task.id);
            if let Err(err) = broker.done(&task).await {
                warn!("unable to ack duplicate delivery of task {}: {err}", task.id);
            }
        }
        Err(err) => {
            warn!("unable to run task {}: {err}", task.id);
            fail_task(state.as_ref(), broker.as_ref(), &mut task, &err).await;
        }
    }
}

/// Run the payload for a task and persist its outputs.
///
/// The initial progress save doubles as the duplicate-delivery check: a
/// missing pending marker means a previous delivery already completed
/// this task, and the redelivery must be absorbed, not re-executed.
async fn handle_task(state: &dyn State, task: &mut Task) -> Result<Handled> {
    task.status = TaskStatus::TaskInProgress as i32;
    task.time_started = unix_now();
    match state.save_progress(task).await {
        Ok(()) => {}
        Err(Error::NotFound(_)) => return Ok(Handled::Duplicate),
        Err(err) => return Err(err),
    }

    io::sanity_check(&task.payload_path).await?;

    let chunk = task
        .input_chunk
        .as_ref()
        .ok_or_else(|| Error::InvalidInput(format!("task {} carries no input chunk", task.id)))?;
    let stdin = match task.kind() {
        TaskKind::Map => io::map_stdin(chunk).await?,
        TaskKind::Reduce => io::reduce_stdin(chunk).await?,
    };

    let out = io::run_payload(task, stdin).await?;
    io::save_results(&out, task).await?;

    Ok(Handled::Executed)
}

/// Record completion. The DONE save removes the pending marker, and only
/// then is the broker delivery acknowledged, so marker-absent implies the
/// record is durable.
async fn succeed_task(state: &dyn State, broker: &dyn Broker, task: &mut Task) -> Result<()> {
    task.status = TaskStatus::TaskDone as i32;
    task.time_done = unix_now();
    state.save_progress(task).await?;
    broker.done(task).await
}

/// Record failure (best effort) and hand the task back to the queue for
/// redelivery.
async fn fail_task(state: &dyn State, broker: &dyn Broker, task: &mut Task, err: &Error) {
    task.status = TaskStatus::TaskFailed as i32;
    task.time_done = unix_now();
    task.failure_details = err.to_string();

    if let Err(save_err) = state.save_progress(task).await {
        warn!("unable to save progress of failed task {}: {save_err}", task.id);
    }
    if let Err(nack_err) = broker.failed(task).await {
        error!("unable to tell the broker task {} failed: {nack_err}", task.id);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use prost::Message;
    use tempfile::tempdir;
    use tokio::sync::{mpsc, Mutex};

    use common::layout;

    use crate::state::FileStore;

    use super::*;

    pub(super) fn write_script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[derive(Default)]
    struct MockBroker {
        acked: Mutex<Vec<String>>,
        nacked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn listen(&self) -> Result<()> {
            Ok(())
        }

        async fn wait_until_listening(&self) {}

        async fn tasks(&self) -> Result<mpsc::UnboundedReceiver<Task>> {
            Err(Error::Internal("the broker is not listening".to_string()))
        }

        async fn done(&self, task: &Task) -> Result<()> {
            self.acked.lock().await.push(task.id.clone());
            Ok(())
        }

        async fn failed(&self, task: &Task) -> Result<()> {
            self.nacked.lock().await.push(task.id.clone());
            Ok(())
        }
    }

    const GOOD_PAYLOAD: &str = r#"#!/bin/sh
case "$1" in
  sanity-check) printf 'sanity located';;
  map) cat >/dev/null; printf '{"partitions":{"0":[{"key":"k","value":1}],"1":[{"key":"k","value":2}]}}';;
  reduce) cat;;
esac
"#;

    const INSANE_PAYLOAD: &str = r#"#!/bin/sh
case "$1" in
  sanity-check) printf 'not sane';;
  *) cat >/dev/null;;
esac
"#;

    fn seed_task(root: &Path, task: &Task) {
        std::fs::create_dir_all(layout::tasks_dir(root, &task.job_id)).unwrap();
        std::fs::create_dir_all(layout::pending_dir(root, &task.job_id, task.kind())).unwrap();
        std::fs::write(
            layout::task_file(root, &task.job_id, &task.id),
            task.encode_to_vec(),
        )
        .unwrap();
        std::fs::write(
            layout::pending_marker(root, &task.job_id, task.kind(), &task.id),
            [],
        )
        .unwrap();
    }

    fn load_record(root: &Path, task: &Task) -> Task {
        let bytes = std::fs::read(layout::task_file(root, &task.job_id, &task.id)).unwrap();
        Task::decode(bytes.as_slice()).unwrap()
    }

    fn harness(root: &Path) -> (Arc<dyn State>, Arc<MockBroker>) {
        let state: Arc<dyn State> = Arc::new(FileStore::new(root.to_path_buf()));
        let broker = Arc::new(MockBroker::default());
        (state, broker)
    }

    #[tokio::test]
    async fn map_task_routes_partitions_and_acks() {
        let state_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let payload = write_script(scratch.path(), "payload", GOOD_PAYLOAD);

        let input = scratch.path().join("a.txt");
        std::fs::write(&input, "hello\n").unwrap();
        let outputs = vec![
            scratch.path().join("i0").to_string_lossy().into_owned(),
            scratch.path().join("i1").to_string_lossy().into_owned(),
        ];

        let task = Task {
            id: "m1".to_string(),
            job_id: "j1".to_string(),
            kind: TaskKind::Map as i32,
            payload_path: payload,
            partition_count: 2,
            output_files: outputs.clone(),
            input_chunk: Some(common::pb::datatypes::InputChunk {
                path: input.to_string_lossy().into_owned(),
                start_byte: 0,
                end_byte: 6,
            }),
            ..Default::default()
        };
        seed_task(state_root.path(), &task);

        let (state, broker) = harness(state_root.path());
        process(state, broker.clone(), task.clone()).await;

        assert_eq!(
            std::fs::read_to_string(&outputs[0]).unwrap(),
            r#"[{"key":"k","value":1}]"#
        );
        assert_eq!(
            std::fs::read_to_string(&outputs[1]).unwrap(),
            r#"[{"key":"k","value":2}]"#
        );

        // Marker gone, record durable and DONE, delivery acked exactly once.
        let marker =
            layout::pending_marker(state_root.path(), "j1", TaskKind::Map, "m1");
        assert!(!marker.exists());
        let record = load_record(state_root.path(), &task);
        assert_eq!(record.status(), TaskStatus::TaskDone);
        assert!(record.time_done >= record.time_started);
        assert_eq!(*broker.acked.lock().await, vec!["m1".to_string()]);
        assert!(broker.nacked.lock().await.is_empty());
    }

    #[tokio::test]
    async fn reduce_task_writes_grouped_output_verbatim() {
        let state_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let payload = write_script(scratch.path(), "payload", GOOD_PAYLOAD);

        let first = scratch.path().join("p0-a");
        let second = scratch.path().join("p0-b");
        std::fs::write(&first, r#"[{"key":"w","value":1}]"#).unwrap();
        std::fs::write(&second, r#"[{"key":"w","value":2},{"key":"x","value":9}]"#).unwrap();
        let output = scratch.path().join("out").to_string_lossy().into_owned();

        let task = Task {
            id: "r1".to_string(),
            job_id: "j1".to_string(),
            kind: TaskKind::Reduce as i32,
            payload_path: payload,
            output_files: vec![output.clone()],
            input_chunk: Some(common::pb::datatypes::InputChunk {
                path: format!("{},{}", first.display(), second.display()),
                start_byte: 0,
                end_byte: 0,
            }),
            ..Default::default()
        };
        seed_task(state_root.path(), &task);

        let (state, broker) = harness(state_root.path());
        process(state, broker.clone(), task).await;

        // The payload is `cat`, so the output file holds the grouped stdin.
        let body = std::fs::read_to_string(&output).unwrap();
        let mut groups: Vec<common::codec::ReduceGroup> =
            serde_json::from_str(&body).unwrap();
        groups.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(groups[0].key, "w");
        assert_eq!(groups[0].values.len(), 2);
        assert_eq!(groups[1].key, "x");
        assert_eq!(groups[1].values.len(), 1);
        assert_eq!(*broker.acked.lock().await, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn failed_sanity_check_nacks_and_keeps_the_marker() {
        let state_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let payload = write_script(scratch.path(), "payload", INSANE_PAYLOAD);

        let input = scratch.path().join("a.txt");
        std::fs::write(&input, "hello\n").unwrap();

        let task = Task {
            id: "m1".to_string(),
            job_id: "j1".to_string(),
            kind: TaskKind::Map as i32,
            payload_path: payload,
            partition_count: 1,
            output_files: vec![scratch.path().join("i0").to_string_lossy().into_owned()],
            input_chunk: Some(common::pb::datatypes::InputChunk {
                path: input.to_string_lossy().into_owned(),
                start_byte: 0,
                end_byte: 0,
            }),
            ..Default::default()
        };
        seed_task(state_root.path(), &task);

        let (state, broker) = harness(state_root.path());
        process(state, broker.clone(), task.clone()).await;

        // Failure is recorded, the marker survives and the broker got a
        // nack so the task will be redelivered.
        let record = load_record(state_root.path(), &task);
        assert_eq!(record.status(), TaskStatus::TaskFailed);
        assert!(!record.failure_details.is_empty());
        let marker =
            layout::pending_marker(state_root.path(), "j1", TaskKind::Map, "m1");
        assert!(marker.exists());
        assert!(broker.acked.lock().await.is_empty());
        assert_eq!(*broker.nacked.lock().await, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acked_without_execution() {
        let state_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let payload = write_script(scratch.path(), "payload", GOOD_PAYLOAD);

        // No record and no marker: a previous delivery completed this task
        // and an administrative sweep could even have removed the job.
        let task = Task {
            id: "m1".to_string(),
            job_id: "j1".to_string(),
            kind: TaskKind::Map as i32,
            payload_path: payload,
            ..Default::default()
        };

        let (state, broker) = harness(state_root.path());
        process(state, broker.clone(), task).await;

        assert_eq!(*broker.acked.lock().await, vec!["m1".to_string()]);
        assert!(broker.nacked.lock().await.is_empty());
    }
}
