//! Path conventions of the file-backed state store.
//!
//! The layout is the rendezvous between manager and workers:
//!
//! ```text
//! <state_root>/jobs/<job_id>/request                   serialized Job
//! <state_root>/jobs/<job_id>/tasks/<task_id>           serialized Task (latest)
//! <state_root>/jobs/<job_id>/pending_map_tasks/<id>    existence = map task pending
//! <state_root>/jobs/<job_id>/pending_reduce_tasks/<id> existence = reduce task pending
//! ```
//!
//! A pending marker is created together with its task and removed only when
//! the task is saved with status DONE. The presence or absence of markers,
//! not the task records, is the canonical signal of phase progress.

use std::path::{Path, PathBuf};

use crate::pb::datatypes::TaskKind;

pub const JOBS_DIR: &str = "jobs";
pub const JOB_REQUEST_FILE: &str = "request";
pub const TASKS_DIR: &str = "tasks";
pub const PENDING_MAP_DIR: &str = "pending_map_tasks";
pub const PENDING_REDUCE_DIR: &str = "pending_reduce_tasks";

/// Directory holding everything the store knows about one job.
pub fn job_dir(root: &Path, job_id: &str) -> PathBuf {
    root.join(JOBS_DIR).join(job_id)
}

/// The serialized job descriptor.
pub fn job_request_file(root: &Path, job_id: &str) -> PathBuf {
    job_dir(root, job_id).join(JOB_REQUEST_FILE)
}

/// Directory of serialized task records for a job.
pub fn tasks_dir(root: &Path, job_id: &str) -> PathBuf {
    job_dir(root, job_id).join(TASKS_DIR)
}

/// The serialized record of a single task.
pub fn task_file(root: &Path, job_id: &str, task_id: &str) -> PathBuf {
    tasks_dir(root, job_id).join(task_id)
}

/// The pending-marker directory for one phase of a job.
pub fn pending_dir(root: &Path, job_id: &str, kind: TaskKind) -> PathBuf {
    let dir = match kind {
        TaskKind::Map => PENDING_MAP_DIR,
        TaskKind::Reduce => PENDING_REDUCE_DIR,
    };
    job_dir(root, job_id).join(dir)
}

/// The pending marker of a single task.
pub fn pending_marker(root: &Path, job_id: &str, kind: TaskKind, task_id: &str) -> PathBuf {
    pending_dir(root, job_id, kind).join(task_id)
}
