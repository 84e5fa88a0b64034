//! Reduce-side splitting: one task per output partition.

use uuid::Uuid;

use common::pb::datatypes::{InputChunk, Job, Task, TaskKind, TaskStatus};
use common::utils::unix_now;
use common::Result;

use super::IntermediatePlan;

/// Produce the reduce tasks of a job: task p reads every intermediate file
/// of partition p (carried as a comma-joined list in the chunk path) and
/// writes the job's p-th output file.
pub fn reduce(job: &Job, plan: &IntermediatePlan) -> Result<Vec<Task>> {
    let tasks = job
        .output_files
        .iter()
        .enumerate()
        .map(|(p, output)| Task {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            kind: TaskKind::Reduce as i32,
            status: TaskStatus::TaskPending as i32,
            input_chunk: Some(InputChunk {
                path: plan.partition(p).join(","),
                start_byte: 0,
                end_byte: 0,
            }),
            payload_path: job.payload_path.clone(),
            output_files: vec![output.clone()],
            time_created: unix_now(),
            ..Default::default()
        })
        .collect();

    Ok(tasks)
}
