use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tonic::Request;

use common::pb::datatypes::{InputKind, Job, JobStatus, TaskStatus};
use common::pb::scheduler::job_scheduler_client::JobSchedulerClient;
use common::pb::scheduler::{CancelRequest, DescribeRequest, ResourceType, ScheduleRequest};

/// Deadline applied to every call; the manager answers scheduling and
/// describe requests from memory and disk, never from a running job.
const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// The job descriptor file accepted by `mrq-ctl schedule`.
#[derive(Debug, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub input_directory: String,
    #[serde(default)]
    pub payload_path: String,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub input_kind: String,
}

/// Load and validate a job descriptor file. Each missing field has its
/// own message so users know exactly what to fix.
pub fn load_job(path: &Path) -> Result<Job> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read job file {}", path.display()))?;
    let file: JobFile = serde_json::from_str(&body)
        .with_context(|| format!("unable to parse job file {}", path.display()))?;

    if file.input_directory.is_empty() {
        bail!("job file is missing `input_directory`");
    }
    if file.payload_path.is_empty() {
        bail!("job file is missing `payload_path`");
    }
    if file.output_files.is_empty() {
        bail!("job file needs at least one entry in `output_files`");
    }
    let input_kind = match file.input_kind.as_str() {
        "text_newlines" => InputKind::TextNewlines,
        "" => bail!("job file is missing `input_kind`"),
        other => bail!("job file has unknown `input_kind` `{other}`"),
    };

    Ok(Job {
        input_directory: file.input_directory,
        payload_path: file.payload_path,
        output_files: file.output_files,
        input_kind: input_kind as i32,
        ..Default::default()
    })
}

fn with_timeout<T>(message: T) -> Request<T> {
    let mut request = Request::new(message);
    request.set_timeout(RPC_TIMEOUT);
    request
}

pub async fn schedule(address: String, job_file: &Path) -> Result<()> {
    let job = load_job(job_file)?;

    let mut client = JobSchedulerClient::connect(address).await?;
    let response = client
        .schedule(with_timeout(ScheduleRequest { job: Some(job) }))
        .await?;

    let job_id = response.into_inner().job_id;
    println!("Successfully scheduled. You can see the job status by running:");
    println!("\tmrq-ctl describe job {job_id}");
    Ok(())
}

pub async fn cancel(address: String, job_id: String) -> Result<()> {
    let mut client = JobSchedulerClient::connect(address).await?;
    client
        .cancel(with_timeout(CancelRequest {
            job_id: job_id.clone(),
        }))
        .await?;

    println!("Job {job_id} successfully cancelled");
    Ok(())
}

pub async fn describe(address: String, request: DescribeRequest) -> Result<()> {
    let resource = request.resource();

    let mut client = JobSchedulerClient::connect(address).await?;
    let description = client.describe(with_timeout(request)).await?.into_inner();

    match resource {
        ResourceType::Cluster => {
            let cluster = description
                .cluster
                .ok_or_else(|| anyhow!("manager returned no cluster information"))?;
            println!("[Cluster]");
            println!("version      {}", cluster.version);
            println!("jobs total   {}", cluster.jobs_total);
            println!("jobs active  {}", cluster.jobs_active);
        }
        ResourceType::Queue | ResourceType::Job => {
            if description.jobs.is_empty() {
                println!("No jobs to display");
                return Ok(());
            }
            println!("[Jobs]");
            for job in description.jobs {
                print_job(&job);
            }
        }
        ResourceType::Task => {
            if description.tasks.is_empty() {
                println!("No tasks to display");
                return Ok(());
            }
            println!("[Tasks]");
            for task in description.tasks {
                let status = task_status_name(task.status());
                println!("{} {:<12} {}", task.id, status, task.kind().phase_name());
            }
        }
    }

    Ok(())
}

fn print_job(job: &Job) {
    println!("{} {:<12}", job.id, job_status_name(job.status()));
    if !job.failure_details.is_empty() {
        println!("\tfailure: {}", job.failure_details);
    }
}

fn job_status_name(status: JobStatus) -> &'static str {
    match status {
        JobStatus::JobPending => "pending",
        JobStatus::JobInProgress => "in progress",
        JobStatus::JobFailed => "failed",
        JobStatus::JobDone => "done",
    }
}

fn task_status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::TaskPending => "pending",
        TaskStatus::TaskInProgress => "in progress",
        TaskStatus::TaskDone => "done",
        TaskStatus::TaskFailed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_job_file(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("job.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn a_complete_job_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_job_file(
            dir.path(),
            r#"{
                "input_directory": "/data/in",
                "payload_path": "/usr/local/bin/wordcount",
                "output_files": ["/data/out/0", "/data/out/1"],
                "input_kind": "text_newlines"
            }"#,
        );

        let job = load_job(&path).unwrap();
        assert_eq!(job.input_directory, "/data/in");
        assert_eq!(job.payload_path, "/usr/local/bin/wordcount");
        assert_eq!(job.output_files.len(), 2);
        assert_eq!(job.input_kind(), InputKind::TextNewlines);
    }

    #[test]
    fn each_missing_field_is_named() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_job_file(dir.path(), r#"{"payload_path": "/p", "output_files": ["/o"], "input_kind": "text_newlines"}"#);
        assert!(load_job(&path).unwrap_err().to_string().contains("input_directory"));

        let path = write_job_file(dir.path(), r#"{"input_directory": "/i", "output_files": ["/o"], "input_kind": "text_newlines"}"#);
        assert!(load_job(&path).unwrap_err().to_string().contains("payload_path"));

        let path = write_job_file(dir.path(), r#"{"input_directory": "/i", "payload_path": "/p", "input_kind": "text_newlines"}"#);
        assert!(load_job(&path).unwrap_err().to_string().contains("output_files"));

        let path = write_job_file(dir.path(), r#"{"input_directory": "/i", "payload_path": "/p", "output_files": ["/o"]}"#);
        assert!(load_job(&path).unwrap_err().to_string().contains("input_kind"));

        let path = write_job_file(dir.path(), r#"{"input_directory": "/i", "payload_path": "/p", "output_files": ["/o"], "input_kind": "parquet"}"#);
        assert!(load_job(&path).unwrap_err().to_string().contains("parquet"));
    }
}
