//! The job scheduler: owns the job stream, splits jobs into tasks,
//! publishes them to the broker and drives each job through its map and
//! reduce phases.

use std::sync::Arc;

use futures::future;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use common::pb::datatypes::{Job, JobStatus, Task, TaskKind, TaskStatus};
use common::pb::scheduler::{ClusterInfo, DescribeRequest, Description, ResourceType};
use common::utils::unix_now;
use common::{Error, Result};

use crate::broker::Broker;
use crate::splitting::{self, SplitConfig};
use crate::state::State;

pub struct Scheduler {
    state: Arc<dyn State>,
    broker: Arc<dyn Broker>,
    split_config: SplitConfig,
    jobs: mpsc::UnboundedSender<Job>,
}

impl Scheduler {
    /// Build a scheduler and the receiving half of its job stream. The
    /// caller is expected to hand the receiver to [`Scheduler::process_jobs`].
    pub fn new(
        state: Arc<dyn State>,
        broker: Arc<dyn Broker>,
        split_config: SplitConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Scheduler {
            state,
            broker,
            split_config,
            jobs: tx,
        });
        (scheduler, rx)
    }

    /// Accept a job: assign an id, persist the descriptor and enqueue it
    /// onto the job stream. The send is non-blocking; the stream is
    /// unbounded.
    pub async fn schedule(&self, mut job: Job) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        job.id = id.clone();
        job.status = JobStatus::JobPending as i32;
        job.time_scheduled = unix_now();

        self.state
            .save_job(&job)
            .await
            .map_err(|err| Error::Internal(format!("can't schedule job: {err}")))?;

        self.jobs
            .send(job)
            .map_err(|_| Error::Internal("job stream is closed".to_string()))?;

        Ok(id)
    }

    /// Cancellation of in-flight jobs is not supported; the verb is
    /// reserved so clients get a stable error instead of a silent no-op.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        warn!("rejecting cancel request for job {job_id}");
        Err(Error::Internal(
            "job cancellation is not supported yet".to_string(),
        ))
    }

    /// Answer a describe request from the state store.
    pub async fn describe(&self, request: DescribeRequest) -> Result<Description> {
        let mut description = Description::default();

        match request.resource() {
            ResourceType::Cluster => {
                let jobs = self.state.list_jobs().await?;
                let active = jobs
                    .iter()
                    .filter(|job| {
                        matches!(job.status(), JobStatus::JobPending | JobStatus::JobInProgress)
                    })
                    .count();
                description.cluster = Some(ClusterInfo {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    jobs_total: jobs.len() as u64,
                    jobs_active: active as u64,
                });
            }
            ResourceType::Queue => {
                let mut jobs = self.state.list_jobs().await?;
                jobs.retain(|job| {
                    matches!(job.status(), JobStatus::JobPending | JobStatus::JobInProgress)
                });
                description.jobs = jobs;
            }
            ResourceType::Job => {
                if request.job_id.is_empty() {
                    description.jobs = self.state.list_jobs().await?;
                } else {
                    description.jobs = vec![self.state.load_job(&request.job_id).await?];
                }
            }
            ResourceType::Task => {
                if request.job_id.is_empty() {
                    return Err(Error::InvalidInput(
                        "describing tasks requires a job id".to_string(),
                    ));
                }
                let mut tasks = self.state.load_tasks(&request.job_id).await?;
                if !request.task_id.is_empty() {
                    tasks.retain(|task| task.id == request.task_id);
                }
                description.tasks = tasks;
            }
        }

        Ok(description)
    }

    /// Long-running consumer of the job stream: one concurrent worker task
    /// per job. Never returns while the sending half lives.
    pub async fn process_jobs(self: Arc<Self>, mut jobs: mpsc::UnboundedReceiver<Job>) {
        info!("beginning to listen for jobs");
        while let Some(job) = jobs.recv().await {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                let job_id = job.id.clone();
                if let Err(err) = scheduler.process_job(job).await {
                    error!("error processing job {job_id}: {err}");
                }
            });
        }
    }

    /// Drive one job through splitting, the map phase and the reduce
    /// phase. Any error fails the job; later phases are never entered
    /// after a failure.
    pub(crate) async fn process_job(&self, mut job: Job) -> Result<()> {
        job.status = JobStatus::JobInProgress as i32;
        self.state.save_job(&job).await?;

        if let Err(err) = self.run_phases(&job).await {
            self.fail_job(&mut job, &err).await;
            return Err(err);
        }

        job.status = JobStatus::JobDone as i32;
        job.time_done = unix_now();
        self.state.save_job(&job).await?;
        info!("job {} is done", job.id);
        Ok(())
    }

    async fn run_phases(&self, job: &Job) -> Result<()> {
        let plan = splitting::intermediate_files(job, &self.split_config)?;
        let map_tasks = splitting::map(job, &plan, &self.split_config)?;
        let reduce_tasks = splitting::reduce(job, &plan)?;

        let mut all_tasks = map_tasks.clone();
        all_tasks.extend_from_slice(&reduce_tasks);
        self.state.create_tasks(&all_tasks).await?;

        self.run_phase(job, &map_tasks, TaskKind::Map).await?;
        self.run_phase(job, &reduce_tasks, TaskKind::Reduce).await?;
        Ok(())
    }

    /// Publish every task of one phase, wait for the pending directory to
    /// drain, then check the task records before letting the next phase
    /// start.
    async fn run_phase(&self, job: &Job, tasks: &[Task], kind: TaskKind) -> Result<()> {
        info!("starting {} phase of job {}", kind.phase_name(), job.id);

        let publishes = tasks.iter().map(|task| self.publish_task(task));
        let failed = future::join_all(publishes)
            .await
            .into_iter()
            .filter_map(std::result::Result::err)
            .next();
        if let Some(err) = failed {
            // With no consumer ever seeing the task its marker would stay
            // forever; skip the wait and fail the job now.
            return Err(err);
        }

        self.state.wait_until_tasks_complete(&job.id, kind).await?;

        let records = self.state.load_tasks_of_kind(&job.id, kind).await?;
        if let Some(failed) = records
            .iter()
            .find(|task| task.status() == TaskStatus::TaskFailed)
        {
            return Err(Error::Internal(format!(
                "{} task {} failed: {}",
                kind.phase_name(),
                failed.id,
                failed.failure_details
            )));
        }

        Ok(())
    }

    /// Publish one task. A failed handoff is terminal for the task: its
    /// record is marked failed so describe shows why the job died.
    async fn publish_task(&self, task: &Task) -> Result<()> {
        if let Err(err) = self.broker.send(task).await {
            error!("can't send task {} to broker: {err}", task.id);

            let mut failed = task.clone();
            failed.status = TaskStatus::TaskFailed as i32;
            failed.time_done = unix_now();
            failed.failure_details = err.to_string();
            if let Err(save_err) = self.state.save_task(&failed).await {
                warn!("can't record publish failure for task {}: {save_err}", task.id);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn fail_job(&self, job: &mut Job, err: &Error) {
        job.status = JobStatus::JobFailed as i32;
        job.time_done = unix_now();
        job.failure_details = err.to_string();
        if let Err(save_err) = self.state.save_job(job).await {
            warn!("can't persist failure of job {}: {save_err}", job.id);
        }
    }
}
