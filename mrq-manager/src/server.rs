//! The scheduling RPC surface, a thin shim over [`Scheduler`].

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::info;

use common::pb::datatypes::{InputKind, Job};
use common::pb::scheduler::job_scheduler_server::JobScheduler;
pub use common::pb::scheduler::job_scheduler_server::JobSchedulerServer;
use common::pb::scheduler::{
    CancelRequest, CancelResponse, DescribeRequest, Description, ScheduleRequest, ScheduleResponse,
};
use common::{Error, Result};

use crate::scheduler::Scheduler;

pub struct SchedulerService {
    scheduler: Arc<Scheduler>,
}

impl SchedulerService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        SchedulerService { scheduler }
    }
}

#[tonic::async_trait]
impl JobScheduler for SchedulerService {
    async fn schedule(
        &self,
        request: Request<ScheduleRequest>,
    ) -> std::result::Result<Response<ScheduleResponse>, Status> {
        info!("[REQUEST] SCHEDULE from {:?}", request.remote_addr());

        let job = request
            .into_inner()
            .job
            .ok_or_else(|| Status::invalid_argument("schedule request carries no job"))?;
        validate_job(&job).map_err(|err| Status::invalid_argument(err.to_string()))?;

        let job_id = self
            .scheduler
            .schedule(job)
            .await
            .map_err(|err| Status::internal(err.to_string()))?;

        Ok(Response::new(ScheduleResponse { job_id }))
    }

    async fn cancel(
        &self,
        request: Request<CancelRequest>,
    ) -> std::result::Result<Response<CancelResponse>, Status> {
        info!("[REQUEST] CANCEL from {:?}", request.remote_addr());

        let job_id = request.into_inner().job_id;
        match self.scheduler.cancel(&job_id) {
            Ok(()) => Ok(Response::new(CancelResponse {})),
            Err(err) => Err(Status::unimplemented(err.to_string())),
        }
    }

    async fn describe(
        &self,
        request: Request<DescribeRequest>,
    ) -> std::result::Result<Response<Description>, Status> {
        info!("[REQUEST] DESCRIBE from {:?}", request.remote_addr());

        let description = self
            .scheduler
            .describe(request.into_inner())
            .await
            .map_err(|err| match err {
                Error::InvalidInput(msg) => Status::invalid_argument(msg),
                Error::NotFound(msg) => Status::not_found(msg),
                other => Status::internal(other.to_string()),
            })?;

        Ok(Response::new(description))
    }
}

/// Acceptance checks for a submitted job; each field gets its own message.
fn validate_job(job: &Job) -> Result<()> {
    if job.input_directory.is_empty() {
        return Err(Error::InvalidInput(
            "job is missing an input directory".to_string(),
        ));
    }
    if job.payload_path.is_empty() {
        return Err(Error::InvalidInput(
            "job is missing a payload path".to_string(),
        ));
    }
    if job.output_files.is_empty() {
        return Err(Error::InvalidInput(
            "job needs at least one output file".to_string(),
        ));
    }
    if job.input_kind() == InputKind::Undefined {
        return Err(Error::InvalidInput(
            "job input kind cannot be undefined".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_job() -> Job {
        Job {
            input_directory: "/in".to_string(),
            payload_path: "/bin/payload".to_string(),
            input_kind: InputKind::TextNewlines as i32,
            output_files: vec!["/out/0".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn each_missing_field_gets_its_own_message() {
        assert!(validate_job(&valid_job()).is_ok());

        let mut job = valid_job();
        job.input_directory.clear();
        let err = validate_job(&job).unwrap_err();
        assert!(err.to_string().contains("input directory"));

        let mut job = valid_job();
        job.payload_path.clear();
        let err = validate_job(&job).unwrap_err();
        assert!(err.to_string().contains("payload path"));

        let mut job = valid_job();
        job.output_files.clear();
        let err = validate_job(&job).unwrap_err();
        assert!(err.to_string().contains("output file"));

        let mut job = valid_job();
        job.input_kind = InputKind::Undefined as i32;
        let err = validate_job(&job).unwrap_err();
        assert!(err.to_string().contains("input kind"));
    }
}
