mod args;
mod core;

use args::{parse_args, Commands, DescribeCommand};

use common::pb::scheduler::{DescribeRequest, ResourceType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let manager = args.manager;

    match args.command {
        Commands::Schedule { job_file } => core::schedule(manager, &job_file).await?,
        Commands::Cancel { job_id } => core::cancel(manager, job_id).await?,
        Commands::Describe(describe) => {
            let request = match describe {
                DescribeCommand::Cluster => DescribeRequest {
                    resource: ResourceType::Cluster as i32,
                    ..Default::default()
                },
                DescribeCommand::Queue => DescribeRequest {
                    resource: ResourceType::Queue as i32,
                    ..Default::default()
                },
                DescribeCommand::Job { job_id } => DescribeRequest {
                    resource: ResourceType::Job as i32,
                    job_id: job_id.unwrap_or_default(),
                    ..Default::default()
                },
                DescribeCommand::Task { job, task_id } => DescribeRequest {
                    resource: ResourceType::Task as i32,
                    job_id: job,
                    task_id: task_id.unwrap_or_default(),
                },
            };
            core::describe(manager, request).await?;
        }
    }

    Ok(())
}
