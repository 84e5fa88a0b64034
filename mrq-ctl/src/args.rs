use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Control CLI for the mrq cluster", long_about = None)]
pub struct Args {
    /// Address of the manager's scheduling RPC server.
    #[arg(short, long, default_value = "http://[::1]:8081", env = "MRQ_MANAGER")]
    pub manager: String,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Schedule a job described by a JSON job file.
    Schedule {
        /// Load the job description from FILE.
        #[arg(short = 'f', long = "job-file")]
        job_file: PathBuf,
    },
    /// Cancel a job.
    Cancel {
        /// The id the job was scheduled under.
        job_id: String,
    },
    /// Describe a resource in the cluster.
    #[command(subcommand)]
    Describe(DescribeCommand),
}

#[derive(Subcommand, Debug)]
pub enum DescribeCommand {
    /// Information about the cluster as a whole.
    Cluster,
    /// The jobs currently queued or running.
    Queue,
    /// One job, or every job known to the manager.
    Job {
        /// Limit the listing to a specific job.
        job_id: Option<String>,
    },
    /// The tasks of a job.
    Task {
        /// The job whose tasks to list.
        #[arg(long)]
        job: String,
        /// Limit the listing to a specific task.
        task_id: Option<String>,
    },
}

/// Parse the user-specified command.
pub fn parse_args() -> Args {
    Args::parse()
}
