//! Decomposition of a job into map tasks, reduce tasks and the plan of
//! intermediate files connecting the two phases.

use std::fs;
use std::path::PathBuf;

use uuid::Uuid;

use common::pb::datatypes::Job;
use common::{Error, Result};

mod map;
mod reduce;

pub use map::{map, split_text_file};
pub use reduce::reduce;

/// Splitter knobs taken from the settings at startup.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Maximum size in bytes of a single map input chunk.
    pub input_chunk_size: u64,

    /// Directory receiving the per-job intermediate partition files.
    pub intermediate_root: PathBuf,
}

/// The intermediate-file plan of one job: for every partition p, one
/// pre-reserved file path per input chunk. The map task working on chunk i
/// writes partition p into `partition(p)[i]`; the reduce task of partition
/// p reads all of `partition(p)`.
#[derive(Debug, Clone)]
pub struct IntermediatePlan {
    partitions: Vec<Vec<String>>,
}

impl IntermediatePlan {
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Number of input chunks the plan was sized for.
    pub fn chunk_count(&self) -> usize {
        self.partitions.first().map_or(0, Vec::len)
    }

    /// Every intermediate file of one partition, in chunk order.
    pub fn partition(&self, p: usize) -> &[String] {
        &self.partitions[p]
    }

    /// The output files of the map task for chunk i: one intermediate file
    /// per partition, in partition order.
    pub fn chunk_outputs(&self, i: usize) -> Vec<String> {
        self.partitions.iter().map(|files| files[i].clone()).collect()
    }
}

/// Reserve the intermediate files for a job and create their partition
/// directories eagerly, so workers can write without racing on mkdir.
///
/// The returned plan has one unique path per (partition, chunk) pair.
/// Chunk enumeration is deterministic, so [`map`] arrives at the same
/// chunk order when it lists the input directory again.
pub fn intermediate_files(job: &Job, config: &SplitConfig) -> Result<IntermediatePlan> {
    let chunks = map::enumerate_chunks(job, config)?;
    let job_dir = config.intermediate_root.join(&job.id);

    let mut partitions = Vec::with_capacity(job.output_files.len());
    for p in 0..job.output_files.len() {
        let partition_dir = job_dir.join(p.to_string());
        fs::create_dir_all(&partition_dir)?;

        let files = chunks
            .iter()
            .map(|_| {
                partition_dir
                    .join(Uuid::new_v4().to_string())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        partitions.push(files);
    }

    Ok(IntermediatePlan { partitions })
}

/// List the regular files of the input directory, sorted by name so that
/// chunk enumeration is deterministic.
pub(crate) fn list_input_files(dir: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| {
        Error::Io(std::io::Error::new(
            err.kind(),
            format!("can't list input directory {dir}: {err}"),
        ))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(Error::InvalidInput(format!(
            "input directory {dir} contains no files"
        )));
    }

    Ok(files)
}
