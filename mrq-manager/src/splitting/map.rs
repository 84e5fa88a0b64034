//! Map-side splitting: carve the input directory into chunks and emit one
//! map task per chunk.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::trace;
use uuid::Uuid;

use common::pb::datatypes::{InputChunk, InputKind, Job, Task, TaskKind, TaskStatus};
use common::utils::unix_now;
use common::{Error, Result};

use super::{IntermediatePlan, SplitConfig};

/// How far back to scan for a newline when cutting an oversize file.
const NEWLINE_SCAN_STEP: u64 = 8 * 1024;

/// Produce the map tasks of a job against a previously built plan.
///
/// Chunk i (flat enumeration across all input files, sorted by name) gets
/// the plan's column i as its output files and carries the partition count
/// so the payload knows how wide to fan out.
pub fn map(job: &Job, plan: &IntermediatePlan, config: &SplitConfig) -> Result<Vec<Task>> {
    let chunks = enumerate_chunks(job, config)?;
    if chunks.len() != plan.chunk_count() {
        return Err(Error::Internal(format!(
            "input directory changed while splitting job {}: planned {} chunks, found {}",
            job.id,
            plan.chunk_count(),
            chunks.len()
        )));
    }

    let tasks = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Task {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            kind: TaskKind::Map as i32,
            status: TaskStatus::TaskPending as i32,
            input_chunk: Some(chunk),
            payload_path: job.payload_path.clone(),
            partition_count: job.output_files.len() as u64,
            output_files: plan.chunk_outputs(i),
            time_created: unix_now(),
            ..Default::default()
        })
        .collect();

    Ok(tasks)
}

/// Enumerate the input chunks of a job, dispatching on its input kind.
pub(crate) fn enumerate_chunks(job: &Job, config: &SplitConfig) -> Result<Vec<InputChunk>> {
    match job.input_kind() {
        InputKind::Undefined => Err(Error::InvalidInput(
            "job input kind cannot be undefined".to_string(),
        )),
        InputKind::TextNewlines => {
            let mut chunks = Vec::new();
            for path in super::list_input_files(&job.input_directory)? {
                chunks.extend(split_text_file(&path, config.input_chunk_size)?);
            }
            Ok(chunks)
        }
    }
}

/// Split one text file into chunks of at most `threshold` bytes.
///
/// A file below the threshold becomes a single whole-file chunk. A larger
/// file is cut at newline boundaries: advance by the threshold, rewind to
/// the last newline in that window and cut just past it, then continue
/// from the cut. A window without any newline is cut at the threshold.
pub fn split_text_file(path: &Path, threshold: u64) -> Result<Vec<InputChunk>> {
    let size = std::fs::metadata(path)?.len();
    let path_str = path.to_string_lossy().into_owned();

    trace!("splitting file {path_str} of {size} bytes");

    if size < threshold {
        return Ok(vec![InputChunk {
            path: path_str,
            start_byte: 0,
            end_byte: size,
        }]);
    }

    let mut file = File::open(path)?;
    let mut chunks = Vec::new();
    let mut start = 0u64;

    while size - start >= threshold {
        let limit = start + threshold;
        let boundary = match last_newline_before(&mut file, start, limit)? {
            Some(newline) => newline + 1,
            None => limit,
        };
        chunks.push(InputChunk {
            path: path_str.clone(),
            start_byte: start,
            end_byte: boundary,
        });
        start = boundary;
    }

    if start < size {
        chunks.push(InputChunk {
            path: path_str,
            start_byte: start,
            end_byte: size,
        });
    }

    Ok(chunks)
}

/// Position of the last `\n` in `[start, limit)`, scanning backwards from
/// the limit in fixed-size steps.
fn last_newline_before(file: &mut File, start: u64, limit: u64) -> Result<Option<u64>> {
    let mut buf = vec![0u8; NEWLINE_SCAN_STEP as usize];
    let mut high = limit;

    while high > start {
        let low = high.saturating_sub(NEWLINE_SCAN_STEP).max(start);
        let len = (high - low) as usize;

        file.seek(SeekFrom::Start(low))?;
        file.read_exact(&mut buf[..len])?;

        if let Some(offset) = buf[..len].iter().rposition(|&b| b == b'\n') {
            return Ok(Some(low + offset as u64));
        }
        high = low;
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use common::pb::datatypes::InputKind;

    use super::super::tests::{test_config, test_job};
    use super::super::intermediate_files;
    use super::*;

    #[test]
    fn small_file_becomes_one_whole_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "a".repeat(40)).unwrap();

        let chunks = split_text_file(&path, 1024).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_byte, 0);
        assert_eq!(chunks[0].end_byte, 40);
    }

    #[test]
    fn oversize_file_is_cut_after_newlines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let body = "aaaa\nbbbb\ncccc\ndddd\n"; // 20 bytes, newline every 5
        fs::write(&path, body).unwrap();

        let chunks = split_text_file(&path, 8).unwrap();

        // Chunks tile the file without gaps.
        assert_eq!(chunks[0].start_byte, 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_byte, pair[1].start_byte);
        }
        assert_eq!(chunks.last().unwrap().end_byte, body.len() as u64);

        // Every cut lands just past a newline.
        for chunk in &chunks[..chunks.len() - 1] {
            let cut = chunk.end_byte as usize;
            assert_eq!(&body[cut - 1..cut], "\n", "cut at {cut} is not newline-aligned");
        }
    }

    #[test]
    fn window_without_newline_gets_a_hard_cut() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.txt");
        fs::write(&path, "x".repeat(20)).unwrap();

        let chunks = split_text_file(&path, 8).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start_byte, chunks[0].end_byte), (0, 8));
        assert_eq!((chunks[1].start_byte, chunks[1].end_byte), (8, 16));
        assert_eq!((chunks[2].start_byte, chunks[2].end_byte), (16, 20));
    }

    #[test]
    fn undefined_input_kind_is_invalid() {
        let inputs = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        fs::write(inputs.path().join("a.txt"), "data\n").unwrap();

        let mut job = test_job(inputs.path(), 1);
        job.input_kind = InputKind::Undefined as i32;

        let config = test_config(scratch.path(), 1024);
        let err = enumerate_chunks(&job, &config).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn map_tasks_carry_plan_columns_and_partition_count() {
        let inputs = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        fs::write(inputs.path().join("a.txt"), "one\n").unwrap();
        fs::write(inputs.path().join("b.txt"), "two\n").unwrap();

        let job = test_job(inputs.path(), 2);
        let config = test_config(scratch.path(), 1024);
        let plan = intermediate_files(&job, &config).unwrap();

        let tasks = map(&job, &plan, &config).unwrap();

        assert_eq!(tasks.len(), 2);
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.kind(), TaskKind::Map);
            assert_eq!(task.status(), TaskStatus::TaskPending);
            assert_eq!(task.partition_count, 2);
            assert_eq!(task.output_files, plan.chunk_outputs(i));
            assert_eq!(task.job_id, job.id);
            assert!(!task.id.is_empty());
        }

        // Sorted enumeration: chunk 0 is a.txt, chunk 1 is b.txt.
        let first = tasks[0].input_chunk.as_ref().unwrap();
        assert!(first.path.ends_with("a.txt"));
        assert_eq!(first.end_byte, 4);
    }
}
