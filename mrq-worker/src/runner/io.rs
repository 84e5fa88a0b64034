//! Payload execution and the data conversions around it: byte ranges in,
//! JSON key/value streams out.

use std::io::SeekFrom;
use std::process::Stdio;

use serde_json::Value;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::trace;

use common::codec::{self, KeyValue, MapOutput};
use common::pb::datatypes::{InputChunk, Task, TaskKind};
use common::{Error, Result};

const SANITY_SUBCOMMAND: &str = "sanity-check";
const SANITY_RESPONSE: &str = "sanity located";

/// Check that the payload binary speaks our stdio contract before feeding
/// it any data: `<payload> sanity-check` must exit zero and print exactly
/// the expected marker.
pub async fn sanity_check(payload_path: &str) -> Result<()> {
    let output = Command::new(payload_path)
        .arg(SANITY_SUBCOMMAND)
        .output()
        .await
        .map_err(|err| {
            Error::InvalidPayload(format!("can't execute {payload_path}: {err}"))
        })?;

    if !output.status.success() || output.stdout != SANITY_RESPONSE.as_bytes() {
        return Err(Error::InvalidPayload(format!(
            "{payload_path} failed the sanity check"
        )));
    }
    Ok(())
}

/// Build the stdin of a map invocation: the chunk's byte range wrapped as
/// a single key/value pair, keyed by the input path.
///
/// An end byte of 0 means "read to end of file".
pub async fn map_stdin(chunk: &InputChunk) -> Result<Vec<u8>> {
    let mut file = fs::File::open(&chunk.path).await?;

    let mut end = chunk.end_byte;
    if end == 0 {
        end = file.metadata().await?.len();
        trace!("end not specified, reading {} to {end}", chunk.path);
    }

    let mut buf = vec![0u8; end.saturating_sub(chunk.start_byte) as usize];
    file.seek(SeekFrom::Start(chunk.start_byte)).await?;
    file.read_exact(&mut buf).await?;

    let pair = KeyValue::new(
        chunk.path.clone(),
        Value::String(String::from_utf8_lossy(&buf).into_owned()),
    );
    Ok(serde_json::to_vec(&pair)?)
}

/// Build the stdin of a reduce invocation: read every intermediate file
/// named by the comma-joined chunk path, then group all pairs by key.
pub async fn reduce_stdin(chunk: &InputChunk) -> Result<Vec<u8>> {
    let mut pairs = Vec::new();
    for path in chunk.path.split(',') {
        let bytes = fs::read(path).await?;
        let mut file_pairs: Vec<KeyValue> = serde_json::from_slice(&bytes)?;
        pairs.append(&mut file_pairs);
    }

    let groups = codec::group_by_key(pairs);
    Ok(serde_json::to_vec(&groups)?)
}

/// Spawn the payload for a task, feed it the prepared stdin and collect
/// its combined stdout and stderr. A non-zero exit is a task failure.
pub async fn run_payload(task: &Task, input: Vec<u8>) -> Result<Vec<u8>> {
    let args = match task.kind() {
        TaskKind::Map => vec![
            "map".to_string(),
            format!("--partition_count={}", task.partition_count),
        ],
        TaskKind::Reduce => vec!["reduce".to_string()],
    };

    let mut child = Command::new(&task.payload_path)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Internal("payload stdin was not captured".to_string()))?;
    let feed = async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    if let Err(err) = fed {
        // A payload may exit without draining stdin; its exit status is
        // the interesting signal then.
        if err.kind() != std::io::ErrorKind::BrokenPipe {
            return Err(err.into());
        }
    }
    let output = output?;

    let mut out = output.stdout;
    out.extend_from_slice(&output.stderr);
    trace!("output from payload: {}", String::from_utf8_lossy(&out));

    if !output.status.success() {
        return Err(Error::PayloadFailure(format!(
            "payload exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&out).trim()
        )));
    }

    Ok(out)
}

/// Interpret the payload's output and persist it to the task's output
/// files.
pub async fn save_results(out: &[u8], task: &Task) -> Result<()> {
    match task.kind() {
        TaskKind::Map => save_map_results(out, &task.output_files).await,
        TaskKind::Reduce => save_reduce_results(out, &task.output_files).await,
    }
}

/// Route each partition of a map output to the intermediate file reserved
/// for it, re-serialized as a plain pair array.
async fn save_map_results(out: &[u8], output_files: &[String]) -> Result<()> {
    let data: MapOutput = serde_json::from_slice(out)?;

    for (partition_name, pairs) in &data.partitions {
        let partition: usize = partition_name.parse().map_err(|_| {
            Error::Serialization(format!("partition `{partition_name}` is not a number"))
        })?;
        let path = output_files.get(partition).ok_or_else(|| {
            Error::InvalidInput(format!(
                "payload emitted partition {partition} but the task has only {} output files",
                output_files.len()
            ))
        })?;
        fs::write(path, serde_json::to_vec(pairs)?).await?;
    }

    Ok(())
}

/// A reduce output is opaque to us: write it verbatim.
async fn save_reduce_results(out: &[u8], output_files: &[String]) -> Result<()> {
    let path = output_files
        .first()
        .ok_or_else(|| Error::InvalidInput("reduce task has no output file".to_string()))?;
    fs::write(path, out).await?;
    Ok(())
}
