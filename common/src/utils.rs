//! Small helpers shared across the workspace.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as seconds since the Unix epoch.
///
/// Timestamps on jobs and tasks are informational; a clock before the
/// epoch degrades to 0 rather than failing the operation.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
