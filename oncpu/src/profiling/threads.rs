//! Thread discovery
//!
//! Lists the threads of a process by reading /proc filesystem. The listing is
//! a snapshot; threads can exit at any point after it is taken.

use anyhow::{Context, Result};
use std::fs;

use crate::domain::{Pid, Tid};

/// List every live thread of `pid` from /proc/pid/task
///
/// # Errors
/// Returns an error if /proc filesystem cannot be accessed or read
pub fn list_process_threads(pid: Pid) -> Result<Vec<Tid>> {
    let task_dir = format!("/proc/{}/task", pid.0);

    let entries = fs::read_dir(&task_dir).context(format!("Failed to read {task_dir}"))?;

    let mut tids: Vec<Tid> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            entry.file_name().to_str()?.parse::<u32>().ok().map(Tid)
        })
        .collect();
    tids.sort_unstable();

    Ok(tids)
}

/// Thread name from /proc/pid/task/tid/comm
#[must_use]
pub fn thread_name(pid: Pid, tid: Tid) -> Option<String> {
    let comm_path = format!("/proc/{}/task/{}/comm", pid.0, tid.0);
    let comm = fs::read_to_string(comm_path).ok()?;
    Some(comm.trim().to_string())
}
