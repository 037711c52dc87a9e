//! Auto-detect the target PID from a process name.
//!
//! Candidates are every process visible in /proc except the caller. An exact
//! match on the command name or executable basename wins over a substring
//! match; either way exactly one process must remain.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

/// A process found in /proc
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub exe_path: PathBuf,
    /// `comm` field of /proc/<pid>/stat
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchKind {
    Substring,
    Exact,
}

/// Find the single process called `name`
///
/// # Errors
/// Returns an error when nothing matches, or when several processes match
/// equally well
pub fn find_process_by_name(name: &str) -> Result<ProcessInfo> {
    let own_pid = Pid(std::process::id());
    let mut scored: Vec<(MatchKind, ProcessInfo)> = visible_processes()?
        .into_iter()
        .filter(|info| info.pid != own_pid)
        .filter_map(|info| match_kind(&info.command, &info.exe_path, name).map(|kind| (kind, info)))
        .collect();

    let Some(best) = scored.iter().map(|(kind, _)| *kind).max() else {
        bail!(
            "No process matching '{name}' found.\n\
             Check running processes with: ps aux | grep {name}"
        );
    };
    scored.retain(|(kind, _)| *kind == best);

    if let [(_, info)] = scored.as_slice() {
        return Ok(info.clone());
    }
    let list: Vec<String> =
        scored.iter().map(|(_, m)| format!("  {} ({})", m.pid.0, m.command)).collect();
    bail!(
        "Multiple processes match '{name}':\n{}\n\n\
         Specify PID explicitly: oncpu --pid <PID>",
        list.join("\n")
    )
}

/// Every process whose exe link and stat are readable
///
/// Kernel threads have no exe link and are left out.
fn visible_processes() -> Result<Vec<ProcessInfo>> {
    let proc_dir = fs::read_dir("/proc").context("Failed to read /proc")?;
    let processes = proc_dir
        .flatten()
        .filter_map(|entry| {
            let pid = Pid(entry.file_name().to_str()?.parse().ok()?);
            let exe_path = fs::read_link(format!("/proc/{}/exe", pid.0)).ok()?;
            let stat = fs::read_to_string(format!("/proc/{}/stat", pid.0)).ok()?;
            let command = extract_comm(&stat)?.to_string();
            Some(ProcessInfo { pid, exe_path, command })
        })
        .collect();
    Ok(processes)
}

/// Resolve binary path from PID via `/proc/<pid>/exe`.
///
/// # Errors
/// Returns error if the process doesn't exist or `/proc/<pid>/exe` is not readable.
pub fn resolve_exe_path(pid: Pid) -> Result<PathBuf> {
    let exe_link = format!("/proc/{}/exe", pid.0);
    fs::read_link(&exe_link).with_context(|| format!("Cannot read {exe_link}"))
}

/// `comm` out of "pid (comm) state ..."; comm itself may contain parentheses
fn extract_comm(stat_line: &str) -> Option<&str> {
    let open = stat_line.find('(')?;
    let close = stat_line.rfind(')')?;
    (open < close).then(|| &stat_line[open + 1..close])
}

fn match_kind(command: &str, exe_path: &Path, pattern: &str) -> Option<MatchKind> {
    let exe_basename = exe_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let wanted = Path::new(pattern).file_name().and_then(|n| n.to_str()).unwrap_or(pattern);

    if command == wanted || exe_basename == wanted {
        Some(MatchKind::Exact)
    } else if command.contains(pattern) || exe_basename.contains(pattern) {
        Some(MatchKind::Substring)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_comm() {
        assert_eq!(extract_comm("1234 (my-app) S 1 1234 1234 0 -1 4194304"), Some("my-app"));
        assert_eq!(extract_comm("1234 (app (v2)) S 1 1234"), Some("app (v2)"));
        assert_eq!(extract_comm("garbage"), None);
    }

    #[test]
    fn test_match_kind() {
        let exe = Path::new("/usr/bin/my-server");
        assert_eq!(match_kind("my-server", exe, "my-server"), Some(MatchKind::Exact));
        assert_eq!(match_kind("worker", exe, "/opt/my-server"), Some(MatchKind::Exact));
        assert_eq!(match_kind("my-server", exe, "server"), Some(MatchKind::Substring));
        assert_eq!(match_kind("my-server", exe, "other"), None);
        assert!(MatchKind::Exact > MatchKind::Substring);
    }

    #[test]
    fn test_lookup_skips_self() {
        // the test binary's own name must not resolve to the test process
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_str().unwrap().to_string();
        if let Ok(info) = find_process_by_name(&name) {
            assert_ne!(info.pid, Pid(std::process::id()));
        }
    }

    #[test]
    fn test_resolve_own_exe() {
        let path = resolve_exe_path(Pid(std::process::id())).unwrap();
        assert_eq!(path, std::env::current_exe().unwrap());
    }
}
