//! Memory mapping utilities for process address space analysis
//!
//! This module parses /proc/pid/maps into the executable, file-backed mappings
//! that sampled user-space addresses can fall into. Each mapping carries the
//! file offset it was mapped from, which is what turns a runtime address back
//! into a file-relative one for PIE executables and shared libraries.

use anyhow::{Context, Result};
use log::debug;
use std::fs;

use crate::domain::Pid;

/// Memory range of a mapping in a process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// One line of /proc/pid/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub range: MemoryRange,
    pub executable: bool,
    /// Offset into the file at which the mapping starts
    pub offset: u64,
    /// Backing path, or a pseudo name such as `[vdso]`; empty for anonymous memory
    pub pathname: String,
}

impl MapEntry {
    /// Mapped from a regular file rather than anonymous or pseudo memory
    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        self.pathname.starts_with('/') && !self.pathname.ends_with(" (deleted)")
    }

    /// File-relative offset of a runtime address inside this mapping
    #[must_use]
    pub fn file_offset(&self, addr: u64) -> u64 {
        addr - self.range.start + self.offset
    }
}

/// Parse one maps line: "start-end perms offset dev inode pathname"
#[must_use]
pub fn parse_maps_line(line: &str) -> Option<MapEntry> {
    let mut parts = line.split_whitespace();
    let range = parts.next()?;
    let perms = parts.next()?;
    let offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    // pathnames may contain spaces
    let pathname = parts.collect::<Vec<_>>().join(" ");

    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let offset = u64::from_str_radix(offset, 16).ok()?;

    Some(MapEntry {
        range: MemoryRange { start, end },
        executable: perms.as_bytes().get(2) == Some(&b'x'),
        offset,
        pathname,
    })
}

/// All executable, file-backed mappings of a process, sorted by start address
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read
pub fn executable_mappings(pid: Pid) -> Result<Vec<MapEntry>> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;

    let mut entries: Vec<MapEntry> = maps
        .lines()
        .filter_map(parse_maps_line)
        .filter(|entry| entry.executable && entry.is_file_backed())
        .collect();
    entries.sort_by_key(|entry| entry.range.start);

    debug!("{pid}: {} executable file mappings", entries.len());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_range_contains() {
        let range = MemoryRange { start: 0x1000, end: 0x2000 };

        assert!(range.contains(0x1000));
        assert!(range.contains(0x1500));
        assert!(range.contains(0x1FFF));
        assert!(!range.contains(0x0FFF));
        assert!(!range.contains(0x2000));
        assert!(!range.contains(0x2001));
    }

    #[test]
    fn test_parse_maps_line() {
        let line = "55f3a2b4c000-55f3a2b5f000 r-xp 00002000 fd:01 1234567    /usr/bin/my app";
        let entry = parse_maps_line(line).unwrap();
        assert_eq!(entry.range, MemoryRange { start: 0x55f3_a2b4_c000, end: 0x55f3_a2b5_f000 });
        assert!(entry.executable);
        assert_eq!(entry.offset, 0x2000);
        assert_eq!(entry.pathname, "/usr/bin/my app");
        assert_eq!(entry.file_offset(0x55f3_a2b4_c780), 0x2780);
    }

    #[test]
    fn test_parse_anonymous_and_pseudo() {
        let anon = parse_maps_line("7f0000000000-7f0000001000 rw-p 00000000 00:00 0").unwrap();
        assert!(!anon.executable);
        assert!(anon.pathname.is_empty());
        assert!(!anon.is_file_backed());

        let vdso = parse_maps_line("7ffd1000-7ffd3000 r-xp 00000000 00:00 0   [vdso]").unwrap();
        assert!(vdso.executable);
        assert!(!vdso.is_file_backed());

        assert!(parse_maps_line("garbage").is_none());
    }

    #[test]
    fn test_executable_mappings_self() {
        let pid = Pid(std::process::id());
        let entries = executable_mappings(pid).unwrap();
        // the test binary itself is mapped executable
        assert!(!entries.is_empty());
        assert!(entries.windows(2).all(|w| w[0].range.start <= w[1].range.start));
    }
}
