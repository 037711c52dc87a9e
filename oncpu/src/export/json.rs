//! JSON report

use serde::Serialize;
use std::io::Write;
use std::time::UNIX_EPOCH;

use crate::domain::ExportError;
use crate::profiling::{AggregatedStack, Runner, RunnerStats, StackTable};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub samples: u64,
    pub lost: u64,
    pub unknown: u64,
    pub malformed: u64,
    pub unique_stacks: usize,
    pub sessions_attached: usize,
    pub sessions_skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub task_id: String,
    pub pid: Option<u32>,
    /// Task start, seconds since the Unix epoch
    pub start_time: Option<u64>,
    pub frequency_hz: u64,
    pub totals: ReportTotals,
    /// Heaviest first, frames leaf first
    pub stacks: Vec<AggregatedStack>,
}

impl JsonReport {
    #[must_use]
    pub fn from_parts(
        task_id: impl Into<String>,
        pid: Option<u32>,
        frequency_hz: u64,
        stats: &RunnerStats,
        table: &StackTable,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            pid,
            start_time: None,
            frequency_hz,
            totals: ReportTotals {
                samples: table.total(),
                lost: stats.lost,
                unknown: stats.unknown,
                malformed: stats.malformed,
                unique_stacks: table.len(),
                sessions_attached: stats.sessions_attached,
                sessions_skipped: stats.sessions_skipped,
            },
            stacks: table.top(table.len()),
        }
    }

    /// Build the report from a runner's current state
    #[must_use]
    pub fn from_runner(runner: &Runner) -> Self {
        let task_id = runner.task().map(|t| t.task_id.clone()).unwrap_or_default();
        let mut report = Self::from_parts(
            task_id,
            runner.pid().map(|p| p.0),
            runner.settings().frequency_hz,
            &runner.stats(),
            &runner.snapshot(),
        );
        report.start_time = runner
            .task()
            .and_then(|t| t.start_time.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        report
    }

    /// Write the report as pretty-printed JSON
    ///
    /// # Errors
    /// Returns an error if serialization or the writer fails
    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_structure() {
        let mut table = StackTable::new();
        table.record(vec!["leaf".to_string(), "main".to_string()]);
        table.record_n(vec!["main".to_string()], 3);
        let stats = RunnerStats { lost: 2, sessions_attached: 4, ..RunnerStats::default() };

        let report = JsonReport::from_parts("task-1", Some(42), 100, &stats, &table);
        let mut out = Vec::new();
        report.write(&mut out).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["task_id"], "task-1");
        assert_eq!(parsed["pid"], 42);
        assert_eq!(parsed["totals"]["samples"], 4);
        assert_eq!(parsed["totals"]["lost"], 2);
        assert_eq!(parsed["totals"]["unique_stacks"], 2);
        assert_eq!(parsed["stacks"][0]["count"], 3);
        assert_eq!(parsed["stacks"][1]["frames"][0], "leaf");
    }
}
