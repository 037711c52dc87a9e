//! Profile export functionality
//!
//! This module provides functionality for exporting aggregated stacks to
//! various formats:
//! - Folded ("collapsed") stacks, one line per stack, for flamegraph tools
//! - A JSON report with totals and the stacks sorted by weight

pub mod folded;
pub mod json;

pub use folded::{folded_line, write_folded};
pub use json::{JsonReport, ReportTotals};
