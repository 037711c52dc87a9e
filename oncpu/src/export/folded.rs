//! Folded stack output
//!
//! ```text
//! main;run;parse 42
//! ```
//!
//! Frames are written root first. Semicolons inside frame names (rare, but
//! legal in demangled generics) are replaced so each line splits cleanly.

use std::io::{self, Write};

use crate::profiling::StackTable;

/// One folded line (without newline) for a leaf-first frame list
#[must_use]
pub fn folded_line(frames: &[String], count: u64) -> String {
    let mut line = frames.iter().rev().map(|f| f.replace(';', ":")).collect::<Vec<_>>().join(";");
    if line.is_empty() {
        line.push_str("[unknown]");
    }
    format!("{line} {count}")
}

/// Write every stack in `table`, heaviest first
///
/// # Errors
/// Returns an error if the writer fails
pub fn write_folded<W: Write>(table: &StackTable, mut writer: W) -> io::Result<()> {
    for stack in table.top(table.len()) {
        writeln!(writer, "{}", folded_line(&stack.frames, stack.count))?;
    }
    writer.flush()
}
