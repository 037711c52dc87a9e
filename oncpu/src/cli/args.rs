//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::DEFAULT_PERIOD;

#[derive(Parser, Debug)]
#[command(
    name = "oncpu",
    version,
    about = "Sample on-CPU call stacks of a running process",
    after_help = "\
EXAMPLES:
    sudo oncpu my-app                            Find the process by name
    sudo oncpu --pid 1234 --duration 30          Profile PID 1234 for 30 seconds
    sudo oncpu --pid 1234 --output stacks.txt    Write folded stacks for flamegraph.pl"
)]
pub struct Args {
    /// Process name to profile (auto-detects PID)
    #[arg(value_name = "PROCESS", conflicts_with = "pid")]
    pub process: Option<String>,

    /// Process ID to profile
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Dump period; the sampling frequency is one sample per period
    #[arg(long, default_value = DEFAULT_PERIOD, value_name = "DURATION")]
    pub period: String,

    /// Upper bound for one readiness wait, in seconds
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub timeout: u64,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Write folded stacks to FILE
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write a JSON report to FILE
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Keep kernel frames in sampled stacks
    #[arg(short, long)]
    pub kernel: bool,

    /// Number of heaviest stacks to print in the summary
    #[arg(long, default_value = "10", value_name = "N")]
    pub top: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
