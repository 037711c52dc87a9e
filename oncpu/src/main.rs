//! # oncpu - Main Entry Point
//!
//! Attaches one sampling session per thread of the target process, flushes
//! samples on a blocking worker until Ctrl+C, the duration limit, or the
//! target exits, then prints a summary and writes the requested exports.

// Summary formatting converts counts to f64 for percentages
#![allow(clippy::cast_precision_loss)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use oncpu::cli::Args;
use oncpu::config::TaskConfig;
use oncpu::domain::Pid;
use oncpu::export::{folded_line, write_folded, JsonReport};
use oncpu::preflight::run_preflight_checks;
use oncpu::process_lookup::{find_process_by_name, resolve_exe_path};
use oncpu::profiling::{LocalProcess, ProfilingTask, Runner, TargetProcess};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") || msg.contains("dump period") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Resolve the target PID from CLI arguments.
///
/// - `oncpu my-app` - find process by name
/// - `oncpu --pid 1234` - explicit PID
fn resolve_pid(args: &Args) -> Result<Pid> {
    if let Some(ref name) = args.process {
        let info = find_process_by_name(name)?;
        return Ok(info.pid);
    }
    if let Some(pid) = args.pid {
        return Ok(Pid(pid));
    }
    bail!(
        "Missing required argument: PROCESS or --pid\n\n\
         Usage:\n  \
         oncpu my-app              Find the process by name\n  \
         oncpu --pid 1234          Explicit PID\n\n\
         Run 'oncpu --help' for more options"
    )
}

/// Why profiling ended
#[derive(Debug, Clone, Copy)]
enum ExitReason {
    Interrupted,
    DurationReached,
    ProcessExited,
}

impl ExitReason {
    fn as_str(self) -> &'static str {
        match self {
            ExitReason::Interrupted => "interrupted",
            ExitReason::DurationReached => "duration limit reached",
            ExitReason::ProcessExited => "process exited",
        }
    }
}

/// Flush until `stop` is raised or the target disappears
fn flush_loop(runner: &Runner, pid: Pid, stop: &AtomicBool) -> Result<ExitReason> {
    let proc_path = format!("/proc/{}", pid.0);
    while !stop.load(Ordering::Acquire) {
        let result = runner.flush_data().context("sampling failed")?;
        if !result.is_empty() {
            debug!(
                "flush: {} samples in {} stacks (lost {}, unknown {})",
                result.sample_count(),
                result.samples.len(),
                result.lost_total,
                result.unknown_total
            );
        }
        if !Path::new(&proc_path).exists() {
            return Ok(ExitReason::ProcessExited);
        }
        if !runner.is_running() {
            break;
        }
    }
    Ok(ExitReason::Interrupted)
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let pid = resolve_pid(&args)?;
    run_preflight_checks(pid, quiet)?;

    let config = TaskConfig {
        period: args.period.clone(),
        wait_timeout: Duration::from_secs(args.timeout.max(1)),
        include_kernel: args.kernel,
        ..TaskConfig::default()
    };
    let mut runner = Runner::new(config)?;

    if !quiet {
        println!("oncpu v{}", env!("CARGO_PKG_VERSION"));
        if let Ok(exe) = resolve_exe_path(pid) {
            println!("target: {}", exe.display());
        }
        println!("pid: {}", pid.0);
    }

    let process: Arc<dyn TargetProcess> = Arc::new(LocalProcess::open(pid));
    let task = ProfilingTask::new(format!("oncpu-{}", pid.0), vec![pid.0.to_string()]);
    runner.init(task, &[process])?;
    runner.run(|| info!("on-CPU profiling started for {pid}"))?;

    let stats = runner.stats();
    if stats.sessions_active == 0 {
        if stats.permission_denied > 0 {
            bail!(
                "Permission denied: could not attach to any of {} threads.\n\n\
                 Run with sudo, grant CAP_PERFMON, or lower \
                 /proc/sys/kernel/perf_event_paranoid",
                stats.threads_seen
            );
        }
        bail!("could not attach to any of {} threads of {pid}", stats.threads_seen);
    }
    if !quiet {
        println!(
            "sampling: {} threads at {} Hz (period {})",
            stats.sessions_active,
            runner.settings().frequency_hz,
            args.period
        );
    }

    let runner = Arc::new(runner);
    let stop = Arc::new(AtomicBool::new(false));
    let started = Instant::now();

    let mut flusher = {
        let runner = Arc::clone(&runner);
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || flush_loop(&runner, pid, &stop))
    };

    let duration_limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let limit = async {
        match duration_limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let mut finished = None;
    let exit_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => ExitReason::Interrupted,
        () = limit => ExitReason::DurationReached,
        joined = &mut flusher => {
            let reason = joined.context("flush worker panicked")??;
            finished = Some(reason);
            reason
        }
    };

    // stop wakes a flush blocked in its readiness wait, so the worker exits promptly
    stop.store(true, Ordering::Release);
    runner.stop()?;
    if finished.is_none() {
        flusher.await.context("flush worker panicked")??;
    }

    let stats = runner.stats();
    let table = runner.snapshot();
    if !quiet {
        eprintln!(
            "\n{}: {:.1}s, {} samples, {} unique stacks (lost: {}, unknown: {}, malformed: {}, threads: {} attached / {} skipped / {} dropped)",
            exit_reason.as_str(),
            started.elapsed().as_secs_f64(),
            table.total(),
            table.len(),
            stats.lost,
            stats.unknown,
            stats.malformed,
            stats.sessions_attached,
            stats.sessions_skipped,
            stats.sessions_dropped,
        );
        for stack in table.top(args.top) {
            let share = stack.count as f64 * 100.0 / table.total().max(1) as f64;
            eprintln!("{share:5.1}%  {}", folded_line(&stack.frames, stack.count));
        }
    }

    if let Some(ref path) = args.output {
        let file = File::create(path).context("Failed to create folded stack output file")?;
        write_folded(&table, BufWriter::new(file)).context("Failed to write folded stacks")?;
        if !quiet {
            println!("saved: {}", path.display());
        }
    }

    if let Some(ref path) = args.json {
        let file = File::create(path).context("Failed to create JSON report file")?;
        JsonReport::from_runner(&runner)
            .write(BufWriter::new(file))
            .context("Failed to write JSON report")?;
        if !quiet {
            println!("saved: {}", path.display());
        }
    }

    Ok(())
}
