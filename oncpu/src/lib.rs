//! # oncpu - perf_event On-CPU Sampling Profiler
//!
//! oncpu samples the call stacks of every thread of one running process at a
//! fixed frequency, using the kernel's perf_event interface: a software
//! CPU-clock event per thread, each with its own memory-mapped ring buffer.
//! Sampled instruction pointers are symbolized against the target's ELF files
//! (and optionally /proc/kallsyms) and aggregated into stack counts.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Target Process                            │
//! │                 (threads T1 .. Tn, on CPU)                      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ CPU-clock ticks
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Kernel (perf_event)                         │
//! │  • One sampling event per thread                                │
//! │  • PERF_RECORD_SAMPLE {pid, tid, time, callchain}               │
//! │  • PERF_RECORD_LOST when the ring overflows                     │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ shared ring buffers
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      oncpu (This Crate)                         │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │     perf     │──▶│  profiling   │──▶│    export    │         │
//! │  │ (ring, recs) │   │   (runner)   │   │ (folded,json)│         │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘         │
//! │                            │                                    │
//! │                            ▼                                    │
//! │                    ┌──────────────┐                             │
//! │                    │symbolization │                             │
//! │                    │ (ELF, DWARF) │                             │
//! │                    └──────────────┘                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`perf`]: The kernel interface below the sessions
//!   - `region`: Shared memory with atomic cursor access at fixed offsets
//!   - `ring_buffer`: Consumer side of one sample ring
//!   - `record`: Record header, SAMPLE/LOST decoding and the drain loop
//!
//! - [`profiling`]: Sessions and their lifecycle
//!   - `attributes`: Event attributes and ring sizing
//!   - `session`: One perf event fd plus its mapped ring, per thread
//!   - `poller`: Readiness wait across all sessions
//!   - `runner`: init, run, flush and stop
//!
//! - [`symbolization`]: Addresses to names (kernel, ELF symtab, DWARF, hex)
//!
//! - [`export`]: Folded stacks for flame graphs and a JSON report
//!
//! - [`cli`], [`config`], [`preflight`], [`process_lookup`]: The command-line
//!   front end
//!
//! - [`domain`]: Core types (Pid, Tid, Timestamp) and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Profile a running process by name until Ctrl+C
//! sudo ./oncpu my-app
//!
//! # 30 seconds at 1 kHz, folded output for flamegraph.pl
//! sudo ./oncpu --pid <PID> --period 1ms --duration 30 --output stacks.txt
//! ```

// Expose modules for testing
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod perf;
pub mod preflight;
pub mod process_lookup;
pub mod profiling;
pub mod symbolization;
