//! Profiling core modules
//!
//! - Sampling attributes and ring buffer sizing
//! - Per-thread sessions (perf event fd + mapped ring)
//! - Readiness wait over all session fds
//! - Thread discovery
//! - Stack aggregation
//! - The runner tying them together

pub mod aggregate;
pub mod attributes;
pub mod poller;
pub mod runner;
pub mod session;
pub mod task;
pub mod threads;

// Re-export common types
pub use aggregate::{AggregatedStack, StackTable};
pub use attributes::SamplingAttributes;
pub use poller::{wait_readable, ReadyFd, WaitOutcome, WakeSignal};
pub use runner::{FlushResult, Runner, RunnerStats, MAX_DECODE_FAILURES};
pub use session::PerThreadSession;
pub use task::{LocalProcess, ProfilingTask, TargetProcess};
pub use threads::{list_process_threads, thread_name};
