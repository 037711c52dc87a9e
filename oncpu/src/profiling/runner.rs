//! Runner: session lifecycle, readiness wait and the flush pipeline
//!
//! ```text
//! Uninitialized --init--> Initialized --run--> Running --stop--> Stopped
//!        \____________________\__________________________stop_____/
//! ```
//!
//! `init` and `run` take `&mut self`; once running, the runner is shared
//! (typically in an `Arc`) and `flush_data` and `stop` take `&self`. Each
//! session sits behind its own mutex, held for the whole decode-and-resolve
//! step, so `stop` either finishes before a drain of that session starts or
//! waits for it. The cumulative stack table has a separate lock, taken once
//! per flush to merge the batch. `stop` also fires a wake eventfd that sits in
//! every readiness wait, so a flush blocked in `poll` returns immediately.

use log::{debug, info, trace, warn};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::aggregate::{AggregatedStack, StackTable};
use super::attributes::SamplingAttributes;
use super::poller::{wait_readable, ReadyFd, WaitOutcome, WakeSignal};
use super::session::PerThreadSession;
use super::task::{ProfilingTask, TargetProcess};
use super::threads::{list_process_threads, thread_name};
use crate::config::{SamplingSettings, TaskConfig};
use crate::domain::{ConfigError, Pid, ProfilerError, Tid};
use crate::perf::DrainStats;
use crate::symbolization::{KernelSymbols, SymbolResolver, SymbolTable};

/// Consecutive failed drain passes after which a session is dropped
pub const MAX_DECODE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Uninitialized => "uninitialized",
            State::Initialized => "initialized",
            State::Running => "running",
            State::Stopped => "stopped",
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionSlot {
    tid: Tid,
    fd: RawFd,
    closed: AtomicBool,
    session: Mutex<PerThreadSession>,
}

/// Output of one [`Runner::flush_data`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// Stacks observed during this flush, with their counts in it
    pub samples: Vec<AggregatedStack>,
    /// Samples the kernel dropped, since the sessions were opened
    pub lost_total: u64,
    /// Records of unhandled types, since the sessions were opened
    pub unknown_total: u64,
    /// Records with inconsistent sizes, since the sessions were opened
    pub malformed_total: u64,
}

impl FlushResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in this flush
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.samples.iter().map(|s| s.count).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Threads listed when the runner started
    pub threads_seen: usize,
    pub sessions_attached: usize,
    /// Threads that could not be attached
    pub sessions_skipped: usize,
    /// Of the skipped threads, those refused with EACCES/EPERM
    pub permission_denied: usize,
    /// Sessions closed early (thread exit or repeated decode failures)
    pub sessions_dropped: usize,
    pub sessions_active: usize,
    /// Flushes that found at least one ready session
    pub flushes: u64,
    pub samples: u64,
    pub lost: u64,
    pub unknown: u64,
    pub malformed: u64,
}

#[derive(Default)]
struct Counters {
    flushes: AtomicU64,
    samples: AtomicU64,
    lost: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicUsize,
}

impl Counters {
    fn add(&self, delta: &DrainStats) {
        self.samples.fetch_add(delta.samples, Ordering::Relaxed);
        self.lost.fetch_add(delta.lost, Ordering::Relaxed);
        self.unknown.fetch_add(delta.unknown, Ordering::Relaxed);
        self.malformed.fetch_add(delta.malformed, Ordering::Relaxed);
    }
}

pub struct Runner {
    settings: SamplingSettings,
    state: Mutex<State>,
    task: Option<ProfilingTask>,
    pid: Option<Pid>,
    resolver: Option<SymbolResolver>,
    sessions: RwLock<Vec<Arc<SessionSlot>>>,
    table: Mutex<StackTable>,
    counters: Counters,
    /// Absent only if the eventfd could not be created; `stop` then lets an
    /// in-flight wait run to its timeout
    wake: Option<WakeSignal>,
    threads_seen: usize,
    skipped: usize,
    permission_denied: usize,
}

impl Runner {
    /// Validate `config` and build an uninitialized runner
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for an invalid period or page count; no
    /// kernel resource exists at this point.
    pub fn new(config: TaskConfig) -> Result<Self, ConfigError> {
        let settings = config.validate()?;
        debug!("runner configured: period {:?} ({} Hz)", settings.period, settings.frequency_hz);
        let wake = match WakeSignal::new() {
            Ok(wake) => Some(wake),
            Err(e) => {
                warn!("wake eventfd unavailable, stop waits for the current flush: {e}");
                None
            }
        };
        Ok(Self {
            settings,
            state: Mutex::new(State::Uninitialized),
            task: None,
            pid: None,
            resolver: None,
            sessions: RwLock::new(Vec::new()),
            table: Mutex::new(StackTable::new()),
            counters: Counters::default(),
            wake,
            threads_seen: 0,
            skipped: 0,
            permission_denied: 0,
        })
    }

    fn state(&self) -> State {
        *lock(&self.state)
    }

    fn expect_state(&self, operation: &'static str, expected: State) -> Result<(), ProfilerError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(ProfilerError::InvalidState { operation, state: state.name() })
        }
    }

    fn target(
        &self,
        processes: &[Arc<dyn TargetProcess>],
    ) -> Result<(Pid, Arc<dyn SymbolTable>), ProfilerError> {
        self.expect_state("init", State::Uninitialized)?;
        let [process] = processes else {
            return Err(ConfigError::ProcessCount(processes.len()).into());
        };
        let pid = process.pid();
        let symbols = process.symbol_table().ok_or(ConfigError::NoSymbolTable(pid))?;
        Ok((pid, symbols))
    }

    /// Bind the runner to exactly one target process
    ///
    /// Kernel symbols are loaded from /proc/kallsyms when kernel frames are
    /// enabled; if they are unavailable kernel frames render as hex.
    ///
    /// # Errors
    /// Returns [`ConfigError::ProcessCount`] unless exactly one process is
    /// given, [`ConfigError::NoSymbolTable`] if it has no symbols, and
    /// [`ProfilerError::InvalidState`] if already initialized.
    pub fn init(
        &mut self,
        task: ProfilingTask,
        processes: &[Arc<dyn TargetProcess>],
    ) -> Result<(), ProfilerError> {
        let (pid, symbols) = self.target(processes)?;
        let kernel: Option<Arc<dyn SymbolTable>> = if self.settings.include_kernel {
            match KernelSymbols::load() {
                Ok(symbols) => Some(Arc::new(symbols)),
                Err(e) => {
                    warn!("kernel symbols unavailable: {e:#}");
                    None
                }
            }
        } else {
            None
        };
        self.bind(task, pid, symbols, kernel);
        Ok(())
    }

    /// [`Self::init`] with an explicit kernel symbol table
    ///
    /// # Errors
    /// As [`Self::init`].
    pub fn init_with_kernel(
        &mut self,
        task: ProfilingTask,
        processes: &[Arc<dyn TargetProcess>],
        kernel: Option<Arc<dyn SymbolTable>>,
    ) -> Result<(), ProfilerError> {
        let (pid, symbols) = self.target(processes)?;
        self.bind(task, pid, symbols, kernel);
        Ok(())
    }

    fn bind(
        &mut self,
        task: ProfilingTask,
        pid: Pid,
        symbols: Arc<dyn SymbolTable>,
        kernel: Option<Arc<dyn SymbolTable>>,
    ) {
        info!("task {}: profiling {pid}", task.task_id);
        self.resolver = Some(SymbolResolver::new(kernel, Some(symbols)));
        self.pid = Some(pid);
        self.task = Some(task);
        *self.state.get_mut().unwrap_or_else(PoisonError::into_inner) = State::Initialized;
    }

    /// Attach a session to every thread the target has right now
    ///
    /// Threads that cannot be attached are skipped. `notify` runs once the
    /// runner is running.
    ///
    /// # Errors
    /// Returns [`ProfilerError::InvalidState`] unless initialized, or
    /// [`ProfilerError::ThreadList`] if the thread list cannot be read (the
    /// process is gone).
    pub fn run(&mut self, notify: impl FnOnce()) -> Result<(), ProfilerError> {
        self.expect_state("run", State::Initialized)?;
        let Some(pid) = self.pid else {
            return Err(ProfilerError::InvalidState { operation: "run", state: "initialized" });
        };
        let tids = list_process_threads(pid)
            .map_err(|e| ProfilerError::ThreadList { pid, source: e.into() })?;
        self.run_with_threads(&tids, notify)
    }

    /// [`Self::run`] over an explicit thread snapshot
    ///
    /// # Errors
    /// Returns [`ProfilerError::InvalidState`] unless initialized.
    pub fn run_with_threads(&mut self, tids: &[Tid], notify: impl FnOnce()) -> Result<(), ProfilerError> {
        self.expect_state("run", State::Initialized)?;
        let attrs = SamplingAttributes::from_settings(&self.settings);

        let mut slots = Vec::with_capacity(tids.len());
        for &tid in tids {
            match PerThreadSession::open(tid, &attrs) {
                Ok(session) => {
                    let Some(fd) = session.raw_fd() else {
                        self.skipped += 1;
                        continue;
                    };
                    slots.push(Arc::new(SessionSlot {
                        tid,
                        fd,
                        closed: AtomicBool::new(false),
                        session: Mutex::new(session),
                    }));
                }
                Err(e) if e.source.raw_os_error() == Some(libc::ESRCH) => {
                    debug!("{tid} exited before attach");
                    self.skipped += 1;
                }
                Err(e) => {
                    if matches!(e.source.raw_os_error(), Some(libc::EACCES | libc::EPERM)) {
                        self.permission_denied += 1;
                    }
                    let name = self.pid.and_then(|pid| thread_name(pid, tid));
                    warn!("{e} (thread {})", name.as_deref().unwrap_or("?"));
                    self.skipped += 1;
                }
            }
        }

        self.threads_seen = tids.len();
        let attached = slots.len();
        *self.sessions.get_mut().unwrap_or_else(PoisonError::into_inner) = slots;
        *self.state.get_mut().unwrap_or_else(PoisonError::into_inner) = State::Running;

        if attached == 0 {
            warn!("no thread could be attached ({} tried)", tids.len());
        } else {
            info!(
                "✓ sampling {attached}/{} threads at {} Hz",
                tids.len(),
                self.settings.frequency_hz
            );
        }
        notify();
        Ok(())
    }

    /// Wait for buffered samples and drain every ready session
    ///
    /// Blocks up to the configured wait timeout. A timeout or an interrupted
    /// wait returns an empty result. After `stop` this returns an empty
    /// result immediately.
    ///
    /// # Errors
    /// Returns [`ProfilerError::WaitFailed`] if the readiness wait itself
    /// fails, and [`ProfilerError::InvalidState`] before `run`.
    pub fn flush_data(&self) -> Result<FlushResult, ProfilerError> {
        match self.state() {
            State::Running => {}
            State::Stopped => return Ok(self.empty_result()),
            state => {
                return Err(ProfilerError::InvalidState { operation: "flush_data", state: state.name() })
            }
        }
        let Some(resolver) = self.resolver.as_ref() else {
            return Err(ProfilerError::InvalidState { operation: "flush_data", state: "running" });
        };

        let slots: Vec<Arc<SessionSlot>> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|slot| !slot.closed.load(Ordering::Acquire))
            .cloned()
            .collect();
        let fds: Vec<RawFd> = slots.iter().map(|slot| slot.fd).collect();

        let outcome = wait_readable(&fds, self.wake.as_ref(), self.settings.wait_timeout)
            .map_err(ProfilerError::WaitFailed)?;
        let ready = match outcome {
            WaitOutcome::Ready(ready) => ready,
            WaitOutcome::TimedOut => {
                trace!("no session ready within {:?}", self.settings.wait_timeout);
                return Ok(self.empty_result());
            }
            WaitOutcome::Interrupted => {
                debug!("readiness wait interrupted");
                return Ok(self.empty_result());
            }
            WaitOutcome::Woken => {
                debug!("readiness wait woken by stop");
                return Ok(self.empty_result());
            }
        };
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);

        let mut batch = StackTable::new();
        let mut closed_any = false;
        for ready_fd in ready {
            let Some(slot) = slots.get(ready_fd.index) else { continue };
            let (stacks, closed) = self.drain_slot(slot, ready_fd, resolver);
            closed_any |= closed;
            for frames in stacks {
                batch.record(frames);
            }
        }

        if !batch.is_empty() {
            lock(&self.table).merge(&batch);
        }
        if closed_any {
            self.sessions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|slot| !slot.closed.load(Ordering::Acquire));
        }

        Ok(FlushResult { samples: batch.drain_batch(), ..self.empty_result() })
    }

    /// Drain one session under its lock; returns resolved stacks and whether
    /// the session was closed
    fn drain_slot(
        &self,
        slot: &SessionSlot,
        ready: ReadyFd,
        resolver: &SymbolResolver,
    ) -> (Vec<Vec<String>>, bool) {
        let mut session = lock(&slot.session);
        if !session.is_open() {
            return (Vec::new(), false);
        }

        let before = session.totals();
        let mut stacks = Vec::new();
        let result = session.drain(|sample| stacks.push(resolver.resolve_stack(&sample.callchain)));
        self.counters.add(&session.totals().since(&before));

        let close = match result {
            Ok(stats) if ready.hangup && stats.records == 0 => {
                debug!("{} has exited", slot.tid);
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("decode failed on {}: {e}", slot.tid);
                let failures = session.consecutive_failures();
                if failures >= MAX_DECODE_FAILURES {
                    warn!("dropping {} after {failures} failed drains", slot.tid);
                    true
                } else {
                    false
                }
            }
        };

        if close {
            session.close();
            slot.closed.store(true, Ordering::Release);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        (stacks, close)
    }

    fn empty_result(&self) -> FlushResult {
        FlushResult {
            samples: Vec::new(),
            lost_total: self.counters.lost.load(Ordering::Relaxed),
            unknown_total: self.counters.unknown.load(Ordering::Relaxed),
            malformed_total: self.counters.malformed.load(Ordering::Relaxed),
        }
    }

    /// Disable, unmap and close every session
    ///
    /// Safe to call from any state, any number of times, and concurrently
    /// with `flush_data`.
    ///
    /// # Errors
    /// Currently infallible; the `Result` mirrors the other lifecycle calls.
    pub fn stop(&self) -> Result<(), ProfilerError> {
        {
            let mut state = lock(&self.state);
            if *state == State::Stopped {
                return Ok(());
            }
            *state = State::Stopped;
        }
        if let Some(wake) = &self.wake {
            wake.signal();
        }

        let slots = std::mem::take(&mut *self.sessions.write().unwrap_or_else(PoisonError::into_inner));
        for slot in &slots {
            lock(&slot.session).close();
            slot.closed.store(true, Ordering::Release);
        }

        let stats = self.stats();
        info!(
            "stopped: {} samples, {} lost, {} unknown records, {} sessions closed",
            stats.samples,
            stats.lost,
            stats.unknown,
            slots.len()
        );
        Ok(())
    }

    /// Copy of the cumulative stack table
    #[must_use]
    pub fn snapshot(&self) -> StackTable {
        lock(&self.table).clone()
    }

    #[must_use]
    pub fn stats(&self) -> RunnerStats {
        let active = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|slot| !slot.closed.load(Ordering::Acquire))
            .count();
        RunnerStats {
            threads_seen: self.threads_seen,
            sessions_attached: self.threads_seen - self.skipped,
            sessions_skipped: self.skipped,
            permission_denied: self.permission_denied,
            sessions_dropped: self.counters.dropped.load(Ordering::Relaxed),
            sessions_active: active,
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            samples: self.counters.samples.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.stats().sessions_active
    }

    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    #[must_use]
    pub fn task(&self) -> Option<&ProfilingTask> {
        self.task.as_ref()
    }

    #[must_use]
    pub fn settings(&self) -> &SamplingSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
