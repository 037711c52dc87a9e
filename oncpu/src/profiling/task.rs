//! What the runner profiles: the task description and its target process

use anyhow::Result;
use std::sync::Arc;
use std::time::SystemTime;

use crate::domain::Pid;
use crate::symbolization::{ProcessSymbols, SymbolTable};

/// A profiling task as handed to [`Runner::init`](super::Runner::init)
#[derive(Debug, Clone)]
pub struct ProfilingTask {
    pub task_id: String,
    /// Process ids as supplied by the caller
    pub process_ids: Vec<String>,
    pub start_time: SystemTime,
}

impl ProfilingTask {
    #[must_use]
    pub fn new(task_id: impl Into<String>, process_ids: Vec<String>) -> Self {
        Self { task_id: task_id.into(), process_ids, start_time: SystemTime::now() }
    }
}

/// A process the runner can attach to
pub trait TargetProcess: Send + Sync {
    fn pid(&self) -> Pid;

    /// Symbols for the process's user-space addresses, if any could be loaded
    fn symbol_table(&self) -> Option<Arc<dyn SymbolTable>>;
}

/// A process on this host, symbolized from /proc
pub struct LocalProcess {
    pid: Pid,
    symbols: Option<Arc<ProcessSymbols>>,
}

impl LocalProcess {
    /// Load the process's symbols from its current mappings
    ///
    /// A process whose symbols cannot be loaded is still returned; it then
    /// reports no symbol table.
    #[must_use]
    pub fn open(pid: Pid) -> Self {
        let symbols = match ProcessSymbols::load(pid) {
            Ok(symbols) => Some(Arc::new(symbols)),
            Err(e) => {
                log::warn!("{pid}: symbol loading failed: {e:#}");
                None
            }
        };
        Self { pid, symbols }
    }

    /// Like [`Self::open`], but failing when no symbols could be loaded
    ///
    /// # Errors
    /// Returns the symbol loading error
    pub fn try_open(pid: Pid) -> Result<Self> {
        let symbols = ProcessSymbols::load(pid)?;
        Ok(Self { pid, symbols: Some(Arc::new(symbols)) })
    }
}

impl TargetProcess for LocalProcess {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn symbol_table(&self) -> Option<Arc<dyn SymbolTable>> {
        self.symbols.clone().map(|s| s as Arc<dyn SymbolTable>)
    }
}
