//! Frame naming for sampled call-chains
//!
//! Kernel table first, then the process table, then the address itself in
//! hex, so every non-zero frame gets a name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::SymbolTable;
use crate::perf::layout::PERF_CONTEXT_MAX;

/// Cache entries kept before the cache is cleared
const MAX_CACHE_ENTRIES: usize = 100_000;

pub struct SymbolResolver {
    kernel: Option<Arc<dyn SymbolTable>>,
    process: Option<Arc<dyn SymbolTable>>,
    cache: Mutex<HashMap<u64, String>>,
}

impl SymbolResolver {
    #[must_use]
    pub fn new(kernel: Option<Arc<dyn SymbolTable>>, process: Option<Arc<dyn SymbolTable>>) -> Self {
        Self { kernel, process, cache: Mutex::new(HashMap::new()) }
    }

    /// Name for one address; never fails
    #[must_use]
    pub fn resolve(&self, address: u64) -> String {
        if let Ok(cache) = self.cache.lock() {
            if let Some(name) = cache.get(&address) {
                return name.clone();
            }
        }

        let name = self
            .kernel
            .as_ref()
            .and_then(|table| table.find_symbol_name(address))
            .or_else(|| self.process.as_ref().and_then(|table| table.find_symbol_name(address)))
            .unwrap_or_else(|| format!("0x{address:x}"));

        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= MAX_CACHE_ENTRIES {
                cache.clear();
            }
            cache.insert(address, name.clone());
        }
        name
    }

    /// Names for a raw call-chain, in the same order
    ///
    /// Zero entries and context markers are dropped before resolution.
    #[must_use]
    pub fn resolve_stack(&self, callchain: &[u64]) -> Vec<String> {
        callchain
            .iter()
            .copied()
            .filter(|&ip| ip != 0 && ip < PERF_CONTEXT_MAX)
            .map(|ip| self.resolve(ip))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTable {
        entries: Vec<(u64, &'static str)>,
        lookups: AtomicUsize,
    }

    impl FixedTable {
        fn new(entries: Vec<(u64, &'static str)>) -> Arc<Self> {
            Arc::new(Self { entries, lookups: AtomicUsize::new(0) })
        }
    }

    impl SymbolTable for FixedTable {
        fn find_symbol_name(&self, address: u64) -> Option<String> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            self.entries.iter().find(|(a, _)| *a == address).map(|(_, n)| (*n).to_string())
        }
    }

    #[test]
    fn test_kernel_before_process() {
        let kernel = FixedTable::new(vec![(0x1000, "kernel_fn")]);
        let process = FixedTable::new(vec![(0x1000, "user_fn"), (0x2000, "main")]);
        let resolver = SymbolResolver::new(Some(kernel), Some(process));
        assert_eq!(resolver.resolve(0x1000), "kernel_fn");
        assert_eq!(resolver.resolve(0x2000), "main");
    }

    #[test]
    fn test_hex_fallback() {
        let resolver = SymbolResolver::new(None, Some(FixedTable::new(vec![])));
        assert_eq!(resolver.resolve(0x401000), "0x401000");
    }

    #[test]
    fn test_zero_never_reaches_tables() {
        let process = FixedTable::new(vec![(0, "bogus"), (0x2000, "main")]);
        let resolver = SymbolResolver::new(None, Some(process.clone()));
        let frames = resolver.resolve_stack(&[0, 0x2000, 0, (-512i64) as u64]);
        assert_eq!(frames, vec!["main".to_string()]);
        assert_eq!(process.lookups.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cache_avoids_repeat_lookups() {
        let process = FixedTable::new(vec![(0x2000, "main")]);
        let resolver = SymbolResolver::new(None, Some(process.clone()));
        for _ in 0..5 {
            assert_eq!(resolver.resolve(0x2000), "main");
        }
        assert_eq!(process.lookups.load(Ordering::Relaxed), 1);
    }
}
