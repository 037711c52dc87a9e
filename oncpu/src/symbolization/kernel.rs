//! Kernel symbol table from /proc/kallsyms
//!
//! Text symbols only, sorted by address. kallsyms carries no sizes, so an
//! address resolves to the closest symbol at or below it, bounded by the next
//! symbol and by [`MAX_SYMBOL_SPAN`] past the last one.

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::fs;

use super::SymbolTable;

const KALLSYMS_PATH: &str = "/proc/kallsyms";

/// Farthest an address may lie past the last symbol and still resolve to it
pub const MAX_SYMBOL_SPAN: u64 = 0x10_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct KernelSymbol {
    addr: u64,
    name: String,
}

#[derive(Debug, Default)]
pub struct KernelSymbols {
    symbols: Vec<KernelSymbol>,
}

impl KernelSymbols {
    /// Load the running kernel's symbols
    ///
    /// # Errors
    /// Returns an error if kallsyms cannot be read or all addresses are
    /// hidden (`kernel.kptr_restrict`)
    pub fn load() -> Result<Self> {
        let text = fs::read_to_string(KALLSYMS_PATH).context(format!("Failed to read {KALLSYMS_PATH}"))?;
        let table = Self::parse(&text);
        if table.is_empty() {
            warn!("{KALLSYMS_PATH} exposes no addresses; kernel frames will render as hex");
            bail!("kernel symbol addresses are restricted (see kernel.kptr_restrict)");
        }
        debug!("loaded {} kernel text symbols", table.len());
        Ok(table)
    }

    /// Parse kallsyms text: "ffffffff81000000 T _stext [module]"
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut symbols: Vec<KernelSymbol> = text
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let addr = u64::from_str_radix(parts.next()?, 16).ok()?;
                let kind = parts.next()?;
                let name = parts.next()?;
                let is_text = matches!(kind, "t" | "T" | "w" | "W");
                (addr != 0 && is_text).then(|| KernelSymbol { addr, name: name.to_string() })
            })
            .collect();

        symbols.sort_by_key(|s| s.addr);
        symbols.dedup_by_key(|s| s.addr);
        Self { symbols }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolTable for KernelSymbols {
    fn find_symbol_name(&self, address: u64) -> Option<String> {
        let idx = self.symbols.partition_point(|s| s.addr <= address).checked_sub(1)?;
        let symbol = &self.symbols[idx];
        if idx + 1 == self.symbols.len() && address - symbol.addr > MAX_SYMBOL_SPAN {
            return None;
        }
        Some(symbol.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
ffffffff81000000 T _stext
ffffffff81000100 t do_one_initcall
ffffffff81000200 D some_data
ffffffff81000300 T schedule
ffffffffc0000000 t ext4_readpage\t[ext4]
0000000000000000 T hidden
";

    #[test]
    fn test_parse_keeps_text_symbols() {
        let table = KernelSymbols::parse(SAMPLE);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_lookup_nearest_below() {
        let table = KernelSymbols::parse(SAMPLE);
        assert_eq!(table.find_symbol_name(0xffff_ffff_8100_0000).as_deref(), Some("_stext"));
        assert_eq!(table.find_symbol_name(0xffff_ffff_8100_0150).as_deref(), Some("do_one_initcall"));
        // data symbols are skipped, so this stays in do_one_initcall
        assert_eq!(table.find_symbol_name(0xffff_ffff_8100_0250).as_deref(), Some("do_one_initcall"));
        assert_eq!(table.find_symbol_name(0xffff_ffff_c000_0010).as_deref(), Some("ext4_readpage"));
    }

    #[test]
    fn test_user_and_far_addresses_miss() {
        let table = KernelSymbols::parse(SAMPLE);
        assert!(table.find_symbol_name(0x401000).is_none());
        assert!(table.find_symbol_name(0xffff_ffff_c100_0000).is_none());
    }

    #[test]
    fn test_restricted_kallsyms_is_empty() {
        let restricted = "0000000000000000 T _stext\n0000000000000000 T schedule\n";
        assert!(KernelSymbols::parse(restricted).is_empty());
    }
}
