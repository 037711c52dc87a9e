//! User-space symbol table for one process
//!
//! Built from the executable file mappings in /proc/pid/maps. Each mapped ELF
//! is parsed once: its `.symtab` and `.dynsym` text symbols are demangled and
//! sorted, and its DWARF (if any) is kept as a fallback for addresses that no
//! symbol covers.
//!
//! ```text
//! runtime addr --(mapping start, file offset)--> file offset
//! file offset  --(PT_LOAD segment)-------------> ELF virtual address
//! ELF vaddr    --(symtab, then DWARF)----------> function name
//! ```

use anyhow::{bail, Context, Result};
use log::{debug, info};
use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::memory_maps::{executable_mappings, MapEntry};
use super::symbolizer::Symbolizer;
use super::SymbolTable;
use crate::domain::Pid;

#[derive(Debug, Clone)]
struct ElfSymbol {
    start: u64,
    size: u64,
    name: String,
}

#[derive(Debug, Clone, Copy)]
struct LoadSegment {
    file_offset: u64,
    file_size: u64,
    vaddr: u64,
}

/// Symbols of one ELF file, addressed by the file's own virtual addresses
pub struct ElfSymbols {
    path: PathBuf,
    symbols: Vec<ElfSymbol>,
    segments: Vec<LoadSegment>,
    dwarf: Option<Mutex<Symbolizer>>,
}

impl ElfSymbols {
    /// Read and parse the ELF at `path`
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid object
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).context(format!("Failed to read {}", path.display()))?;
        let mut symbols = Self::from_bytes(&data)?;
        symbols.path = path.to_path_buf();
        Ok(symbols)
    }

    /// Parse an in-memory ELF image
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid object file
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let obj = object::File::parse(data).context("Failed to parse object file")?;

        let mut symbols: Vec<ElfSymbol> = obj
            .symbols()
            .chain(obj.dynamic_symbols())
            .filter(|sym| sym.kind() == SymbolKind::Text && sym.address() != 0)
            .filter_map(|sym| {
                let name = sym.name().ok().filter(|n| !n.is_empty())?;
                Some(ElfSymbol {
                    start: sym.address(),
                    size: sym.size(),
                    name: Symbolizer::demangle_symbol(name),
                })
            })
            .collect();
        // symtab and dynsym overlap; keep the sized entry when both name an address
        symbols.sort_by(|a, b| a.start.cmp(&b.start).then(b.size.cmp(&a.size)));
        symbols.dedup_by_key(|s| s.start);

        let segments = obj
            .segments()
            .map(|seg| {
                let (file_offset, file_size) = seg.file_range();
                LoadSegment { file_offset, file_size, vaddr: seg.address() }
            })
            .collect();

        let dwarf = if Symbolizer::has_debug_info(&obj) {
            match Symbolizer::from_object(&obj) {
                Ok(symbolizer) => Some(Mutex::new(symbolizer)),
                Err(e) => {
                    debug!("ignoring unusable DWARF: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self { path: PathBuf::new(), symbols, segments, dwarf })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn has_dwarf(&self) -> bool {
        self.dwarf.is_some()
    }

    /// Translate a file offset to the ELF virtual address it is loaded at
    #[must_use]
    pub fn vaddr_for_offset(&self, file_offset: u64) -> Option<u64> {
        self.segments
            .iter()
            .find(|seg| file_offset >= seg.file_offset && file_offset < seg.file_offset + seg.file_size)
            .map(|seg| seg.vaddr + (file_offset - seg.file_offset))
    }

    /// Name of the function containing ELF virtual address `vaddr`
    #[must_use]
    pub fn lookup(&self, vaddr: u64) -> Option<String> {
        if let Some(name) = self.lookup_symtab(vaddr) {
            return Some(name);
        }
        let dwarf = self.dwarf.as_ref()?;
        let symbolizer = dwarf.lock().ok()?;
        symbolizer.function_name(vaddr)
    }

    fn lookup_symtab(&self, vaddr: u64) -> Option<String> {
        let idx = self.symbols.partition_point(|s| s.start <= vaddr).checked_sub(1)?;
        let symbol = &self.symbols[idx];
        // unsized symbols (hand-written assembly) extend to the next symbol
        let covers = symbol.size == 0 || vaddr < symbol.start + symbol.size;
        covers.then(|| symbol.name.clone())
    }
}

struct Module {
    mapping: MapEntry,
    elf: Arc<ElfSymbols>,
}

/// Symbol table over every executable file mapping of a process
pub struct ProcessSymbols {
    pid: Pid,
    modules: Vec<Module>,
}

impl ProcessSymbols {
    /// Snapshot the mappings of `pid` and load each mapped ELF
    ///
    /// Files that cannot be read or parsed are skipped.
    ///
    /// # Errors
    /// Returns an error if the maps cannot be read or no mapped file loads
    pub fn load(pid: Pid) -> Result<Self> {
        let mappings = executable_mappings(pid)?;
        let mut loaded: HashMap<String, Option<Arc<ElfSymbols>>> = HashMap::new();
        let mut modules = Vec::new();

        for mapping in mappings {
            let elf = loaded
                .entry(mapping.pathname.clone())
                .or_insert_with(|| match ElfSymbols::load(Path::new(&mapping.pathname)) {
                    Ok(elf) => {
                        debug!(
                            "{pid}: {} symbols from {}{}",
                            elf.symbol_count(),
                            elf.path().display(),
                            if elf.has_dwarf() { " (with DWARF)" } else { "" }
                        );
                        Some(Arc::new(elf))
                    }
                    Err(e) => {
                        debug!("{pid}: skipping {}: {e:#}", mapping.pathname);
                        None
                    }
                })
                .clone();
            if let Some(elf) = elf {
                modules.push(Module { mapping, elf });
            }
        }

        if modules.is_empty() {
            bail!("no symbol information could be loaded for {pid}");
        }

        let files = loaded.values().filter(|elf| elf.is_some()).count();
        info!("{pid}: loaded symbols from {files} mapped files");
        Ok(Self { pid, modules })
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl SymbolTable for ProcessSymbols {
    fn find_symbol_name(&self, address: u64) -> Option<String> {
        let idx = self.modules.partition_point(|m| m.mapping.range.start <= address).checked_sub(1)?;
        let module = &self.modules[idx];
        if !module.mapping.range.contains(address) {
            return None;
        }
        let vaddr = module.elf.vaddr_for_offset(module.mapping.file_offset(address))?;
        module.elf.lookup(vaddr)
    }
}
