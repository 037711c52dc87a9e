//! # Symbol Resolution
//!
//! Sampled call-chains are raw instruction addresses, kernel and user mixed.
//! This module turns them into function names.
//!
//! ## Sources
//!
//! - **Kernel**: `/proc/kallsyms`, text symbols only. Hidden behind
//!   `kernel.kptr_restrict` on many systems, in which case kernel frames fall
//!   through to the hex rendering.
//! - **Process**: every executable file mapping in `/proc/<pid>/maps`. Each
//!   ELF's `.symtab`/`.dynsym` is read with `object` and demangled with
//!   `rustc-demangle`; binaries with DWARF also get an `addr2line` fallback.
//!
//! ## Address Translation
//!
//! PIE executables and shared libraries are loaded at randomized bases
//! (ASLR), so a runtime address is first made file-relative using the
//! mapping it falls in, then moved into the ELF's own address space through
//! the PT_LOAD segment that contains that file offset:
//!
//! ```text
//! 55f3a2b4c780 in [55f3a2b4c000-55f3a2b5f000) at file offset 0x2000
//!   file offset = 0x780 + 0x2000 = 0x2780
//!   PT_LOAD { offset 0x2000, vaddr 0x3000 } -> vaddr 0x3780
//!   .symtab: 0x3740 + 0x80 tokio::runtime::park::Inner::park
//! ```
//!
//! ## Module Structure
//!
//! - **`kernel`**: kallsyms table
//! - **`process`**: per-process ELF tables
//! - **`symbolizer`**: DWARF lookups
//! - **`memory_maps`**: `/proc/<pid>/maps` parsing
//! - **`resolver`**: the lookup order and hex fallback used for every frame

pub mod kernel;
pub mod memory_maps;
pub mod process;
pub mod resolver;
pub mod symbolizer;

pub use kernel::KernelSymbols;
pub use memory_maps::{executable_mappings, MapEntry, MemoryRange};
pub use process::{ElfSymbols, ProcessSymbols};
pub use resolver::SymbolResolver;
pub use symbolizer::Symbolizer;

/// Address to symbol name lookup for one address space
pub trait SymbolTable: Send + Sync {
    fn find_symbol_name(&self, address: u64) -> Option<String>;
}
