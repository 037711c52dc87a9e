// DWARF fallback for addresses the ELF symbol tables do not cover

use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianArcSlice, RunTimeEndian};
use object::{Object, ObjectSection};
use rustc_demangle::demangle;
use std::sync::Arc;

/// Symbolizer for resolving file-relative addresses through DWARF debug info
///
/// Built from an already parsed object, so the ELF is only read once per
/// mapped file. The addr2line context parses units lazily and is not `Sync`;
/// callers that share it wrap it in a lock.
pub struct Symbolizer {
    ctx: Context<EndianArcSlice<RunTimeEndian>>,
}

impl Symbolizer {
    /// Whether the object carries any DWARF worth loading
    #[must_use]
    pub fn has_debug_info(obj: &object::File<'_>) -> bool {
        obj.section_by_name(".debug_info").is_some_and(|s| s.size() > 0)
    }

    /// Create a symbolizer over the object's DWARF sections
    ///
    /// # Errors
    /// Returns an error if the DWARF sections cannot be parsed
    pub fn from_object(obj: &object::File<'_>) -> Result<Self> {
        let endian = if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianArcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianArcSlice::new(Arc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")?;

        Ok(Self { ctx })
    }

    /// Name of the outermost function containing `addr`
    ///
    /// With inlining, the last frame is the function the code was inlined
    /// into, which is what the symbol table would have named.
    #[must_use]
    pub fn function_name(&self, addr: u64) -> Option<String> {
        let mut frames = self.ctx.find_frames(addr).skip_all_loads().ok()?;
        let mut outermost = None;
        while let Ok(Some(frame)) = frames.next() {
            if let Some(name) = frame.function.and_then(|f| f.demangle().ok().map(|s| s.to_string())) {
                outermost = Some(name);
            }
        }
        outermost
    }

    /// Demangle a Rust symbol name
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_rust_symbol() {
        let mangled = "_ZN5tokio7runtime4park5Inner4park17h0123456789abcdefE";
        assert_eq!(Symbolizer::demangle_symbol(mangled), "tokio::runtime::park::Inner::park");
        assert_eq!(Symbolizer::demangle_symbol("memcpy"), "memcpy");
    }

    #[inline(never)]
    fn dwarf_marker_function() -> u32 {
        std::hint::black_box(7)
    }

    #[test]
    fn test_function_name_from_own_dwarf() {
        use object::ObjectSymbol;

        assert_eq!(dwarf_marker_function(), 7);
        let data = std::fs::read(std::env::current_exe().unwrap()).unwrap();
        let obj = object::File::parse(&*data).unwrap();
        if !Symbolizer::has_debug_info(&obj) {
            // stripped test binary
            return;
        }
        let vaddr = obj
            .symbols()
            .find(|sym| sym.name().is_ok_and(|name| Symbolizer::demangle_symbol(name).ends_with("dwarf_marker_function")))
            .map(|sym| sym.address())
            .unwrap();

        let symbolizer = Symbolizer::from_object(&obj).unwrap();
        let name = symbolizer.function_name(vaddr).unwrap();
        assert!(name.ends_with("dwarf_marker_function"), "resolved to {name}");
    }
}
