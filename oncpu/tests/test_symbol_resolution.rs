use oncpu::domain::Pid;
use oncpu::symbolization::{ElfSymbols, ProcessSymbols, SymbolResolver, SymbolTable};
use std::path::Path;
use std::sync::Arc;

#[inline(never)]
fn resolution_target() -> u64 {
    std::hint::black_box(7) * 6
}

#[test]
fn test_cli_binary_has_symbols() {
    let binary_path = env!("CARGO_BIN_EXE_oncpu");
    println!("Loading symbols from: {binary_path}");

    let elf = ElfSymbols::load(Path::new(binary_path)).expect("Failed to load CLI binary");
    assert!(elf.symbol_count() > 0);
    println!("✅ {} symbols, DWARF: {}", elf.symbol_count(), elf.has_dwarf());
}

#[test]
fn test_resolves_function_in_own_process() {
    assert_eq!(resolution_target(), 42);
    let symbols = ProcessSymbols::load(Pid(std::process::id())).expect("Failed to load own symbols");

    let address = resolution_target as usize as u64;
    let name = symbols.find_symbol_name(address).expect("address inside own text should resolve");
    println!("0x{address:x} -> {name}");
    assert!(name.contains("resolution_target"), "resolved to {name}");

    // a few bytes into the function still names it
    let inside = symbols.find_symbol_name(address + 1).expect("interior address");
    assert!(inside.contains("resolution_target"));
}

#[test]
fn test_unmapped_address_falls_back_to_hex() {
    let symbols = ProcessSymbols::load(Pid(std::process::id())).unwrap();
    let resolver = SymbolResolver::new(None, Some(Arc::new(symbols)));

    assert_eq!(resolver.resolve(0x10), "0x10");
    let stack = resolver.resolve_stack(&[0, 0x10, u64::MAX - 512, 0x20]);
    assert_eq!(stack, vec!["0x10".to_string(), "0x20".to_string()]);
    println!("✅ Unresolvable frames render as hex");
}
