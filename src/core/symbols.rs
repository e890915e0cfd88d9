//! Symbol tables of target modules, parsed with goblin.

use anyhow::{anyhow, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::sym::{STT_FUNC, STT_OBJECT};
use goblin::elf::Elf;
use std::fs;
use std::path::Path;

/// A function or data symbol, relative to the image's link address
#[derive(Debug, Clone, PartialEq, Eq)]
struct Symbol {
    name: String,
    value: u64,
    size: u64,
}

/// Symbols of one loaded module
#[derive(Debug, Clone, Default)]
pub struct ModuleSymbols {
    /// Sorted by `value`
    symbols: Vec<Symbol>,
    /// Runtime base minus link-time base
    bias: u64,
}

impl ModuleSymbols {
    /// Parse the ELF image at `path`, mapped at `base` in the target
    pub fn load(path: &Path, base: u64) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(&data, base)
    }

    pub fn from_bytes(data: &[u8], base: u64) -> Result<Self> {
        let elf = Elf::parse(data).map_err(|e| anyhow!("Invalid ELF image: {}", e))?;

        let link_base = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD)
            .map(|ph| ph.p_vaddr & !0xfff)
            .min()
            .unwrap_or(0);

        let mut symbols: Vec<Symbol> = Vec::new();
        let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
        for (table, strings) in tables {
            for sym in table.iter() {
                let kind = sym.st_type();
                if (kind != STT_FUNC && kind != STT_OBJECT) || sym.st_value == 0 {
                    continue;
                }
                if let Some(name) = strings.get_at(sym.st_name).filter(|n| !n.is_empty()) {
                    symbols.push(Symbol {
                        name: name.to_string(),
                        value: sym.st_value,
                        size: sym.st_size,
                    });
                }
            }
        }

        symbols.sort_by(|a, b| a.value.cmp(&b.value).then_with(|| a.name.cmp(&b.name)));
        symbols.dedup_by(|a, b| a.value == b.value && a.name == b.name);

        log::debug!("Parsed {} symbols (bias {:#x})", symbols.len(), base.wrapping_sub(link_base));

        Ok(Self {
            symbols,
            bias: base.wrapping_sub(link_base),
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbol covering the runtime `address`, with its runtime start address
    pub fn lookup(&self, address: u64) -> Option<(&str, u64)> {
        let relative = address.wrapping_sub(self.bias);
        let index = self.symbols.partition_point(|s| s.value <= relative);
        let sym = self.symbols[..index].last()?;

        // Zero-sized symbols only match their exact address
        let end = sym.value + sym.size.max(1);
        (relative < end).then(|| (sym.name.as_str(), sym.value.wrapping_add(self.bias)))
    }

    /// Runtime address of the symbol called `name`
    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.symbols
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value.wrapping_add(self.bias))
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_elf() {
        assert!(ModuleSymbols::from_bytes(b"MZ not an elf", 0).is_err());
    }

    #[test]
    fn test_parses_own_executable() {
        let exe = std::env::current_exe().unwrap();
        let symbols = ModuleSymbols::load(&exe, 0).unwrap();
        // Test binaries are not stripped
        assert!(!symbols.is_empty());

        let main = symbols.address_of("main");
        if let Some(addr) = main {
            let (name, start) = symbols.lookup(addr).unwrap();
            assert_eq!(start, addr);
            assert!(!name.is_empty());
        }
    }
}
