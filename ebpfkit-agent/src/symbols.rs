//! Symbol lookup in user-space target binaries

use anyhow::{anyhow, Context, Result};
use elf::abi::STT_FUNC;
use elf::endian::AnyEndian;
use elf::ElfBytes;
use regex::Regex;
use std::path::Path;

/// First function symbol of `binary` matching `pattern`, searching the
/// static symbol table before the dynamic one
pub fn resolve(binary: &Path, pattern: &str) -> Result<String> {
    let re = Regex::new(pattern).with_context(|| format!("invalid symbol pattern {}", pattern))?;
    let data = std::fs::read(binary)
        .with_context(|| format!("failed to read {}", binary.display()))?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(data.as_slice())
        .with_context(|| format!("{} is not an ELF file", binary.display()))?;

    let mut names = Vec::new();
    if let Some((symtab, strtab)) = file.symbol_table()? {
        for sym in symtab.iter().filter(|s| s.st_symtype() == STT_FUNC) {
            names.push(strtab.get(sym.st_name as usize)?);
        }
    }
    if let Some((dynsyms, dynstr)) = file.dynamic_symbol_table()? {
        for sym in dynsyms.iter().filter(|s| s.st_symtype() == STT_FUNC) {
            names.push(dynstr.get(sym.st_name as usize)?);
        }
    }

    first_match(names, &re)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no symbol of {} matches {}", binary.display(), pattern))
}

fn first_match<'a>(names: impl IntoIterator<Item = &'a str>, re: &Regex) -> Option<&'a str> {
    names.into_iter().find(|name| !name.is_empty() && re.is_match(name))
}
