//! Static symbol table lookup for the real library.
//!
//! Only `SHT_SYMTAB` is consulted. The functions we redirect are internal to the
//! library and never appear in `.dynsym`.

use crate::error::{PatchError, PatchResult};
use goblin::elf::section_header::SHT_SYMTAB;
use goblin::elf::Elf;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    pub value: u64,
}

/// The named entries of one object's `SHT_SYMTAB`, in file order.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    /// Read the symbol table of the object at `path`.
    ///
    /// The reserved null entry at index 0 is skipped. Entries whose name offset
    /// does not resolve in the linked string table are dropped.
    pub fn read(path: &Path) -> PatchResult<Self> {
        let file = File::open(path).map_err(|e| PatchError::NotElf {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        // SAFETY: the mapping is read-only and dropped before returning.
        let bytes = unsafe { Mmap::map(&file) }.map_err(|e| PatchError::NotElf {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse(&bytes, path)
    }

    fn parse(bytes: &[u8], path: &Path) -> PatchResult<Self> {
        let elf = Elf::parse(bytes).map_err(|e| PatchError::NotElf {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let symtab = elf
            .section_headers
            .iter()
            .find(|sh| sh.sh_type == SHT_SYMTAB)
            .ok_or_else(|| PatchError::MissingSymbolTable(path.to_path_buf()))?;

        let count = if symtab.sh_entsize == 0 {
            0
        } else {
            (symtab.sh_size / symtab.sh_entsize) as usize
        };

        let entries: Vec<SymbolEntry> = elf
            .syms
            .iter()
            .take(count)
            .skip(1)
            .filter_map(|sym| {
                let name = elf.strtab.get_at(sym.st_name)?;
                Some(SymbolEntry {
                    name: name.to_owned(),
                    value: sym.st_value,
                })
            })
            .collect();

        debug!(path = %path.display(), symbols = entries.len(), "read symbol table");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File offset of the symbol named exactly `name`, or `None`.
    ///
    /// When a name occurs more than once the last entry wins.
    pub fn offset_of(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.name.as_bytes() == name.as_bytes())
            .map(|entry| entry.value)
    }

    /// Like [`offset_of`](Self::offset_of), but a missing or zero offset is fatal.
    pub fn require(&self, name: &str, library: &Path) -> PatchResult<u64> {
        match self.offset_of(name) {
            Some(offset) if offset != 0 => Ok(offset),
            _ => Err(PatchError::SymbolNotFound {
                symbol: name.to_owned(),
                library: library.to_path_buf(),
            }),
        }
    }
}

/// One-shot lookup of a single symbol's offset in the object at `path`.
pub fn resolve_symbol(path: &Path, name: &str) -> PatchResult<Option<u64>> {
    Ok(SymbolTable::read(path)?.offset_of(name))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    const SYM_SIZE: usize = 24;
    const SHDR_SIZE: usize = 64;

    fn push_shdr(
        out: &mut Vec<u8>,
        name: u32,
        kind: u32,
        offset: u64,
        size: u64,
        link: u32,
        entsize: u64,
    ) {
        out.extend_from_slice(&name.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&link.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // sh_info
        out.extend_from_slice(&8u64.to_le_bytes()); // sh_addralign
        out.extend_from_slice(&entsize.to_le_bytes());
    }

    /// Build a minimal little-endian ELF64 shared object holding `symbols`.
    pub(crate) fn build_elf(symbols: &[(&str, u64)], with_symtab: bool) -> Vec<u8> {
        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; SYM_SIZE];
        for (name, value) in symbols {
            let st_name = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);

            symtab.extend_from_slice(&st_name.to_le_bytes());
            symtab.push(0x12); // STB_GLOBAL | STT_FUNC
            symtab.push(0);
            symtab.extend_from_slice(&1u16.to_le_bytes());
            symtab.extend_from_slice(&value.to_le_bytes());
            symtab.extend_from_slice(&16u64.to_le_bytes());
        }
        let shstrtab = b"\0.symtab\0.strtab\0.shstrtab\0".to_vec();

        let symtab_off = 64u64;
        let strtab_off = symtab_off + symtab.len() as u64;
        let shstrtab_off = strtab_off + strtab.len() as u64;
        let mut shoff = shstrtab_off + shstrtab.len() as u64;
        shoff = (shoff + 7) & !7;
        let shnum: u16 = if with_symtab { 4 } else { 2 };

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&3u16.to_le_bytes()); // ET_DYN
        out.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        out.extend_from_slice(&shoff.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&56u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&shnum.to_le_bytes());
        out.extend_from_slice(&(shnum - 1).to_le_bytes()); // e_shstrndx

        out.extend_from_slice(&symtab);
        out.extend_from_slice(&strtab);
        out.extend_from_slice(&shstrtab);
        out.resize(shoff as usize, 0);

        push_shdr(&mut out, 0, 0, 0, 0, 0, 0);
        if with_symtab {
            push_shdr(&mut out, 1, 2, symtab_off, symtab.len() as u64, 2, SYM_SIZE as u64);
            push_shdr(&mut out, 9, 3, strtab_off, strtab.len() as u64, 0, 0);
        }
        push_shdr(&mut out, 17, 3, shstrtab_off, shstrtab.len() as u64, 0, 0);
        out
    }

    pub(crate) fn write_elf(symbols: &[(&str, u64)], with_symtab: bool) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&build_elf(symbols, with_symtab)).unwrap();
        file.flush().unwrap();
        file
    }

    const TARGET: &str =
        "_ZN6webrtc17WindowCapturerX1123CreateRawWindowCapturerERKNS_21DesktopCaptureOptionsE";

    #[test]
    fn test_resolve_finds_exact_name() {
        let file = write_elf(
            &[("_ZN6webrtc5OtherEv", 0x1000), (TARGET, 0x4a2b30), ("tail", 0x9000)],
            true,
        );
        assert_eq!(resolve_symbol(file.path(), TARGET).unwrap(), Some(0x4a2b30));
    }

    #[test]
    fn test_resolve_missing_symbol_is_none() {
        let file = write_elf(&[("_ZN6webrtc5OtherEv", 0x1000)], true);
        assert_eq!(resolve_symbol(file.path(), TARGET).unwrap(), None);
    }

    #[test]
    fn test_resolve_rejects_prefix_match() {
        let file = write_elf(&[("_ZN6webrtc17WindowCapturerX11", 0x1000)], true);
        assert_eq!(resolve_symbol(file.path(), TARGET).unwrap(), None);

        let longer = format!("{TARGET}.cold");
        let file = write_elf(&[(longer.as_str(), 0x2000)], true);
        assert_eq!(resolve_symbol(file.path(), TARGET).unwrap(), None);
    }

    #[test]
    fn test_last_entry_is_examined() {
        let file = write_elf(&[("a", 1), ("b", 2), (TARGET, 0x777)], true);
        let table = SymbolTable::read(file.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.offset_of(TARGET), Some(0x777));
    }

    #[test]
    fn test_duplicate_name_last_wins() {
        let file = write_elf(&[(TARGET, 0x100), (TARGET, 0x200)], true);
        assert_eq!(resolve_symbol(file.path(), TARGET).unwrap(), Some(0x200));
    }

    #[test]
    fn test_null_entry_is_skipped() {
        let file = write_elf(&[("only", 0x10)], true);
        let table = SymbolTable::read(file.path()).unwrap();
        assert_eq!(
            table.entries(),
            &[SymbolEntry {
                name: "only".to_string(),
                value: 0x10
            }]
        );
        assert_eq!(table.offset_of(""), None);
    }

    #[test]
    fn test_require_treats_zero_as_missing() {
        let file = write_elf(&[(TARGET, 0)], true);
        let table = SymbolTable::read(file.path()).unwrap();
        let err = table.require(TARGET, file.path()).unwrap_err();
        assert!(matches!(err, PatchError::SymbolNotFound { .. }));
    }

    #[test]
    fn test_stripped_object_is_an_error() {
        let file = write_elf(&[], false);
        let err = SymbolTable::read(file.path()).unwrap_err();
        assert!(matches!(err, PatchError::MissingSymbolTable(_)));
    }

    #[test]
    fn test_non_elf_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"#!/bin/sh\necho not an object\n").unwrap();
        let err = SymbolTable::read(file.path()).unwrap_err();
        assert!(matches!(err, PatchError::NotElf { .. }));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = SymbolTable::read(Path::new("/nonexistent/real_module.node")).unwrap_err();
        assert!(matches!(err, PatchError::NotElf { .. }));
    }

    #[no_mangle]
    pub extern "C" fn webrtc_patcher_resolver_marker() -> u32 {
        0x5eed
    }

    #[test]
    fn test_offset_matches_runtime_address() {
        let marker = webrtc_patcher_resolver_marker as usize;
        assert_eq!(webrtc_patcher_resolver_marker(), 0x5eed);

        let exe = std::env::current_exe().unwrap();
        let offset = resolve_symbol(&exe, "webrtc_patcher_resolver_marker")
            .unwrap()
            .expect("marker present in test binary");

        let module = crate::interpose::loader::module_containing(marker).unwrap();
        assert_eq!(module.base.wrapping_add(offset as usize), marker);
    }
}
