//! Startup-time failures of the interposer.
//!
//! None of these are reported per capture call. Any of them means the
//! substitute capturer is not in place and the module must not load.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    /// The file is not an ELF object goblin can make sense of.
    #[error("{path:?} is not a readable ELF object: {reason}")]
    NotElf { path: PathBuf, reason: String },

    /// The object was stripped of its static symbol table.
    #[error("{0:?} has no SHT_SYMTAB section")]
    MissingSymbolTable(PathBuf),

    /// The exact mangled name was not present in the symbol table.
    #[error("symbol {symbol} not found in {library:?}")]
    SymbolNotFound { symbol: String, library: PathBuf },

    #[error("failed to load {path:?}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    #[error("real library does not export {name}")]
    MissingExport { name: String },

    /// The dynamic linker has no record of where the library was mapped.
    #[error("no load address known for {path:?}")]
    BaseAddressUnknown { path: PathBuf },

    #[error("cannot patch code at {address:#x}: {reason}")]
    PatchTarget { address: usize, reason: &'static str },

    #[error("failed to change protection of code page at {address:#x}: {source}")]
    Protect {
        address: usize,
        #[source]
        source: nix::Error,
    },

    #[error("code patching is only implemented for x86_64")]
    UnsupportedArchitecture,
}

pub type PatchResult<T> = Result<T, PatchError>;
