//! Locating the real library's window capturer factory and redirecting it.
//!
//! Install order: read the static symbol table from disk, load the library, add
//! its load base to the offsets, patch the factory entry.

pub mod hook;
pub mod loader;
pub mod symbols;

pub use hook::{HookInstaller, HookStatus, HookTarget};
pub use loader::{LoadedModule, RealLibrary};
pub use symbols::{resolve_symbol, SymbolTable};

use crate::abi::ForeignFrameFactory;
use crate::config::PatcherConfig;
use crate::error::PatchResult;
use std::sync::{Mutex, OnceLock};
use tracing::info;

static INTERPOSER: OnceLock<Interposer> = OnceLock::new();
static INSTALL: Mutex<()> = Mutex::new(());

/// The process-wide state of an installed redirection.
pub struct Interposer {
    config: PatcherConfig,
    library: RealLibrary,
    installer: HookInstaller,
    frames: ForeignFrameFactory,
}

impl Interposer {
    /// Load the real library and redirect its factory to `replacement`.
    ///
    /// Later calls return the interposer installed by the first successful one.
    ///
    /// # Safety
    ///
    /// `replacement` must have the factory's signature and calling convention, and
    /// no other thread may be running code from the real library.
    pub unsafe fn install(
        config: PatcherConfig,
        replacement: usize,
    ) -> PatchResult<&'static Interposer> {
        let _guard = INSTALL.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = INTERPOSER.get() {
            return Ok(existing);
        }

        let table = SymbolTable::read(&config.real_library)?;
        let factory_offset = table.require(&config.target_symbol, &config.real_library)?;
        let constructor_offset =
            table.require(&config.frame_constructor_symbol, &config.real_library)?;
        info!(
            factory = format_args!("{factory_offset:#x}"),
            constructor = format_args!("{constructor_offset:#x}"),
            "resolved symbol offsets"
        );

        let library = RealLibrary::open(&config.real_library)?;
        let base = library.base_address()?;
        info!(base = format_args!("{base:#x}"), "real library loaded");

        let target = HookTarget {
            symbol: config.target_symbol.clone(),
            address: base + factory_offset as usize,
            replacement,
        };
        let mut installer = HookInstaller::new();
        let status = installer.install(target)?;
        info!(?status, symbol = %config.target_symbol, "factory redirected");

        let frames = ForeignFrameFactory::from_address(base + constructor_offset as usize);

        Ok(INTERPOSER.get_or_init(|| Interposer {
            config,
            library,
            installer,
            frames,
        }))
    }

    pub fn get() -> Option<&'static Interposer> {
        INTERPOSER.get()
    }

    pub fn config(&self) -> &PatcherConfig {
        &self.config
    }

    pub fn library(&self) -> &RealLibrary {
        &self.library
    }

    pub fn hooks(&self) -> &[HookTarget] {
        self.installer.installed()
    }

    pub fn frame_factory(&self) -> ForeignFrameFactory {
        self.frames
    }
}
