use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_TARGET_SYMBOL: &str =
    "_ZN6webrtc17WindowCapturerX1123CreateRawWindowCapturerERKNS_21DesktopCaptureOptionsE";
pub const DEFAULT_FRAME_CONSTRUCTOR_SYMBOL: &str =
    "_ZN6webrtc17BasicDesktopFrameC1ENS_11DesktopSizeE";
pub const DEFAULT_ENTRY_SYMBOL: &str = "napi_register_module_v1";
pub const DEFAULT_LOG_FILE: &str = "/tmp/webrtc-patcher.log";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Prefix of the real library's file name next to the interposer.
pub const REAL_LIBRARY_PREFIX: &str = "real_";

pub const ENV_REAL_LIBRARY: &str = "WEBRTC_PATCHER_REAL_LIBRARY";
pub const ENV_LOG_FILE: &str = "WEBRTC_PATCHER_LOG_FILE";
pub const ENV_LOG_FILTER: &str = "WEBRTC_PATCHER_LOG";
pub const ENV_DISPLAY: &str = "WEBRTC_PATCHER_DISPLAY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatcherConfig {
    /// Mangled name of the factory whose calls are redirected
    pub target_symbol: String,
    /// Mangled name of the real library's `BasicDesktopFrame` constructor
    pub frame_constructor_symbol: String,
    /// Export forwarded to once the hook is in place
    pub entry_symbol: String,
    pub real_library: PathBuf,
    pub log_file: PathBuf,
    pub log_filter: String,
    /// X display to connect to; `$DISPLAY` when unset
    pub display: Option<String>,
}

impl PatcherConfig {
    /// Defaults for an interposer loaded from `module_path`.
    pub fn for_module(module_path: &Path) -> Self {
        Self {
            target_symbol: DEFAULT_TARGET_SYMBOL.to_string(),
            frame_constructor_symbol: DEFAULT_FRAME_CONSTRUCTOR_SYMBOL.to_string(),
            entry_symbol: DEFAULT_ENTRY_SYMBOL.to_string(),
            real_library: real_library_path(module_path),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            display: None,
        }
    }

    /// Defaults with `WEBRTC_PATCHER_*` environment overrides applied.
    pub fn from_env(module_path: &Path) -> Self {
        Self::for_module(module_path).with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = lookup(ENV_REAL_LIBRARY) {
            self.real_library = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_LOG_FILE) {
            self.log_file = PathBuf::from(path);
        }
        if let Some(filter) = lookup(ENV_LOG_FILTER) {
            self.log_filter = filter;
        }
        if let Some(display) = lookup(ENV_DISPLAY) {
            self.display = Some(display);
        }
        self
    }
}

/// `dir/name.node` becomes `dir/real_name.node`.
pub fn real_library_path(module_path: &Path) -> PathBuf {
    let file_name = module_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let real_name = format!("{REAL_LIBRARY_PREFIX}{file_name}");

    match module_path.parent() {
        Some(dir) => dir.join(real_name),
        None => PathBuf::from(real_name),
    }
}
