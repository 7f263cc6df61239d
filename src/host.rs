//! Entry point seen by the host process.
//!
//! The interposer is installed under the real module's file name. When the host
//! registers it, the hook is put in place and registration is forwarded to the
//! real module.

use std::ffi::c_void;
use std::path::PathBuf;
use std::ptr;
use tracing::{error, info};

use crate::abi::create_raw_window_capturer;
use crate::config::PatcherConfig;
use crate::interpose::{loader, Interposer};
use crate::logging;

pub type NapiEnv = *mut c_void;
pub type NapiValue = *mut c_void;

type RegisterModule = unsafe extern "C" fn(NapiEnv, NapiValue) -> NapiValue;

fn own_path() -> PathBuf {
    loader::module_containing(napi_register_module_v1 as usize)
        .map(|module| module.path)
        .unwrap_or_default()
}

/// Stderr belongs to the host, so it is written only while no log file is open.
fn report_without_log(message: std::fmt::Arguments<'_>) {
    if !logging::is_initialized() {
        eprintln!("webrtc-patcher: {message}");
    }
}

fn bootstrap(config: PatcherConfig) -> anyhow::Result<RegisterModule> {
    if let Err(e) = logging::init_file_logging(&config.log_file, &config.log_filter) {
        report_without_log(format_args!("logging disabled: {e:#}"));
    }
    info!(real_library = ?config.real_library, "webrtc-patcher loaded");

    // SAFETY: the replacement is declared with the factory's C++ signature, and
    // the real library was only just loaded so none of its code is running.
    let interposer =
        unsafe { Interposer::install(config, create_raw_window_capturer as usize)? };
    for hook in interposer.hooks() {
        info!(
            symbol = %hook.symbol,
            address = format_args!("{:#x}", hook.address),
            "hook active"
        );
    }

    let entry = interposer
        .library()
        .symbol(&interposer.config().entry_symbol)?;
    // SAFETY: the export is the module registration function the host expects.
    Ok(unsafe { std::mem::transmute::<*mut c_void, RegisterModule>(entry.as_ptr()) })
}

/// Node-API module registration, forwarded to the real module.
///
/// # Safety
///
/// Called by the host's module loader with a valid environment and exports object.
#[no_mangle]
pub unsafe extern "C" fn napi_register_module_v1(env: NapiEnv, exports: NapiValue) -> NapiValue {
    match bootstrap(PatcherConfig::from_env(&own_path())) {
        Ok(register) => register(env, exports),
        Err(e) => {
            error!("Failed to install window capturer: {e:#}");
            report_without_log(format_args!("{e:#}"));
            ptr::null_mut()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PatchError;
    use std::path::Path;

    #[test]
    fn test_own_path_is_a_loaded_module() {
        let path = own_path();
        assert!(loader::loaded_modules().iter().any(|m| m.path == path));
    }

    #[test]
    fn test_unopenable_log_and_missing_library_fail_cleanly() {
        let mut config = PatcherConfig::for_module(Path::new("/opt/app/voice.node"));
        config.log_file = PathBuf::from("/proc/webrtc-patcher.log");
        config.real_library = PathBuf::from("/nonexistent/real_voice.node");

        let err = bootstrap(config).err().expect("bootstrap fails");
        assert!(matches!(
            err.downcast_ref::<PatchError>(),
            Some(PatchError::NotElf { .. })
        ));
        assert!(Interposer::get().is_none());
    }
}
