//! Loading the real library and locating mapped objects.

use crate::error::{PatchError, PatchResult};
use libc::{c_int, c_void};
use std::ffi::{CStr, CString, OsStr};
use std::ops::Range;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, info};

/// An object currently mapped into the process, as reported by the dynamic linker.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Empty for the main program.
    pub path: PathBuf,
    /// Difference between run-time and link-time addresses.
    pub base: usize,
    pub segments: Vec<Range<usize>>,
}

impl LoadedModule {
    pub fn contains(&self, address: usize) -> bool {
        self.segments.iter().any(|segment| segment.contains(&address))
    }
}

unsafe extern "C" fn collect_module(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> c_int {
    let modules = &mut *(data as *mut Vec<LoadedModule>);
    let info = &*info;

    let path = if info.dlpi_name.is_null() {
        PathBuf::new()
    } else {
        PathBuf::from(OsStr::from_bytes(CStr::from_ptr(info.dlpi_name).to_bytes()))
    };

    let base = info.dlpi_addr as usize;
    let headers = if info.dlpi_phdr.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize)
    };

    let segments = headers
        .iter()
        .filter(|ph| ph.p_type == libc::PT_LOAD)
        .map(|ph| {
            let start = base.wrapping_add(ph.p_vaddr as usize);
            start..start.wrapping_add(ph.p_memsz as usize)
        })
        .collect();

    modules.push(LoadedModule { path, base, segments });
    0
}

/// Every object the dynamic linker has mapped, main program first.
pub fn loaded_modules() -> Vec<LoadedModule> {
    let mut modules: Vec<LoadedModule> = Vec::new();
    // SAFETY: the callback only reads linker-owned data for the duration of the call.
    unsafe {
        libc::dl_iterate_phdr(
            Some(collect_module),
            &mut modules as *mut Vec<LoadedModule> as *mut c_void,
        );
    }
    modules
}

/// The mapped object whose loadable segments cover `address`.
pub fn module_containing(address: usize) -> Option<LoadedModule> {
    loaded_modules().into_iter().find(|m| m.contains(address))
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns a thread-local, NUL-terminated string or null.
    unsafe {
        let message = libc::dlerror();
        if message.is_null() {
            "unknown dynamic linker error".to_string()
        } else {
            CStr::from_ptr(message).to_string_lossy().into_owned()
        }
    }
}

/// The unpatched library, opened with `RTLD_NOW`.
///
/// The handle is never closed: the hook points into its code for the rest of the
/// process lifetime.
#[derive(Debug)]
pub struct RealLibrary {
    handle: NonNull<c_void>,
    path: PathBuf,
}

// SAFETY: a dlopen handle is process-global and the dynamic linker serialises access.
unsafe impl Send for RealLibrary {}
unsafe impl Sync for RealLibrary {}

impl RealLibrary {
    pub fn open(path: &Path) -> PatchResult<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| PatchError::LibraryLoad {
            path: path.to_path_buf(),
            reason: "path contains a NUL byte".to_string(),
        })?;

        // SAFETY: running the library's initialisers is the point of loading it.
        let raw = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
        let handle = NonNull::new(raw).ok_or_else(|| PatchError::LibraryLoad {
            path: path.to_path_buf(),
            reason: last_dl_error(),
        })?;

        info!(path = %path.display(), "loaded real library");
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address of the exported symbol `name`.
    pub fn symbol(&self, name: &str) -> PatchResult<NonNull<c_void>> {
        let c_name = CString::new(name).map_err(|_| PatchError::MissingExport {
            name: name.to_string(),
        })?;
        // SAFETY: the handle stays valid because it is never closed.
        let address = unsafe { libc::dlsym(self.handle.as_ptr(), c_name.as_ptr()) };
        NonNull::new(address).ok_or_else(|| PatchError::MissingExport {
            name: name.to_string(),
        })
    }

    /// Load bias of the library, to which symbol-table offsets are relative.
    pub fn base_address(&self) -> PatchResult<usize> {
        let wanted = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());

        let module = loaded_modules()
            .into_iter()
            .find(|m| {
                !m.path.as_os_str().is_empty()
                    && (m.path == self.path
                        || std::fs::canonicalize(&m.path).map_or(false, |p| p == wanted))
            })
            .ok_or_else(|| PatchError::BaseAddressUnknown {
                path: self.path.clone(),
            })?;

        debug!(path = %self.path.display(), base = format_args!("{:#x}", module.base), "found load address");
        Ok(module.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_program_is_listed_first() {
        let modules = loaded_modules();
        assert!(!modules.is_empty());
        assert!(modules[0].path.as_os_str().is_empty());
        assert!(!modules[0].segments.is_empty());
    }

    #[test]
    fn test_module_containing_own_code() {
        let here = test_module_containing_own_code as usize;
        let module = module_containing(here).expect("own code is mapped");
        assert!(module.contains(here));
        assert!(!module.contains(0));
    }

    #[test]
    fn test_module_containing_unmapped_address() {
        assert!(module_containing(0).is_none());
    }

    #[test]
    fn test_open_missing_library_fails() {
        let err = RealLibrary::open(Path::new("/nonexistent/real_discord_voice.node")).unwrap_err();
        match err {
            PatchError::LibraryLoad { reason, .. } => assert!(!reason.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_open_libc_by_path() {
        let name = CString::new("getpid").unwrap();
        let getpid = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) } as usize;
        assert_ne!(getpid, 0);
        let libc_module = module_containing(getpid).expect("libc is mapped");

        let library = RealLibrary::open(&libc_module.path).unwrap();
        assert_eq!(library.base_address().unwrap(), libc_module.base);
        assert!(library.symbol("getpid").is_ok());
        assert!(matches!(
            library.symbol("webrtc_patcher_no_such_export"),
            Err(PatchError::MissingExport { .. })
        ));
    }
}
