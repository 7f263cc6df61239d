//! Redirecting a function at a run-time address to a replacement.
//!
//! The first bytes of the target are overwritten with an absolute jump. Nothing of
//! the original entry is preserved, so the original can no longer be called.

use crate::error::{PatchError, PatchResult};
use nix::sys::mman::{mprotect, ProtFlags};
use std::ptr::NonNull;
use tracing::{debug, info};

/// `jmp qword ptr [rip+0]` followed by the 8-byte destination.
pub const PATCH_LEN: usize = 14;

pub fn encode_jump(destination: usize) -> [u8; PATCH_LEN] {
    let mut patch = [0u8; PATCH_LEN];
    patch[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
    patch[6..].copy_from_slice(&(destination as u64).to_le_bytes());
    patch
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTarget {
    pub symbol: String,
    pub address: usize,
    pub replacement: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    Installed,
    /// The exact same redirection was already in place; nothing was written.
    AlreadyInstalled,
}

/// Records every redirection it has written. Hooks are never removed.
#[derive(Debug, Default)]
pub struct HookInstaller {
    installed: Vec<HookTarget>,
}

impl HookInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installed(&self) -> &[HookTarget] {
        &self.installed
    }

    /// Redirect every future call to `target.address` into `target.replacement`.
    ///
    /// # Safety
    ///
    /// `target.address` must be the entry of a function at least [`PATCH_LEN`]
    /// bytes long that no thread is executing, and `target.replacement` must have
    /// the identical signature and calling convention.
    pub unsafe fn install(&mut self, target: HookTarget) -> PatchResult<HookStatus> {
        if target.address == 0 || target.replacement == 0 {
            return Err(PatchError::PatchTarget {
                address: target.address,
                reason: "null address",
            });
        }
        if target.address == target.replacement {
            return Err(PatchError::PatchTarget {
                address: target.address,
                reason: "target and replacement are the same function",
            });
        }

        if let Some(existing) = self.installed.iter().find(|h| h.address == target.address) {
            if existing.replacement == target.replacement {
                return Ok(HookStatus::AlreadyInstalled);
            }
            return Err(PatchError::PatchTarget {
                address: target.address,
                reason: "already redirected to a different replacement",
            });
        }

        let patch = encode_jump(target.replacement);
        let current = std::slice::from_raw_parts(target.address as *const u8, PATCH_LEN);
        if current == patch {
            debug!(symbol = %target.symbol, "redirection already present in code");
            self.installed.push(target);
            return Ok(HookStatus::AlreadyInstalled);
        }

        write_code(target.address, &patch)?;

        info!(
            symbol = %target.symbol,
            address = format_args!("{:#x}", target.address),
            replacement = format_args!("{:#x}", target.replacement),
            "installed hook"
        );
        self.installed.push(target);
        Ok(HookStatus::Installed)
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn write_code(address: usize, bytes: &[u8]) -> PatchResult<()> {
    let page = page_size();
    let start = address & !(page - 1);
    let end = (address + bytes.len() + page - 1) & !(page - 1);
    let region = NonNull::new(start as *mut libc::c_void).ok_or(PatchError::PatchTarget {
        address,
        reason: "code page at address zero",
    })?;

    mprotect(
        region,
        end - start,
        ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
    )
    .map_err(|source| PatchError::Protect { address, source })?;

    std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());

    // x86 keeps instruction fetch coherent with stores; no cache flush needed.
    mprotect(region, end - start, ProtFlags::PROT_READ | ProtFlags::PROT_EXEC)
        .map_err(|source| PatchError::Protect { address, source })?;
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn write_code(_address: usize, _bytes: &[u8]) -> PatchResult<()> {
    Err(PatchError::UnsupportedArchitecture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_jump_layout() {
        let patch = encode_jump(0x1122_3344_5566_7788);
        assert_eq!(&patch[..6], &[0xff, 0x25, 0, 0, 0, 0]);
        assert_eq!(&patch[6..], &0x1122_3344_5566_7788u64.to_le_bytes());
    }

    #[test]
    fn test_null_target_rejected() {
        let mut installer = HookInstaller::new();
        let err = unsafe {
            installer.install(HookTarget {
                symbol: "null".into(),
                address: 0,
                replacement: 0x1000,
            })
        }
        .unwrap_err();
        assert!(matches!(err, PatchError::PatchTarget { .. }));
        assert!(installer.installed().is_empty());
    }

    #[test]
    fn test_self_redirect_rejected() {
        let mut installer = HookInstaller::new();
        let err = unsafe {
            installer.install(HookTarget {
                symbol: "loop".into(),
                address: 0x1000,
                replacement: 0x1000,
            })
        }
        .unwrap_err();
        assert!(matches!(err, PatchError::PatchTarget { .. }));
    }

    #[cfg(target_arch = "x86_64")]
    mod x86_64 {
        use super::*;

        type AddFn = extern "C" fn(i32) -> i32;

        /// An executable page holding `lea eax, [rdi + imm8]; ret` padded with int3.
        struct CodePage {
            base: *mut u8,
            len: usize,
        }

        impl CodePage {
            fn add_const(imm: i8) -> Self {
                let len = page_size();
                unsafe {
                    let base = libc::mmap(
                        std::ptr::null_mut(),
                        len,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                        -1,
                        0,
                    );
                    assert_ne!(base, libc::MAP_FAILED);
                    let base = base as *mut u8;
                    std::ptr::write_bytes(base, 0xcc, len);
                    let code = [0x8d, 0x47, imm as u8, 0xc3];
                    std::ptr::copy_nonoverlapping(code.as_ptr(), base, code.len());
                    assert_eq!(
                        libc::mprotect(base as *mut libc::c_void, len, libc::PROT_READ | libc::PROT_EXEC),
                        0
                    );
                    Self { base, len }
                }
            }

            fn function(&self) -> AddFn {
                unsafe { std::mem::transmute::<*mut u8, AddFn>(self.base) }
            }

            fn address(&self) -> usize {
                self.base as usize
            }
        }

        impl Drop for CodePage {
            fn drop(&mut self) {
                unsafe {
                    libc::munmap(self.base as *mut libc::c_void, self.len);
                }
            }
        }

        #[test]
        fn test_install_redirects_calls() {
            let original = CodePage::add_const(1);
            let replacement = CodePage::add_const(100);
            assert_eq!(std::hint::black_box(original.function())(1), 2);

            let mut installer = HookInstaller::new();
            let status = unsafe {
                installer.install(HookTarget {
                    symbol: "add_one".into(),
                    address: original.address(),
                    replacement: replacement.address(),
                })
            }
            .unwrap();

            assert_eq!(status, HookStatus::Installed);
            assert_eq!(std::hint::black_box(original.function())(1), 101);
            assert_eq!(std::hint::black_box(original.function())(5), 105);
        }

        #[test]
        fn test_reinstall_is_not_reapplied() {
            let original = CodePage::add_const(1);
            let replacement = CodePage::add_const(50);
            let target = HookTarget {
                symbol: "add_one".into(),
                address: original.address(),
                replacement: replacement.address(),
            };

            let mut installer = HookInstaller::new();
            unsafe {
                assert_eq!(installer.install(target.clone()).unwrap(), HookStatus::Installed);
                assert_eq!(
                    installer.install(target.clone()).unwrap(),
                    HookStatus::AlreadyInstalled
                );
            }
            assert_eq!(installer.installed().len(), 1);

            // A second installer sees the patch already in the code.
            let mut other = HookInstaller::new();
            assert_eq!(
                unsafe { other.install(target) }.unwrap(),
                HookStatus::AlreadyInstalled
            );
            assert_eq!(std::hint::black_box(original.function())(1), 51);
        }

        #[test]
        fn test_conflicting_replacement_rejected() {
            let original = CodePage::add_const(1);
            let first = CodePage::add_const(10);
            let second = CodePage::add_const(20);

            let mut installer = HookInstaller::new();
            unsafe {
                installer
                    .install(HookTarget {
                        symbol: "add_one".into(),
                        address: original.address(),
                        replacement: first.address(),
                    })
                    .unwrap();
                let err = installer
                    .install(HookTarget {
                        symbol: "add_one".into(),
                        address: original.address(),
                        replacement: second.address(),
                    })
                    .unwrap_err();
                assert!(matches!(err, PatchError::PatchTarget { .. }));
            }
            assert_eq!(std::hint::black_box(original.function())(1), 11);
        }
    }
}
