//! Replaces WebRTC's X11 window capturer inside a host process.
//!
//! Built as a shared object that takes the place of the real module. On
//! registration it finds the real library's `CreateRawWindowCapturer`, redirects
//! it to [`abi::create_raw_window_capturer`], and forwards registration. The
//! replacement captures through XComposite and an EGLImage instead of copying the
//! window image over the X protocol.

#[cfg(not(target_os = "linux"))]
compile_error!("webrtc-patcher only supports Linux");

pub mod abi;
pub mod capture;
pub mod config;
pub mod error;
pub mod host;
pub mod interpose;
pub mod linux;
pub mod logging;

pub use capture::{CaptureCallback, CaptureResult, DesktopCapturer, Frame, FrameSize};
pub use error::{PatchError, PatchResult};
pub use interpose::Interposer;
