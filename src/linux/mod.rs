//! Linux X11 backends: Composite for the window surface, EGL for the import.

pub mod composite;
pub mod egl;
pub mod window;

pub use composite::X11Composite;
pub use egl::EglContext;
pub use window::{list_windows, WindowInfo};

use anyhow::Result;

use crate::capture::WindowCapturer;

pub type X11WindowCapturer = WindowCapturer<X11Composite, EglContext>;

/// Open a private display connection and graphics context for one capturer.
pub fn create_capturer(display: Option<&str>) -> Result<X11WindowCapturer> {
    let server = X11Composite::connect(display)?;
    // SAFETY: the capturer drops its graphics context before the connection.
    let graphics = unsafe { EglContext::new(server.raw_connection(), server.screen())? };
    Ok(WindowCapturer::new(server, graphics))
}
