//! Window capture behind the `DesktopCapturer` capability set.
//!
//! The engine itself is backend-agnostic: a [`DisplayServer`] supplies window
//! events and composited pixmaps, a [`GraphicsContext`] imports them and reads
//! pixels back.

pub mod engine;
pub mod events;

pub use engine::WindowCapturer;
pub use events::{SurfaceState, WindowEvent};

use anyhow::Result;

/// Opaque window identifier as handed to `SelectSource`.
pub type WindowId = u32;
/// Server-side off-screen pixmap holding a redirected window's contents.
pub type PixmapId = u32;

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn byte_len(&self) -> usize {
        self.stride() * self.height as usize
    }
}

/// A captured frame of BGRA8 pixels, rows top to bottom with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub size: FrameSize,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            data: vec![0; size.byte_len()],
        }
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.size.stride();
        &self.data[y * stride..(y + 1) * stride]
    }

    /// The pixels reordered as RGBA with alpha forced opaque.
    pub fn to_rgba(&self) -> Vec<u8> {
        self.data
            .chunks_exact(BYTES_PER_PIXEL)
            .flat_map(|px| [px[2], px[1], px[0], 0xff])
            .collect()
    }
}

/// Outcome of one `CaptureFrame` call. Discriminants match the host's enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CaptureResult {
    Success = 0,
    /// Retrying later may succeed.
    ErrorTemporary = 1,
    /// Nothing more can be captured until another source is selected.
    ErrorPermanent = 2,
}

/// The window no longer exists on the display server.
///
/// Returned by [`DisplayServer::name_window_pixmap`] to tell a destroyed window
/// apart from one that is alive but cannot be captured right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("window {0:#x} does not exist")]
pub struct WindowGone(pub WindowId);

/// Receives exactly one result per `capture_frame` call.
pub trait CaptureCallback {
    fn on_capture_result(&mut self, result: CaptureResult, frame: Option<Frame>);
}

/// The capability set of the capturer being replaced.
pub trait DesktopCapturer {
    /// Record where results go. Calling again replaces the sink.
    fn start(&mut self, callback: Box<dyn CaptureCallback>);

    /// Switch to `window`. Always succeeds; an invalid id surfaces on capture.
    fn select_source(&mut self, window: WindowId) -> bool;

    /// Produce one result through the sink before returning.
    fn capture_frame(&mut self);
}

/// The display-server side: compositing redirection, events and pixmaps.
pub trait DisplayServer {
    /// Next already-queued event, without waiting for new ones.
    fn poll_event(&mut self) -> Result<Option<WindowEvent>>;

    /// Ask for destroy, configure, map and visibility events of `window`.
    fn subscribe(&mut self, window: WindowId) -> Result<()>;
    fn unsubscribe(&mut self, window: WindowId) -> Result<()>;

    /// Start rendering `window` into off-screen storage.
    fn redirect(&mut self, window: WindowId) -> Result<()>;
    fn unredirect(&mut self, window: WindowId) -> Result<()>;

    /// Bind a new pixmap to the current off-screen contents of `window`.
    ///
    /// Fails with [`WindowGone`] if the window was destroyed. Any other error,
    /// such as the window not being viewable, is expected to clear up later.
    fn name_window_pixmap(&mut self, window: WindowId) -> Result<PixmapId>;
    fn pixmap_size(&mut self, pixmap: PixmapId) -> Result<FrameSize>;
    fn free_pixmap(&mut self, pixmap: PixmapId) -> Result<()>;
}

/// The graphics side: one imported image, sampled into a framebuffer.
pub trait GraphicsContext {
    fn make_current(&mut self) -> Result<()>;
    fn release_current(&mut self) -> Result<()>;

    /// Import `pixmap` without copying, replacing the framebuffer's source.
    fn import_pixmap(&mut self, pixmap: PixmapId) -> Result<()>;
    /// Destroy the imported image, if any.
    fn release_image(&mut self) -> Result<()>;

    /// Read `size` pixels of the framebuffer as BGRA into `dst`.
    fn read_pixels(&mut self, size: FrameSize, dst: &mut [u8]) -> Result<()>;
}
