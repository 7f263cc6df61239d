//! The replacement window capturer.

use super::events::{drain_events, Selection, SurfaceState};
use super::{
    CaptureCallback, CaptureResult, DesktopCapturer, DisplayServer, Frame, FrameSize,
    GraphicsContext, PixmapId, WindowGone, WindowId,
};
use tracing::{debug, info, warn};

enum CaptureFailure {
    /// The window is gone or was never valid.
    SourceLost(anyhow::Error),
    /// Includes windows that exist but are not viewable, e.g. minimized.
    Temporary(anyhow::Error),
}

/// Captures one window at a time from a composited, zero-copy imported surface.
///
/// Single-threaded: every method runs to completion on the caller's thread.
pub struct WindowCapturer<D: DisplayServer, G: GraphicsContext> {
    // Declared first so it drops before the display connection it may borrow.
    graphics: G,
    display: D,
    callback: Option<Box<dyn CaptureCallback>>,
    selection: Selection,
    pixmap: Option<PixmapId>,
    /// Size of the surface as of its last recreation.
    size: FrameSize,
}

impl<D: DisplayServer, G: GraphicsContext> WindowCapturer<D, G> {
    pub fn new(display: D, graphics: G) -> Self {
        Self {
            graphics,
            display,
            callback: None,
            selection: Selection::default(),
            pixmap: None,
            size: FrameSize::default(),
        }
    }

    pub fn selected_window(&self) -> Option<WindowId> {
        self.selection.window
    }

    pub fn surface_state(&self) -> SurfaceState {
        self.selection.surface
    }

    pub fn frame_size(&self) -> FrameSize {
        self.size
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn graphics(&self) -> &G {
        &self.graphics
    }

    fn poll_events(&mut self) {
        if let Err(e) = drain_events(&mut self.display, &mut self.selection) {
            warn!("Failed to poll display events: {e:#}");
        }
        if self.selection.window.is_none() && self.pixmap.is_some() {
            self.release_surface();
        }
    }

    fn release_surface(&mut self) {
        if let Some(pixmap) = self.pixmap.take() {
            if let Err(e) = self.graphics.release_image() {
                warn!("Failed to destroy imported image: {e:#}");
            }
            if let Err(e) = self.display.free_pixmap(pixmap) {
                warn!(pixmap, "Failed to free pixmap: {e:#}");
            }
            debug!(pixmap, "released surface");
        }
    }

    fn release_window(&mut self, window: WindowId) {
        if let Err(e) = self.display.unsubscribe(window) {
            warn!(window, "Failed to unsubscribe from window events: {e:#}");
        }
        if let Err(e) = self.display.unredirect(window) {
            warn!(window, "Failed to stop redirecting window: {e:#}");
        }
    }

    fn recreate_surface(&mut self, window: WindowId) -> Result<(), CaptureFailure> {
        self.release_surface();

        let pixmap = self.display.name_window_pixmap(window).map_err(|e| {
            if e.downcast_ref::<WindowGone>().is_some() {
                CaptureFailure::SourceLost(e)
            } else {
                CaptureFailure::Temporary(e)
            }
        })?;
        self.pixmap = Some(pixmap);

        self.size = self
            .display
            .pixmap_size(pixmap)
            .map_err(CaptureFailure::Temporary)?;

        self.graphics
            .import_pixmap(pixmap)
            .map_err(CaptureFailure::Temporary)?;

        self.selection.surface = SurfaceState::Fresh;
        info!(
            window,
            width = self.size.width,
            height = self.size.height,
            "created new image"
        );
        Ok(())
    }

    fn render(&mut self, window: WindowId) -> Result<Frame, CaptureFailure> {
        if self.selection.is_stale() {
            self.recreate_surface(window)?;
        }

        let mut frame = Frame::new(self.size);
        self.graphics
            .read_pixels(self.size, &mut frame.data)
            .map_err(CaptureFailure::Temporary)?;
        Ok(frame)
    }

    fn capture_window(&mut self, window: WindowId) -> Result<Frame, CaptureFailure> {
        self.graphics
            .make_current()
            .map_err(CaptureFailure::Temporary)?;

        let result = self.render(window);

        if let Err(e) = self.graphics.release_current() {
            warn!("Failed to release graphics context: {e:#}");
        }
        result
    }

    fn deliver(&mut self, result: CaptureResult, frame: Option<Frame>) {
        match self.callback.as_mut() {
            Some(callback) => callback.on_capture_result(result, frame),
            None => warn!(?result, "capture result dropped, capturer not started"),
        }
    }
}

impl<D: DisplayServer, G: GraphicsContext> DesktopCapturer for WindowCapturer<D, G> {
    fn start(&mut self, callback: Box<dyn CaptureCallback>) {
        self.callback = Some(callback);
    }

    fn select_source(&mut self, window: WindowId) -> bool {
        info!(window, old = ?self.selection.window, "select source");
        self.poll_events();

        if let Some(old) = self.selection.window {
            self.release_window(old);
        }
        self.release_surface();

        self.selection.select(window);
        if let Err(e) = self.display.subscribe(window) {
            warn!(window, "Failed to subscribe to window events: {e:#}");
        }
        if let Err(e) = self.display.redirect(window) {
            warn!(window, "Failed to redirect window: {e:#}");
        }

        true
    }

    fn capture_frame(&mut self) {
        self.poll_events();

        let Some(window) = self.selection.window else {
            self.deliver(CaptureResult::ErrorPermanent, None);
            return;
        };

        match self.capture_window(window) {
            Ok(frame) => self.deliver(CaptureResult::Success, Some(frame)),
            Err(CaptureFailure::SourceLost(e)) => {
                warn!(window, "Window cannot be captured: {e:#}");
                self.release_surface();
                self.release_window(window);
                self.selection.window = None;
                self.selection.surface = SurfaceState::Stale;
                self.deliver(CaptureResult::ErrorPermanent, None);
            }
            Err(CaptureFailure::Temporary(e)) => {
                warn!(window, "Capture failed: {e:#}");
                self.selection.surface = SurfaceState::Stale;
                self.deliver(CaptureResult::ErrorTemporary, None);
            }
        }
    }
}

impl<D: DisplayServer, G: GraphicsContext> Drop for WindowCapturer<D, G> {
    fn drop(&mut self) {
        self.release_surface();
        if let Some(window) = self.selection.window.take() {
            self.release_window(window);
        }
    }
}
