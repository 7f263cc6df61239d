//! X11 Composite extension backend

use anyhow::{Context, Result};
use std::ffi::{c_void, CString};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::errors::ReplyError;
use x11rb::protocol::composite::{ConnectionExt as CompositeExt, Redirect};
use x11rb::protocol::xproto::{ChangeWindowAttributesAux, ConnectionExt, EventMask};
use x11rb::protocol::{ErrorKind, Event};
use x11rb::xcb_ffi::XCBConnection;

use crate::capture::{DisplayServer, FrameSize, PixmapId, WindowEvent, WindowGone, WindowId};

/// A private XCB connection with Composite 0.4 available.
///
/// XCB rather than a pure-Rust connection, because EGL needs the native
/// `xcb_connection_t` to import pixmaps created here.
pub struct X11Composite {
    conn: XCBConnection,
    screen: usize,
}

impl X11Composite {
    /// Connect to `display`, or to `$DISPLAY` when `None`.
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let name = display
            .map(CString::new)
            .transpose()
            .context("Display name contains a NUL byte")?;

        let (conn, screen) = XCBConnection::connect(name.as_deref())
            .context("Failed to connect to X11 display")?;

        let version = conn
            .composite_query_version(0, 4)
            .context("Composite extension not available")?
            .reply()
            .context("Failed to query composite version")?;

        info!(
            "Composite extension {}.{} on screen {}",
            version.major_version, version.minor_version, screen
        );

        Ok(Self { conn, screen })
    }

    /// The native `xcb_connection_t*`, valid for as long as `self` lives.
    pub fn raw_connection(&self) -> *mut c_void {
        self.conn.get_raw_xcb_connection()
    }

    pub fn connection(&self) -> &XCBConnection {
        &self.conn
    }

    pub fn screen(&self) -> usize {
        self.screen
    }

    fn set_event_mask(&mut self, window: WindowId, mask: EventMask) -> Result<()> {
        self.conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(mask))
            .context("Failed to change window event mask")?;
        self.conn.flush()?;
        Ok(())
    }
}

impl DisplayServer for X11Composite {
    fn poll_event(&mut self) -> Result<Option<WindowEvent>> {
        self.conn.flush()?;
        let Some(event) = self
            .conn
            .poll_for_event()
            .context("Failed to poll X11 events")?
        else {
            return Ok(None);
        };

        let event = match event {
            Event::DestroyNotify(e) => WindowEvent::Destroyed(e.window),
            Event::ConfigureNotify(e) => WindowEvent::Configured(e.window),
            Event::MapNotify(e) => WindowEvent::Mapped(e.window),
            Event::VisibilityNotify(e) => WindowEvent::VisibilityChanged(e.window),
            Event::Error(e) => {
                debug!(error = ?e, "X11 error");
                WindowEvent::Other
            }
            _ => WindowEvent::Other,
        };
        Ok(Some(event))
    }

    fn subscribe(&mut self, window: WindowId) -> Result<()> {
        self.set_event_mask(window, EventMask::STRUCTURE_NOTIFY | EventMask::VISIBILITY_CHANGE)
    }

    fn unsubscribe(&mut self, window: WindowId) -> Result<()> {
        self.set_event_mask(window, EventMask::NO_EVENT)
    }

    fn redirect(&mut self, window: WindowId) -> Result<()> {
        self.conn
            .composite_redirect_window(window, Redirect::AUTOMATIC)
            .context("Failed to redirect window")?;
        self.conn.flush()?;
        Ok(())
    }

    fn unredirect(&mut self, window: WindowId) -> Result<()> {
        self.conn
            .composite_unredirect_window(window, Redirect::AUTOMATIC)
            .context("Failed to unredirect window")?;
        self.conn.flush()?;
        Ok(())
    }

    fn name_window_pixmap(&mut self, window: WindowId) -> Result<PixmapId> {
        let pixmap = self.conn.generate_id().context("Failed to allocate pixmap id")?;
        let reply = self
            .conn
            .composite_name_window_pixmap(window, pixmap)
            .context("Failed to send NameWindowPixmap")?
            .check();

        match reply {
            Ok(()) => Ok(pixmap),
            Err(ReplyError::X11Error(e)) if e.error_kind == ErrorKind::Window => {
                Err(WindowGone(window).into())
            }
            // BadMatch: the window exists but is not viewable.
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to name pixmap for window {window:#x}"))),
        }
    }

    fn pixmap_size(&mut self, pixmap: PixmapId) -> Result<FrameSize> {
        let geom = self
            .conn
            .get_geometry(pixmap)
            .context("Failed to get pixmap geometry")?
            .reply()
            .context("Failed to get geometry reply")?;
        Ok(FrameSize::new(geom.width as u32, geom.height as u32))
    }

    fn free_pixmap(&mut self, pixmap: PixmapId) -> Result<()> {
        self.conn
            .free_pixmap(pixmap)
            .context("Failed to free pixmap")?;
        self.conn.flush()?;
        Ok(())
    }
}
