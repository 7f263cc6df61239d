//! Tracking whether the selected window's surface still matches the window.

use super::{DisplayServer, WindowId};
use anyhow::Result;
use tracing::{debug, info};

/// Display-server events the capturer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Destroyed(WindowId),
    Configured(WindowId),
    Mapped(WindowId),
    VisibilityChanged(WindowId),
    /// Anything else that arrived on the connection.
    Other,
}

impl WindowEvent {
    pub fn window(&self) -> Option<WindowId> {
        match *self {
            WindowEvent::Destroyed(w)
            | WindowEvent::Configured(w)
            | WindowEvent::Mapped(w)
            | WindowEvent::VisibilityChanged(w) => Some(w),
            WindowEvent::Other => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Fresh,
    /// Must be recreated before the next read.
    Stale,
}

/// The selected source and the state of its surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub window: Option<WindowId>,
    pub surface: SurfaceState,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            window: None,
            surface: SurfaceState::Stale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEffect {
    Ignored,
    MarkedStale,
    SourceLost,
}

impl Selection {
    pub fn select(&mut self, window: WindowId) {
        self.window = Some(window);
        self.surface = SurfaceState::Stale;
    }

    pub fn is_stale(&self) -> bool {
        self.surface == SurfaceState::Stale
    }

    /// Apply one event. Only events for the selected window have an effect.
    pub fn apply(&mut self, event: &WindowEvent) -> EventEffect {
        let Some(selected) = self.window else {
            return EventEffect::Ignored;
        };
        if event.window() != Some(selected) {
            return EventEffect::Ignored;
        }

        match event {
            WindowEvent::Destroyed(_) => {
                self.window = None;
                self.surface = SurfaceState::Stale;
                EventEffect::SourceLost
            }
            WindowEvent::Configured(_)
            | WindowEvent::Mapped(_)
            | WindowEvent::VisibilityChanged(_) => {
                self.surface = SurfaceState::Stale;
                EventEffect::MarkedStale
            }
            WindowEvent::Other => EventEffect::Ignored,
        }
    }
}

/// Apply every event already queued on `display`. Returns how many were read.
pub fn drain_events<D: DisplayServer>(display: &mut D, selection: &mut Selection) -> Result<usize> {
    let mut count = 0;
    while let Some(event) = display.poll_event()? {
        count += 1;
        match selection.apply(&event) {
            EventEffect::SourceLost => info!(?event, "selected window destroyed"),
            EventEffect::MarkedStale => debug!(?event, "surface update required"),
            EventEffect::Ignored => {}
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected(window: WindowId) -> Selection {
        Selection {
            window: Some(window),
            surface: SurfaceState::Fresh,
        }
    }

    #[test]
    fn test_destroy_clears_source() {
        let mut sel = selected(7);
        assert_eq!(sel.apply(&WindowEvent::Destroyed(7)), EventEffect::SourceLost);
        assert_eq!(sel.window, None);
        assert!(sel.is_stale());
    }

    #[test]
    fn test_geometry_and_visibility_mark_stale() {
        for event in [
            WindowEvent::Configured(7),
            WindowEvent::Mapped(7),
            WindowEvent::VisibilityChanged(7),
        ] {
            let mut sel = selected(7);
            assert_eq!(sel.apply(&event), EventEffect::MarkedStale);
            assert_eq!(sel.window, Some(7));
            assert!(sel.is_stale());
        }
    }

    #[test]
    fn test_other_windows_ignored() {
        let mut sel = selected(7);
        assert_eq!(sel.apply(&WindowEvent::Destroyed(8)), EventEffect::Ignored);
        assert_eq!(sel.apply(&WindowEvent::Configured(8)), EventEffect::Ignored);
        assert_eq!(sel.apply(&WindowEvent::Other), EventEffect::Ignored);
        assert_eq!(sel, selected(7));
    }

    #[test]
    fn test_no_selection_ignores_everything() {
        let mut sel = Selection::default();
        assert_eq!(sel.apply(&WindowEvent::Destroyed(1)), EventEffect::Ignored);
        assert_eq!(sel.window, None);
    }

    #[test]
    fn test_select_marks_stale() {
        let mut sel = selected(1);
        sel.select(2);
        assert_eq!(sel.window, Some(2));
        assert!(sel.is_stale());
    }
}
