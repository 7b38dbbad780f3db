//! Display capture: ScreenCaptureKit stream with a CoreGraphics fallback.

use core_graphics::display::{CGDirectDisplayID, CGDisplay};

use super::display::{is_display_active, list_displays, main_display_id};
use super::frame::DisplayStream;
use super::{ensure_permission, frame_from_cg_image};
use crate::capturer::{BackendState, CaptureBackend, Callback, DesktopCapturer, Source, SourceId};
use crate::error::CaptureError;
use crate::frame::BasicFrame;
use crate::options::CaptureOptions;

pub struct MacScreenCapturer {
    state: BackendState,
    use_stream: bool,
    stream: Option<DisplayStream>,
    /// Display whose stream failed to open; not retried until restart or reselect.
    stream_failed: Option<CGDirectDisplayID>,
}

impl MacScreenCapturer {
    /// `use_stream` is false when ScreenCaptureKit was probed unavailable.
    pub fn new(options: CaptureOptions, use_stream: bool) -> Self {
        let backend = if use_stream {
            CaptureBackend::ScreenCaptureKit
        } else {
            CaptureBackend::CoreGraphics
        };
        Self {
            state: BackendState::new(options, backend),
            use_stream,
            stream: None,
            stream_failed: None,
        }
    }

    fn display_id(&self) -> CGDirectDisplayID {
        let selected = self.state.selected;
        if selected.is_none() {
            main_display_id()
        } else {
            selected.raw() as CGDirectDisplayID
        }
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
    }

    fn should_open_stream(&self, display_id: CGDirectDisplayID) -> bool {
        self.use_stream
            && self.stream_failed != Some(display_id)
            && !self.stream.as_ref().is_some_and(|s| s.display_id() == display_id)
    }

    fn ensure_stream(&mut self, display_id: CGDirectDisplayID) {
        if !self.should_open_stream(display_id) {
            return;
        }
        self.close_stream();
        match DisplayStream::open(display_id, &self.state.options) {
            Ok(stream) => self.stream = Some(stream),
            Err(err) => {
                log::warn!(err:display = err, display = display_id; "ScreenCaptureKit unavailable, using CoreGraphics");
                self.stream_failed = Some(display_id);
            }
        }
    }

    fn switch_backend(&mut self, backend: CaptureBackend) {
        if self.state.set_backend(backend) {
            log::info!(backend = backend.name(); "macOS screen capture backend changed");
        }
    }

    fn capture(&mut self) -> Result<BasicFrame, CaptureError> {
        ensure_permission()?;

        let display_id = self.display_id();
        if !is_display_active(display_id) {
            self.close_stream();
            return Err(CaptureError::SourceUnavailable);
        }

        self.ensure_stream(display_id);
        if let Some(frame) = self.stream.as_ref().and_then(DisplayStream::latest) {
            self.switch_backend(CaptureBackend::ScreenCaptureKit);
            return Ok(frame);
        }

        let image = CGDisplay::new(display_id)
            .image()
            .ok_or(CaptureError::Runtime("CGDisplayCreateImage returned no image"))?;
        let frame = frame_from_cg_image(&image)?;
        self.switch_backend(CaptureBackend::CoreGraphics);
        Ok(frame)
    }
}

impl DesktopCapturer for MacScreenCapturer {
    fn start(&mut self, callback: Box<dyn Callback>) {
        self.state.attach(callback);
        if let Err(err) = ensure_permission() {
            log::warn!("Screen Recording permission missing");
            self.state.set_error(Some(err));
            return;
        }
        self.close_stream();
        self.stream_failed = None;
        let display_id = self.display_id();
        self.ensure_stream(display_id);
    }

    fn stop(&mut self) {
        self.close_stream();
        self.state.detach();
    }

    fn capture_frame(&mut self) {
        if !self.state.is_started() {
            return;
        }
        let outcome = self.capture();
        self.state.deliver(outcome);
    }

    fn get_source_list(&mut self, sources: &mut Vec<Source>) -> bool {
        sources.clear();
        match list_displays() {
            Ok(displays) => {
                sources.extend(
                    displays
                        .into_iter()
                        .map(|d| Source::screen(SourceId(u64::from(d.id)), d.name, i64::from(d.id))),
                );
                true
            }
            Err(err) => {
                log::warn!(err:display = err; "Failed to list displays");
                false
            }
        }
    }

    fn select_source(&mut self, id: SourceId) -> bool {
        if !self.is_source_valid(id) {
            return false;
        }
        if id != self.state.selected {
            self.stream_failed = None;
        }
        self.state.selected = id;
        true
    }

    fn is_source_valid(&mut self, id: SourceId) -> bool {
        id.is_none() || (id.raw() <= u64::from(u32::MAX) && is_display_active(id.raw() as CGDirectDisplayID))
    }

    fn selected_source(&self) -> SourceId {
        self.state.selected
    }

    fn backend(&self) -> CaptureBackend {
        self.state.backend()
    }

    fn last_error(&self) -> Option<CaptureError> {
        self.state.last_error()
    }
}

impl Drop for MacScreenCapturer {
    fn drop(&mut self) {
        self.close_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_stream_is_not_retried_for_same_display() {
        let mut capturer = MacScreenCapturer::new(CaptureOptions::default(), true);
        assert!(capturer.should_open_stream(5));

        capturer.stream_failed = Some(5);
        assert!(!capturer.should_open_stream(5));
        assert!(capturer.should_open_stream(6));
    }

    #[test]
    fn test_core_graphics_only_never_opens_stream() {
        let capturer = MacScreenCapturer::new(CaptureOptions::default(), false);
        assert!(!capturer.should_open_stream(5));
        assert_eq!(capturer.backend(), CaptureBackend::CoreGraphics);
    }
}
