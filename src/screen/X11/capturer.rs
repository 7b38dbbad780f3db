use super::is_screen_share_supported;
use super::window_ops::{capture_root_screen, capture_window, enumerate_windows, is_window_valid};
use crate::capturer::{BackendState, CaptureBackend, Callback, DesktopCapturer, Source, SourceId};
use crate::error::CaptureError;
use crate::options::CaptureOptions;

/// The only screen source X11 offers: the default root window.
pub const PRIMARY_SCREEN_ID: SourceId = SourceId(1);
const PRIMARY_SCREEN_TITLE: &str = "Primary screen";

// ============================================================================
// Screen
// ============================================================================

pub struct X11ScreenCapturer {
    state: BackendState,
}

impl X11ScreenCapturer {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            state: BackendState::new(options, CaptureBackend::X11),
        }
    }
}

impl DesktopCapturer for X11ScreenCapturer {
    fn start(&mut self, callback: Box<dyn Callback>) {
        self.state.attach(callback);
    }

    fn stop(&mut self) {
        self.state.detach();
    }

    fn capture_frame(&mut self) {
        if !self.state.is_started() {
            return;
        }
        let outcome = capture_root_screen();
        if let Err(err) = &outcome {
            log::debug!(err:display = err; "X11 screen capture failed");
        }
        self.state.deliver(outcome);
    }

    fn get_source_list(&mut self, sources: &mut Vec<Source>) -> bool {
        sources.clear();
        if !is_screen_share_supported() {
            self.state
                .set_error(Some(CaptureError::BackendUnavailable("X11 display unreachable")));
            return false;
        }
        sources.push(Source::screen(PRIMARY_SCREEN_ID, PRIMARY_SCREEN_TITLE.to_string(), 0));
        true
    }

    fn select_source(&mut self, id: SourceId) -> bool {
        if !self.is_source_valid(id) {
            return false;
        }
        self.state.selected = id;
        true
    }

    fn is_source_valid(&mut self, id: SourceId) -> bool {
        id == PRIMARY_SCREEN_ID && is_screen_share_supported()
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

// ============================================================================
// Window
// ============================================================================

pub struct X11WindowCapturer {
    state: BackendState,
}

impl X11WindowCapturer {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            state: BackendState::new(options, CaptureBackend::X11),
        }
    }
}

impl DesktopCapturer for X11WindowCapturer {
    fn start(&mut self, callback: Box<dyn Callback>) {
        self.state.attach(callback);
    }

    fn stop(&mut self) {
        self.state.detach();
    }

    fn capture_frame(&mut self) {
        if !self.state.is_started() {
            return;
        }
        let outcome = capture_window(self.state.selected);
        if let Err(err) = &outcome {
            log::debug!(err:display = err; "X11 window capture failed");
        }
        self.state.deliver(outcome);
    }

    fn get_source_list(&mut self, sources: &mut Vec<Source>) -> bool {
        sources.clear();
        sources.extend(
            enumerate_windows()
                .into_iter()
                .map(|w| Source::window(w.id, w.title)),
        );
        true
    }

    fn select_source(&mut self, id: SourceId) -> bool {
        if !self.is_source_valid(id) {
            return false;
        }
        self.state.selected = id;
        true
    }

    fn is_source_valid(&mut self, id: SourceId) -> bool {
        is_window_valid(id)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureResult;
    use crate::frame::BasicFrame;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_window_capture_before_select_is_permanent() {
        let mut capturer = X11WindowCapturer::new(CaptureOptions::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        capturer.start(Box::new(move |result: CaptureResult, frame: Option<BasicFrame>| {
            sink.lock().unwrap().push((result, frame.is_none()));
        }));
        capturer.capture_frame();
        capturer.stop();
        capturer.capture_frame();

        assert_eq!(*results.lock().unwrap(), vec![(CaptureResult::ErrorPermanent, true)]);
        assert_eq!(capturer.last_error(), Some(CaptureError::SourceUnavailable));
    }

    #[test]
    fn test_screen_rejects_unknown_ids() {
        let mut capturer = X11ScreenCapturer::new(CaptureOptions::default());
        assert!(!capturer.select_source(SourceId(2)));
        assert!(!capturer.select_source(SourceId::NONE));
        assert_eq!(capturer.selected_source(), SourceId::NONE);
        assert_eq!(capturer.backend(), CaptureBackend::X11);
    }
}
