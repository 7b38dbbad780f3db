use super::window_ops::{capture_window, is_window_valid, shareable_windows};
use super::ensure_permission;
use crate::capturer::{BackendState, CaptureBackend, Callback, DesktopCapturer, Source, SourceId};
use crate::error::CaptureError;
use crate::frame::BasicFrame;
use crate::options::CaptureOptions;

/// Window capture with `CGWindowListCreateImage`.
pub struct MacWindowCapturer {
    state: BackendState,
}

impl MacWindowCapturer {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            state: BackendState::new(options, CaptureBackend::CoreGraphics),
        }
    }

    fn capture(&self) -> Result<BasicFrame, CaptureError> {
        ensure_permission()?;
        if self.state.selected.is_none() {
            return Err(CaptureError::SourceUnavailable);
        }
        capture_window(self.state.selected)
    }
}

impl DesktopCapturer for MacWindowCapturer {
    fn start(&mut self, callback: Box<dyn Callback>) {
        self.state.attach(callback);
        if let Err(err) = ensure_permission() {
            log::warn!("Screen Recording permission missing");
            self.state.set_error(Some(err));
        }
    }

    fn stop(&mut self) {
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
        sources.extend(
            shareable_windows()
                .into_iter()
                .map(|w| Source::window(SourceId(u64::from(w.id)), w.title())),
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
