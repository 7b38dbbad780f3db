//! The capturer contract, the closed set of platform backends and the
//! factories that pick one of them.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::error::{CaptureError, CaptureResult};
use crate::frame::BasicFrame;
use crate::options::{CaptureMethod, CaptureOptions};

#[cfg(target_os = "macos")]
use crate::screen::mac::{MacScreenCapturer, MacWindowCapturer};
#[cfg(windows)]
use crate::screen::win::{DxgiDuplicator, GdiCapturer, WgcCapturer};
#[cfg(target_os = "linux")]
use crate::screen::x11::{X11ScreenCapturer, X11WindowCapturer};

// ============================================================================
// Public Types
// ============================================================================

/// Opaque platform handle of a screen or window.
///
/// Holds an `HWND`/`HMONITOR` on Windows, a `CGWindowID`/`CGDirectDisplayID`
/// on macOS and an X11 window on Linux. An id is only meaningful to the
/// backend instance that listed it; backends validate every id with the OS
/// before using it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(pub u64);

impl SourceId {
    /// No source selected. Screen backends treat it as the primary display.
    pub const NONE: SourceId = SourceId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for SourceId {
    fn from(value: u64) -> Self {
        SourceId(value)
    }
}

/// One capturable screen or window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub id: SourceId,
    pub title: String,
    /// Display id for screens, -1 for windows.
    pub display_id: i64,
}

impl Source {
    pub fn window(id: SourceId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            display_id: -1,
        }
    }

    pub fn screen(id: SourceId, title: impl Into<String>, display_id: i64) -> Self {
        Self {
            id,
            title: title.into(),
            display_id,
        }
    }
}

/// Backend implementation currently producing frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum CaptureBackend {
    #[default]
    Unknown,
    ScreenCaptureKit,
    CoreGraphics,
    X11,
    Wgc,
    Dxgi,
    Gdi,
}

impl CaptureBackend {
    pub fn name(self) -> &'static str {
        match self {
            CaptureBackend::Unknown => "Unknown",
            CaptureBackend::ScreenCaptureKit => "ScreenCaptureKit",
            CaptureBackend::CoreGraphics => "CoreGraphics",
            CaptureBackend::X11 => "X11",
            CaptureBackend::Wgc => "WGC",
            CaptureBackend::Dxgi => "DXGI",
            CaptureBackend::Gdi => "GDI",
        }
    }
}

impl Display for CaptureBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Receives the outcome of every `capture_frame` request.
pub trait Callback: Send {
    fn on_capture_result(&mut self, result: CaptureResult, frame: Option<BasicFrame>);
}

impl<F> Callback for F
where
    F: FnMut(CaptureResult, Option<BasicFrame>) + Send,
{
    fn on_capture_result(&mut self, result: CaptureResult, frame: Option<BasicFrame>) {
        self(result, frame)
    }
}

/// Common interface for platform specific capture backends.
pub trait DesktopCapturer {
    /// Registers the frame sink. Calling again replaces the previous sink.
    fn start(&mut self, callback: Box<dyn Callback>);

    /// Releases OS resources. No callback is invoked after this returns.
    fn stop(&mut self);

    /// Requests one frame. When started, the callback is invoked exactly once.
    fn capture_frame(&mut self);

    /// Fills `sources` with currently capturable sources. Returns `false`
    /// when the platform cannot enumerate at all.
    fn get_source_list(&mut self, sources: &mut Vec<Source>) -> bool;

    fn select_source(&mut self, id: SourceId) -> bool;

    fn is_source_valid(&mut self, id: SourceId) -> bool;

    fn selected_source(&self) -> SourceId;

    fn backend(&self) -> CaptureBackend;

    /// Reason of the last failure, `None` after a success.
    fn last_error(&self) -> Option<CaptureError>;
}

// ============================================================================
// Shared backend state
// ============================================================================

/// Bookkeeping every backend needs: options, sink, selection and last error.
pub(crate) struct BackendState {
    #[cfg_attr(not(any(windows, target_os = "macos")), allow(dead_code))]
    pub(crate) options: CaptureOptions,
    pub(crate) selected: SourceId,
    callback: Option<Box<dyn Callback>>,
    last_error: Option<CaptureError>,
    backend: CaptureBackend,
}

impl BackendState {
    pub(crate) fn new(options: CaptureOptions, backend: CaptureBackend) -> Self {
        Self {
            options,
            selected: SourceId::NONE,
            callback: None,
            last_error: None,
            backend,
        }
    }

    pub(crate) fn attach(&mut self, callback: Box<dyn Callback>) {
        self.callback = Some(callback);
    }

    pub(crate) fn detach(&mut self) {
        self.callback = None;
    }

    pub(crate) fn is_started(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn deliver_frame(&mut self, frame: BasicFrame) {
        self.last_error = None;
        if let Some(callback) = self.callback.as_mut() {
            callback.on_capture_result(CaptureResult::Success, Some(frame));
        }
    }

    pub(crate) fn deliver_error(&mut self, err: CaptureError) {
        let result = CaptureResult::from_error(&err);
        self.last_error = Some(err);
        if let Some(callback) = self.callback.as_mut() {
            callback.on_capture_result(result, None);
        }
    }

    pub(crate) fn deliver(&mut self, outcome: Result<BasicFrame, CaptureError>) {
        match outcome {
            Ok(frame) => self.deliver_frame(frame),
            Err(err) => self.deliver_error(err),
        }
    }

    pub(crate) fn set_error(&mut self, err: Option<CaptureError>) {
        self.last_error = err;
    }

    pub(crate) fn last_error(&self) -> Option<CaptureError> {
        self.last_error.clone()
    }

    pub(crate) fn backend(&self) -> CaptureBackend {
        self.backend
    }

    /// Records a backend switch. Returns `true` when it actually changed.
    pub(crate) fn set_backend(&mut self, backend: CaptureBackend) -> bool {
        let changed = self.backend != backend;
        self.backend = backend;
        changed
    }
}

// ============================================================================
// Capability probe
// ============================================================================

/// What the running system supports, probed once and passed to the factories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureCapabilities {
    pub wgc: bool,
    pub dxgi: bool,
    pub screen_capture_kit: bool,
    pub x11_session: bool,
}

impl CaptureCapabilities {
    #[cfg(windows)]
    pub fn probe() -> Self {
        use crate::screen::win::window_utils;
        Self {
            wgc: window_utils::is_wgc_supported(),
            dxgi: window_utils::is_dxgi_duplication_supported(),
            ..Self::default()
        }
    }

    #[cfg(target_os = "macos")]
    pub fn probe() -> Self {
        Self {
            screen_capture_kit: crate::screen::mac::is_screen_capture_kit_available(),
            ..Self::default()
        }
    }

    #[cfg(target_os = "linux")]
    pub fn probe() -> Self {
        Self {
            x11_session: crate::screen::x11::is_screen_share_supported(),
            ..Self::default()
        }
    }

    #[cfg(not(any(windows, target_os = "macos", target_os = "linux")))]
    pub fn probe() -> Self {
        Self::default()
    }
}

// ============================================================================
// Backend selection
// ============================================================================

/// Windows window-capture chain: WGC, then DXGI cropping, then GDI.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn windows_window_chain(method: CaptureMethod, caps: &CaptureCapabilities) -> CaptureBackend {
    if method != CaptureMethod::Software {
        if caps.wgc {
            return CaptureBackend::Wgc;
        }
        if caps.dxgi {
            return CaptureBackend::Dxgi;
        }
    }
    CaptureBackend::Gdi
}

/// Windows screen capture: DXGI duplication, WGC monitor capture as a fallback.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn windows_screen_chain(caps: &CaptureCapabilities) -> Option<CaptureBackend> {
    if caps.dxgi {
        Some(CaptureBackend::Dxgi)
    } else if caps.wgc {
        Some(CaptureBackend::Wgc)
    } else {
        None
    }
}

/// Backend `create_screen_capturer` would use on this platform.
#[allow(unused_variables)]
pub fn screen_backend_for(options: &CaptureOptions, caps: &CaptureCapabilities) -> Option<CaptureBackend> {
    #[cfg(windows)]
    {
        windows_screen_chain(caps)
    }
    #[cfg(target_os = "macos")]
    {
        Some(if caps.screen_capture_kit {
            CaptureBackend::ScreenCaptureKit
        } else {
            CaptureBackend::CoreGraphics
        })
    }
    #[cfg(target_os = "linux")]
    {
        caps.x11_session.then_some(CaptureBackend::X11)
    }
    #[cfg(not(any(windows, target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Backend `create_window_capturer` would use on this platform.
#[allow(unused_variables)]
pub fn window_backend_for(options: &CaptureOptions, caps: &CaptureCapabilities) -> Option<CaptureBackend> {
    #[cfg(windows)]
    {
        Some(windows_window_chain(options.preferred_method, caps))
    }
    #[cfg(target_os = "macos")]
    {
        Some(CaptureBackend::CoreGraphics)
    }
    #[cfg(target_os = "linux")]
    {
        caps.x11_session.then_some(CaptureBackend::X11)
    }
    #[cfg(not(any(windows, target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

// ============================================================================
// Unified Capturer
// ============================================================================

/// Closed set of backends compiled for the current target.
pub enum Capturer {
    #[cfg(windows)]
    Dxgi(DxgiDuplicator),
    #[cfg(windows)]
    Wgc(WgcCapturer),
    #[cfg(windows)]
    Gdi(GdiCapturer),
    #[cfg(target_os = "macos")]
    MacScreen(MacScreenCapturer),
    #[cfg(target_os = "macos")]
    MacWindow(MacWindowCapturer),
    #[cfg(target_os = "linux")]
    X11Screen(X11ScreenCapturer),
    #[cfg(target_os = "linux")]
    X11Window(X11WindowCapturer),
    #[cfg(not(any(windows, target_os = "macos", target_os = "linux")))]
    Unsupported(std::convert::Infallible),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            #[cfg(windows)]
            Capturer::Dxgi($inner) => $body,
            #[cfg(windows)]
            Capturer::Wgc($inner) => $body,
            #[cfg(windows)]
            Capturer::Gdi($inner) => $body,
            #[cfg(target_os = "macos")]
            Capturer::MacScreen($inner) => $body,
            #[cfg(target_os = "macos")]
            Capturer::MacWindow($inner) => $body,
            #[cfg(target_os = "linux")]
            Capturer::X11Screen($inner) => $body,
            #[cfg(target_os = "linux")]
            Capturer::X11Window($inner) => $body,
            #[cfg(not(any(windows, target_os = "macos", target_os = "linux")))]
            Capturer::Unsupported(never) => match *never {},
        }
    };
}

impl DesktopCapturer for Capturer {
    fn start(&mut self, callback: Box<dyn Callback>) {
        dispatch!(self, c => c.start(callback))
    }

    fn stop(&mut self) {
        dispatch!(self, c => c.stop())
    }

    fn capture_frame(&mut self) {
        dispatch!(self, c => c.capture_frame())
    }

    fn get_source_list(&mut self, sources: &mut Vec<Source>) -> bool {
        dispatch!(self, c => c.get_source_list(sources))
    }

    fn select_source(&mut self, id: SourceId) -> bool {
        dispatch!(self, c => c.select_source(id))
    }

    fn is_source_valid(&mut self, id: SourceId) -> bool {
        dispatch!(self, c => c.is_source_valid(id))
    }

    fn selected_source(&self) -> SourceId {
        dispatch!(self, c => c.selected_source())
    }

    fn backend(&self) -> CaptureBackend {
        dispatch!(self, c => c.backend())
    }

    fn last_error(&self) -> Option<CaptureError> {
        dispatch!(self, c => c.last_error())
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Creates the full-desktop backend for this platform, or `None` when the
/// session cannot capture screens at all.
pub fn create_screen_capturer(options: &CaptureOptions, caps: &CaptureCapabilities) -> Option<Capturer> {
    let backend = screen_backend_for(options, caps);
    let Some(backend) = backend else {
        log::warn!(caps:debug = caps; "No screen capture backend available");
        return None;
    };
    log::info!(backend = backend.name(); "Creating screen capturer");
    build_screen(backend, options.clone())
}

/// Creates a window backend following the platform fallback chain.
pub fn create_window_capturer(options: &CaptureOptions, caps: &CaptureCapabilities) -> Option<Capturer> {
    let Some(backend) = window_backend_for(options, caps) else {
        log::warn!(caps:debug = caps; "No window capture backend available");
        return None;
    };
    log::info!(
        backend = backend.name(),
        method:display = options.preferred_method;
        "Creating window capturer"
    );
    build_window(backend, options.clone())
}

#[cfg(windows)]
fn build_screen(backend: CaptureBackend, options: CaptureOptions) -> Option<Capturer> {
    match backend {
        CaptureBackend::Dxgi => Some(Capturer::Dxgi(DxgiDuplicator::for_screens(options))),
        CaptureBackend::Wgc => Some(Capturer::Wgc(WgcCapturer::for_screens(options))),
        _ => None,
    }
}

#[cfg(windows)]
fn build_window(backend: CaptureBackend, options: CaptureOptions) -> Option<Capturer> {
    match backend {
        CaptureBackend::Wgc => Some(Capturer::Wgc(WgcCapturer::for_windows(options))),
        CaptureBackend::Dxgi => Some(Capturer::Dxgi(DxgiDuplicator::for_windows(options))),
        CaptureBackend::Gdi => Some(Capturer::Gdi(GdiCapturer::new(options))),
        _ => None,
    }
}

#[cfg(target_os = "macos")]
fn build_screen(backend: CaptureBackend, options: CaptureOptions) -> Option<Capturer> {
    let use_stream = backend == CaptureBackend::ScreenCaptureKit;
    Some(Capturer::MacScreen(MacScreenCapturer::new(options, use_stream)))
}

#[cfg(target_os = "macos")]
fn build_window(_backend: CaptureBackend, options: CaptureOptions) -> Option<Capturer> {
    Some(Capturer::MacWindow(MacWindowCapturer::new(options)))
}

#[cfg(target_os = "linux")]
fn build_screen(_backend: CaptureBackend, options: CaptureOptions) -> Option<Capturer> {
    Some(Capturer::X11Screen(X11ScreenCapturer::new(options)))
}

#[cfg(target_os = "linux")]
fn build_window(_backend: CaptureBackend, options: CaptureOptions) -> Option<Capturer> {
    Some(Capturer::X11Window(X11WindowCapturer::new(options)))
}

#[cfg(not(any(windows, target_os = "macos", target_os = "linux")))]
fn build_screen(_backend: CaptureBackend, _options: CaptureOptions) -> Option<Capturer> {
    None
}

#[cfg(not(any(windows, target_os = "macos", target_os = "linux")))]
fn build_window(_backend: CaptureBackend, _options: CaptureOptions) -> Option<Capturer> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::geometry::Size;
    use std::sync::{Arc, Mutex};

    fn recording_callback() -> (Box<dyn Callback>, Arc<Mutex<Vec<(CaptureResult, bool)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let callback = move |result: CaptureResult, frame: Option<BasicFrame>| {
            sink.lock().unwrap().push((result, frame.is_some()));
        };
        (Box::new(callback), log)
    }

    #[test]
    fn test_window_chain_prefers_wgc() {
        let caps = CaptureCapabilities {
            wgc: true,
            dxgi: true,
            ..Default::default()
        };
        assert_eq!(windows_window_chain(CaptureMethod::Auto, &caps), CaptureBackend::Wgc);
        assert_eq!(windows_window_chain(CaptureMethod::Hardware, &caps), CaptureBackend::Wgc);
    }

    #[test]
    fn test_window_chain_falls_back_when_hardware_unsupported() {
        // WGC probe reports unsupported: DXGI cropping is next.
        let caps = CaptureCapabilities {
            wgc: false,
            dxgi: true,
            ..Default::default()
        };
        assert_eq!(windows_window_chain(CaptureMethod::Auto, &caps), CaptureBackend::Dxgi);

        // Nothing GPU backed: GDI is always available.
        let caps = CaptureCapabilities::default();
        assert_eq!(windows_window_chain(CaptureMethod::Auto, &caps), CaptureBackend::Gdi);
    }

    #[test]
    fn test_window_chain_software_forces_gdi() {
        let caps = CaptureCapabilities {
            wgc: true,
            dxgi: true,
            ..Default::default()
        };
        assert_eq!(windows_window_chain(CaptureMethod::Software, &caps), CaptureBackend::Gdi);
    }

    #[test]
    fn test_screen_chain() {
        let both = CaptureCapabilities {
            wgc: true,
            dxgi: true,
            ..Default::default()
        };
        assert_eq!(windows_screen_chain(&both), Some(CaptureBackend::Dxgi));
        let wgc_only = CaptureCapabilities {
            wgc: true,
            ..Default::default()
        };
        assert_eq!(windows_screen_chain(&wgc_only), Some(CaptureBackend::Wgc));
        assert_eq!(windows_screen_chain(&CaptureCapabilities::default()), None);
    }

    #[test]
    fn test_source_id_none() {
        assert!(SourceId::NONE.is_none());
        assert!(!SourceId::from(42).is_none());
        assert_eq!(SourceId(7).raw(), 7);
    }

    #[test]
    fn test_backend_state_delivery() {
        let mut state = BackendState::new(CaptureOptions::default(), CaptureBackend::Gdi);
        // Not started: nothing recorded, no panic.
        state.deliver_error(CaptureError::Runtime("ignored"));
        assert!(!state.is_started());

        let (callback, log) = recording_callback();
        state.attach(callback);
        state.deliver_frame(BasicFrame::new(Size::new(1, 1)));
        state.deliver_error(CaptureError::SourceUnavailable);
        assert_eq!(state.last_error(), Some(CaptureError::SourceUnavailable));
        state.deliver(Err(CaptureError::Runtime("no frame")));

        state.detach();
        state.deliver_frame(BasicFrame::new(Size::new(1, 1)));

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                (CaptureResult::Success, true),
                (CaptureResult::ErrorPermanent, false),
                (CaptureResult::ErrorTemporary, false),
            ]
        );
    }

    #[test]
    fn test_set_backend_reports_transitions() {
        let mut state = BackendState::new(CaptureOptions::default(), CaptureBackend::Unknown);
        assert!(state.set_backend(CaptureBackend::ScreenCaptureKit));
        assert!(!state.set_backend(CaptureBackend::ScreenCaptureKit));
        assert!(state.set_backend(CaptureBackend::CoreGraphics));
        assert_eq!(state.backend(), CaptureBackend::CoreGraphics);
    }

    /// Needs a real desktop session. Run with DESKTOP_CAPTURE_RUN_INTEGRATION=1.
    #[test]
    fn test_primary_screen_smoke() {
        if std::env::var("DESKTOP_CAPTURE_RUN_INTEGRATION").as_deref() != Ok("1") {
            return;
        }

        let caps = CaptureCapabilities::probe();
        let options = CaptureOptions::default();
        let mut capturer = create_screen_capturer(&options, &caps).expect("screen backend");

        let mut sources = Vec::new();
        assert!(capturer.get_source_list(&mut sources));
        let first = sources.first().map(|s| s.id).unwrap_or(SourceId::NONE);
        assert!(capturer.select_source(first));

        let frames: Arc<Mutex<Vec<(CaptureResult, Option<BasicFrame>)>>> = Arc::default();
        let sink = Arc::clone(&frames);
        capturer.start(Box::new(move |result: CaptureResult, frame: Option<BasicFrame>| {
            sink.lock().unwrap().push((result, frame));
        }));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            capturer.capture_frame();
            let done = frames.lock().unwrap().iter().any(|(r, _)| r.is_success());
            if done || std::time::Instant::now() > deadline {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        capturer.stop();

        let frames = frames.lock().unwrap();
        let (_, frame) = frames
            .iter()
            .find(|(r, _)| r.is_success())
            .expect("at least one successful capture");
        let frame = frame.as_ref().expect("frame delivered with success");
        assert!(frame.width() > 0);
        assert!(frame.height() > 0);
        assert!(frame.stride() >= frame.width() as usize * crate::frame::BYTES_PER_PIXEL);
    }
}
