//! Window and monitor capture using the WinRT Graphics Capture API.
//!
//! Frames arrive on a WinRT thread pool thread through `FrameArrived`. The
//! handler copies at most one frame per `1000 / target_fps` ms into a
//! `FrameMailbox`; `capture_frame` hands out a copy of the latest one.
//! Available on Windows 10 version 1903+.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use windows::core::Interface;
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::Graphics::Gdi::HMONITOR;
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;

use super::window_utils::{
    enumerate_capture_windows, enumerate_monitors, is_monitor_valid, is_window_valid, monitor_dpi,
    window_dpi,
};
use super::{
    create_d3d11_device, hmonitor_of, hwnd_of, id_of_hwnd, id_of_monitor, os_error, StagingReader,
};
use crate::capturer::{BackendState, CaptureBackend, Callback, DesktopCapturer, Source, SourceId};
use crate::error::CaptureError;
use crate::frame::BasicFrame;
use crate::geometry::Vector;
use crate::mailbox::FrameMailbox;
use crate::options::CaptureOptions;

const PIXEL_FORMAT: DirectXPixelFormat = DirectXPixelFormat::B8G8R8A8UIntNormalized;
const FRAME_POOL_BUFFERS: i32 = 2;
const ONE_SHOT_POLLS: u32 = 6;
const ONE_SHOT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Windows,
    Screens,
}

#[derive(Debug, Clone, Copy)]
enum CaptureTarget {
    Window(HWND),
    Monitor(HMONITOR),
}

impl CaptureTarget {
    fn is_alive(self) -> bool {
        match self {
            CaptureTarget::Window(hwnd) => is_window_valid(hwnd),
            CaptureTarget::Monitor(monitor) => is_monitor_valid(monitor),
        }
    }

    fn dpi(self) -> Vector {
        match self {
            CaptureTarget::Window(hwnd) => window_dpi(hwnd),
            CaptureTarget::Monitor(monitor) => monitor_dpi(monitor),
        }
    }
}

// ============================================================================
// Device setup
// ============================================================================

struct Devices {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    winrt_device: IDirect3DDevice,
}

fn create_devices() -> Result<Devices, CaptureError> {
    let (device, context) = create_d3d11_device()?;
    let dxgi_device: IDXGIDevice = device
        .cast()
        .map_err(|err| os_error("cast<IDXGIDevice>", err))?;
    let inspectable = unsafe {
        CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)
            .map_err(|err| os_error("CreateDirect3D11DeviceFromDXGIDevice", err))?
    };
    let winrt_device = inspectable
        .cast()
        .map_err(|err| os_error("cast<IDirect3DDevice>", err))?;
    Ok(Devices {
        device,
        context,
        winrt_device,
    })
}

fn create_item(target: CaptureTarget) -> Result<GraphicsCaptureItem, CaptureError> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
        .map_err(|err| os_error("factory<IGraphicsCaptureItemInterop>", err))?;
    unsafe {
        match target {
            CaptureTarget::Window(hwnd) => interop
                .CreateForWindow(hwnd)
                .map_err(|err| os_error("CreateForWindow", err)),
            CaptureTarget::Monitor(monitor) => interop
                .CreateForMonitor(monitor)
                .map_err(|err| os_error("CreateForMonitor", err)),
        }
    }
}

fn frame_texture(frame: &Direct3D11CaptureFrame) -> Result<ID3D11Texture2D, CaptureError> {
    let surface = frame
        .Surface()
        .map_err(|err| os_error("Frame::Surface", err))?;
    let access: IDirect3DDxgiInterfaceAccess = surface
        .cast()
        .map_err(|err| os_error("cast<IDirect3DDxgiInterfaceAccess>", err))?;
    unsafe {
        access
            .GetInterface()
            .map_err(|err| os_error("GetInterface<ID3D11Texture2D>", err))
    }
}

// ============================================================================
// Frame handler
// ============================================================================

struct ReaderState {
    staging: StagingReader,
    pool_size: SizeInt32,
    last_copy: Option<Instant>,
}

/// Everything the `FrameArrived` handler touches.
struct FrameSink {
    devices: Devices,
    reader: Mutex<ReaderState>,
    mailbox: FrameMailbox,
    interval: Duration,
    dpi: Vector,
}

// SAFETY: the D3D11 immediate context is only used while `reader` is locked,
// so handler invocations never touch it concurrently.
unsafe impl Send for FrameSink {}
unsafe impl Sync for FrameSink {}

impl FrameSink {
    fn on_frame_arrived(&self, pool: &Direct3D11CaptureFramePool) -> Result<(), CaptureError> {
        let frame = pool
            .TryGetNextFrame()
            .map_err(|err| os_error("TryGetNextFrame", err))?;
        let result = self.copy_frame(pool, &frame);
        let _ = frame.Close();
        result
    }

    fn copy_frame(
        &self,
        pool: &Direct3D11CaptureFramePool,
        frame: &Direct3D11CaptureFrame,
    ) -> Result<(), CaptureError> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| CaptureError::Runtime("frame reader poisoned"))?;

        let content_size = frame
            .ContentSize()
            .map_err(|err| os_error("ContentSize", err))?;
        if content_size != reader.pool_size {
            pool.Recreate(&self.devices.winrt_device, PIXEL_FORMAT, 1, content_size)
                .map_err(|err| os_error("FramePool::Recreate", err))?;
            reader.pool_size = content_size;
            reader.staging.reset();
            log::debug!(
                width = content_size.Width,
                height = content_size.Height;
                "WGC content size changed, frame pool recreated"
            );
        }

        let now = Instant::now();
        if let Some(last) = reader.last_copy {
            if now.duration_since(last) < self.interval && self.mailbox.has_frame() {
                return Ok(());
            }
        }

        let texture = frame_texture(frame)?;
        let mut out = reader
            .staging
            .read(&self.devices.device, &self.devices.context, &texture)?;
        out.set_dpi(self.dpi);
        self.mailbox.publish(out);
        reader.last_copy = Some(now);
        Ok(())
    }
}

// ============================================================================
// Active session
// ============================================================================

struct ActiveSession {
    target: CaptureTarget,
    sink: Arc<FrameSink>,
    pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    _item: GraphicsCaptureItem,
    frame_arrived: i64,
}

impl ActiveSession {
    fn open(target: CaptureTarget, options: &CaptureOptions) -> Result<Self, CaptureError> {
        let devices = create_devices()?;
        let item = create_item(target)?;
        let size = item
            .Size()
            .map_err(|err| os_error("GraphicsCaptureItem::Size", err))?;

        let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &devices.winrt_device,
            PIXEL_FORMAT,
            FRAME_POOL_BUFFERS,
            size,
        )
        .map_err(|err| os_error("CreateFreeThreaded", err))?;

        let session = pool
            .CreateCaptureSession(&item)
            .map_err(|err| os_error("CreateCaptureSession", err))?;
        // Both setters are missing on older Windows 10 builds.
        let _ = session.SetIsCursorCaptureEnabled(options.capture_cursor);
        let _ = session.SetIsBorderRequired(false);

        let sink = Arc::new(FrameSink {
            devices,
            reader: Mutex::new(ReaderState {
                staging: StagingReader::default(),
                pool_size: size,
                last_copy: None,
            }),
            mailbox: FrameMailbox::new(),
            interval: options.frame_interval(),
            dpi: target.dpi(),
        });

        let handler_sink = Arc::clone(&sink);
        let handler_pool = pool.clone();
        let frame_arrived = pool
            .FrameArrived(&TypedEventHandler::new(move |_, _| {
                if let Err(err) = handler_sink.on_frame_arrived(&handler_pool) {
                    log::trace!(err:display = err; "WGC frame dropped");
                }
                Ok(())
            }))
            .map_err(|err| os_error("FrameArrived", err))?;

        if let Err(err) = session.StartCapture() {
            let _ = pool.RemoveFrameArrived(frame_arrived);
            let _ = session.Close();
            let _ = pool.Close();
            return Err(os_error("StartCapture", err));
        }

        log::info!(
            width = size.Width,
            height = size.Height,
            interval_ms = sink.interval.as_millis() as u64;
            "WGC capture session started"
        );

        Ok(Self {
            target,
            sink,
            pool,
            session,
            _item: item,
            frame_arrived,
        })
    }

    /// Handler first, then session and pool, then the cached frame.
    fn close(self) {
        let _ = self.pool.RemoveFrameArrived(self.frame_arrived);
        let _ = self.session.Close();
        let _ = self.pool.Close();
        self.sink.mailbox.clear();
    }
}

// ============================================================================
// Capturer
// ============================================================================

pub struct WgcCapturer {
    state: BackendState,
    kind: SourceKind,
    active: Option<ActiveSession>,
}

// SAFETY: the COM objects are only used from the thread that owns the
// capturer; the frame handler only shares `FrameSink`.
unsafe impl Send for WgcCapturer {}

impl WgcCapturer {
    pub fn for_windows(options: CaptureOptions) -> Self {
        Self::new(options, SourceKind::Windows)
    }

    /// Monitor capture, used when desktop duplication is unavailable.
    pub fn for_screens(options: CaptureOptions) -> Self {
        Self::new(options, SourceKind::Screens)
    }

    fn new(options: CaptureOptions, kind: SourceKind) -> Self {
        Self {
            state: BackendState::new(options, CaptureBackend::Wgc),
            kind,
            active: None,
        }
    }

    fn resolve_target(&self) -> Result<CaptureTarget, CaptureError> {
        let id = self.state.selected;
        match self.kind {
            SourceKind::Windows => {
                let hwnd = hwnd_of(id);
                if id.is_none() || !is_window_valid(hwnd) {
                    return Err(CaptureError::SourceUnavailable);
                }
                Ok(CaptureTarget::Window(hwnd))
            }
            SourceKind::Screens => {
                if id.is_none() {
                    return enumerate_monitors()
                        .into_iter()
                        .find(|m| m.is_primary)
                        .map(|m| CaptureTarget::Monitor(m.handle))
                        .ok_or(CaptureError::SourceUnavailable);
                }
                let monitor = hmonitor_of(id);
                if !is_monitor_valid(monitor) {
                    return Err(CaptureError::SourceUnavailable);
                }
                Ok(CaptureTarget::Monitor(monitor))
            }
        }
    }

    fn open_session(&mut self) -> Result<(), CaptureError> {
        self.close_session();
        let target = self.resolve_target()?;
        self.active = Some(ActiveSession::open(target, &self.state.options)?);
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(active) = self.active.take() {
            active.close();
        }
    }

    fn latest_frame(&mut self) -> Result<BasicFrame, CaptureError> {
        if self.active.is_none() {
            self.open_session()?;
        }
        let Some(active) = self.active.as_ref() else {
            return Err(CaptureError::Runtime("WGC session not running"));
        };
        if !active.target.is_alive() {
            self.close_session();
            return Err(CaptureError::SourceUnavailable);
        }
        active
            .sink
            .mailbox
            .latest()
            .ok_or(CaptureError::Runtime("no WGC frame yet"))
    }
}

impl DesktopCapturer for WgcCapturer {
    fn start(&mut self, callback: Box<dyn Callback>) {
        self.state.attach(callback);
        if let Err(err) = self.open_session() {
            log::warn!(err:display = err; "WGC initialization failed");
            self.state.set_error(Some(err));
        }
    }

    fn stop(&mut self) {
        self.close_session();
        self.state.detach();
    }

    fn capture_frame(&mut self) {
        if !self.state.is_started() {
            return;
        }
        let outcome = self.latest_frame();
        self.state.deliver(outcome);
    }

    fn get_source_list(&mut self, sources: &mut Vec<Source>) -> bool {
        sources.clear();
        match self.kind {
            SourceKind::Windows => sources.extend(
                enumerate_capture_windows()
                    .into_iter()
                    .map(|w| Source::window(id_of_hwnd(w.hwnd), w.title)),
            ),
            SourceKind::Screens => sources.extend(
                enumerate_monitors()
                    .into_iter()
                    .enumerate()
                    .map(|(index, m)| Source::screen(id_of_monitor(m.handle), m.device_name, index as i64)),
            ),
        }
        true
    }

    fn select_source(&mut self, id: SourceId) -> bool {
        if !self.is_source_valid(id) {
            return false;
        }
        if id != self.state.selected {
            self.close_session();
        }
        self.state.selected = id;
        true
    }

    fn is_source_valid(&mut self, id: SourceId) -> bool {
        match self.kind {
            SourceKind::Windows => !id.is_none() && is_window_valid(hwnd_of(id)),
            SourceKind::Screens => id.is_none() || is_monitor_valid(hmonitor_of(id)),
        }
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

impl Drop for WgcCapturer {
    fn drop(&mut self) {
        self.close_session();
    }
}

// ============================================================================
// One-shot capture
// ============================================================================

/// Grabs a single frame of `hwnd` without keeping a session around.
pub fn capture_window_once(hwnd: HWND) -> Result<BasicFrame, CaptureError> {
    if !is_window_valid(hwnd) {
        return Err(CaptureError::SourceUnavailable);
    }

    let devices = create_devices()?;
    let item = create_item(CaptureTarget::Window(hwnd))?;
    let size = item
        .Size()
        .map_err(|err| os_error("GraphicsCaptureItem::Size", err))?;
    let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(&devices.winrt_device, PIXEL_FORMAT, 1, size)
        .map_err(|err| os_error("CreateFreeThreaded", err))?;
    let session = pool
        .CreateCaptureSession(&item)
        .map_err(|err| os_error("CreateCaptureSession", err))?;
    let _ = session.SetIsCursorCaptureEnabled(false);
    session
        .StartCapture()
        .map_err(|err| os_error("StartCapture", err))?;

    let mut frame = None;
    for _ in 0..ONE_SHOT_POLLS {
        if let Ok(next) = pool.TryGetNextFrame() {
            frame = Some(next);
            break;
        }
        thread::sleep(ONE_SHOT_POLL_INTERVAL);
    }

    let _ = session.Close();
    let _ = pool.Close();

    let frame = frame.ok_or(CaptureError::Runtime("no WGC frame within the polling window"))?;
    let texture = frame_texture(&frame)?;
    let mut out = StagingReader::default().read(&devices.device, &devices.context, &texture)?;
    out.set_dpi(window_dpi(hwnd));
    Ok(out)
}
