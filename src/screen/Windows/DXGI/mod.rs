//! Desktop Duplication API capture.
//!
//! Duplicates the output that shows the selected monitor (or the monitor a
//! selected window lives on) and crops to the window when one is selected.
//! The last frame is cached so a timeout without desktop changes still
//! yields a frame.

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::{
    IDXGIAdapter, IDXGIDevice, IDXGIOutput, IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource,
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_INVALID_CALL,
    DXGI_ERROR_NOT_FOUND, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO,
};
use windows::Win32::Graphics::Gdi::HMONITOR;

use super::window_utils::{
    enumerate_capture_windows, enumerate_monitors, is_monitor_valid, is_window_valid, monitor_dpi,
    window_monitor, window_rect,
};
use super::{
    create_d3d11_device, hmonitor_of, hwnd_of, id_of_hwnd, id_of_monitor, os_error, StagingReader,
};
use crate::capturer::{BackendState, CaptureBackend, Callback, DesktopCapturer, Source, SourceId};
use crate::error::CaptureError;
use crate::frame::{now_us, BasicFrame, Frame};
use crate::geometry::{Rect, Vector};
use crate::options::CaptureOptions;

const ACQUIRE_TIMEOUT_MS: u32 = 16;
/// Windows this small are not worth cropping to.
const MIN_CROP_WINDOW: i32 = 10;

/// What the selected id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Desktop,
    Window,
    Monitor,
    Gone,
}

enum Acquired {
    Frame(BasicFrame),
    Timeout,
    Lost(windows::core::Error),
}

fn is_access_lost(err: &windows::core::Error) -> bool {
    let code = err.code();
    code == DXGI_ERROR_ACCESS_LOST || code == DXGI_ERROR_INVALID_CALL || code == DXGI_ERROR_DEVICE_REMOVED
}

/// Crops `frame` to `window` (desktop coordinates) on an output whose top-left
/// corner sits at `origin`. Returns `None` when no crop applies.
fn crop_to_window(frame: &BasicFrame, window: Rect, origin: Vector) -> Option<BasicFrame> {
    if window.width() <= MIN_CROP_WINDOW || window.height() <= MIN_CROP_WINDOW {
        return None;
    }
    let relative = window.translated(Vector::new(-origin.x, -origin.y));
    let clamped = relative.intersect(&Rect::make_size(frame.size()));
    if clamped.width() <= 1 || clamped.height() <= 1 {
        return None;
    }

    let mut cropped = BasicFrame::new(clamped.size());
    if !cropped.copy_pixels_from(frame, clamped.top_left(), Rect::make_size(clamped.size())) {
        return None;
    }
    cropped.set_dpi(frame.dpi());
    cropped.set_capture_time_us(frame.capture_time_us());
    Some(cropped)
}

/// One duplicated output and the device that owns it.
///
/// Fields drop in declaration order: duplication, output, staging texture,
/// context, device.
struct Duplication {
    duplication: IDXGIOutputDuplication,
    _output: IDXGIOutput1,
    staging: StagingReader,
    context: ID3D11DeviceContext,
    device: ID3D11Device,
    monitor: HMONITOR,
    origin: Vector,
    frame_held: bool,
}

impl Duplication {
    fn open(target: Option<HMONITOR>) -> Result<Self, CaptureError> {
        let (device, context) = create_d3d11_device()?;
        let dxgi_device: IDXGIDevice = device
            .cast()
            .map_err(|err| os_error("cast<IDXGIDevice>", err))?;
        let adapter: IDXGIAdapter = unsafe {
            dxgi_device
                .GetAdapter()
                .map_err(|err| os_error("IDXGIDevice::GetAdapter", err))?
        };

        let output = select_output(&adapter, target)?;
        let desc = unsafe {
            output
                .GetDesc()
                .map_err(|err| os_error("IDXGIOutput::GetDesc", err))?
        };
        let output: IDXGIOutput1 = output
            .cast()
            .map_err(|err| os_error("cast<IDXGIOutput1>", err))?;
        let duplication = unsafe {
            output
                .DuplicateOutput(&device)
                .map_err(|err| os_error("DuplicateOutput", err))?
        };

        let coords = desc.DesktopCoordinates;
        log::info!(
            left = coords.left,
            top = coords.top,
            right = coords.right,
            bottom = coords.bottom;
            "DXGI duplication created"
        );

        Ok(Self {
            duplication,
            _output: output,
            staging: StagingReader::default(),
            context,
            device,
            monitor: desc.Monitor,
            origin: Vector::new(coords.left, coords.top),
            frame_held: false,
        })
    }

    fn acquire(&mut self) -> Result<Acquired, CaptureError> {
        self.release_frame();

        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired = unsafe {
            self.duplication
                .AcquireNextFrame(ACQUIRE_TIMEOUT_MS, &mut info, &mut resource)
        };
        match acquired {
            Ok(()) => self.frame_held = true,
            Err(err) if err.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(Acquired::Timeout),
            Err(err) if is_access_lost(&err) => return Ok(Acquired::Lost(err)),
            Err(err) => return Err(os_error("AcquireNextFrame", err)),
        }

        let frame = self.read_resource(resource);
        self.release_frame();
        let mut frame = frame?;
        frame.set_dpi(monitor_dpi(self.monitor));
        Ok(Acquired::Frame(frame))
    }

    fn read_resource(&mut self, resource: Option<IDXGIResource>) -> Result<BasicFrame, CaptureError> {
        let resource = resource.ok_or(CaptureError::Runtime("AcquireNextFrame returned no resource"))?;
        let texture: ID3D11Texture2D = resource
            .cast()
            .map_err(|err| os_error("cast<ID3D11Texture2D>", err))?;
        self.staging.read(&self.device, &self.context, &texture)
    }

    fn release_frame(&mut self) {
        if self.frame_held {
            unsafe {
                let _ = self.duplication.ReleaseFrame();
            }
            self.frame_held = false;
        }
    }
}

impl Drop for Duplication {
    fn drop(&mut self) {
        self.release_frame();
    }
}

/// The output showing `target`, or the first output of the adapter.
fn select_output(adapter: &IDXGIAdapter, target: Option<HMONITOR>) -> Result<IDXGIOutput, CaptureError> {
    let mut first = None;
    for index in 0.. {
        let output = match unsafe { adapter.EnumOutputs(index) } {
            Ok(output) => output,
            Err(err) if err.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(err) => return Err(os_error("EnumOutputs", err)),
        };
        if let Some(target) = target {
            if let Ok(desc) = unsafe { output.GetDesc() } {
                if desc.Monitor == target {
                    return Ok(output);
                }
            }
        }
        if first.is_none() {
            first = Some(output);
        }
    }
    first.ok_or(CaptureError::BackendUnavailable("no DXGI output attached"))
}

pub struct DxgiDuplicator {
    state: BackendState,
    /// Window mode: only live windows are capturable, never a whole output.
    windows_only: bool,
    duplication: Option<Duplication>,
    cached: Option<BasicFrame>,
}

// SAFETY: the COM objects are only touched from the thread that drives the
// capturer.
unsafe impl Send for DxgiDuplicator {}

impl DxgiDuplicator {
    pub fn for_screens(options: CaptureOptions) -> Self {
        Self::new(options, false)
    }

    /// Crops the duplicated output to the selected window.
    pub fn for_windows(options: CaptureOptions) -> Self {
        Self::new(options, true)
    }

    fn new(options: CaptureOptions, windows_only: bool) -> Self {
        Self {
            state: BackendState::new(options, CaptureBackend::Dxgi),
            windows_only,
            duplication: None,
            cached: None,
        }
    }

    fn classify(id: SourceId) -> Selection {
        if id.is_none() {
            Selection::Desktop
        } else if is_window_valid(hwnd_of(id)) {
            Selection::Window
        } else if is_monitor_valid(hmonitor_of(id)) {
            Selection::Monitor
        } else {
            Selection::Gone
        }
    }

    fn admits(&self, selection: Selection) -> bool {
        match selection {
            Selection::Window => true,
            Selection::Desktop | Selection::Monitor => !self.windows_only,
            Selection::Gone => false,
        }
    }

    fn target_monitor(&self, selection: Selection) -> Option<HMONITOR> {
        match selection {
            Selection::Window => Some(window_monitor(hwnd_of(self.state.selected))),
            Selection::Monitor => Some(hmonitor_of(self.state.selected)),
            Selection::Desktop | Selection::Gone => None,
        }
    }

    fn initialize(&mut self, target: Option<HMONITOR>) -> Result<(), CaptureError> {
        self.shutdown();
        self.duplication = Some(Duplication::open(target)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mut dup) = self.duplication.take() {
            dup.release_frame();
        }
        self.cached = None;
    }

    fn acquire_with_reset(&mut self, target: Option<HMONITOR>) -> Result<Acquired, CaptureError> {
        let Some(dup) = self.duplication.as_mut() else {
            return Err(CaptureError::Runtime("DXGI duplication not initialized"));
        };
        match dup.acquire()? {
            Acquired::Lost(err) => {
                log::warn!(code = err.code().0; "DXGI access lost, recreating duplication");
                self.initialize(target)?;
                match self.duplication.as_mut() {
                    Some(dup) => dup.acquire(),
                    None => Err(CaptureError::Runtime("DXGI duplication not initialized")),
                }
            }
            other => Ok(other),
        }
    }

    fn capture(&mut self) -> Result<BasicFrame, CaptureError> {
        let selection = Self::classify(self.state.selected);
        if !self.admits(selection) {
            return Err(CaptureError::SourceUnavailable);
        }
        let target = self.target_monitor(selection);

        let moved = match (&self.duplication, target) {
            (Some(dup), Some(target)) => dup.monitor != target,
            _ => false,
        };
        if moved {
            log::debug!("Capture source moved to another monitor, recreating duplication");
            self.initialize(target)?;
        }
        if self.duplication.is_none() {
            self.initialize(target)?;
        }

        let frame = match self.acquire_with_reset(target)? {
            Acquired::Frame(frame) => {
                self.cached = Some(frame.clone());
                frame
            }
            Acquired::Timeout | Acquired::Lost(_) => {
                let Some(cached) = self.cached.as_ref() else {
                    return Err(CaptureError::Runtime("no desktop frame yet"));
                };
                let mut frame = cached.clone();
                frame.set_capture_time_us(now_us());
                frame
            }
        };

        if selection == Selection::Window {
            let origin = self.duplication.as_ref().map(|d| d.origin).unwrap_or_default();
            if let Some(cropped) = crop_to_window(&frame, window_rect(hwnd_of(self.state.selected)), origin) {
                return Ok(cropped);
            }
        }
        Ok(frame)
    }
}

impl DesktopCapturer for DxgiDuplicator {
    fn start(&mut self, callback: Box<dyn Callback>) {
        self.state.attach(callback);
        let selection = Self::classify(self.state.selected);
        if !self.admits(selection) {
            self.shutdown();
            return;
        }
        let target = self.target_monitor(selection);
        if let Err(err) = self.initialize(target) {
            // capture_frame retries the initialization
            log::warn!(err:display = err; "DXGI initialization failed");
            self.state.set_error(Some(err));
        }
    }

    fn stop(&mut self) {
        self.shutdown();
        self.state.detach();
    }

    fn capture_frame(&mut self) {
        if !self.state.is_started() {
            return;
        }
        let outcome = self.capture();
        if let Err(err) = &outcome {
            log::debug!(err:display = err; "DXGI capture failed");
        }
        self.state.deliver(outcome);
    }

    fn get_source_list(&mut self, sources: &mut Vec<Source>) -> bool {
        sources.clear();
        if !self.windows_only {
            sources.extend(
                enumerate_monitors()
                    .into_iter()
                    .enumerate()
                    .map(|(index, m)| Source::screen(id_of_monitor(m.handle), m.device_name, index as i64)),
            );
        }
        sources.extend(
            enumerate_capture_windows()
                .into_iter()
                .map(|w| Source::window(id_of_hwnd(w.hwnd), w.title)),
        );
        true
    }

    fn select_source(&mut self, id: SourceId) -> bool {
        if !self.is_source_valid(id) {
            return false;
        }
        if id != self.state.selected {
            self.cached = None;
        }
        self.state.selected = id;
        true
    }

    fn is_source_valid(&mut self, id: SourceId) -> bool {
        self.admits(Self::classify(id))
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

impl Drop for DxgiDuplicator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureResult;
    use crate::geometry::Size;
    use std::sync::{Arc, Mutex};

    fn gradient(width: i32, height: i32) -> BasicFrame {
        let mut frame = BasicFrame::new(Size::new(width, height));
        for y in 0..height {
            for (x, px) in frame.row_mut(y).chunks_exact_mut(4).enumerate() {
                px.copy_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
        frame
    }

    #[test]
    fn test_crop_relative_to_output_origin() {
        let frame = gradient(100, 80);
        let window = Rect::make_xywh(1930, 20, 30, 40);
        let cropped = crop_to_window(&frame, window, Vector::new(1920, 0)).unwrap();
        assert_eq!(cropped.size(), Size::new(30, 40));
        assert_eq!(&cropped.row(0)[..4], &[10, 20, 0, 255]);
    }

    #[test]
    fn test_crop_clamps_to_output() {
        let frame = gradient(100, 80);
        let window = Rect::make_xywh(80, 60, 50, 50);
        let cropped = crop_to_window(&frame, window, Vector::new(0, 0)).unwrap();
        assert_eq!(cropped.size(), Size::new(20, 20));
    }

    #[test]
    fn test_crop_skips_tiny_or_offscreen_windows() {
        let frame = gradient(100, 80);
        assert!(crop_to_window(&frame, Rect::make_xywh(0, 0, 10, 40), Vector::default()).is_none());
        assert!(crop_to_window(&frame, Rect::make_xywh(500, 500, 40, 40), Vector::default()).is_none());
        assert!(crop_to_window(&frame, Rect::make_xywh(99, 0, 40, 40), Vector::default()).is_none());
    }

    #[test]
    fn test_window_mode_rejects_desktop() {
        let mut capturer = DxgiDuplicator::for_windows(CaptureOptions::default());
        assert!(!capturer.is_source_valid(SourceId::NONE));
        assert!(!capturer.select_source(SourceId::NONE));

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        capturer.start(Box::new(move |result: CaptureResult, frame: Option<BasicFrame>| {
            sink.lock().unwrap().push((result, frame.is_none()));
        }));
        capturer.capture_frame();
        capturer.stop();

        assert_eq!(*results.lock().unwrap(), vec![(CaptureResult::ErrorPermanent, true)]);
        assert_eq!(capturer.last_error(), Some(CaptureError::SourceUnavailable));
    }

    #[test]
    fn test_screen_mode_accepts_primary_output() {
        let mut capturer = DxgiDuplicator::for_screens(CaptureOptions::default());
        assert!(capturer.is_source_valid(SourceId::NONE));
    }
}
