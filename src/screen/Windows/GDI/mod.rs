//! Window capture using GDI `PrintWindow`.
//!
//! Slowest backend, but it renders occluded windows and needs no GPU, so it
//! is the last entry of the window fallback chain.

use std::ffi::c_void;
use std::mem::size_of;
use std::slice;

use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, GetWindowDC, ReleaseDC,
    SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ,
};
use windows::Win32::Storage::Xps::{PrintWindow, PRINT_WINDOW_FLAGS};

use super::window_utils::{enumerate_capture_windows, is_window_valid, window_dpi, window_rect};
use super::{hwnd_of, id_of_hwnd, last_os_error};
use crate::capturer::{BackendState, CaptureBackend, Callback, DesktopCapturer, Source, SourceId};
use crate::error::CaptureError;
use crate::frame::{convert_bgra_to_rgba, BasicFrame, BYTES_PER_PIXEL};
use crate::geometry::Size;
use crate::options::CaptureOptions;

/// Renders DirectComposition content too. Missing from the Win32 metadata.
const PW_RENDERFULLCONTENT: PRINT_WINDOW_FLAGS = PRINT_WINDOW_FLAGS(2);

struct WindowDcGuard {
    hwnd: HWND,
    dc: HDC,
}

impl WindowDcGuard {
    unsafe fn new(hwnd: HWND) -> Result<Self, CaptureError> {
        let dc = GetWindowDC(Some(hwnd));
        if dc.0.is_null() {
            return Err(last_os_error("GetWindowDC"));
        }
        Ok(Self { hwnd, dc })
    }
}

impl Drop for WindowDcGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = ReleaseDC(Some(self.hwnd), self.dc);
        }
    }
}

struct MemoryDcGuard {
    dc: HDC,
}

impl MemoryDcGuard {
    unsafe fn new(window_dc: HDC) -> Result<Self, CaptureError> {
        let dc = CreateCompatibleDC(Some(window_dc));
        if dc.0.is_null() {
            return Err(last_os_error("CreateCompatibleDC"));
        }
        Ok(Self { dc })
    }
}

impl Drop for MemoryDcGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteDC(self.dc);
        }
    }
}

/// Top-down 32-bit DIB section and its pixel pointer.
struct DibSectionGuard {
    bitmap: HBITMAP,
    bits: *const u8,
}

impl DibSectionGuard {
    unsafe fn new(dc: HDC, width: i32, height: i32) -> Result<Self, CaptureError> {
        let info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                biHeight: -height, // top-down orientation
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut bits: *mut c_void = std::ptr::null_mut();
        let bitmap = CreateDIBSection(Some(dc), &info, DIB_RGB_COLORS, &mut bits, None, 0)
            .map_err(|err| super::os_error("CreateDIBSection", err))?;
        if bits.is_null() {
            let _ = DeleteObject(bitmap.into());
            return Err(CaptureError::Runtime("CreateDIBSection returned no pixels"));
        }
        Ok(Self {
            bitmap,
            bits: bits as *const u8,
        })
    }
}

impl Drop for DibSectionGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteObject(self.bitmap.into());
        }
    }
}

struct BitmapSelectionGuard {
    dc: HDC,
    old_bitmap: HGDIOBJ,
}

impl BitmapSelectionGuard {
    unsafe fn new(dc: HDC, bitmap: HBITMAP) -> Result<Self, CaptureError> {
        let old_bitmap = SelectObject(dc, bitmap.into());
        if old_bitmap.0.is_null() {
            return Err(last_os_error("SelectObject"));
        }
        Ok(Self { dc, old_bitmap })
    }
}

impl Drop for BitmapSelectionGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = SelectObject(self.dc, self.old_bitmap);
        }
    }
}

/// Renders `hwnd` with `PrintWindow` into an RGBA frame.
pub fn print_window(hwnd: HWND) -> Result<BasicFrame, CaptureError> {
    if !is_window_valid(hwnd) {
        return Err(CaptureError::SourceUnavailable);
    }
    let rect = window_rect(hwnd);
    if rect.is_empty() {
        return Err(CaptureError::Runtime("window has no area"));
    }
    let (width, height) = (rect.width(), rect.height());

    unsafe {
        let window_dc = WindowDcGuard::new(hwnd)?;
        let memory_dc = MemoryDcGuard::new(window_dc.dc)?;
        let dib = DibSectionGuard::new(memory_dc.dc, width, height)?;
        let _selection = BitmapSelectionGuard::new(memory_dc.dc, dib.bitmap)?;

        if !PrintWindow(hwnd, memory_dc.dc, PW_RENDERFULLCONTENT).as_bool() {
            return Err(last_os_error("PrintWindow"));
        }

        // DIB rows are DWORD aligned.
        let src_stride = (width as usize * BYTES_PER_PIXEL + 3) & !3;
        let src = slice::from_raw_parts(dib.bits, src_stride * height as usize);
        let mut frame = BasicFrame::new(Size::new(width, height));
        if !convert_bgra_to_rgba(src, src_stride, &mut frame) {
            return Err(CaptureError::Runtime("DIB section smaller than expected"));
        }
        frame.set_dpi(window_dpi(hwnd));
        Ok(frame)
    }
}

pub struct GdiCapturer {
    state: BackendState,
}

impl GdiCapturer {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            state: BackendState::new(options, CaptureBackend::Gdi),
        }
    }

    fn capture_selected(&self) -> Result<BasicFrame, CaptureError> {
        if self.state.selected.is_none() {
            return Err(CaptureError::SourceUnavailable);
        }
        let hwnd = hwnd_of(self.state.selected);
        if !is_window_valid(hwnd) {
            return Err(CaptureError::SourceUnavailable);
        }
        print_window(hwnd)
    }
}

impl DesktopCapturer for GdiCapturer {
    fn start(&mut self, callback: Box<dyn Callback>) {
        self.state.attach(callback);
        log::info!(source = self.state.selected.raw(); "GDI capture started");
    }

    fn stop(&mut self) {
        self.state.detach();
    }

    fn capture_frame(&mut self) {
        if !self.state.is_started() {
            return;
        }
        let outcome = self.capture_selected();
        if let Err(err) = &outcome {
            log::debug!(err:display = err; "GDI capture failed");
        }
        self.state.deliver(outcome);
    }

    fn get_source_list(&mut self, sources: &mut Vec<Source>) -> bool {
        sources.clear();
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
        self.state.selected = id;
        true
    }

    fn is_source_valid(&mut self, id: SourceId) -> bool {
        !id.is_none() && is_window_valid(hwnd_of(id))
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
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_capture_without_source_is_permanent() {
        let mut capturer = GdiCapturer::new(CaptureOptions::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        capturer.start(Box::new(move |result: CaptureResult, frame: Option<BasicFrame>| {
            sink.lock().unwrap().push((result, frame.is_some()));
        }));
        capturer.capture_frame();
        capturer.stop();
        capturer.capture_frame();

        assert_eq!(*results.lock().unwrap(), vec![(CaptureResult::ErrorPermanent, false)]);
        assert_eq!(capturer.last_error(), Some(CaptureError::SourceUnavailable));
    }

    #[test]
    fn test_rejects_invalid_sources() {
        let mut capturer = GdiCapturer::new(CaptureOptions::default());
        assert!(!capturer.select_source(SourceId::NONE));
        assert!(!capturer.is_source_valid(SourceId::NONE));
        assert_eq!(capturer.selected_source(), SourceId::NONE);
    }
}
