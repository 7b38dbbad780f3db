//! Win32 window and monitor queries shared by the Windows backends.

use std::mem::size_of;

use windows::core::{BOOL, HSTRING};
use windows::Foundation::Metadata::ApiInformation;
use windows::Graphics::Capture::GraphicsCaptureSession;
use windows::Win32::Foundation::{HWND, LPARAM, RECT};
use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_EXTENDED_FRAME_BOUNDS};
use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIFactory1, DXGI_ERROR_NOT_FOUND};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, MonitorFromWindow, HDC, HMONITOR, MONITORINFO,
    MONITORINFOEXW, MONITORINFOF_PRIMARY, MONITOR_DEFAULTTONEAREST,
};
use windows::Win32::UI::HiDpi::{GetDpiForMonitor, GetDpiForWindow, MDT_EFFECTIVE_DPI};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClassNameW, GetParent, GetWindow, GetWindowLongW, GetWindowRect,
    GetWindowTextLengthW, GetWindowTextW, IsIconic, IsWindow, IsWindowVisible, IsZoomed,
    SetForegroundWindow, SetWindowDisplayAffinity, ShowWindow, GWL_EXSTYLE, GW_OWNER, SW_RESTORE,
    WDA_EXCLUDEFROMCAPTURE, WS_EX_TOOLWINDOW,
};

use super::{gdi, graphics_capture, id_of_hwnd, wide_to_string};
use crate::error::CaptureError;
use crate::frame::{BasicFrame, DEFAULT_DPI};
use crate::geometry::{Rect, Vector};
use crate::window::WindowInfo;

/// Shareable windows must be at least this large.
const MIN_SHARE_WIDTH: i32 = 100;
const MIN_SHARE_HEIGHT: i32 = 80;

/// Shell windows that are never offered as capture sources.
const SHELL_CLASSES: &[&str] = &["Progman", "Shell_TrayWnd", "WorkerW", "Shell_SecondaryTrayWnd"];

/// Lower-case title fragments of system surfaces hidden from the share picker.
const EXCLUDED_TITLE_KEYWORDS: &[&str] = &[
    "thumbnail",
    "windows input experience",
    "\u{7F29}\u{7565}\u{56FE}",
    "\u{8F93}\u{5165}\u{4F53}\u{9A8C}",
    "\u{8BBE}\u{7F6E}",
];

// ============================================================================
// Window queries
// ============================================================================

pub fn is_window_valid(hwnd: HWND) -> bool {
    !hwnd.0.is_null() && unsafe { IsWindow(Some(hwnd)).as_bool() }
}

pub fn is_window_minimized(hwnd: HWND) -> bool {
    is_window_valid(hwnd) && unsafe { IsIconic(hwnd).as_bool() }
}

pub fn is_window_maximized(hwnd: HWND) -> bool {
    is_window_valid(hwnd) && unsafe { IsZoomed(hwnd).as_bool() }
}

/// Window rectangle in screen coordinates, empty for invalid windows.
pub fn window_rect(hwnd: HWND) -> Rect {
    if !is_window_valid(hwnd) {
        return Rect::default();
    }
    let mut rect = RECT::default();
    match unsafe { GetWindowRect(hwnd, &mut rect) } {
        Ok(()) => Rect::make_ltrb(rect.left, rect.top, rect.right, rect.bottom),
        Err(_) => Rect::default(),
    }
}

/// Visible bounds without the invisible resize borders DWM adds on Windows 10+.
pub fn extended_frame_bounds(hwnd: HWND) -> Rect {
    if !is_window_valid(hwnd) {
        return Rect::default();
    }
    let mut rect = RECT::default();
    let result = unsafe {
        DwmGetWindowAttribute(
            hwnd,
            DWMWA_EXTENDED_FRAME_BOUNDS,
            &mut rect as *mut RECT as *mut _,
            size_of::<RECT>() as u32,
        )
    };
    match result {
        Ok(()) => Rect::make_ltrb(rect.left, rect.top, rect.right, rect.bottom),
        Err(_) => window_rect(hwnd),
    }
}

pub fn window_title(hwnd: HWND) -> String {
    if hwnd.0.is_null() {
        return String::new();
    }
    let length = unsafe { GetWindowTextLengthW(hwnd) };
    if length <= 0 {
        return String::new();
    }
    let mut buffer = vec![0u16; length as usize + 1];
    let copied = unsafe { GetWindowTextW(hwnd, &mut buffer) };
    wide_to_string(&buffer[..copied.max(0) as usize])
}

pub fn window_class_name(hwnd: HWND) -> String {
    let mut buffer = [0u16; 256];
    let copied = unsafe { GetClassNameW(hwnd, &mut buffer) };
    wide_to_string(&buffer[..copied.max(0) as usize])
}

/// Monitor holding the largest part of the window.
pub fn window_monitor(hwnd: HWND) -> HMONITOR {
    unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST) }
}

pub fn window_dpi(hwnd: HWND) -> Vector {
    if !hwnd.0.is_null() {
        let dpi = unsafe { GetDpiForWindow(hwnd) };
        if dpi > 0 {
            return Vector::new(dpi as i32, dpi as i32);
        }
    }
    let monitor = window_monitor(hwnd);
    if monitor.0.is_null() {
        DEFAULT_DPI
    } else {
        monitor_dpi(monitor)
    }
}

pub fn monitor_dpi(monitor: HMONITOR) -> Vector {
    let mut dpi_x = 0u32;
    let mut dpi_y = 0u32;
    match unsafe { GetDpiForMonitor(monitor, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y) } {
        Ok(()) => Vector::new(dpi_x as i32, dpi_y as i32),
        Err(_) => DEFAULT_DPI,
    }
}

// ============================================================================
// Monitors
// ============================================================================

#[derive(Debug, Clone)]
pub struct MonitorInfo {
    pub handle: HMONITOR,
    pub bounds: Rect,
    pub work_area: Rect,
    pub is_primary: bool,
    pub device_name: String,
}

pub fn enumerate_monitors() -> Vec<MonitorInfo> {
    let mut monitors: Vec<MonitorInfo> = Vec::new();

    unsafe extern "system" fn collect(monitor: HMONITOR, _: HDC, _: *mut RECT, data: LPARAM) -> BOOL {
        let monitors = unsafe { &mut *(data.0 as *mut Vec<MonitorInfo>) };
        let mut info = MONITORINFOEXW::default();
        info.monitorInfo.cbSize = size_of::<MONITORINFOEXW>() as u32;
        let ok = unsafe { GetMonitorInfoW(monitor, &mut info as *mut MONITORINFOEXW as *mut MONITORINFO) };
        if ok.as_bool() {
            let m = &info.monitorInfo;
            monitors.push(MonitorInfo {
                handle: monitor,
                bounds: Rect::make_ltrb(m.rcMonitor.left, m.rcMonitor.top, m.rcMonitor.right, m.rcMonitor.bottom),
                work_area: Rect::make_ltrb(m.rcWork.left, m.rcWork.top, m.rcWork.right, m.rcWork.bottom),
                is_primary: m.dwFlags & MONITORINFOF_PRIMARY != 0,
                device_name: wide_to_string(&info.szDevice),
            });
        }
        BOOL(1)
    }

    unsafe {
        let _ = EnumDisplayMonitors(
            None,
            None,
            Some(collect),
            LPARAM(&mut monitors as *mut Vec<MonitorInfo> as isize),
        );
    }
    monitors
}

pub fn is_monitor_valid(monitor: HMONITOR) -> bool {
    !monitor.0.is_null() && enumerate_monitors().iter().any(|m| m.handle == monitor)
}

// ============================================================================
// Window enumeration
// ============================================================================

/// Top-level window offered as a capture source by the backends.
#[derive(Debug, Clone)]
pub struct TopLevelWindow {
    pub hwnd: HWND,
    pub title: String,
    pub class_name: String,
    pub bounds: Rect,
    pub is_minimized: bool,
}

/// Visible, titled, top-level application windows.
pub fn enumerate_capture_windows() -> Vec<TopLevelWindow> {
    let mut windows: Vec<TopLevelWindow> = Vec::new();

    unsafe extern "system" fn collect(hwnd: HWND, data: LPARAM) -> BOOL {
        let windows = unsafe { &mut *(data.0 as *mut Vec<TopLevelWindow>) };
        if let Some(window) = capture_candidate(hwnd) {
            windows.push(window);
        }
        BOOL(1)
    }

    unsafe {
        let _ = EnumWindows(Some(collect), LPARAM(&mut windows as *mut Vec<TopLevelWindow> as isize));
    }
    windows
}

fn capture_candidate(hwnd: HWND) -> Option<TopLevelWindow> {
    unsafe {
        if !IsWindowVisible(hwnd).as_bool() || GetWindowTextLengthW(hwnd) == 0 {
            return None;
        }
        if GetWindowLongW(hwnd, GWL_EXSTYLE) as u32 & WS_EX_TOOLWINDOW.0 != 0 {
            return None;
        }
        if GetParent(hwnd).is_ok_and(|parent| !parent.0.is_null()) {
            return None;
        }
    }

    let class_name = window_class_name(hwnd);
    if SHELL_CLASSES.contains(&class_name.as_str()) {
        return None;
    }

    Some(TopLevelWindow {
        hwnd,
        title: window_title(hwnd),
        class_name,
        bounds: window_rect(hwnd),
        is_minimized: unsafe { IsIconic(hwnd).as_bool() },
    })
}

/// Windows a user would pick in a share dialog.
pub fn enumerate_windows() -> Vec<WindowInfo> {
    let mut windows: Vec<WindowInfo> = Vec::new();

    unsafe extern "system" fn collect(hwnd: HWND, data: LPARAM) -> BOOL {
        let windows = unsafe { &mut *(data.0 as *mut Vec<WindowInfo>) };
        if is_shareable_window(hwnd) {
            let title = window_title(hwnd);
            if !title.is_empty() && !is_excluded_title(&title) {
                windows.push(WindowInfo {
                    id: id_of_hwnd(hwnd),
                    title,
                    geometry: window_rect(hwnd),
                });
            }
        }
        BOOL(1)
    }

    unsafe {
        let _ = EnumWindows(Some(collect), LPARAM(&mut windows as *mut Vec<WindowInfo> as isize));
    }
    windows
}

fn is_shareable_window(hwnd: HWND) -> bool {
    if !is_window_valid(hwnd) {
        return false;
    }
    unsafe {
        if !IsWindowVisible(hwnd).as_bool() || IsIconic(hwnd).as_bool() {
            return false;
        }
        if GetWindowLongW(hwnd, GWL_EXSTYLE) as u32 & WS_EX_TOOLWINDOW.0 != 0 {
            return false;
        }
        if let Ok(owner) = GetWindow(hwnd, GW_OWNER) {
            if !owner.0.is_null() && IsWindowVisible(owner).as_bool() {
                return false;
            }
        }
    }
    let rect = window_rect(hwnd);
    rect.width() >= MIN_SHARE_WIDTH && rect.height() >= MIN_SHARE_HEIGHT
}

pub(crate) fn is_excluded_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    EXCLUDED_TITLE_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

// ============================================================================
// Window actions
// ============================================================================

pub fn bring_window_to_foreground(hwnd: HWND) -> bool {
    if !is_window_valid(hwnd) {
        return false;
    }
    unsafe {
        if IsIconic(hwnd).as_bool() {
            let _ = ShowWindow(hwnd, SW_RESTORE);
        }
        SetForegroundWindow(hwnd).as_bool()
    }
}

/// Hides `hwnd` from every screen capture API, including this crate's.
pub fn exclude_from_capture(hwnd: HWND) -> bool {
    if hwnd.0.is_null() {
        return false;
    }
    match unsafe { SetWindowDisplayAffinity(hwnd, WDA_EXCLUDEFROMCAPTURE) } {
        Ok(()) => true,
        Err(err) => {
            log::warn!(err:display = err; "SetWindowDisplayAffinity failed");
            false
        }
    }
}

// ============================================================================
// Capability probes
// ============================================================================

/// Graphics Capture needs UniversalApiContract 8 (Windows 10 1903).
pub fn is_wgc_supported() -> bool {
    let supported = (|| -> windows::core::Result<bool> {
        let contract_present = ApiInformation::IsApiContractPresentByMajor(
            &HSTRING::from("Windows.Foundation.UniversalApiContract"),
            8,
        )?;
        if !contract_present {
            return Ok(false);
        }
        GraphicsCaptureSession::IsSupported()
    })();
    supported.unwrap_or(false)
}

/// Desktop duplication needs at least one output attached to the desktop.
pub fn is_dxgi_duplication_supported() -> bool {
    let Ok(factory) = (unsafe { CreateDXGIFactory1::<IDXGIFactory1>() }) else {
        return false;
    };
    for adapter_index in 0.. {
        let adapter = match unsafe { factory.EnumAdapters1(adapter_index) } {
            Ok(adapter) => adapter,
            Err(err) if err.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(_) => break,
        };
        for output_index in 0.. {
            let Ok(output) = (unsafe { adapter.EnumOutputs(output_index) }) else {
                break;
            };
            if let Ok(desc) = unsafe { output.GetDesc() } {
                if desc.AttachedToDesktop.as_bool() {
                    return true;
                }
            }
        }
    }
    false
}

// ============================================================================
// One-shot captures
// ============================================================================

/// Single Graphics Capture frame of `hwnd`, polling briefly for the first frame.
pub fn capture_window_with_winrt(hwnd: HWND) -> Result<BasicFrame, CaptureError> {
    graphics_capture::capture_window_once(hwnd)
}

/// Single `PrintWindow` frame of `hwnd`.
pub fn capture_window_with_print_api(hwnd: HWND) -> Result<BasicFrame, CaptureError> {
    gdi::print_window(hwnd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_titles() {
        assert!(is_excluded_title("Taskbar Thumbnail"));
        assert!(is_excluded_title("Windows Input Experience"));
        assert!(is_excluded_title("\u{8BBE}\u{7F6E}"));
        assert!(!is_excluded_title("Untitled - Notepad"));
    }

    #[test]
    fn test_null_window_is_invalid() {
        let null = HWND(std::ptr::null_mut());
        assert!(!is_window_valid(null));
        assert!(!is_window_minimized(null));
        assert!(window_rect(null).is_empty());
        assert!(window_title(null).is_empty());
        assert!(!bring_window_to_foreground(null));
        assert!(!exclude_from_capture(null));
    }
}
