//! Platform window queries and one-shot window images.
//!
//! These work on raw `SourceId`s outside of any `DesktopCapturer` and back
//! the window pickers of a host application.

use serde::Serialize;

use crate::capturer::SourceId;
use crate::error::CaptureError;
use crate::frame::{BasicFrame, Frame, BYTES_PER_PIXEL};
use crate::geometry::{Rect, Size};

/// A top-level window offered for sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub id: SourceId,
    pub title: String,
    /// Position and size in desktop coordinates.
    pub geometry: Rect,
}

#[cfg(windows)]
mod platform {
    use super::*;
    use crate::screen::win::{hwnd_of, window_utils};

    pub fn enumerate_windows() -> Vec<WindowInfo> {
        window_utils::enumerate_windows()
    }

    pub fn is_window_valid(id: SourceId) -> bool {
        !id.is_none() && window_utils::is_window_valid(hwnd_of(id))
    }

    pub fn is_window_minimized(id: SourceId) -> bool {
        is_window_valid(id) && window_utils::is_window_minimized(hwnd_of(id))
    }

    pub fn bring_window_to_foreground(id: SourceId) -> bool {
        is_window_valid(id) && window_utils::bring_window_to_foreground(hwnd_of(id))
    }

    pub fn exclude_from_capture(id: SourceId) -> bool {
        is_window_valid(id) && window_utils::exclude_from_capture(hwnd_of(id))
    }

    /// Graphics Capture first, `PrintWindow` when it yields nothing.
    pub fn capture_window(id: SourceId) -> Result<BasicFrame, CaptureError> {
        if !is_window_valid(id) {
            return Err(CaptureError::SourceUnavailable);
        }
        let hwnd = hwnd_of(id);
        window_utils::capture_window_with_winrt(hwnd).or_else(|err| {
            log::debug!(err:display = err; "WinRT thumbnail failed, using PrintWindow");
            window_utils::capture_window_with_print_api(hwnd)
        })
    }
}

#[cfg(target_os = "macos")]
mod platform {
    pub use crate::screen::mac::window_ops::{
        bring_window_to_foreground, capture_window, enumerate_windows, exclude_from_capture,
        is_window_minimized, is_window_valid,
    };
}

#[cfg(target_os = "linux")]
mod platform {
    pub use crate::screen::x11::window_ops::{
        bring_window_to_foreground, capture_window, enumerate_windows, exclude_from_capture,
        is_window_minimized, is_window_valid,
    };
}

#[cfg(not(any(windows, target_os = "macos", target_os = "linux")))]
mod platform {
    use super::*;

    pub fn enumerate_windows() -> Vec<WindowInfo> {
        Vec::new()
    }

    pub fn is_window_valid(_id: SourceId) -> bool {
        false
    }

    pub fn is_window_minimized(_id: SourceId) -> bool {
        false
    }

    pub fn bring_window_to_foreground(_id: SourceId) -> bool {
        false
    }

    pub fn exclude_from_capture(_id: SourceId) -> bool {
        false
    }

    pub fn capture_window(_id: SourceId) -> Result<BasicFrame, CaptureError> {
        Err(CaptureError::BackendUnavailable("no window capture on this platform"))
    }
}

/// Shareable top-level windows, front to back where the platform reports order.
pub fn enumerate_windows() -> Vec<WindowInfo> {
    platform::enumerate_windows()
}

pub fn is_window_valid(id: SourceId) -> bool {
    platform::is_window_valid(id)
}

pub fn is_window_minimized(id: SourceId) -> bool {
    platform::is_window_minimized(id)
}

/// Returns false where the platform cannot raise foreign windows (macOS).
pub fn bring_window_to_foreground(id: SourceId) -> bool {
    platform::bring_window_to_foreground(id)
}

/// Hides the window from all screen capture. Windows 10 2004+ only.
pub fn exclude_from_capture(id: SourceId) -> bool {
    platform::exclude_from_capture(id)
}

/// Still image of a window, downscaled to fit `max_size` when it is larger.
///
/// An empty `max_size` keeps the native resolution.
pub fn capture_window_thumbnail(id: SourceId, max_size: Size) -> Result<BasicFrame, CaptureError> {
    if id.is_none() {
        return Err(CaptureError::SourceUnavailable);
    }
    let frame = platform::capture_window(id)?;
    Ok(downscale_to_fit(frame, max_size))
}

/// Largest size with `size`'s aspect ratio that fits in `bounds`.
fn fit_within(size: Size, bounds: Size) -> Size {
    if bounds.is_empty() || (size.width <= bounds.width && size.height <= bounds.height) {
        return size;
    }
    let scale = f64::min(
        f64::from(bounds.width) / f64::from(size.width),
        f64::from(bounds.height) / f64::from(size.height),
    );
    Size::new(
        ((f64::from(size.width) * scale) as i32).max(1),
        ((f64::from(size.height) * scale) as i32).max(1),
    )
}

/// Nearest-neighbor downscale, or `frame` itself when it already fits.
fn downscale_to_fit(frame: BasicFrame, max_size: Size) -> BasicFrame {
    let source = frame.size();
    let target = fit_within(source, max_size);
    if target == source || source.is_empty() {
        return frame;
    }

    let mut scaled = BasicFrame::new(target);
    let x_ratio = f64::from(source.width) / f64::from(target.width);
    let y_ratio = f64::from(source.height) / f64::from(target.height);
    for y in 0..target.height {
        let src_row = frame.row(((f64::from(y) * y_ratio) as i32).min(source.height - 1));
        let dst_row = scaled.row_mut(y);
        for (x, dst) in dst_row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let src_x = ((x as f64 * x_ratio) as usize).min(source.width as usize - 1);
            let offset = src_x * BYTES_PER_PIXEL;
            dst.copy_from_slice(&src_row[offset..offset + BYTES_PER_PIXEL]);
        }
    }
    scaled.set_dpi(frame.dpi());
    scaled.set_capture_time_us(frame.capture_time_us());
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_within_keeps_aspect() {
        assert_eq!(fit_within(Size::new(1920, 1080), Size::new(320, 320)), Size::new(320, 180));
        assert_eq!(fit_within(Size::new(100, 400), Size::new(200, 200)), Size::new(50, 200));
        assert_eq!(fit_within(Size::new(100, 50), Size::new(200, 200)), Size::new(100, 50));
        assert_eq!(fit_within(Size::new(100, 50), Size::default()), Size::new(100, 50));
    }

    #[test]
    fn test_downscale_samples_nearest_pixel() {
        let mut frame = BasicFrame::new(Size::new(4, 2));
        for y in 0..2 {
            for (x, px) in frame.row_mut(y).chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                px.copy_from_slice(&[x as u8 * 10, y as u8 * 10, 0, 255]);
            }
        }
        frame.set_capture_time_us(42);

        let scaled = downscale_to_fit(frame, Size::new(2, 2));
        assert_eq!(scaled.size(), Size::new(2, 1));
        assert_eq!(scaled.row(0), &[0, 0, 0, 255, 20, 0, 0, 255]);
        assert_eq!(scaled.capture_time_us(), 42);
    }

    #[test]
    fn test_none_window() {
        assert!(!is_window_valid(SourceId::NONE));
        assert!(!bring_window_to_foreground(SourceId::NONE));
        assert_eq!(
            capture_window_thumbnail(SourceId::NONE, Size::new(320, 180)),
            Err(CaptureError::SourceUnavailable)
        );
    }

    #[test]
    fn test_window_info_serializes_camel_case() {
        let info = WindowInfo {
            id: SourceId(7),
            title: "Editor".to_string(),
            geometry: Rect::make_xywh(0, 0, 10, 10),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["title"], "Editor");
    }
}
