//! macOS capture backends.
//!
//! Screens stream through ScreenCaptureKit and fall back to
//! `CGDisplayCreateImage`; windows are grabbed with `CGWindowListCreateImage`.
//! Both need the Screen Recording permission.

pub mod display;
pub(crate) mod frame;
pub mod screen_capturer;
pub mod window_capturer;
pub mod window_ops;

use core_graphics::base::CGError;
use core_graphics::image::CGImage;
use screencapturekit::prelude::*;

use crate::error::CaptureError;
use crate::frame::BasicFrame;
use crate::geometry::Size;

pub use display::{list_displays, DisplayInfo};
pub use screen_capturer::MacScreenCapturer;
pub use window_capturer::MacWindowCapturer;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGPreflightScreenCaptureAccess() -> bool;
    fn CGRequestScreenCaptureAccess() -> bool;
}

// ============================================================================
// Permission
// ============================================================================

/// Whether the process already holds the Screen Recording permission.
pub fn has_screen_capture_permission() -> bool {
    unsafe { CGPreflightScreenCaptureAccess() }
}

/// Prompts for the Screen Recording permission. Takes effect after a relaunch.
pub fn request_screen_capture_permission() -> bool {
    unsafe { CGRequestScreenCaptureAccess() }
}

pub(crate) fn ensure_permission() -> Result<(), CaptureError> {
    if has_screen_capture_permission() {
        Ok(())
    } else {
        Err(CaptureError::NoPermission)
    }
}

/// ScreenCaptureKit needs macOS 12.3 and answers shareable-content queries.
pub fn is_screen_capture_kit_available() -> bool {
    SCShareableContent::get().is_ok()
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn cg_error(context: &'static str, err: CGError) -> CaptureError {
    CaptureError::Os {
        context,
        code: err as u32,
    }
}

/// Converts a 32-bit BGRA `CGImage` into an RGBA frame.
pub(crate) fn frame_from_cg_image(image: &CGImage) -> Result<BasicFrame, CaptureError> {
    if image.bits_per_pixel() != 32 {
        return Err(CaptureError::Runtime("unsupported CGImage pixel format"));
    }
    let size = Size::new(image.width() as i32, image.height() as i32);
    if size.is_empty() {
        return Err(CaptureError::Runtime("CGImage is empty"));
    }
    let data = image.data();
    BasicFrame::from_bgra(size, data.bytes(), image.bytes_per_row())
        .ok_or(CaptureError::Runtime("CGImage data shorter than expected"))
}
