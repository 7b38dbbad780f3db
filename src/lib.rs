//! Cross-platform desktop and window capture.
//!
//! Probe the platform once with [`CaptureCapabilities::probe`], build a backend
//! with [`create_screen_capturer`] or [`create_window_capturer`], then drive it
//! through [`DesktopCapturer`] from a timer. Frames arrive as tightly packed
//! RGBA [`BasicFrame`]s. [`CaptureSession`] adds stall and failure recovery.

pub mod capturer;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod health;
pub mod mailbox;
pub mod options;
pub mod screen;
pub mod window;

pub use capturer::{
    create_screen_capturer, create_window_capturer, screen_backend_for, window_backend_for,
    Callback, CaptureBackend, CaptureCapabilities, Capturer, DesktopCapturer, Source, SourceId,
};
pub use error::{CaptureError, CaptureResult};
pub use frame::{BasicFrame, Frame, BYTES_PER_PIXEL};
pub use geometry::{Rect, Size, Vector};
pub use health::{CaptureHealth, CaptureSession, HealthAction};
pub use mailbox::FrameMailbox;
pub use options::{CaptureMethod, CaptureOptions};
pub use window::{
    bring_window_to_foreground, capture_window_thumbnail, enumerate_windows, exclude_from_capture,
    is_window_minimized, is_window_valid, WindowInfo,
};
