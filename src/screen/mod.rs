//! Platform capture backends.

#[cfg(windows)]
#[path = "Windows/mod.rs"]
pub mod win;

#[cfg(target_os = "macos")]
#[path = "MacOS/mod.rs"]
pub mod mac;

#[cfg(target_os = "linux")]
#[path = "X11/mod.rs"]
pub mod x11;
