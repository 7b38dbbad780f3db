//! Capture tuning passed to backends at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TARGET_FPS: u32 = 30;
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Preferred capture method. Interpretation is platform specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    /// Let the factory pick the best available backend
    #[default]
    Auto,
    /// Prefer GPU backed capture (WGC, DXGI)
    Hardware,
    /// Prefer CPU capture (GDI)
    Software,
}

impl std::fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMethod::Auto => write!(f, "auto"),
            CaptureMethod::Hardware => write!(f, "hardware"),
            CaptureMethod::Software => write!(f, "software"),
        }
    }
}

impl std::str::FromStr for CaptureMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(CaptureMethod::Auto),
            "hardware" => Ok(CaptureMethod::Hardware),
            "software" => Ok(CaptureMethod::Software),
            _ => Err(format!("Unknown capture method: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureOptions {
    pub target_fps: u32,
    pub capture_cursor: bool,
    pub preferred_method: CaptureMethod,
    pub detect_fullscreen_window: bool,
    /// Milliseconds without a successful frame before the backend is reinitialized.
    pub stall_timeout_ms: u64,
    /// Consecutive failed captures before the backend is reinitialized.
    pub failure_threshold: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            capture_cursor: false,
            preferred_method: CaptureMethod::Auto,
            detect_fullscreen_window: true,
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl CaptureOptions {
    pub fn default_options() -> Self {
        Self::default()
    }

    pub fn low_latency() -> Self {
        Self {
            target_fps: 60,
            preferred_method: CaptureMethod::Hardware,
            ..Self::default()
        }
    }

    pub fn low_cpu() -> Self {
        Self {
            target_fps: 15,
            preferred_method: CaptureMethod::Software,
            ..Self::default()
        }
    }

    /// Minimum spacing between frame copies for push based backends.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.target_fps.max(1)))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = CaptureOptions::default_options();
        assert_eq!(options.target_fps, 30);
        assert!(!options.capture_cursor);
        assert_eq!(options.preferred_method, CaptureMethod::Auto);
        assert!(options.detect_fullscreen_window);
        assert_eq!(options.stall_timeout_ms, 5000);
        assert_eq!(options.failure_threshold, 3);
    }

    #[test]
    fn test_presets() {
        let fast = CaptureOptions::low_latency();
        assert_eq!(fast.target_fps, 60);
        assert_eq!(fast.preferred_method, CaptureMethod::Hardware);
        assert_eq!(fast.failure_threshold, 3);

        let cheap = CaptureOptions::low_cpu();
        assert_eq!(cheap.target_fps, 15);
        assert_eq!(cheap.preferred_method, CaptureMethod::Software);
    }

    #[test]
    fn test_frame_interval_guards_zero_fps() {
        let mut options = CaptureOptions::default();
        assert_eq!(options.frame_interval(), Duration::from_millis(33));
        options.target_fps = 0;
        assert_eq!(options.frame_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_capture_method_parse() {
        assert_eq!("Hardware".parse::<CaptureMethod>(), Ok(CaptureMethod::Hardware));
        assert_eq!(CaptureMethod::Software.to_string(), "software");
        assert!("gpu".parse::<CaptureMethod>().is_err());
    }

    #[test]
    fn test_options_deserialize_partial() {
        // Missing fields fall back to defaults so hosts can store sparse settings.
        let options: CaptureOptions =
            serde_json::from_str(r#"{"targetFps": 24, "preferredMethod": "software"}"#).unwrap();
        assert_eq!(options.target_fps, 24);
        assert_eq!(options.preferred_method, CaptureMethod::Software);
        assert_eq!(options.stall_timeout_ms, DEFAULT_STALL_TIMEOUT_MS);
    }
}
