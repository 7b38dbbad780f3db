//! Window list queries and one-shot window images through CoreGraphics.

use core_foundation::base::{CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::display::CGDisplay;
use core_graphics::geometry::{CGPoint, CGRect, CGSize};
use core_graphics::window::{
    copy_window_info, kCGNullWindowID, kCGWindowImageBoundsIgnoreFraming, kCGWindowListExcludeDesktopElements,
    kCGWindowListOptionAll, kCGWindowListOptionIncludingWindow, kCGWindowListOptionOnScreenOnly,
    CGWindowID, CGWindowListOption,
};

use super::frame_from_cg_image;
use crate::capturer::SourceId;
use crate::error::CaptureError;
use crate::frame::BasicFrame;
use crate::geometry::Rect;
use crate::window::WindowInfo;

const MIN_SHARE_WIDTH: i32 = 100;
const MIN_SHARE_HEIGHT: i32 = 80;

/// One entry of the CoreGraphics window list.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub id: CGWindowID,
    pub owner: String,
    pub name: String,
    pub layer: i64,
    pub alpha: f64,
    pub bounds: Rect,
    pub on_screen: bool,
}

impl WindowEntry {
    /// `"owner - name"`, or the owner alone for unnamed windows.
    pub fn title(&self) -> String {
        if self.name.is_empty() {
            self.owner.clone()
        } else {
            format!("{} - {}", self.owner, self.name)
        }
    }

    pub(crate) fn is_shareable(&self) -> bool {
        self.layer == 0
            && self.alpha > 0.0
            && self.bounds.width() >= MIN_SHARE_WIDTH
            && self.bounds.height() >= MIN_SHARE_HEIGHT
            && !self.title().is_empty()
    }
}

fn key(name: &'static str) -> CFString {
    CFString::from_static_string(name)
}

fn number(dict: &CFDictionary<CFString, CFType>, name: &'static str) -> Option<CFNumber> {
    dict.find(&key(name))?.downcast::<CFNumber>()
}

fn string(dict: &CFDictionary<CFString, CFType>, name: &'static str) -> String {
    dict.find(&key(name))
        .and_then(|value| value.downcast::<CFString>())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn bounds(dict: &CFDictionary<CFString, CFType>) -> Rect {
    dict.find(&key("kCGWindowBounds"))
        .and_then(|value| value.downcast::<CFDictionary>())
        .and_then(|bounds| CGRect::from_dict_representation(&bounds))
        .map(|r| {
            Rect::make_xywh(
                r.origin.x as i32,
                r.origin.y as i32,
                r.size.width as i32,
                r.size.height as i32,
            )
        })
        .unwrap_or_default()
}

fn parse_entry(dict: &CFDictionary<CFString, CFType>) -> Option<WindowEntry> {
    let id = number(dict, "kCGWindowNumber")?.to_i64()?;
    Some(WindowEntry {
        id: id as CGWindowID,
        owner: string(dict, "kCGWindowOwnerName"),
        name: string(dict, "kCGWindowName"),
        layer: number(dict, "kCGWindowLayer").and_then(|n| n.to_i64()).unwrap_or_default(),
        alpha: number(dict, "kCGWindowAlpha").and_then(|n| n.to_f64()).unwrap_or(1.0),
        bounds: bounds(dict),
        on_screen: dict
            .find(&key("kCGWindowIsOnscreen"))
            .and_then(|value| value.downcast::<CFBoolean>())
            .map(bool::from)
            .unwrap_or(false),
    })
}

fn window_list(option: CGWindowListOption) -> Vec<WindowEntry> {
    let Some(array) = copy_window_info(option, kCGNullWindowID) else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|item| {
            let dict: CFDictionary<CFString, CFType> =
                unsafe { CFDictionary::wrap_under_get_rule(*item as CFDictionaryRef) };
            parse_entry(&dict)
        })
        .collect()
}

fn find_window(id: CGWindowID) -> Option<WindowEntry> {
    window_list(kCGWindowListOptionAll)
        .into_iter()
        .find(|w| w.id == id)
}

fn window_id_of(id: SourceId) -> Option<CGWindowID> {
    if id.is_none() {
        return None;
    }
    CGWindowID::try_from(id.raw()).ok()
}

/// Shareable on-screen windows, front to back.
pub fn shareable_windows() -> Vec<WindowEntry> {
    window_list(kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements)
        .into_iter()
        .filter(WindowEntry::is_shareable)
        .collect()
}

pub fn enumerate_windows() -> Vec<WindowInfo> {
    shareable_windows()
        .into_iter()
        .map(|w| WindowInfo {
            id: SourceId(u64::from(w.id)),
            title: w.title(),
            geometry: w.bounds,
        })
        .collect()
}

pub fn is_window_valid(id: SourceId) -> bool {
    window_id_of(id).and_then(find_window).is_some()
}

/// Listed but not on screen.
pub fn is_window_minimized(id: SourceId) -> bool {
    window_id_of(id)
        .and_then(find_window)
        .is_some_and(|w| !w.on_screen)
}

/// `CGWindowListCreateImage` of a single window.
pub fn capture_window(id: SourceId) -> Result<BasicFrame, CaptureError> {
    let window_id = window_id_of(id).ok_or(CaptureError::SourceUnavailable)?;
    let entry = find_window(window_id).ok_or(CaptureError::SourceUnavailable)?;
    if entry.bounds.is_empty() {
        return Err(CaptureError::Runtime("window has no area"));
    }

    let rect = CGRect::new(
        &CGPoint::new(f64::from(entry.bounds.left()), f64::from(entry.bounds.top())),
        &CGSize::new(f64::from(entry.bounds.width()), f64::from(entry.bounds.height())),
    );
    let image = CGDisplay::screenshot(
        rect,
        kCGWindowListOptionIncludingWindow,
        window_id,
        kCGWindowImageBoundsIgnoreFraming,
    )
    .ok_or(CaptureError::Runtime("CGWindowListCreateImage returned no image"))?;
    frame_from_cg_image(&image)
}

/// Not supported by CoreGraphics.
pub fn bring_window_to_foreground(_id: SourceId) -> bool {
    false
}

/// Not supported by CoreGraphics.
pub fn exclude_from_capture(_id: SourceId) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(owner: &str, name: &str, layer: i64, alpha: f64, width: i32, height: i32) -> WindowEntry {
        WindowEntry {
            id: 7,
            owner: owner.to_string(),
            name: name.to_string(),
            layer,
            alpha,
            bounds: Rect::make_xywh(0, 0, width, height),
            on_screen: true,
        }
    }

    #[test]
    fn test_window_title() {
        assert_eq!(entry("Safari", "Docs", 0, 1.0, 800, 600).title(), "Safari - Docs");
        assert_eq!(entry("Finder", "", 0, 1.0, 800, 600).title(), "Finder");
    }

    #[test]
    fn test_shareable_filter() {
        assert!(entry("Safari", "Docs", 0, 1.0, 800, 600).is_shareable());
        assert!(!entry("Dock", "", 20, 1.0, 800, 600).is_shareable());
        assert!(!entry("Ghost", "", 0, 0.0, 800, 600).is_shareable());
        assert!(!entry("Tiny", "", 0, 1.0, 99, 600).is_shareable());
        assert!(!entry("Flat", "", 0, 1.0, 800, 79).is_shareable());
        assert!(!entry("", "", 0, 1.0, 800, 600).is_shareable());
    }

    #[test]
    fn test_none_is_never_valid() {
        assert!(!is_window_valid(SourceId::NONE));
        assert!(!is_window_minimized(SourceId::NONE));
        assert!(!bring_window_to_foreground(SourceId(1)));
        assert!(!exclude_from_capture(SourceId(1)));
    }
}
