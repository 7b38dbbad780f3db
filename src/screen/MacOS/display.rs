use core_graphics::display::{CGDirectDisplayID, CGDisplay};
use serde::Serialize;

use super::cg_error;
use crate::error::CaptureError;
use crate::geometry::Rect;

#[derive(Debug, Clone, Serialize)]
pub struct DisplayInfo {
    pub id: CGDirectDisplayID,
    pub name: String,
    pub bounds: Rect,
    pub is_main: bool,
}

// ============================================================================
// Public API - Display Enumeration
// ============================================================================

pub fn list_displays() -> Result<Vec<DisplayInfo>, CaptureError> {
    let ids = CGDisplay::active_displays().map_err(|err| cg_error("CGGetActiveDisplayList", err))?;
    let main = CGDisplay::main().id;

    Ok(ids
        .into_iter()
        .map(|id| {
            let bounds = CGDisplay::new(id).bounds();
            DisplayInfo {
                id,
                name: format!("Display {}", id),
                bounds: Rect::make_xywh(
                    bounds.origin.x as i32,
                    bounds.origin.y as i32,
                    bounds.size.width as i32,
                    bounds.size.height as i32,
                ),
                is_main: id == main,
            }
        })
        .collect())
}

pub(crate) fn main_display_id() -> CGDirectDisplayID {
    CGDisplay::main().id
}

pub(crate) fn is_display_active(id: CGDirectDisplayID) -> bool {
    CGDisplay::active_displays()
        .map(|ids| ids.contains(&id))
        .unwrap_or(false)
}
