//! X11 window enumeration and window management helpers.

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ClientMessageEvent, ConnectionExt as _, EventMask, MapState, Window,
};

use super::{read_string_property, x11_error, X11Connection};
use crate::capturer::SourceId;
use crate::error::CaptureError;
use crate::frame::BasicFrame;
use crate::geometry::Rect;
use crate::window::WindowInfo;

const MIN_SHARE_WIDTH: u16 = 100;
const MIN_SHARE_HEIGHT: u16 = 80;

fn window_of(id: SourceId) -> Option<Window> {
    if id.is_none() {
        return None;
    }
    Window::try_from(id.raw()).ok()
}

/// Managed windows from `_NET_CLIENT_LIST`, or the root's children.
fn client_windows(conn: &X11Connection) -> Vec<Window> {
    let root = conn.root();
    if let Some(client_list) = conn.existing_atom("_NET_CLIENT_LIST") {
        let reply = conn
            .conn()
            .get_property(false, root, client_list, AtomEnum::WINDOW, 0, 16384)
            .ok()
            .and_then(|cookie| cookie.reply().ok());
        if let Some(reply) = reply {
            if let Some(values) = reply.value32() {
                let windows: Vec<Window> = values.collect();
                if !windows.is_empty() {
                    return windows;
                }
            }
        }
    }

    conn.conn()
        .query_tree(root)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
        .map(|tree| tree.children)
        .unwrap_or_default()
}

fn is_shareable(conn: &X11Connection, window: Window) -> bool {
    if window == 0 || window == conn.root() {
        return false;
    }
    let Some(attributes) = conn
        .conn()
        .get_window_attributes(window)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
    else {
        return false;
    };
    if attributes.map_state != MapState::VIEWABLE {
        return false;
    }
    let Some(geometry) = conn
        .conn()
        .get_geometry(window)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
    else {
        return false;
    };
    if geometry.width < MIN_SHARE_WIDTH || geometry.height < MIN_SHARE_HEIGHT {
        return false;
    }

    let Some(wm_state) = conn.existing_atom("WM_STATE") else {
        return false;
    };
    conn.conn()
        .get_property(false, window, wm_state, wm_state, 0, 2)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
        .is_some_and(|reply| reply.type_ != u32::from(AtomEnum::NONE))
}

/// `_NET_WM_NAME` first, `WM_NAME` otherwise.
fn window_title(conn: &X11Connection, window: Window) -> String {
    let net_title = match (conn.existing_atom("_NET_WM_NAME"), conn.existing_atom("UTF8_STRING")) {
        (Some(net_wm_name), Some(_)) => read_string_property(conn, window, net_wm_name),
        _ => None,
    };
    net_title
        .or_else(|| read_string_property(conn, window, AtomEnum::WM_NAME.into()))
        .unwrap_or_default()
}

fn window_geometry(conn: &X11Connection, window: Window) -> Option<Rect> {
    let geometry = conn.conn().get_geometry(window).ok()?.reply().ok()?;
    let origin = conn
        .conn()
        .translate_coordinates(window, conn.root(), 0, 0)
        .ok()?
        .reply()
        .ok()?;
    Some(Rect::make_xywh(
        i32::from(origin.dst_x),
        i32::from(origin.dst_y),
        i32::from(geometry.width),
        i32::from(geometry.height),
    ))
}

pub fn enumerate_windows() -> Vec<WindowInfo> {
    let Ok(conn) = X11Connection::open() else {
        return Vec::new();
    };

    client_windows(&conn)
        .into_iter()
        .filter(|&window| is_shareable(&conn, window))
        .filter_map(|window| {
            let title = window_title(&conn, window);
            if title.is_empty() {
                return None;
            }
            Some(WindowInfo {
                id: SourceId(u64::from(window)),
                title,
                geometry: window_geometry(&conn, window)?,
            })
        })
        .collect()
}

pub fn is_window_valid(id: SourceId) -> bool {
    let (Some(window), Ok(conn)) = (window_of(id), X11Connection::open()) else {
        return false;
    };
    conn.conn()
        .get_window_attributes(window)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
        .is_some()
}

/// Unmapped, or flagged `_NET_WM_STATE_HIDDEN` by the window manager.
pub fn is_window_minimized(id: SourceId) -> bool {
    let (Some(window), Ok(conn)) = (window_of(id), X11Connection::open()) else {
        return false;
    };
    let Some(attributes) = conn
        .conn()
        .get_window_attributes(window)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
    else {
        return false;
    };
    if attributes.map_state != MapState::VIEWABLE {
        return true;
    }

    let (Some(wm_state), Some(hidden)) = (
        conn.existing_atom("_NET_WM_STATE"),
        conn.existing_atom("_NET_WM_STATE_HIDDEN"),
    ) else {
        return false;
    };
    conn.conn()
        .get_property(false, window, wm_state, AtomEnum::ATOM, 0, 16)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
        .and_then(|reply| reply.value32().map(|mut atoms| atoms.any(|atom| atom == hidden)))
        .unwrap_or(false)
}

/// Asks the window manager to activate the window via `_NET_ACTIVE_WINDOW`.
pub fn bring_window_to_foreground(id: SourceId) -> bool {
    let (Some(window), Ok(conn)) = (window_of(id), X11Connection::open()) else {
        return false;
    };
    let Some(net_active) = conn.atom("_NET_ACTIVE_WINDOW") else {
        return false;
    };

    // source indication 1 (application), timestamp CurrentTime
    let event = ClientMessageEvent::new(32, window, net_active, [1u32, 0, 0, 0, 0]);
    let sent = conn.conn().send_event(
        false,
        conn.root(),
        EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
        event,
    );
    sent.is_ok() && conn.conn().flush().is_ok()
}

/// X11 has no capture exclusion.
pub fn exclude_from_capture(_id: SourceId) -> bool {
    false
}

/// `GetImage` of the window at its current size.
pub fn capture_window(id: SourceId) -> Result<BasicFrame, CaptureError> {
    let window = window_of(id).ok_or(CaptureError::SourceUnavailable)?;
    let conn = X11Connection::open()?;
    let geometry = conn
        .conn()
        .get_geometry(window)
        .map_err(x11_error("X11 GetGeometry"))?
        .reply()
        .map_err(|_| CaptureError::SourceUnavailable)?;
    conn.capture_drawable(window, geometry.width, geometry.height)
}

/// `GetImage` of the root window at the default screen size.
pub fn capture_root_screen() -> Result<BasicFrame, CaptureError> {
    let conn = X11Connection::open()?;
    let screen = conn.screen();
    let (width, height) = (screen.width_in_pixels, screen.height_in_pixels);
    conn.capture_drawable(conn.root(), width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_window_is_rejected() {
        assert!(!is_window_valid(SourceId::NONE));
        assert!(!is_window_minimized(SourceId::NONE));
        assert!(!bring_window_to_foreground(SourceId::NONE));
        assert!(!exclude_from_capture(SourceId(42)));
        assert_eq!(capture_window(SourceId::NONE), Err(CaptureError::SourceUnavailable));
    }

    #[test]
    fn test_ids_wider_than_xid_are_rejected() {
        assert_eq!(window_of(SourceId(u64::from(u32::MAX) + 1)), None);
        assert_eq!(window_of(SourceId(0x0240_0007)), Some(0x0240_0007));
    }
}
