//! X11 capture through `x11rb`.
//!
//! Every public call opens its own connection and drops it on return. Images
//! are fetched with `GetImage` in ZPixmap format and decoded with the masks
//! of the drawable's visual.

pub mod capturer;
pub mod window_ops;

use std::env;
use std::fmt::Display;

use rayon::prelude::*;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ConnectionExt as _, Drawable, ImageFormat, ImageOrder, Screen, Visualid, Window,
};
use x11rb::rust_connection::RustConnection;

use crate::error::CaptureError;
use crate::frame::{now_us, BasicFrame, BYTES_PER_PIXEL};
use crate::geometry::Size;

pub use capturer::{X11ScreenCapturer, X11WindowCapturer};

// ============================================================================
// Session detection
// ============================================================================

fn session_is_x11(display: Option<&str>, session_type: Option<&str>) -> bool {
    match display {
        Some(display) if !display.is_empty() => {}
        _ => return false,
    }
    match session_type {
        None => true,
        Some(kind) => kind.is_empty() || kind.eq_ignore_ascii_case("x11"),
    }
}

/// `DISPLAY` is set and `XDG_SESSION_TYPE` is unset, empty or `x11`.
pub fn is_x11_session() -> bool {
    let display = env::var("DISPLAY").ok();
    let session_type = env::var("XDG_SESSION_TYPE").ok();
    session_is_x11(display.as_deref(), session_type.as_deref())
}

/// An X11 session whose display accepts connections.
pub fn is_screen_share_supported() -> bool {
    is_x11_session() && X11Connection::open().is_ok()
}

pub fn is_window_share_supported() -> bool {
    is_screen_share_supported()
}

// ============================================================================
// Connection
// ============================================================================

/// Maps an x11rb error to a temporary failure, keeping the detail in the log.
pub(crate) fn x11_error<E: Display>(context: &'static str) -> impl FnOnce(E) -> CaptureError {
    move |err| {
        log::debug!(context = context, err:display = err; "X11 request failed");
        CaptureError::Runtime(context)
    }
}

/// One connection to the default display, closed on drop.
pub(crate) struct X11Connection {
    conn: RustConnection,
    screen_num: usize,
}

impl X11Connection {
    pub(crate) fn open() -> Result<Self, CaptureError> {
        if !is_x11_session() {
            return Err(CaptureError::BackendUnavailable("not an X11 session"));
        }
        let (conn, screen_num) = x11rb::connect(None).map_err(x11_error("X11 connect"))?;
        Ok(Self { conn, screen_num })
    }

    pub(crate) fn conn(&self) -> &RustConnection {
        &self.conn
    }

    pub(crate) fn screen(&self) -> &Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    pub(crate) fn root(&self) -> Window {
        self.screen().root
    }

    /// Looks up an existing atom; `None` when the server has never seen it.
    pub(crate) fn existing_atom(&self, name: &str) -> Option<Atom> {
        let reply = self
            .conn
            .intern_atom(true, name.as_bytes())
            .ok()?
            .reply()
            .ok()?;
        (reply.atom != u32::from(AtomEnum::NONE)).then_some(reply.atom)
    }

    pub(crate) fn atom(&self, name: &str) -> Option<Atom> {
        Some(self.conn.intern_atom(false, name.as_bytes()).ok()?.reply().ok()?.atom)
    }

    fn layout_for(&self, depth: u8, visual: Visualid) -> Option<PixelLayout> {
        let setup = self.conn.setup();
        let format = setup.pixmap_formats.iter().find(|f| f.depth == depth)?;
        let screen = self.screen();
        let visual_id = if visual == 0 { screen.root_visual } else { visual };
        let visual = screen
            .allowed_depths
            .iter()
            .flat_map(|d| d.visuals.iter())
            .find(|v| v.visual_id == visual_id)?;

        Some(PixelLayout {
            bits_per_pixel: format.bits_per_pixel,
            scanline_pad: format.scanline_pad,
            lsb_first: setup.image_byte_order == ImageOrder::LSB_FIRST,
            masks: ChannelMasks {
                red: visual.red_mask,
                green: visual.green_mask,
                blue: visual.blue_mask,
            },
        })
    }

    /// Grabs `width` x `height` pixels of `drawable` from its origin.
    pub(crate) fn capture_drawable(&self, drawable: Drawable, width: u16, height: u16) -> Result<BasicFrame, CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::Runtime("X11 drawable has no area"));
        }
        let reply = self
            .conn
            .get_image(ImageFormat::Z_PIXMAP, drawable, 0, 0, width, height, !0)
            .map_err(x11_error("X11 GetImage"))?
            .reply()
            .map_err(x11_error("X11 GetImage"))?;

        let layout = self
            .layout_for(reply.depth, reply.visual)
            .ok_or(CaptureError::Runtime("X11 visual not found"))?;
        decode_image(&reply.data, Size::new(i32::from(width), i32::from(height)), &layout)
            .ok_or(CaptureError::Runtime("X11 image format unsupported"))
    }
}

// ============================================================================
// Pixel decoding
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelMasks {
    pub(crate) red: u32,
    pub(crate) green: u32,
    pub(crate) blue: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PixelLayout {
    pub(crate) bits_per_pixel: u8,
    pub(crate) scanline_pad: u8,
    pub(crate) lsb_first: bool,
    pub(crate) masks: ChannelMasks,
}

impl PixelLayout {
    fn stride(&self, width: usize) -> usize {
        let pad = usize::from(self.scanline_pad.max(8));
        let bits = width * usize::from(self.bits_per_pixel);
        bits.div_ceil(pad) * pad / 8
    }

    fn read_pixel(&self, bytes: &[u8]) -> u32 {
        let mut value = 0u32;
        if self.lsb_first {
            for (i, b) in bytes.iter().enumerate() {
                value |= u32::from(*b) << (8 * i);
            }
        } else {
            for b in bytes {
                value = (value << 8) | u32::from(*b);
            }
        }
        value
    }
}

/// Scales the bits selected by `mask` to 0..=255, rounding to nearest.
pub(crate) fn extract_channel(pixel: u32, mask: u32) -> u8 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let value = u64::from((pixel & mask) >> shift);
    let max = u64::from(mask >> shift);
    ((value * 255 + max / 2) / max) as u8
}

/// Decodes a ZPixmap image into RGBA with opaque alpha.
pub(crate) fn decode_image(data: &[u8], size: Size, layout: &PixelLayout) -> Option<BasicFrame> {
    let bytes_per_pixel = match layout.bits_per_pixel {
        16 => 2,
        24 => 3,
        32 => 4,
        _ => return None,
    };
    let width = size.width.max(0) as usize;
    let src_stride = layout.stride(width);
    if data.len() < src_stride * size.height.max(0) as usize {
        return None;
    }

    let mut frame = BasicFrame::new(size);
    let row_bytes = width * BYTES_PER_PIXEL;
    if row_bytes > 0 {
        let masks = layout.masks;
        frame
            .data_mut()
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, dst)| {
                let src_row = &data[y * src_stride..y * src_stride + width * bytes_per_pixel];
                for (d, s) in dst
                    .chunks_exact_mut(BYTES_PER_PIXEL)
                    .zip(src_row.chunks_exact(bytes_per_pixel))
                {
                    let pixel = layout.read_pixel(s);
                    d[0] = extract_channel(pixel, masks.red);
                    d[1] = extract_channel(pixel, masks.green);
                    d[2] = extract_channel(pixel, masks.blue);
                    d[3] = 255;
                }
            });
    }
    frame.set_capture_time_us(now_us());
    Some(frame)
}

/// Reads a text property, `None` when missing or empty.
pub(crate) fn read_string_property(conn: &X11Connection, window: Window, property: Atom) -> Option<String> {
    let reply = conn
        .conn()
        .get_property(false, window, property, AtomEnum::ANY, 0, 1024)
        .ok()?
        .reply()
        .ok()?;
    if reply.value.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&reply.value).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn test_session_detection() {
        assert!(session_is_x11(Some(":0"), None));
        assert!(session_is_x11(Some(":0"), Some("")));
        assert!(session_is_x11(Some(":0"), Some("X11")));
        assert!(!session_is_x11(Some(":0"), Some("wayland")));
        assert!(!session_is_x11(Some(""), Some("x11")));
        assert!(!session_is_x11(None, None));
    }

    #[test]
    fn test_extract_channel_565() {
        assert_eq!(extract_channel(0xF800, 0xF800), 255);
        assert_eq!(extract_channel(0x10 << 11, 0xF800), 132);
        assert_eq!(extract_channel(0x07E0, 0x07E0), 255);
        assert_eq!(extract_channel(32 << 5, 0x07E0), 130);
        assert_eq!(extract_channel(0x001F, 0x001F), 255);
        assert_eq!(extract_channel(0, 0x001F), 0);
    }

    #[test]
    fn test_extract_channel_888() {
        assert_eq!(extract_channel(0x00FF_0000, 0x00FF_0000), 255);
        assert_eq!(extract_channel(0x0080_0000, 0x00FF_0000), 128);
        assert_eq!(extract_channel(0x0000_4000, 0x0000_FF00), 64);
        assert_eq!(extract_channel(0x1234_5678, 0), 0);
    }

    #[test]
    fn test_decode_32bpp_lsb() {
        let layout = PixelLayout {
            bits_per_pixel: 32,
            scanline_pad: 32,
            lsb_first: true,
            masks: ChannelMasks {
                red: 0x00FF_0000,
                green: 0x0000_FF00,
                blue: 0x0000_00FF,
            },
        };
        let data = [0x00, 0x80, 0xFF, 0x00, 0x10, 0x20, 0x30, 0x00];
        let frame = decode_image(&data, Size::new(2, 1), &layout).unwrap();
        assert_eq!(frame.row(0), &[0xFF, 0x80, 0x00, 0xFF, 0x30, 0x20, 0x10, 0xFF]);
    }

    #[test]
    fn test_decode_16bpp_padded_rows() {
        let layout = PixelLayout {
            bits_per_pixel: 16,
            scanline_pad: 32,
            lsb_first: true,
            masks: ChannelMasks {
                red: 0xF800,
                green: 0x07E0,
                blue: 0x001F,
            },
        };
        // one pixel per row, rows padded to four bytes
        let data = [0x00, 0xF8, 0xAA, 0xAA, 0x1F, 0x00, 0xAA, 0xAA];
        let frame = decode_image(&data, Size::new(1, 2), &layout).unwrap();
        assert_eq!(frame.row(0), &[255, 0, 0, 255]);
        assert_eq!(frame.row(1), &[0, 0, 255, 255]);
        assert!(decode_image(&data[..6], Size::new(1, 2), &layout).is_none());
    }
}
