//! Frame buffer model.
//!
//! Every backend normalizes its output to tightly packed RGBA rows
//! (`BYTES_PER_PIXEL` bytes per pixel). `BasicFrame` owns its pixels; the
//! `Frame` trait is the read-only view used for copying between frames.

use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;

use crate::geometry::{Rect, Size, Vector};

pub const BYTES_PER_PIXEL: usize = 4;

/// DPI reported when the platform does not tell us better.
pub const DEFAULT_DPI: Vector = Vector::new(96, 96);

/// Read access to one captured RGBA image.
pub trait Frame {
    fn size(&self) -> Size;

    /// Bytes per row. Always at least `width * BYTES_PER_PIXEL`.
    fn stride(&self) -> usize;

    fn data(&self) -> &[u8];

    fn dpi(&self) -> Vector;

    /// Capture timestamp in microseconds.
    fn capture_time_us(&self) -> i64;

    /// Region that changed relative to the previous frame.
    fn updated_region(&self) -> Rect;

    fn width(&self) -> i32 {
        self.size().width
    }

    fn height(&self) -> i32 {
        self.size().height
    }

    /// Pixels of row `y`, without the stride padding.
    fn row(&self, y: i32) -> &[u8] {
        let start = y as usize * self.stride();
        &self.data()[start..start + self.width() as usize * BYTES_PER_PIXEL]
    }

    fn pixel_offset(&self, pos: Vector) -> usize {
        pos.y as usize * self.stride() + pos.x as usize * BYTES_PER_PIXEL
    }
}

/// Owning frame backed by a `Vec<u8>` of `stride * height` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicFrame {
    size: Size,
    stride: usize,
    data: Vec<u8>,
    dpi: Vector,
    capture_time_us: i64,
    updated_region: Rect,
}

impl BasicFrame {
    /// Allocates a zeroed frame. Negative dimensions are clamped to zero.
    pub fn new(size: Size) -> Self {
        let size = Size::new(size.width.max(0), size.height.max(0));
        let stride = size.width as usize * BYTES_PER_PIXEL;
        Self {
            size,
            stride,
            data: vec![0u8; stride * size.height as usize],
            dpi: DEFAULT_DPI,
            capture_time_us: 0,
            updated_region: Rect::make_size(size),
        }
    }

    /// Deep copy of `other`, pixels and metadata included.
    pub fn copy_of(other: &dyn Frame) -> Self {
        let mut frame = Self::new(other.size());
        let row_bytes = frame.stride;
        if row_bytes > 0 {
            for (y, dst) in frame.data.chunks_exact_mut(row_bytes).enumerate() {
                dst.copy_from_slice(other.row(y as i32));
            }
        }
        frame.dpi = other.dpi();
        frame.capture_time_us = other.capture_time_us();
        frame.updated_region = other.updated_region();
        frame
    }

    /// Builds an RGBA frame from BGRA rows with `src_stride` bytes per row.
    ///
    /// Returns `None` when `src` is too short for the requested size.
    pub fn from_bgra(size: Size, src: &[u8], src_stride: usize) -> Option<Self> {
        let mut frame = Self::new(size);
        if !frame.fill_from_bgra(src, src_stride) {
            return None;
        }
        frame.capture_time_us = now_us();
        Some(frame)
    }

    /// Builds a frame from RGBA rows with `src_stride` bytes per row.
    pub fn from_rgba(size: Size, src: &[u8], src_stride: usize) -> Option<Self> {
        let mut frame = Self::new(size);
        let row_bytes = frame.stride;
        if !source_fits(src, src_stride, row_bytes, frame.size.height) {
            return None;
        }
        if row_bytes > 0 {
            frame
                .data
                .par_chunks_mut(row_bytes)
                .enumerate()
                .for_each(|(y, dst)| {
                    let start = y * src_stride;
                    dst.copy_from_slice(&src[start..start + row_bytes]);
                });
        }
        frame.capture_time_us = now_us();
        Some(frame)
    }

    /// Swaps BGRA source rows into this frame's RGBA rows, one row per task.
    pub fn fill_from_bgra(&mut self, src: &[u8], src_stride: usize) -> bool {
        let row_bytes = self.stride;
        if !source_fits(src, src_stride, row_bytes, self.size.height) {
            return false;
        }
        if row_bytes == 0 {
            return true;
        }

        self.data
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, dst)| {
                let start = y * src_stride;
                let src_row = &src[start..start + row_bytes];
                for (d, s) in dst
                    .chunks_exact_mut(BYTES_PER_PIXEL)
                    .zip(src_row.chunks_exact(BYTES_PER_PIXEL))
                {
                    d[0] = s[2];
                    d[1] = s[1];
                    d[2] = s[0];
                    d[3] = s[3];
                }
            });
        true
    }

    /// Copies the `dest_rect`-sized block of `src` starting at `src_pos` into
    /// this frame at `dest_rect`'s origin.
    ///
    /// Returns `false` without touching any pixel when either rectangle falls
    /// outside its frame.
    pub fn copy_pixels_from(&mut self, src: &dyn Frame, src_pos: Vector, dest_rect: Rect) -> bool {
        if dest_rect.is_empty() {
            return false;
        }
        if !Rect::make_size(self.size).contains_rect(&dest_rect) {
            return false;
        }
        let src_bounds = Rect::make_size(src.size());
        if !src_bounds.contains(src_pos) {
            return false;
        }
        let src_rect = Rect::make_origin_size(src_pos, dest_rect.size());
        if !src_bounds.contains_rect(&src_rect) {
            return false;
        }

        let row_bytes = dest_rect.width() as usize * BYTES_PER_PIXEL;
        let src_data = src.data();
        for row in 0..dest_rect.height() {
            let src_offset = src.pixel_offset(Vector::new(src_pos.x, src_pos.y + row));
            let dst_offset =
                self.pixel_offset(Vector::new(dest_rect.left(), dest_rect.top() + row));
            self.data[dst_offset..dst_offset + row_bytes]
                .copy_from_slice(&src_data[src_offset..src_offset + row_bytes]);
        }
        true
    }

    /// Packed RGBA copy without stride padding.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size.width.max(0) as usize * self.size.height.max(0) as usize * BYTES_PER_PIXEL);
        for y in 0..self.size.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn row_mut(&mut self, y: i32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let len = self.size.width as usize * BYTES_PER_PIXEL;
        &mut self.data[start..start + len]
    }

    pub fn set_dpi(&mut self, dpi: Vector) {
        self.dpi = dpi;
    }

    pub fn set_capture_time_us(&mut self, time_us: i64) {
        self.capture_time_us = time_us;
    }

    pub fn set_updated_region(&mut self, region: Rect) {
        self.updated_region = region;
    }
}

impl Frame for BasicFrame {
    fn size(&self) -> Size {
        self.size
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn dpi(&self) -> Vector {
        self.dpi
    }

    fn capture_time_us(&self) -> i64 {
        self.capture_time_us
    }

    fn updated_region(&self) -> Rect {
        self.updated_region
    }
}

/// Swizzles BGRA rows from `src` into `frame`, stamping the capture time.
pub fn convert_bgra_to_rgba(src: &[u8], src_stride: usize, frame: &mut BasicFrame) -> bool {
    if !frame.fill_from_bgra(src, src_stride) {
        return false;
    }
    frame.set_capture_time_us(now_us());
    true
}

/// Wall-clock timestamp in microseconds, used for `capture_time_us`.
pub fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

fn source_fits(src: &[u8], src_stride: usize, row_bytes: usize, height: i32) -> bool {
    if height <= 0 || row_bytes == 0 {
        return true;
    }
    if src_stride < row_bytes {
        return false;
    }
    let needed = (height as usize - 1) * src_stride + row_bytes;
    src.len() >= needed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned(size: Size) -> BasicFrame {
        let mut frame = BasicFrame::new(size);
        for (i, byte) in frame.data_mut().iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        frame
    }

    #[test]
    fn test_new_frame_layout() {
        let frame = BasicFrame::new(Size::new(7, 3));
        assert_eq!(frame.stride(), 28);
        assert_eq!(frame.data().len(), 84);
        assert_eq!(frame.updated_region(), Rect::make_xywh(0, 0, 7, 3));
        assert_eq!(frame.dpi(), DEFAULT_DPI);
    }

    #[test]
    fn test_copy_of_preserves_everything() {
        let mut original = patterned(Size::new(5, 4));
        original.set_dpi(Vector::new(144, 144));
        original.set_capture_time_us(123_456);
        original.set_updated_region(Rect::make_xywh(1, 1, 2, 2));

        let copy = BasicFrame::copy_of(&original);
        assert_eq!(copy.size(), original.size());
        assert_eq!(copy.capture_time_us(), 123_456);
        assert_eq!(copy.dpi(), Vector::new(144, 144));
        assert_eq!(copy.updated_region(), Rect::make_xywh(1, 1, 2, 2));
        assert_eq!(copy.data(), original.data());
    }

    #[test]
    fn test_copy_pixels_from_region() {
        let src = patterned(Size::new(8, 8));
        let mut dst = BasicFrame::new(Size::new(6, 6));

        let dest_rect = Rect::make_xywh(1, 2, 3, 2);
        assert!(dst.copy_pixels_from(&src, Vector::new(4, 5), dest_rect));

        for row in 0..2 {
            for col in 0..3 {
                let s = src.pixel_offset(Vector::new(4 + col, 5 + row));
                let d = dst.pixel_offset(Vector::new(1 + col, 2 + row));
                assert_eq!(&dst.data()[d..d + 4], &src.data()[s..s + 4]);
            }
        }
        // Outside the destination rect stays zeroed.
        assert_eq!(&dst.data()[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_pixels_from_rejects_out_of_bounds() {
        let src = patterned(Size::new(4, 4));
        let mut dst = BasicFrame::new(Size::new(4, 4));
        assert!(!dst.copy_pixels_from(&src, Vector::new(2, 2), Rect::make_xywh(0, 0, 3, 3)));
        assert!(!dst.copy_pixels_from(&src, Vector::new(0, 0), Rect::make_xywh(2, 2, 3, 3)));
        assert!(dst.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_copy_pixels_from_rejects_extreme_offsets() {
        let src = patterned(Size::new(4, 4));
        let mut dst = BasicFrame::new(Size::new(4, 4));
        let block = Rect::make_xywh(0, 0, 3, 3);
        assert!(!dst.copy_pixels_from(&src, Vector::new(i32::MAX - 1, 0), block));
        assert!(!dst.copy_pixels_from(&src, Vector::new(0, i32::MAX), block));
        assert!(!dst.copy_pixels_from(&src, Vector::new(i32::MIN, -1), block));
        assert!(dst.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_bgra_swaps_channels_with_padding() {
        // Two pixels per row, 12-byte stride (4 bytes padding).
        let src = [
            1, 2, 3, 4, 5, 6, 7, 8, 0xEE, 0xEE, 0xEE, 0xEE, //
            9, 10, 11, 12, 13, 14, 15, 16, 0xEE, 0xEE, 0xEE, 0xEE,
        ];
        let frame = BasicFrame::from_bgra(Size::new(2, 2), &src, 12).unwrap();
        assert_eq!(
            frame.to_vec(),
            vec![3, 2, 1, 4, 7, 6, 5, 8, 11, 10, 9, 12, 15, 14, 13, 16]
        );
        assert!(frame.capture_time_us() > 0);
    }

    #[test]
    fn test_from_bgra_rejects_short_source() {
        let src = [0u8; 10];
        assert!(BasicFrame::from_bgra(Size::new(2, 2), &src, 8).is_none());
        assert!(BasicFrame::from_bgra(Size::new(2, 1), &[0u8; 8], 4).is_none());
    }

    #[test]
    fn test_to_vec_strips_nothing_for_packed_frames() {
        let frame = patterned(Size::new(3, 2));
        assert_eq!(frame.to_vec(), frame.data().to_vec());
    }
}
