//! Integer geometry primitives shared by frames and backends.

use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A 2D integer point, also used for DPI pairs and offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vector {
    pub x: i32,
    pub y: i32,
}

impl Vector {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, other: Vector) -> Vector {
        Vector::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, other: Vector) -> Vector {
        Vector::new(self.x - other.x, self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Axis-aligned rectangle stored as left/top (inclusive) and right/bottom (exclusive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl Rect {
    /// Right and bottom saturate at the `i32` range.
    pub const fn make_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            left: x,
            top: y,
            right: x.saturating_add(width),
            bottom: y.saturating_add(height),
        }
    }

    pub const fn make_ltrb(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn make_size(size: Size) -> Self {
        Self::make_xywh(0, 0, size.width, size.height)
    }

    pub const fn make_origin_size(origin: Vector, size: Size) -> Self {
        Self::make_xywh(origin.x, origin.y, size.width, size.height)
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn top(&self) -> i32 {
        self.top
    }

    pub fn right(&self) -> i32 {
        self.right
    }

    pub fn bottom(&self) -> i32 {
        self.bottom
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn top_left(&self) -> Vector {
        Vector::new(self.left, self.top)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub fn contains(&self, point: Vector) -> bool {
        point.x >= self.left && point.x < self.right && point.y >= self.top && point.y < self.bottom
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.top >= self.top
            && other.bottom <= self.bottom
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        self.left += dx;
        self.right += dx;
        self.top += dy;
        self.bottom += dy;
    }

    pub fn translated(&self, offset: Vector) -> Rect {
        let mut rect = *self;
        rect.translate(offset.x, offset.y);
        rect
    }

    /// Intersection of two rectangles. Disjoint inputs yield `Rect::default()`.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);

        if left >= right || top >= bottom {
            return Rect::default();
        }

        Rect::make_ltrb(left, top, right, bottom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_arithmetic() {
        let a = Vector::new(3, -2);
        let b = Vector::new(1, 5);
        assert_eq!(a + b, Vector::new(4, 3));
        assert_eq!(a - b, Vector::new(2, -7));
    }

    #[test]
    fn test_size_is_empty() {
        assert!(Size::new(0, 10).is_empty());
        assert!(Size::new(10, -1).is_empty());
        assert!(!Size::new(1, 1).is_empty());
    }

    #[test]
    fn test_make_xywh_dimensions() {
        let rect = Rect::make_xywh(10, 20, 300, 200);
        assert_eq!(rect.width(), 300);
        assert_eq!(rect.height(), 200);
        assert_eq!(rect.right(), 310);
        assert_eq!(rect.bottom(), 220);
        assert_eq!(rect.size(), Size::new(300, 200));
    }

    #[test]
    fn test_make_xywh_saturates() {
        let rect = Rect::make_xywh(i32::MAX - 1, 0, 3, 3);
        assert_eq!(rect.right(), i32::MAX);
        assert_eq!(rect.width(), 1);
    }

    #[test]
    fn test_intersect_is_commutative() {
        let cases = [
            (Rect::make_xywh(0, 0, 100, 100), Rect::make_xywh(50, 50, 100, 100)),
            (Rect::make_xywh(-20, 10, 40, 5), Rect::make_xywh(0, 0, 10, 100)),
            (Rect::make_xywh(0, 0, 10, 10), Rect::make_xywh(20, 20, 5, 5)),
        ];
        for (a, b) in cases {
            assert_eq!(a.intersect(&b), b.intersect(&a));
        }
    }

    #[test]
    fn test_intersect_with_self() {
        let rect = Rect::make_ltrb(-5, 3, 17, 40);
        assert_eq!(rect.intersect(&rect), rect);
    }

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = Rect::make_xywh(0, 0, 10, 10);
        let b = Rect::make_xywh(10, 0, 10, 10);
        let result = a.intersect(&b);
        assert!(result.is_empty());
        assert_eq!(result, Rect::default());
    }

    #[test]
    fn test_intersect_overlap() {
        let a = Rect::make_xywh(0, 0, 100, 100);
        let b = Rect::make_xywh(50, 60, 100, 100);
        assert_eq!(a.intersect(&b), Rect::make_ltrb(50, 60, 100, 100));
    }

    #[test]
    fn test_contains() {
        let rect = Rect::make_xywh(0, 0, 10, 10);
        assert!(rect.contains(Vector::new(0, 0)));
        assert!(rect.contains(Vector::new(9, 9)));
        assert!(!rect.contains(Vector::new(10, 5)));
        assert!(rect.contains_rect(&Rect::make_xywh(2, 2, 8, 8)));
        assert!(!rect.contains_rect(&Rect::make_xywh(2, 2, 9, 8)));
    }

    #[test]
    fn test_translate() {
        let mut rect = Rect::make_xywh(1, 2, 3, 4);
        rect.translate(10, -2);
        assert_eq!(rect, Rect::make_xywh(11, 0, 3, 4));
        assert_eq!(
            rect.translated(Vector::new(-11, 0)),
            Rect::make_origin_size(Vector::new(0, 0), Size::new(3, 4))
        );
    }
}
