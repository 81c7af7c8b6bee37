//! Integer screen geometry in logical pixels.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    /// Top-left at which a box of `inner` size is centered inside `self`.
    ///
    /// `origin + (outer - inner) / 2` with floor division, so an inner box
    /// larger than `self` lands up-left of the origin.
    pub fn centered_origin(&self, inner: Size) -> Point {
        Point::new(
            self.origin.x + (self.size.width - inner.width).div_euclid(2),
            self.origin.y + (self.size.height - inner.height).div_euclid(2),
        )
    }
}

/// Clamp one requested dimension into `[min, max]`.
///
/// `max` is applied first and `min` last, so an inconsistent pair with
/// `min > max` resolves to `min`.
pub fn clamp_dimension(requested: i32, min: Option<i32>, max: Option<i32>) -> i32 {
    let mut value = requested;
    if let Some(max) = max {
        value = value.min(max);
    }
    if let Some(min) = min {
        value = value.max(min);
    }
    value
}
