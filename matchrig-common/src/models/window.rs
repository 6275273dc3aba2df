// File: matchrig-common/src/models/window.rs

use std::fmt;
use serde::{Deserialize, Serialize};

/// Opaque reference to a top-level OS window. Never cached across a flow;
/// resolved fresh and re-validated against the owning process before use.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub const NULL: WindowHandle = WindowHandle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WindowHandle(0x{:x})", self.0)
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Screen-space bounding rectangle of a window, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl WindowRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Window-relative offset translated to absolute screen coordinates.
    pub fn to_screen(&self, x: i32, y: i32) -> (i32, i32) {
        (self.left + x, self.top + y)
    }
}

/// Snapshot of one enumerated window.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub pid: u32,
    pub title: String,
    pub rect: WindowRect,
}

/// Averaged pixel color from a sampled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_geometry() {
        let rect = WindowRect::new(100, 50, 483, 330);
        assert_eq!(rect.width(), 383);
        assert_eq!(rect.height(), 280);
        assert_eq!(rect.area(), 383 * 280);
        assert_eq!(rect.to_screen(10, 20), (110, 70));
    }

    #[test]
    fn degenerate_rect_has_zero_area() {
        let rect = WindowRect::new(10, 10, 5, 5);
        assert_eq!(rect.area(), 0);
    }
}
