// Region tracking helpers
//
// Austin Shafer - 2020

use serde::{Deserialize, Serialize};

use std::cmp::PartialOrd;
use std::ops::Add;

/// A rectangular region
///
/// This is used to track viewports and scissors. It is determined
/// by the corners of a rectangle:
///   r_pos:  the upper left corner's position on the surface
///   r_size: the distance from the left to the lower right
#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(C)]
pub struct Rect<T: PartialOrd + Copy + Add + Add<Output = T>> {
    pub r_pos: (T, T),
    pub r_size: (T, T),
}

impl<T: PartialOrd + Copy + Add + Add<Output = T>> Rect<T> {
    pub fn new(x: T, y: T, width: T, height: T) -> Rect<T> {
        Rect {
            r_pos: (x, y),
            r_size: (width, height),
        }
    }

    /// Checks if the point (x,y) is contained within this
    /// Rectangle.
    pub fn intersects(&self, x: T, y: T) -> bool {
        x >= self.r_pos.0
            && y >= self.r_pos.1
            && x < self.r_pos.0 + self.r_size.0
            && y < self.r_pos.1 + self.r_size.1
    }
}

impl Rect<f32> {
    /// The left or right half of this rect
    pub fn horizontal_half(&self, right: bool) -> Rect<f32> {
        let width = self.r_size.0 / 2.0;
        let x = match right {
            true => self.r_pos.0 + width,
            false => self.r_pos.0,
        };
        Rect::new(x, self.r_pos.1, width, self.r_size.1)
    }

    /// The top or bottom half of this rect
    pub fn vertical_half(&self, bottom: bool) -> Rect<f32> {
        let height = self.r_size.1 / 2.0;
        let y = match bottom {
            true => self.r_pos.1 + height,
            false => self.r_pos.1,
        };
        Rect::new(self.r_pos.0, y, self.r_size.0, height)
    }
}
