use std::ops;

use libm::{atan2f, sqrtf};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

pub const PI: f32 = std::f32::consts::PI;
pub const TWO_PI: f32 = 2.0 * std::f32::consts::PI;
pub const HALF_PI: f32 = 0.5 * std::f32::consts::PI;
pub const RAD_TO_DEG: f32 = 180.0 / std::f32::consts::PI;
pub const DEG_TO_RAD: f32 = std::f32::consts::PI / 180.0;

/// Integer point in image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Point {
        Point { x, y }
    }

    pub fn distance_to(&self, p: &Point) -> f32 {
        let dx = (p.x - self.x) as f32;
        let dy = (p.y - self.y) as f32;
        sqrtf(dx * dx + dy * dy)
    }

    /// Angle of the vector from `self` to `p`, wrapped into `[0, 2*PI)`.
    pub fn angle_to(&self, p: &Point) -> f32 {
        atan2_angle((p.x - self.x) as f32, (p.y - self.y) as f32)
    }
}

impl ops::Add<Point> for Point {
    type Output = Point;

    fn add(self, p: Point) -> Point {
        Point {
            x: self.x + p.x,
            y: self.y + p.y,
        }
    }
}

impl ops::Sub<Point> for Point {
    type Output = Point;

    fn sub(self, p: Point) -> Point {
        Point {
            x: self.x - p.x,
            y: self.y - p.y,
        }
    }
}

/// Sub-pixel point used for averaged geometry such as orientation sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoublePoint {
    pub x: f32,
    pub y: f32,
}

impl DoublePoint {
    pub fn new(x: f32, y: f32) -> DoublePoint {
        DoublePoint { x, y }
    }
}

//
// --- Angle arithmetic on the circular domain ----------------------------------------------------
//
// Ridge directions live on `[0, 2*PI)`. Some comparisons are meaningful modulo
// 2*PI (minutia directions), some only modulo PI (ridge orientations), so both
// distances are provided.
//

/// Wrap an angle into `[0, 2*PI)`. A tiny negative input rounds back up to
/// `TWO_PI` after the wrap, so the upper bound needs an explicit clamp to
/// keep the range half-open.
#[inline]
pub fn normalize(angle: f32) -> f32 {
    let mut wrapped = angle % TWO_PI;
    if wrapped < 0.0 {
        wrapped += TWO_PI;
    }
    if wrapped >= TWO_PI {
        0.0
    } else {
        wrapped
    }
}

/// atan2 wrapped into `[0, 2*PI)`, with the same upper-bound clamp as
/// `normalize`.
#[inline]
pub fn atan2_angle(dx: f32, dy: f32) -> f32 {
    let mut angle = atan2f(dy, dx);
    if angle < 0.0 {
        angle += TWO_PI;
    }
    if angle >= TWO_PI {
        0.0
    } else {
        angle
    }
}

/// Wrap-aware difference `a - b`, result in `[0, 2*PI)`.
#[inline]
pub fn difference(a: f32, b: f32) -> f32 {
    normalize(a - b)
}

/// Shortest arc between two angles, in `[0, PI]`.
#[inline]
pub fn distance(a: f32, b: f32) -> f32 {
    let d = difference(a, b);
    if d <= PI {
        d
    } else {
        TWO_PI - d
    }
}

/// Distance between two ridge orientations, compared modulo PI. In `[0, PI/2]`.
#[inline]
pub fn orientation_distance(a: f32, b: f32) -> f32 {
    let d = distance(a, b);
    if d > HALF_PI {
        PI - d
    } else {
        d
    }
}

#[inline]
pub fn opposite(angle: f32) -> f32 {
    normalize(angle + PI)
}

#[inline]
pub fn complementary(angle: f32) -> f32 {
    normalize(TWO_PI - angle)
}

//
// --- Dense point field --------------------------------------------------------------------------
//

/// Dense width x height grid of 2-component vectors, e.g. a block orientation
/// field or sub-pixel offsets. Backing storage is a flat `(y, x, component)`
/// array, so memory is laid out as `2 * (y * width + x)`.
///
/// Dimensions are fixed at construction. Out-of-range access is a programming
/// error and panics; it is never a recoverable condition.
#[derive(Debug, Clone, PartialEq)]
pub struct PointField {
    array: Array3<f32>,
}

impl PointField {
    pub fn new(width: usize, height: usize) -> PointField {
        PointField {
            array: Array3::zeros((height, width, 2)),
        }
    }

    pub fn width(&self) -> usize {
        self.array.dim().1
    }

    pub fn height(&self) -> usize {
        self.array.dim().0
    }

    pub fn get(&self, x: usize, y: usize) -> DoublePoint {
        DoublePoint {
            x: self.array[[y, x, 0]],
            y: self.array[[y, x, 1]],
        }
    }

    pub fn set(&mut self, x: usize, y: usize, point: DoublePoint) {
        self.array[[y, x, 0]] = point.x;
        self.array[[y, x, 1]] = point.y;
    }

    pub fn add(&mut self, x: usize, y: usize, point: DoublePoint) {
        self.array[[y, x, 0]] += point.x;
        self.array[[y, x, 1]] += point.y;
    }
}

//
// --- Tests --------------------------------------------------------------------------------------
//
