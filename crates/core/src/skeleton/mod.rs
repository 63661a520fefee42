//! Joint layout shared by pose tables, playback and editing.
//!
//! Every frame stores exactly [`JOINT_COUNT`] positions. The position of a
//! joint inside a frame is fixed by [`JOINT_NAMES`]; externally produced
//! pose tables use the same ordering, so the table must not be reordered.

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

pub const JOINT_COUNT: usize = 24;

/// Coordinates per joint in a pose table row.
pub const AXES: usize = 3;

/// Canonical joint names, indexed by their slot in a frame.
pub const JOINT_NAMES: [&str; JOINT_COUNT] = [
    "hip",
    "rThighBend",
    "lThighBend",
    "abdomenUpper",
    "rShin",
    "lShin",
    "spine",
    "rFoot",
    "lFoot",
    "spine2",
    "rToe",
    "lToe",
    "neck",
    "rMid1",
    "lMid1",
    "head",
    "rShldrBend",
    "lShldrBend",
    "rForearmBend",
    "lForearmBend",
    "rHand",
    "lHand",
    "rThumb2",
    "lThumb2",
];

/// One sampled instant of all joint positions.
pub type Frame = [Vec3; JOINT_COUNT];

/// Looks up the frame slot for a canonical joint name.
pub fn joint_index(name: &str) -> Option<usize> {
    JOINT_NAMES.iter().position(|candidate| *candidate == name)
}

pub fn joint_name(index: usize) -> Option<&'static str> {
    JOINT_NAMES.get(index).copied()
}

/// 3D position of a joint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    /// Multiplies each axis by the matching axis of `factors`.
    pub fn scale_by(self, factors: Vec3) -> Self {
        Self {
            x: self.x * factors.x,
            y: self.y * factors.y,
            z: self.z * factors.z,
        }
    }

    pub fn distance(self, other: Self) -> f32 {
        let d = self - other;
        (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl From<(f32, f32, f32)> for Vec3 {
    fn from((x, y, z): (f32, f32, f32)) -> Self {
        Self::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_table_matches_pose_table_layout() {
        assert_eq!(joint_index("hip"), Some(0));
        assert_eq!(joint_index("rThighBend"), Some(1));
        assert_eq!(joint_index("lThighBend"), Some(2));
        assert_eq!(joint_index("lShin"), Some(5));
        assert_eq!(joint_index("head"), Some(15));
        assert_eq!(joint_index("lThumb2"), Some(23));
        assert_eq!(joint_index("tail"), None);
    }

    #[test]
    fn names_and_indices_round_trip() {
        for (index, name) in JOINT_NAMES.iter().enumerate() {
            assert_eq!(joint_index(name), Some(index));
            assert_eq!(joint_name(index), Some(*name));
        }
        assert_eq!(joint_name(JOINT_COUNT), None);
    }

    #[test]
    fn lerp_hits_endpoints_and_midpoint() {
        let a = Vec3::new(0.0, 2.0, -4.0);
        let b = Vec3::new(10.0, 2.0, 4.0);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(a.lerp(b, 0.5), Vec3::new(5.0, 2.0, 0.0));
    }
}
