//! Math types.
//!
//! Positions only. Orientation and transforms belong to the scene collaborator.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Builds a vector from an `[x, y, z]` triple as stored in level files.
    pub const fn from_array(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Same vector with the vertical component replaced.
    pub fn with_y(self, y: f32) -> Self {
        Self::new(self.x, y, self.z)
    }

}

impl From<[f32; 3]> for Vec3 {
    fn from(v: [f32; 3]) -> Self {
        Self::from_array(v)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_scales_then_adds() {
        let from = Vec3::new(1.0, 2.0, 3.0);
        let to = from.add(Vec3::new(2.0, 0.0, -4.0).scale(0.5));
        assert_eq!(to, Vec3::new(2.0, 2.0, 1.0));
        assert_eq!(to.sub(from), Vec3::new(1.0, 0.0, -2.0));
    }

    #[test]
    fn with_y_keeps_horizontal_components() {
        let v = Vec3::new(3.0, 0.5, -1.0).with_y(2.0);
        assert_eq!(v, Vec3::new(3.0, 2.0, -1.0));
    }
}
