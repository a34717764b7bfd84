//! Source orientation and directivity frame rotations.
//!
//! Yaw is measured in degrees east of true north (0 = north, 90 = east),
//! pitch in degrees above the horizon, roll about the longitudinal axis. For
//! line sources the frame is rotated by the segment direction, so yaw 0
//! points along the segment.

use glam::DVec3;

/// Orientation of an emission frame.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Orientation {
    /// Degrees east of true north, normalised to `[0, 360)`.
    pub yaw: f64,
    /// Degrees above the horizon, clamped to `[-90, 90]`.
    pub pitch: f64,
    /// Degrees about the longitudinal axis, normalised to `[0, 360)`.
    pub roll: f64,
}

impl Default for Orientation {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
        }
    }
}

impl Orientation {
    /// Create an orientation, normalising the angle ranges.
    #[must_use]
    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self {
            yaw: (360.0 + yaw % 360.0) % 360.0,
            pitch: pitch.clamp(-90.0, 90.0),
            roll: (360.0 + roll % 360.0) % 360.0,
        }
    }

    /// Orientation whose forward axis points along `direction`
    /// (scene frame: x east, y north, z up; `direction` need not be unit
    /// length in the horizontal plane but `z` is taken as the sine of the
    /// pitch).
    #[must_use]
    pub fn from_vector(direction: DVec3, roll: f64) -> Self {
        let yaw = direction.x.atan2(direction.y).to_degrees();
        let pitch = direction.z.clamp(-1.0, 1.0).asin().to_degrees();
        Self::new(yaw, pitch, roll)
    }

    /// Rotate a scene-frame vector into (or out of) this frame.
    ///
    /// `inverse = false` maps the frame's forward axis `(0, 1, 0)` to the
    /// oriented direction; `inverse = true` applies the transpose, expressing
    /// a scene vector in frame coordinates.
    #[must_use]
    pub fn rotate(&self, vector: DVec3, inverse: bool) -> DVec3 {
        // The rotation operates in a north-forward basis: swap x/y going in
        // and coming out so yaw 0 is north and yaw 90 east.
        let b = DVec3::new(vector.y, vector.x, vector.z);
        let yaw = self.yaw.to_radians();
        let pitch = self.pitch.to_radians();
        let roll = self.roll.to_radians();
        let (s1, c1) = yaw.sin_cos();
        let (s2, c2) = (-pitch).sin_cos();
        let (s3, c3) = roll.sin_cos();
        // Z-Y-X intrinsic rotation matrix, rows.
        let r0 = DVec3::new(c1 * c2, c1 * s2 * s3 - s1 * c3, c1 * s2 * c3 + s1 * s3);
        let r1 = DVec3::new(s1 * c2, s1 * s2 * s3 + c1 * c3, s1 * s2 * c3 - c1 * s3);
        let r2 = DVec3::new(-s2, c2 * s3, c2 * c3);
        let out = if inverse {
            // Transpose: columns become rows.
            DVec3::new(
                DVec3::new(r0.x, r1.x, r2.x).dot(b),
                DVec3::new(r0.y, r1.y, r2.y).dot(b),
                DVec3::new(r0.z, r1.z, r2.z).dot(b),
            )
        } else {
            DVec3::new(r0.dot(b), r1.dot(b), r2.dot(b))
        };
        DVec3::new(out.y, out.x, out.z)
    }

    /// Forward axis of this frame in scene coordinates.
    #[must_use]
    pub fn forward(&self) -> DVec3 {
        self.rotate(DVec3::new(0.0, 1.0, 0.0), false)
    }
}
