//! Geometric value types shared by every `armcore` crate.
//!
//! All linear quantities are in millimetres in the robot base frame; all
//! angular quantities are in degrees.

use serde::{Deserialize, Serialize};

/// Cartesian axis of the robot base frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// End-effector orientation as roll / pitch / yaw, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Orientation {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }

    /// Component-wise linear interpolation.  Adequate for the small angular
    /// differences between consecutive waypoints.
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self {
            roll: self.roll + t * (other.roll - self.roll),
            pitch: self.pitch + t * (other.pitch - self.pitch),
            yaw: self.yaw + t * (other.yaw - self.yaw),
        }
    }
}

/// An immutable end-effector pose: position in millimetres plus an optional
/// orientation.
///
/// # Example
///
/// ```
/// use armcore_types::Pose;
///
/// let a = Pose::new(0.0, 0.0, 200.0);
/// let b = Pose::new(300.0, 400.0, 200.0);
/// assert!((a.distance_to(&b) - 500.0).abs() < 1e-9);
/// assert_eq!(a.lerp(&b, 0.5), Pose::new(150.0, 200.0, 200.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
}

impl Pose {
    /// A position-only pose.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            orientation: None,
        }
    }

    pub fn with_orientation(self, orientation: Orientation) -> Self {
        Self {
            orientation: Some(orientation),
            ..self
        }
    }

    /// The same pose at a different height.
    pub fn with_z(self, z: f64) -> Self {
        Self { z, ..self }
    }

    /// Coordinate along `axis`.
    pub fn coord(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Euclidean distance between the two positions (orientation ignored).
    pub fn distance_to(&self, other: &Pose) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Straight-line interpolation at parameter `t` in `[0, 1]`.
    ///
    /// Orientation is interpolated only when both ends carry one; otherwise
    /// whichever side has an orientation is kept.
    pub fn lerp(&self, other: &Pose, t: f64) -> Pose {
        let orientation = match (self.orientation, other.orientation) {
            (Some(a), Some(b)) => Some(a.lerp(b, t)),
            (a, b) => b.or(a),
        };
        Pose {
            x: self.x + t * (other.x - self.x),
            y: self.y + t * (other.y - self.y),
            z: self.z + t * (other.z - self.z),
            orientation,
        }
    }

    /// `true` when every coordinate is a finite number.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A point in camera pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelCoord {
    pub x: f64,
    pub y: f64,
}

impl PixelCoord {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An object detection supplied by the vision layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub pixel_x: i32,
    pub pixel_y: i32,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn pixel(&self) -> PixelCoord {
        PixelCoord::new(f64::from(self.pixel_x), f64::from(self.pixel_y))
    }

    /// `true` when the confidence is a number inside `[0, 1]`.
    pub fn has_valid_confidence(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lerp_endpoints_are_exact() {
        let a = Pose::new(1.0, 2.0, 3.0);
        let b = Pose::new(-4.0, 8.0, 100.0);
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
    }

    #[test]
    fn lerp_interpolates_orientation_when_both_present() {
        let a = Pose::new(0.0, 0.0, 0.0).with_orientation(Orientation::new(0.0, 0.0, 0.0));
        let b = Pose::new(0.0, 0.0, 0.0).with_orientation(Orientation::new(0.0, 0.0, 90.0));
        let mid = a.lerp(&b, 0.5);
        assert!((mid.orientation.unwrap().yaw - 45.0).abs() < 1e-9);
    }

    #[test]
    fn lerp_keeps_single_sided_orientation() {
        let a = Pose::new(0.0, 0.0, 0.0);
        let b = a.with_orientation(Orientation::new(10.0, 0.0, 0.0));
        assert_eq!(a.lerp(&b, 0.3).orientation, b.orientation);
        assert_eq!(b.lerp(&a, 0.3).orientation, b.orientation);
    }

    #[test]
    fn pose_without_orientation_omits_field_in_json() {
        let json = serde_json::to_string(&Pose::new(1.0, 2.0, 3.0)).unwrap();
        assert!(!json.contains("orientation"));
        let back: Pose = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Pose::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn detection_confidence_range() {
        let mut d = Detection {
            label: "cube".into(),
            pixel_x: 320,
            pixel_y: 240,
            confidence: 0.9,
        };
        assert!(d.has_valid_confidence());
        assert_eq!(d.pixel(), PixelCoord::new(320.0, 240.0));
        d.confidence = 1.5;
        assert!(!d.has_valid_confidence());
        d.confidence = f32::NAN;
        assert!(!d.has_valid_confidence());
    }

    #[test]
    fn non_finite_pose_detected() {
        assert!(Pose::new(0.0, 0.0, 0.0).is_finite());
        assert!(!Pose::new(f64::NAN, 0.0, 0.0).is_finite());
    }
}
