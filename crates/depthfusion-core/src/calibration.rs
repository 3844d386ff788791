//! Extrinsic calibration of a statically mounted camera.
//!
//! Each camera is placed on a sphere around the reconstruction origin: it is
//! rotated by three axis angles and pushed back along its forward (+Z) axis by
//! the axis distance.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Rotation angles (degrees) and axis distance (meters) of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    /// Rotation about the X axis in degrees.
    pub angle_x: f32,
    /// Rotation about the Y axis in degrees.
    pub angle_y: f32,
    /// Rotation about the Z axis in degrees.
    pub angle_z: f32,
    /// Distance from the origin along the camera's forward axis, in meters.
    pub axis_distance: f32,
}

impl Default for CameraCalibration {
    fn default() -> Self {
        Self {
            angle_x: 0.0,
            angle_y: 0.0,
            angle_z: 0.0,
            axis_distance: 0.5,
        }
    }
}

impl CameraCalibration {
    /// Creates a calibration from angles in degrees and an axis distance.
    #[must_use]
    pub fn new(angle_x: f32, angle_y: f32, angle_z: f32, axis_distance: f32) -> Self {
        Self {
            angle_x,
            angle_y,
            angle_z,
            axis_distance,
        }
    }

    /// Returns the rotation `qx * qy * qz`.
    #[must_use]
    pub fn rotation(&self) -> Quat {
        if self.angle_x == 0.0 && self.angle_y == 0.0 && self.angle_z == 0.0 {
            return Quat::IDENTITY;
        }
        let qx = Quat::from_axis_angle(Vec3::X, self.angle_x.to_radians());
        let qy = Quat::from_axis_angle(Vec3::Y, self.angle_y.to_radians());
        let qz = Quat::from_axis_angle(Vec3::Z, self.angle_z.to_radians());
        qx * qy * qz
    }

    /// Returns the translation applied after the rotation.
    #[must_use]
    pub fn translation(&self) -> Vec3 {
        Vec3::new(0.0, 0.0, self.axis_distance)
    }

    /// Returns the world-to-camera transform.
    #[must_use]
    pub fn world_to_camera(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation(), self.translation())
    }

    /// Returns the camera-to-world transform.
    #[must_use]
    pub fn camera_to_world(&self) -> Mat4 {
        self.world_to_camera().inverse()
    }

    /// Returns the camera position in world space.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.camera_to_world().transform_point3(Vec3::ZERO)
    }
}
