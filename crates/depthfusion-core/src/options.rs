//! Configuration options for depthfusion.

use std::path::Path;
use std::time::Duration;

use glam::{Mat4, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Smallest accepted per-camera capture budget.
pub const MIN_FRAMES_PER_CAMERA: u32 = 1;
/// Largest accepted per-camera capture budget.
pub const MAX_FRAMES_PER_CAMERA: u32 = 200;
/// Smallest accepted integration weight.
pub const MIN_INTEGRATION_WEIGHT: u16 = 1;
/// Largest accepted integration weight.
pub const MAX_INTEGRATION_WEIGHT: u16 = 1000;

/// Resolution and density of the reconstruction volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeParameters {
    /// Voxels per meter along every axis.
    pub voxels_per_meter: f32,
    /// Voxel count along X.
    pub voxels_x: u32,
    /// Voxel count along Y.
    pub voxels_y: u32,
    /// Voxel count along Z.
    pub voxels_z: u32,
}

impl Default for VolumeParameters {
    fn default() -> Self {
        Self {
            voxels_per_meter: 256.0,
            voxels_x: 512,
            voxels_y: 384,
            voxels_z: 512,
        }
    }
}

impl VolumeParameters {
    /// Creates volume parameters.
    #[must_use]
    pub fn new(voxels_per_meter: f32, voxels_x: u32, voxels_y: u32, voxels_z: u32) -> Self {
        Self {
            voxels_per_meter,
            voxels_x,
            voxels_y,
            voxels_z,
        }
    }

    /// Voxel counts as a vector.
    #[must_use]
    pub fn resolution(&self) -> UVec3 {
        UVec3::new(self.voxels_x, self.voxels_y, self.voxels_z)
    }

    /// Total number of voxels.
    #[must_use]
    pub fn voxel_count(&self) -> u64 {
        u64::from(self.voxels_x) * u64::from(self.voxels_y) * u64::from(self.voxels_z)
    }

    /// Physical extent of the volume in meters.
    #[must_use]
    pub fn extent(&self) -> Vec3 {
        self.resolution().as_vec3() / self.voxels_per_meter
    }

    /// Transform from world meters to voxel coordinates.
    ///
    /// The world origin sits at the center of the volume.
    #[must_use]
    pub fn world_to_volume(&self) -> Mat4 {
        let half = (self.resolution() / 2).as_vec3();
        Mat4::from_translation(half) * Mat4::from_scale(Vec3::splat(self.voxels_per_meter))
    }
}

/// Global configuration options for depthfusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionOptions {
    /// Depth frames discarded after an emitter change before capture starts.
    pub lead_in_frames: u32,

    /// Frames integrated from each camera per reconstruction pass.
    pub frames_per_camera: u32,

    /// Cap on the accumulated confidence of a voxel.
    pub integration_weight: u16,

    /// Maximum number of simultaneously attached cameras.
    pub max_cameras: usize,

    /// Minimum spacing between displayed status messages, in milliseconds.
    pub status_throttle_ms: u64,

    /// Interval of the frame rate report, in milliseconds.
    pub fps_interval_ms: u64,

    /// Raycast from the active camera's pose during capture.
    pub use_camera_view_in_reconstruction: bool,

    /// Preview surface normals instead of the shaded surface.
    pub display_normals: bool,

    /// Reset the virtual camera to the first used camera's view.
    pub reset_to_first_camera_view: bool,

    /// Reconstruction volume parameters.
    pub volume: VolumeParameters,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            lead_in_frames: 30,
            frames_per_camera: 10,
            integration_weight: 200,
            max_cameras: 3,
            status_throttle_ms: 1000,
            fps_interval_ms: 5000,
            use_camera_view_in_reconstruction: false,
            display_normals: false,
            reset_to_first_camera_view: false,
            volume: VolumeParameters::default(),
        }
    }
}

impl FusionOptions {
    /// Parses options from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        Ok(options.clamped())
    }

    /// Serializes options to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads options from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Saves options to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Returns a copy with every bounded value clamped into range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.frames_per_camera = clamp_frames_per_camera(self.frames_per_camera);
        self.integration_weight = clamp_integration_weight(self.integration_weight);
        self
    }

    /// Status throttle window.
    #[must_use]
    pub fn status_throttle(&self) -> Duration {
        Duration::from_millis(self.status_throttle_ms)
    }

    /// Frame rate report interval.
    #[must_use]
    pub fn fps_interval(&self) -> Duration {
        Duration::from_millis(self.fps_interval_ms)
    }
}

/// Clamps a per-camera capture budget into the accepted range.
#[must_use]
pub fn clamp_frames_per_camera(frames: u32) -> u32 {
    frames.clamp(MIN_FRAMES_PER_CAMERA, MAX_FRAMES_PER_CAMERA)
}

/// Clamps an integration weight into the accepted range.
#[must_use]
pub fn clamp_integration_weight(weight: u16) -> u16 {
    weight.clamp(MIN_INTEGRATION_WEIGHT, MAX_INTEGRATION_WEIGHT)
}
