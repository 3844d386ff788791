//! Per-camera state: settings, calibration, and the latest frames.

use std::sync::Arc;

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::calibration::CameraCalibration;
use crate::camera::{CameraId, CoordinateMapping, DepthCamera, DepthRange};
use crate::color_mapper::ColorMappingJob;
use crate::error::{CameraFault, Result};
use crate::frame::{ColorImage, DepthFloatImage, DepthFrame};

/// Default near clip plane in meters.
pub const DEFAULT_MIN_DEPTH_CLIP: f32 = 0.35;
/// Default far clip plane in meters.
pub const DEFAULT_MAX_DEPTH_CLIP: f32 = 8.0;

/// Operator-controlled settings of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotSettings {
    /// Whether the camera contributes to the reconstruction.
    pub use_in_reconstruction: bool,
    /// Whether the near depth range is requested.
    pub near_mode: bool,
    /// Whether depth is mirrored left-right (color is mirrored otherwise).
    pub mirror_depth: bool,
    /// Whether color is integrated together with depth.
    pub capture_color: bool,
    /// Near clip plane in meters.
    pub min_depth_clip: f32,
    /// Far clip plane in meters.
    pub max_depth_clip: f32,
    /// Mounting calibration.
    pub calibration: CameraCalibration,
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            use_in_reconstruction: true,
            near_mode: true,
            mirror_depth: false,
            capture_color: false,
            min_depth_clip: DEFAULT_MIN_DEPTH_CLIP,
            max_depth_clip: DEFAULT_MAX_DEPTH_CLIP,
            calibration: CameraCalibration::default(),
        }
    }
}

impl SlotSettings {
    /// Parses settings from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes settings to JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Notification that a slot stored a new depth frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReady {
    /// The slot that received the frame.
    pub camera: CameraId,
    /// Device timestamp of the frame.
    pub timestamp: i64,
}

/// One attached depth camera and its buffered frames.
///
/// Dropping a slot turns the camera's emitter back on so a detached device
/// is left in its default state.
pub struct CameraSlot {
    id: CameraId,
    device: Box<dyn DepthCamera>,
    mapping: Arc<dyn CoordinateMapping>,
    settings: SlotSettings,
    world_to_camera: Mat4,

    depth: Option<DepthFloatImage>,
    depth_mirrored: bool,
    color: Option<ColorImage>,
    color_mirrored: bool,
    last_frame_timestamp: i64,

    emitter_enabled: bool,
}

impl CameraSlot {
    /// Wraps a device. The emitter is assumed on until told otherwise.
    pub fn new(id: CameraId, device: Box<dyn DepthCamera>, settings: SlotSettings) -> Self {
        let mapping = device.coordinate_mapping();
        Self {
            id,
            device,
            mapping,
            world_to_camera: settings.calibration.world_to_camera(),
            settings,
            depth: None,
            depth_mirrored: false,
            color: None,
            color_mirrored: false,
            last_frame_timestamp: 0,
            emitter_enabled: true,
        }
    }

    /// Returns the camera id.
    pub fn id(&self) -> CameraId {
        self.id
    }

    /// Returns the device connection id.
    pub fn connection_id(&self) -> &str {
        self.device.connection_id()
    }

    /// Returns the current settings.
    pub fn settings(&self) -> &SlotSettings {
        &self.settings
    }

    /// Whether this camera contributes to the reconstruction.
    pub fn use_in_reconstruction(&self) -> bool {
        self.settings.use_in_reconstruction
    }

    /// Whether color is captured for integration.
    pub fn capture_color(&self) -> bool {
        self.settings.capture_color
    }

    /// Whether depth is mirrored.
    pub fn mirror_depth(&self) -> bool {
        self.settings.mirror_depth
    }

    /// Returns the calibration.
    pub fn calibration(&self) -> CameraCalibration {
        self.settings.calibration
    }

    /// Returns the world-to-camera transform derived from the calibration.
    pub fn world_to_camera(&self) -> Mat4 {
        self.world_to_camera
    }

    /// Timestamp of the last stored depth frame.
    pub fn last_frame_timestamp(&self) -> i64 {
        self.last_frame_timestamp
    }

    /// Whether the emitter was last switched on.
    pub fn emitter_enabled(&self) -> bool {
        self.emitter_enabled
    }

    /// Latest depth image, if any.
    pub fn depth(&self) -> Option<&DepthFloatImage> {
        self.depth.as_ref()
    }

    /// Latest color image, if any, as stored (possibly mirrored).
    pub fn color(&self) -> Option<&ColorImage> {
        self.color.as_ref()
    }

    /// Replaces all settings, recomputing the calibration transform.
    pub fn apply_settings(&mut self, settings: SlotSettings) {
        self.settings = settings;
        self.world_to_camera = settings.calibration.world_to_camera();
    }

    /// Sets the mounting calibration and returns the new world-to-camera transform.
    pub fn set_calibration(
        &mut self,
        angle_x: f32,
        angle_y: f32,
        angle_z: f32,
        axis_distance: f32,
    ) -> Mat4 {
        self.settings.calibration = CameraCalibration::new(angle_x, angle_y, angle_z, axis_distance);
        self.world_to_camera = self.settings.calibration.world_to_camera();
        self.world_to_camera
    }

    /// Includes or excludes the camera from reconstruction.
    ///
    /// Work already issued for this camera is not cancelled.
    pub fn set_use_in_reconstruction(&mut self, use_camera: bool) {
        self.settings.use_in_reconstruction = use_camera;
    }

    /// Enables or disables color capture.
    pub fn set_capture_color(&mut self, capture_color: bool) {
        self.settings.capture_color = capture_color;
    }

    /// Selects whether depth or color is mirrored.
    pub fn set_mirror_depth(&mut self, mirror_depth: bool) {
        self.settings.mirror_depth = mirror_depth;
    }

    /// Sets the depth clip range. Returns false, leaving the range
    /// unchanged, if `min` is not below `max`.
    pub fn set_depth_clip(&mut self, min: f32, max: f32) -> bool {
        if !(min >= 0.0 && min < max) {
            return false;
        }
        self.settings.min_depth_clip = min;
        self.settings.max_depth_clip = max;
        true
    }

    /// Requests near mode and pushes the range to the device.
    pub fn set_near_mode(&mut self, near_mode: bool) -> std::result::Result<(), CameraFault> {
        self.settings.near_mode = near_mode;
        self.apply_depth_range()
    }

    /// Pushes the requested depth range to the device.
    ///
    /// If the device rejects near mode, near mode is switched off so the
    /// camera can be re-enabled later in the default range.
    pub fn apply_depth_range(&mut self) -> std::result::Result<(), CameraFault> {
        let range = if self.settings.near_mode {
            DepthRange::Near
        } else {
            DepthRange::Default
        };
        self.device.set_range(range).map_err(|fault| {
            if range == DepthRange::Near {
                self.settings.near_mode = false;
            }
            fault
        })
    }

    /// Switches the infrared emitter.
    pub fn set_emitter_enabled(&mut self, enabled: bool) -> std::result::Result<(), CameraFault> {
        self.device.set_emitter_enabled(enabled)?;
        self.emitter_enabled = enabled;
        Ok(())
    }

    /// Records a device fault. The camera stops contributing to the
    /// reconstruction until the operator re-enables it.
    pub fn handle_fault(&mut self, fault: &CameraFault) {
        log::warn!("camera {}: {fault}", self.id);
        if *fault == CameraFault::NearModeUnsupported {
            self.settings.near_mode = false;
        }
        self.settings.use_in_reconstruction = false;
    }

    /// Stores a depth frame in meters, clipped and mirrored per settings.
    pub fn on_depth_frame(&mut self, frame: &DepthFrame) -> FrameReady {
        let mirror = self.settings.mirror_depth;
        self.depth = Some(DepthFloatImage::from_raw(
            frame,
            self.settings.min_depth_clip,
            self.settings.max_depth_clip,
            mirror,
        ));
        self.depth_mirrored = mirror;
        self.last_frame_timestamp = frame.timestamp;

        FrameReady {
            camera: self.id,
            timestamp: frame.timestamp,
        }
    }

    /// Stores a color frame.
    ///
    /// Exactly one of depth and color is mirrored: when depth is not
    /// mirrored, the color frame is mirrored in place.
    pub fn on_color_frame(&mut self, mut frame: ColorImage) {
        let mirror_color = !self.settings.mirror_depth;
        if mirror_color {
            frame.mirror_horizontal();
        }
        self.color = Some(frame);
        self.color_mirrored = mirror_color;
    }

    /// Copies the latest depth image out of the slot.
    pub fn snapshot_depth(&self) -> Option<DepthFloatImage> {
        self.depth.clone()
    }

    /// Builds a color mapping job from copies of the latest frames.
    ///
    /// Returns `None` unless color capture is on and both frames exist.
    pub fn color_mapping_job(&self) -> Option<ColorMappingJob> {
        if !self.settings.capture_color {
            return None;
        }
        let depth = self.depth.as_ref()?;
        let color = self.color.as_ref()?;
        Some(ColorMappingJob {
            depth: depth.clone(),
            depth_mirrored: self.depth_mirrored,
            color: color.clone(),
            color_mirrored: self.color_mirrored,
            mapping: Arc::clone(&self.mapping),
        })
    }
}

impl Drop for CameraSlot {
    fn drop(&mut self) {
        if let Err(fault) = self.device.set_emitter_enabled(true) {
            log::warn!("camera {}: could not restore emitter on release: {fault}", self.id);
        }
    }
}

impl std::fmt::Debug for CameraSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSlot")
            .field("id", &self.id)
            .field("connection_id", &self.device.connection_id())
            .field("settings", &self.settings)
            .field("emitter_enabled", &self.emitter_enabled)
            .finish_non_exhaustive()
    }
}
