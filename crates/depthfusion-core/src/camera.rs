//! The seam between depthfusion and physical depth cameras.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CameraFault;

/// Stable identifier of an attached camera.
///
/// Ids are handed out by the [`SlotRegistry`](crate::SlotRegistry) and are
/// never reused within one registry, even after a camera detaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CameraId(pub u32);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Depth range mode of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthRange {
    /// Standard range.
    #[default]
    Default,
    /// Near range, for objects closer to the sensor.
    Near,
}

/// Maps a pixel of the depth image to a pixel of the color image.
///
/// Coordinates are in sensor space (before any mirroring). The returned
/// color coordinate may lie outside the color frame.
pub trait CoordinateMapping: Send + Sync {
    /// Returns the color pixel `(cx, cy)` seen by depth pixel `(x, y)`.
    fn depth_to_color(&self, x: u32, y: u32) -> (i32, i32);
}

impl<F> CoordinateMapping for F
where
    F: Fn(u32, u32) -> (i32, i32) + Send + Sync,
{
    fn depth_to_color(&self, x: u32, y: u32) -> (i32, i32) {
        self(x, y)
    }
}

/// Control surface of a physical depth camera.
///
/// Frames do not flow through this trait; they are pushed into the
/// controller by whoever owns the device callbacks.
pub trait DepthCamera: Send {
    /// Human readable identifier, e.g. the USB connection id.
    fn connection_id(&self) -> &str;

    /// Enables or disables the infrared emitter.
    fn set_emitter_enabled(&mut self, enabled: bool) -> Result<(), CameraFault>;

    /// Switches the depth range.
    fn set_range(&mut self, range: DepthRange) -> Result<(), CameraFault>;

    /// Returns the depth-to-color coordinate mapping of this device.
    fn coordinate_mapping(&self) -> Arc<dyn CoordinateMapping>;
}
