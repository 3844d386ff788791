//! Notifications flowing from the controller up to the UI layer.

use depthfusion_core::{CameraId, ColorImage};
use depthfusion_volume::PointCloud;

/// An image ready for display.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewImage {
    /// Grey-ramp visualization of a camera's depth.
    Depth {
        /// Camera the depth came from.
        camera: CameraId,
        /// The visualization.
        image: ColorImage,
    },
    /// Raycast of the reconstruction.
    ShadedSurface {
        /// Shaded, normals, or color image.
        image: ColorImage,
        /// The sampled surface.
        point_cloud: PointCloud,
    },
}

/// Events emitted by [`FusionController`](crate::FusionController).
#[derive(Debug, Clone, PartialEq)]
pub enum FusionEvent {
    /// Text for the status bar.
    StatusMessage(String),
    /// A preview image is ready.
    FramePreviewReady(PreviewImage),
    /// Every camera has been visited.
    ReconstructionDone,
    /// The volume could not be created.
    VolumeCreationFailed(String),
}
