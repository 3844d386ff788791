//! depthfusion-rs: multi-camera volumetric depth fusion.
//!
//! Several structured-light depth cameras looking at the same scene
//! interfere with each other while their emitters are on. depthfusion
//! visits the cameras one at a time: every emitter but one is switched
//! off, a lead-in of frames is discarded while the projection settles,
//! and then a fixed number of frames is fused into a shared truncated
//! signed distance volume.
//!
//! # Quick Start
//!
//! ```no_run
//! use depthfusion::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let backend = RecordingBackend::new();
//!     let mut controller = FusionController::new(Box::new(backend), FusionOptions::default())?;
//!
//!     let (camera, _monitor) = SyntheticCamera::new("synthetic-0");
//!     let id = controller.attach_camera(Box::new(camera), SlotSettings::default())?;
//!
//!     controller.reconstruct()?;
//!     for timestamp in 0..64 {
//!         controller.on_depth_frame(id, &wall_depth_frame(640, 480, 1500, timestamp))?;
//!         controller.sync()?;
//!         controller.tick()?;
//!     }
//!
//!     let mesh = controller.export_mesh(1)?;
//!     println!("{} triangles", mesh.num_triangles());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`FusionController`]: the operator-facing command and event surface
//! - [`SequencingScheduler`]: runs the [`ReconstructionSession`] state
//!   machine against the attached cameras
//! - [`VolumeCoordinator`]: a worker thread owning the volume
//! - [`RenderRequestCoordinator`]: decides when to raycast a preview
//! - [`StatusBar`] and [`FpsCounter`]: throttled status text

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Accessors are often used inline
#![allow(clippy::must_use_candidate)]
#![allow(clippy::new_without_default)]
// Pixel counts and frame numbers are converted to f32 for display
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod controller;
pub mod events;
pub mod render;
pub mod scheduler;
pub mod status;
pub mod synthetic;

pub use controller::{CameraFrame, FrameSink, FusionController};
pub use events::{FusionEvent, PreviewImage};
pub use render::{RenderRequestCoordinator, VirtualCamera};
pub use scheduler::{apply_emitters, Progress, SequencingScheduler};
pub use status::{FpsCounter, StatusBar, MAX_PENDING_STATUS};
pub use synthetic::{wall_depth_frame, CameraMonitor, SyntheticCamera};

pub use depthfusion_core::{
    map_color_to_depth, BackendError, CameraCalibration, CameraFault, CameraId, CameraSlot,
    ColorImage, ColorMappingJob, CoordinateMapping, DepthCamera, DepthFloatImage, DepthFrame,
    DepthRange, EmitterPlan, FrameDecision, FrameReady, FusionError, FusionOptions,
    ReconstructionSession, Result, SessionState, SlotRegistry, SlotSettings, VolumeCreationError,
    VolumeParameters,
};
pub use depthfusion_volume::{
    BackendCall, DeviceInfo, IntegrateOutcome, Mesh, PointCloud, RaycastFrame, RaycastMode,
    ReconstructionVolume, RecordingBackend, RecordingLog, VolumeBackend, VolumeCoordinator,
    VolumeStatus,
};

// Re-export glam types for convenience
pub use glam::{Mat4, Quat, Vec3};

/// Initializes logging from `RUST_LOG`.
///
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
