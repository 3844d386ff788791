//! Core abstractions for depthfusion-rs.
//!
//! This crate provides the hardware-independent building blocks of the
//! multi-camera fusion pipeline:
//! - [`DepthCamera`] trait, the seam to physical depth cameras
//! - [`CameraSlot`] and [`SlotRegistry`] holding per-camera state and frames
//! - [`map_color_to_depth`] for reprojecting color into depth space
//! - [`ReconstructionSession`], the pure sequencing state machine
//! - Configuration options and the error taxonomy

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Options structs legitimately have many boolean flags
#![allow(clippy::struct_excessive_bools)]
// Accessors and transitions return values that are often used inline
#![allow(clippy::must_use_candidate)]
// Image sizes are u32 while buffers index with usize
#![allow(clippy::cast_possible_truncation)]

pub mod calibration;
pub mod camera;
pub mod camera_slot;
pub mod color_mapper;
pub mod error;
pub mod frame;
pub mod options;
pub mod registry;
pub mod session;

pub use calibration::CameraCalibration;
pub use camera::{CameraId, CoordinateMapping, DepthCamera, DepthRange};
pub use camera_slot::{CameraSlot, FrameReady, SlotSettings};
pub use color_mapper::{map_color_to_depth, ColorMappingJob};
pub use error::{BackendError, CameraFault, FusionError, Result, VolumeCreationError};
pub use frame::{ColorImage, DepthFloatImage, DepthFrame};
pub use options::{FusionOptions, VolumeParameters};
pub use registry::SlotRegistry;
pub use session::{EmitterPlan, FrameDecision, ReconstructionSession, SessionState, Step};

// Re-export glam types for convenience
pub use glam::{Mat4, Quat, UVec3, Vec3};
