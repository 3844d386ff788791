//! Reconstruction volume coordination for depthfusion-rs.
//!
//! - [`VolumeBackend`] / [`ReconstructionVolume`]: the seam to the
//!   integrate, raycast, and meshing implementation
//! - [`VolumeCoordinator`]: the worker thread serializing all volume access
//! - [`params`]: resolution rules and device memory limits
//! - [`RecordingBackend`]: a headless backend for tests and demos

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
// Buffer sizes are u32 dimensions multiplied out into usize
#![allow(clippy::cast_possible_truncation)]

pub mod backend;
pub mod coordinator;
pub mod params;
pub mod recording;

pub use backend::{Mesh, PointCloud, RaycastFrame, RaycastMode, ReconstructionVolume, VolumeBackend};
pub use coordinator::{
    IntegrateOutcome, IntegrateRequest, RaycastRequest, VolumeCompletion, VolumeCoordinator,
    VolumeStatus,
};
pub use params::DeviceInfo;
pub use recording::{BackendCall, RecordingBackend, RecordingLog};
