//! Error types for depthfusion-rs.

use thiserror::Error;

use crate::camera::CameraId;

/// A fault reported by a physical depth camera.
///
/// Camera faults never abort a reconstruction; the slot that raised one is
/// excluded from integration and the fault is surfaced as a status message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraFault {
    /// The device was unplugged or stopped responding.
    #[error("camera disconnected")]
    Disconnected,

    /// The device does not support the near depth range.
    #[error("near mode is not supported by this camera")]
    NearModeUnsupported,

    /// The device is in use by another process.
    #[error("camera is busy")]
    DeviceBusy,

    /// Any other device-reported failure.
    #[error("camera error: {0}")]
    Other(String),
}

/// Reasons the volume backend can refuse to create a reconstruction volume.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VolumeCreationError {
    /// The requested volume does not fit in the device memory budget.
    #[error("volume needs {required} bytes but only {budget} bytes are available")]
    InsufficientMemory { required: u64, budget: u64 },

    /// The requested voxel resolution or density is not supported.
    #[error("unsupported volume resolution {x}x{y}x{z} at {voxels_per_meter} voxels/m")]
    UnsupportedResolution {
        voxels_per_meter: f32,
        x: u32,
        y: u32,
        z: u32,
    },

    /// No compute device capable of running the reconstruction was found.
    #[error("reconstruction backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Failure of an operation on an existing volume.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("volume backend error: {0}")]
pub struct BackendError(pub String);

/// The main error type for depthfusion-rs operations.
#[derive(Error, Debug)]
pub enum FusionError {
    /// No camera is attached under the given id.
    #[error("camera {0} not found")]
    CameraNotFound(CameraId),

    /// The configured maximum number of cameras is already attached.
    #[error("camera limit of {0} reached")]
    CameraLimitReached(usize),

    /// A camera reported a fault.
    #[error("camera {camera}: {fault}")]
    CameraFault { camera: CameraId, fault: CameraFault },

    /// The reconstruction volume could not be created.
    #[error(transparent)]
    VolumeCreation(#[from] VolumeCreationError),

    /// Resetting the reconstruction failed.
    #[error("reset failed: {0}")]
    Reset(String),

    /// Mesh extraction failed.
    #[error("mesh extraction failed: {0}")]
    MeshExtraction(String),

    /// An operation needed a volume but none exists.
    #[error("no reconstruction volume exists")]
    NoVolume,

    /// A backend operation failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A depth clip range with `min` not below `max`.
    #[error("invalid depth clip range {min}..{max}")]
    InvalidDepthClip { min: f32, max: f32 },

    /// Data size mismatch.
    #[error("data size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The volume coordinator thread is no longer running.
    #[error("volume coordinator stopped")]
    CoordinatorStopped,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for depthfusion-rs operations.
pub type Result<T> = std::result::Result<T, FusionError>;
