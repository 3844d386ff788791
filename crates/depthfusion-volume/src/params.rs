//! Volume resolution rules and device memory limits.

use depthfusion_core::{VolumeCreationError, VolumeParameters};

/// Smallest accepted voxel count along an axis.
pub const MIN_VOXELS_PER_AXIS: u32 = 32;
/// Largest accepted voxel count along an axis.
pub const MAX_VOXELS_PER_AXIS: u32 = 640;
/// Every axis must be a multiple of this.
pub const VOXEL_AXIS_STEP: u32 = 32;
/// Smallest accepted density.
pub const MIN_VOXELS_PER_METER: f32 = 128.0;
/// Largest accepted density.
pub const MAX_VOXELS_PER_METER: f32 = 768.0;
/// Bytes per voxel: one depth volume plus one color volume.
pub const BYTES_PER_VOXEL: u64 = 8;

const GIB: u64 = 1024 * 1024 * 1024;

/// Compute device the volume lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Dedicated device memory in bytes.
    pub memory_bytes: u64,
    /// Whether the host process is 32-bit.
    pub host_32bit: bool,
}

impl DeviceInfo {
    /// A device with `memory_bytes` of memory on the current host.
    pub fn new(memory_bytes: u64) -> Self {
        Self {
            memory_bytes,
            host_32bit: cfg!(target_pointer_width = "32"),
        }
    }

    /// Largest voxel counts per axis the device can hold.
    pub fn axis_limits(&self) -> (u32, u32, u32) {
        let max = MAX_VOXELS_PER_AXIS;
        if self.memory_bytes <= GIB {
            let y = if self.host_32bit { 384 } else { 512 };
            (512, y, 512)
        } else if self.memory_bytes <= 2 * GIB && self.host_32bit {
            (max, 512, max)
        } else {
            (max, max, max)
        }
    }
}

/// Estimated device memory of a volume in bytes.
pub fn estimated_memory(params: &VolumeParameters) -> u64 {
    params.voxel_count() * BYTES_PER_VOXEL
}

/// Checks the resolution rules that hold for every device.
pub fn validate(params: &VolumeParameters) -> Result<(), VolumeCreationError> {
    let axis_ok = |n: u32| {
        (MIN_VOXELS_PER_AXIS..=MAX_VOXELS_PER_AXIS).contains(&n) && n % VOXEL_AXIS_STEP == 0
    };
    let density_ok = (MIN_VOXELS_PER_METER..=MAX_VOXELS_PER_METER).contains(&params.voxels_per_meter);

    if density_ok && axis_ok(params.voxels_x) && axis_ok(params.voxels_y) && axis_ok(params.voxels_z) {
        Ok(())
    } else {
        Err(unsupported(params))
    }
}

/// Checks the resolution rules and the limits of `device`.
pub fn validate_for_device(
    params: &VolumeParameters,
    device: &DeviceInfo,
) -> Result<(), VolumeCreationError> {
    validate(params)?;

    let (max_x, max_y, max_z) = device.axis_limits();
    if params.voxels_x > max_x || params.voxels_y > max_y || params.voxels_z > max_z {
        return Err(unsupported(params));
    }

    let required = estimated_memory(params);
    if required > device.memory_bytes {
        return Err(VolumeCreationError::InsufficientMemory {
            required,
            budget: device.memory_bytes,
        });
    }
    Ok(())
}

fn unsupported(params: &VolumeParameters) -> VolumeCreationError {
    VolumeCreationError::UnsupportedResolution {
        voxels_per_meter: params.voxels_per_meter,
        x: params.voxels_x,
        y: params.voxels_y,
        z: params.voxels_z,
    }
}
