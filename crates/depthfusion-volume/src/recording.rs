//! A headless backend that records every call.
//!
//! It enforces the same resolution rules and memory budget as a real
//! device and produces simple synthetic raycasts and meshes, which is
//! enough to drive the pipeline without reconstruction hardware.

use std::sync::Arc;

use parking_lot::Mutex;

use depthfusion_core::{
    BackendError, ColorImage, DepthFloatImage, Mat4, Vec3, VolumeCreationError, VolumeParameters,
};

use crate::backend::{Mesh, PointCloud, RaycastFrame, RaycastMode, ReconstructionVolume, VolumeBackend};
use crate::params::{self, DeviceInfo};

/// Device memory the recording backend reports by default.
pub const DEFAULT_MEMORY_BUDGET: u64 = 4 * 1024 * 1024 * 1024;

const SHADED_PIXEL: u32 = 0x00C0_C0C0;
const NORMALS_PIXEL: u32 = 0x0080_80FF;
const COLOR_PIXEL: u32 = 0x00FF_8040;

/// One call into the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackendCall {
    /// A volume was created.
    CreateVolume(VolumeParameters),
    /// A volume was reset.
    Reset,
    /// A depth frame was integrated.
    IntegrateDepth,
    /// A depth and color frame was integrated.
    IntegrateDepthAndColor,
    /// A raycast was taken.
    CalculatePointCloud(RaycastMode),
    /// A mesh was extracted.
    ExtractMesh(u32),
    /// A volume was released.
    Release,
}

#[derive(Debug, Default)]
struct LogState {
    calls: Vec<BackendCall>,
    live_volumes: usize,
    busy: usize,
    max_busy: usize,
}

/// Shared view of the calls made into a [`RecordingBackend`].
#[derive(Debug, Clone, Default)]
pub struct RecordingLog {
    state: Arc<Mutex<LogState>>,
}

impl RecordingLog {
    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of volumes created and not yet released.
    pub fn live_volumes(&self) -> usize {
        self.state.lock().live_volumes
    }

    /// Largest number of volume operations ever seen running at once.
    pub fn max_concurrency(&self) -> usize {
        self.state.lock().max_busy
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, call: BackendCall) {
        self.state.lock().calls.push(call);
    }

    fn enter(&self, call: BackendCall) -> BusyGuard {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.busy += 1;
        state.max_busy = state.max_busy.max(state.busy);
        BusyGuard { log: self.clone() }
    }
}

struct BusyGuard {
    log: RecordingLog,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.log.state.lock().busy -= 1;
    }
}

/// Backend that validates parameters against a device and records calls.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    device: DeviceInfo,
    log: RecordingLog,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    /// Creates a backend with [`DEFAULT_MEMORY_BUDGET`].
    pub fn new() -> Self {
        Self::with_memory_budget(DEFAULT_MEMORY_BUDGET)
    }

    /// Creates a backend whose device has `memory_bytes` of memory.
    pub fn with_memory_budget(memory_bytes: u64) -> Self {
        Self::with_device(DeviceInfo::new(memory_bytes))
    }

    /// Creates a backend for `device`.
    pub fn with_device(device: DeviceInfo) -> Self {
        Self {
            device,
            log: RecordingLog::default(),
        }
    }

    /// Returns a handle to the call log.
    pub fn log(&self) -> RecordingLog {
        self.log.clone()
    }
}

impl VolumeBackend for RecordingBackend {
    fn create_volume(
        &mut self,
        params: &VolumeParameters,
    ) -> Result<Box<dyn ReconstructionVolume>, VolumeCreationError> {
        params::validate_for_device(params, &self.device)?;

        self.log.record(BackendCall::CreateVolume(*params));
        self.log.state.lock().live_volumes += 1;
        Ok(Box::new(RecordingVolume {
            params: *params,
            log: self.log.clone(),
            integrated: 0,
            color_integrated: false,
        }))
    }
}

struct RecordingVolume {
    params: VolumeParameters,
    log: RecordingLog,
    integrated: u64,
    color_integrated: bool,
}

impl RecordingVolume {
    fn check_depth(depth: &DepthFloatImage) -> Result<(), BackendError> {
        if depth.data.len() == depth.width as usize * depth.height as usize {
            Ok(())
        } else {
            Err(BackendError("depth buffer does not match its size".to_string()))
        }
    }
}

impl ReconstructionVolume for RecordingVolume {
    fn parameters(&self) -> VolumeParameters {
        self.params
    }

    fn reset(&mut self, _world_to_volume: Mat4) -> Result<(), BackendError> {
        let _busy = self.log.enter(BackendCall::Reset);
        self.integrated = 0;
        self.color_integrated = false;
        Ok(())
    }

    fn integrate_depth(
        &mut self,
        depth: &DepthFloatImage,
        _max_weight: u16,
        _world_to_camera: Mat4,
    ) -> Result<(), BackendError> {
        let _busy = self.log.enter(BackendCall::IntegrateDepth);
        Self::check_depth(depth)?;
        self.integrated += 1;
        Ok(())
    }

    fn integrate_depth_and_color(
        &mut self,
        depth: &DepthFloatImage,
        color: &ColorImage,
        _max_weight: u16,
        _world_to_camera: Mat4,
    ) -> Result<(), BackendError> {
        let _busy = self.log.enter(BackendCall::IntegrateDepthAndColor);
        Self::check_depth(depth)?;
        if color.width != depth.width || color.height != depth.height {
            return Err(BackendError("color is not in depth space".to_string()));
        }
        self.integrated += 1;
        self.color_integrated = true;
        Ok(())
    }

    fn calculate_point_cloud(
        &mut self,
        _world_to_camera: Mat4,
        mode: RaycastMode,
        width: u32,
        height: u32,
    ) -> Result<RaycastFrame, BackendError> {
        let _busy = self.log.enter(BackendCall::CalculatePointCloud(mode));
        let len = width as usize * height as usize;
        if self.integrated == 0 {
            return Ok(RaycastFrame {
                point_cloud: PointCloud {
                    width,
                    height,
                    points: vec![Vec3::ZERO; len],
                    normals: vec![Vec3::ZERO; len],
                },
                image: ColorImage::new(width, height),
            });
        }

        let pixel = match mode {
            RaycastMode::Shaded => SHADED_PIXEL,
            RaycastMode::Normals => NORMALS_PIXEL,
            RaycastMode::Color => COLOR_PIXEL,
        };
        Ok(RaycastFrame {
            point_cloud: PointCloud {
                width,
                height,
                points: vec![Vec3::Z; len],
                normals: vec![Vec3::NEG_Z; len],
            },
            image: ColorImage {
                width,
                height,
                pixels: vec![pixel; len],
            },
        })
    }

    fn extract_mesh(&mut self, decimation: u32) -> Result<Mesh, BackendError> {
        let _busy = self.log.enter(BackendCall::ExtractMesh(decimation));
        if decimation == 0 {
            return Err(BackendError("decimation must be at least 1".to_string()));
        }
        if self.integrated == 0 {
            return Ok(Mesh::default());
        }

        let mut mesh = bounding_box_mesh(self.params.extent() * 0.5);
        if self.color_integrated {
            mesh.colors = vec![0xFFFF_FFFF; mesh.vertices.len()];
        }
        Ok(mesh)
    }
}

impl Drop for RecordingVolume {
    fn drop(&mut self) {
        let mut state = self.log.state.lock();
        state.calls.push(BackendCall::Release);
        state.live_volumes -= 1;
    }
}

/// A closed box spanning `-half..half`.
fn bounding_box_mesh(half: Vec3) -> Mesh {
    let vertices: Vec<Vec3> = (0..8u32)
        .map(|i| {
            let sign = |bit: u32| if i & bit == 0 { -1.0 } else { 1.0 };
            Vec3::new(sign(1), sign(2), sign(4)) * half
        })
        .collect();
    let normals = vertices.iter().map(|v| v.normalize_or_zero()).collect();
    #[rustfmt::skip]
    let indices = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];
    Mesh {
        vertices,
        normals,
        colors: Vec::new(),
        indices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> VolumeParameters {
        VolumeParameters::new(256.0, 64, 64, 64)
    }

    #[test]
    fn test_budget_rejects_large_volume() {
        let mut backend = RecordingBackend::with_memory_budget(1024 * 1024);
        assert!(matches!(
            backend.create_volume(&VolumeParameters::default()),
            Err(VolumeCreationError::InsufficientMemory { .. })
        ));
        assert_eq!(backend.log().live_volumes(), 0);
        assert!(backend.log().calls().is_empty());
    }

    #[test]
    fn test_mesh_reflects_integration() {
        let mut backend = RecordingBackend::new();
        let mut volume = backend.create_volume(&small()).unwrap();
        assert!(volume.extract_mesh(1).unwrap().is_empty());

        let depth = DepthFloatImage::new(2, 2);
        volume.integrate_depth(&depth, 200, Mat4::IDENTITY).unwrap();
        let mesh = volume.extract_mesh(1).unwrap();
        assert_eq!(mesh.num_triangles(), 12);
        assert!(mesh.colors.is_empty());
        assert!(volume.extract_mesh(0).is_err());
    }

    #[test]
    fn test_raycast_modes() {
        let mut backend = RecordingBackend::new();
        let mut volume = backend.create_volume(&small()).unwrap();
        let depth = DepthFloatImage::new(2, 2);
        volume
            .integrate_depth_and_color(&depth, &ColorImage::new(2, 2), 200, Mat4::IDENTITY)
            .unwrap();
        let frame = volume
            .calculate_point_cloud(Mat4::IDENTITY, RaycastMode::Color, 3, 2)
            .unwrap();
        assert_eq!(frame.image.pixels, vec![COLOR_PIXEL; 6]);
        assert_eq!(frame.point_cloud.points.len(), 6);
    }

    #[test]
    fn test_drop_releases_volume() {
        let mut backend = RecordingBackend::new();
        let log = backend.log();
        let volume = backend.create_volume(&small()).unwrap();
        assert_eq!(log.live_volumes(), 1);
        drop(volume);
        assert_eq!(log.live_volumes(), 0);
        assert_eq!(log.calls().last(), Some(&BackendCall::Release));
    }
}
