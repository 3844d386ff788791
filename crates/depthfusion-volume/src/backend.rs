//! The volume backend seam.
//!
//! The integrate, raycast, and meshing math lives behind these traits. A
//! backend hands out [`ReconstructionVolume`]s; dropping a volume releases
//! its device resources.

use depthfusion_core::{
    BackendError, ColorImage, DepthFloatImage, Mat4, Vec3, VolumeCreationError, VolumeParameters,
};

/// Creates reconstruction volumes on a compute device.
pub trait VolumeBackend: Send {
    /// Creates a volume. On failure nothing is allocated.
    fn create_volume(
        &mut self,
        params: &VolumeParameters,
    ) -> Result<Box<dyn ReconstructionVolume>, VolumeCreationError>;
}

/// What a raycast should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaycastMode {
    /// Lambert-shaded surface.
    #[default]
    Shaded,
    /// Surface normals as colors.
    Normals,
    /// Integrated color.
    Color,
}

/// One allocated reconstruction volume.
pub trait ReconstructionVolume: Send {
    /// Parameters the volume was created with.
    fn parameters(&self) -> VolumeParameters;

    /// Clears all accumulated voxel data.
    fn reset(&mut self, world_to_volume: Mat4) -> Result<(), BackendError>;

    /// Fuses one depth frame seen from `world_to_camera`.
    fn integrate_depth(
        &mut self,
        depth: &DepthFloatImage,
        max_weight: u16,
        world_to_camera: Mat4,
    ) -> Result<(), BackendError>;

    /// Fuses one depth frame and its color, already mapped into depth space.
    fn integrate_depth_and_color(
        &mut self,
        depth: &DepthFloatImage,
        color: &ColorImage,
        max_weight: u16,
        world_to_camera: Mat4,
    ) -> Result<(), BackendError>;

    /// Raycasts the volume from `world_to_camera` into a `width` x `height` frame.
    fn calculate_point_cloud(
        &mut self,
        world_to_camera: Mat4,
        mode: RaycastMode,
        width: u32,
        height: u32,
    ) -> Result<RaycastFrame, BackendError>;

    /// Extracts a triangle mesh. `decimation` of 1 keeps full resolution.
    fn extract_mesh(&mut self, decimation: u32) -> Result<Mesh, BackendError>;
}

/// A raycast point cloud in camera space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Surface position per pixel, `Vec3::ZERO` where the ray missed.
    pub points: Vec<Vec3>,
    /// Surface normal per pixel.
    pub normals: Vec<Vec3>,
}

/// Output of a raycast.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaycastFrame {
    /// Sampled surface.
    pub point_cloud: PointCloud,
    /// Rendered preview image for the requested [`RaycastMode`].
    pub image: ColorImage,
}

/// Triangle mesh snapshot of a volume.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// Vertex positions in world meters.
    pub vertices: Vec<Vec3>,
    /// Per-vertex normals.
    pub normals: Vec<Vec3>,
    /// Per-vertex packed colors, when color was integrated.
    pub colors: Vec<u32>,
    /// Triangle indices (every 3 consecutive indices form a triangle).
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Returns the number of triangles in the mesh.
    #[must_use]
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    /// Returns true if the mesh has no triangles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
