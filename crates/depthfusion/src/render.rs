//! Deciding when, and from where, to raycast the volume for preview.

use depthfusion_core::{CameraCalibration, Mat4, SessionState, Vec3, VolumeParameters};
use depthfusion_volume::{RaycastMode, RaycastRequest};
use glam::Mat3;

/// Default raycast width in pixels.
pub const DEFAULT_RENDER_WIDTH: u32 = 640;
/// Default raycast height in pixels.
pub const DEFAULT_RENDER_HEIGHT: u32 = 480;

/// The free-moving preview camera.
///
/// Uses the depth camera convention: +X right, +Y up, looking down +Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualCamera {
    world_to_camera: Mat4,
}

impl VirtualCamera {
    /// A camera on the -Z axis at the depth of the volume, looking at the origin.
    pub fn for_volume(params: &VolumeParameters) -> Self {
        let distance = params.voxels_z as f32 / params.voxels_per_meter;
        Self {
            world_to_camera: Mat4::from_translation(Vec3::new(0.0, 0.0, distance)),
        }
    }

    /// A camera with the pose of a calibrated depth camera.
    pub fn from_calibration(calibration: &CameraCalibration) -> Self {
        Self {
            world_to_camera: calibration.world_to_camera(),
        }
    }

    /// A camera at `position` looking at `target`.
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let look = (target - position).normalize();
        let right = up.cross(look).normalize();
        let up = look.cross(right).normalize();
        let rotation = Mat3::from_cols(right, up, look).transpose();
        let translation = -(rotation * position);
        Self {
            world_to_camera: Mat4::from_cols(
                rotation.x_axis.extend(0.0),
                rotation.y_axis.extend(0.0),
                rotation.z_axis.extend(0.0),
                translation.extend(1.0),
            ),
        }
    }

    /// A camera with an explicit pose.
    pub fn from_world_to_camera(world_to_camera: Mat4) -> Self {
        Self { world_to_camera }
    }

    /// Returns the world-to-camera transform.
    pub fn world_to_camera(&self) -> Mat4 {
        self.world_to_camera
    }

    /// Returns the camera position in world space.
    pub fn position(&self) -> Vec3 {
        self.world_to_camera.inverse().transform_point3(Vec3::ZERO)
    }
}

/// Tracks the `view_changed` flag and the raycast in flight.
#[derive(Debug, Clone)]
pub struct RenderRequestCoordinator {
    virtual_camera: VirtualCamera,
    view_changed: bool,
    raycast_in_flight: bool,
    use_camera_view: bool,
    display_normals: bool,
    width: u32,
    height: u32,
}

impl RenderRequestCoordinator {
    /// Creates a coordinator around `virtual_camera`.
    pub fn new(virtual_camera: VirtualCamera) -> Self {
        Self {
            virtual_camera,
            view_changed: true,
            raycast_in_flight: false,
            use_camera_view: false,
            display_normals: false,
            width: DEFAULT_RENDER_WIDTH,
            height: DEFAULT_RENDER_HEIGHT,
        }
    }

    /// The virtual camera.
    pub fn virtual_camera(&self) -> &VirtualCamera {
        &self.virtual_camera
    }

    /// Moves the virtual camera.
    pub fn set_virtual_camera(&mut self, camera: VirtualCamera) {
        self.virtual_camera = camera;
        self.view_changed = true;
    }

    /// Requests a raycast on the next tick.
    pub fn mark_view_changed(&mut self) {
        self.view_changed = true;
    }

    /// Whether a raycast is pending for the next tick.
    pub fn view_changed(&self) -> bool {
        self.view_changed
    }

    /// Whether a raycast has been issued and not completed.
    pub fn raycast_in_flight(&self) -> bool {
        self.raycast_in_flight
    }

    /// Raycast from the active camera's pose during capture.
    pub fn set_use_camera_view(&mut self, use_camera_view: bool) {
        self.use_camera_view = use_camera_view;
    }

    /// Whether capture previews use the active camera's pose.
    pub fn use_camera_view(&self) -> bool {
        self.use_camera_view
    }

    /// Preview normals instead of the shaded surface.
    pub fn set_display_normals(&mut self, display_normals: bool) {
        self.display_normals = display_normals;
        self.view_changed = true;
    }

    /// Sets the raycast size, normally that of the depth frames.
    pub fn set_render_size(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.view_changed = true;
        }
    }

    /// Picks the raycast mode. Color wins when it has been integrated.
    pub fn raycast_mode(&self, color_available: bool) -> RaycastMode {
        if color_available {
            RaycastMode::Color
        } else if self.display_normals {
            RaycastMode::Normals
        } else {
            RaycastMode::Shaded
        }
    }

    /// Called on each render tick. Outside capture, returns a raycast from
    /// the virtual camera if the view changed.
    pub fn on_tick(
        &mut self,
        state: SessionState,
        generation: u64,
        color_available: bool,
    ) -> Option<RaycastRequest> {
        if matches!(state, SessionState::Capturing(_)) || !self.view_changed {
            return None;
        }
        let pose = self.virtual_camera.world_to_camera;
        let request = self.issue(pose, generation, color_available)?;
        self.view_changed = false;
        Some(request)
    }

    /// Called when an integration of the current session was committed.
    ///
    /// During a session the volume is raycast right away, from the
    /// integrating camera or the virtual camera. Otherwise the next tick
    /// takes care of it.
    pub fn on_integration_committed(
        &mut self,
        session_active: bool,
        camera_pose: Mat4,
        generation: u64,
        color_available: bool,
    ) -> Option<RaycastRequest> {
        if !session_active {
            self.view_changed = true;
            return None;
        }
        let pose = if self.use_camera_view {
            camera_pose
        } else {
            self.virtual_camera.world_to_camera
        };
        let request = self.issue(pose, generation, color_available);
        if request.is_none() {
            self.view_changed = true;
        }
        request
    }

    /// Called when a raycast completes, current or stale.
    pub fn on_raycast_complete(&mut self) {
        self.raycast_in_flight = false;
    }

    fn issue(&mut self, pose: Mat4, generation: u64, color_available: bool) -> Option<RaycastRequest> {
        if self.raycast_in_flight {
            return None;
        }
        self.raycast_in_flight = true;
        Some(RaycastRequest {
            generation,
            world_to_camera: pose,
            mode: self.raycast_mode(color_available),
            width: self.width,
            height: self.height,
        })
    }
}
