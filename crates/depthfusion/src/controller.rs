//! The operator-facing control loop.
//!
//! [`FusionController`] is driven from one thread. Commands are method
//! calls, camera frames arrive either as direct calls or through a
//! [`FrameSink`], and everything flowing back up is a [`FusionEvent`] on
//! the channel returned by [`FusionController::events`]. Call
//! [`FusionController::pump`] and [`FusionController::tick`] from the UI
//! loop to process queued frames, volume completions, and status updates.

use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use depthfusion_core::options::{clamp_frames_per_camera, clamp_integration_weight};
use depthfusion_core::{
    CameraFault, CameraId, ColorImage, DepthCamera, DepthFrame, EmitterPlan, FusionError,
    FusionOptions, Mat4, ReconstructionSession, Result, SessionState, SlotRegistry, SlotSettings,
    VolumeParameters,
};
use depthfusion_volume::{
    IntegrateOutcome, Mesh, VolumeBackend, VolumeCompletion, VolumeCoordinator, VolumeStatus,
};

use crate::events::{FusionEvent, PreviewImage};
use crate::render::{RenderRequestCoordinator, VirtualCamera};
use crate::scheduler::{apply_emitters, Progress, SequencingScheduler};
use crate::status::{FpsCounter, StatusBar};

const EVENT_QUEUE_DEPTH: usize = 256;
const FRAME_QUEUE_DEPTH: usize = 32;

/// Data delivered by a camera.
#[derive(Debug, Clone)]
pub enum CameraFrame {
    /// A raw depth frame.
    Depth(DepthFrame),
    /// A raw color frame.
    Color(ColorImage),
}

/// Sending half for camera callbacks running on device threads.
///
/// Frames are dropped rather than queued when the controller falls behind.
/// Faults travel on their own queue and are never dropped.
#[derive(Debug, Clone)]
pub struct FrameSink {
    sender: Sender<(CameraId, CameraFrame)>,
    faults: Sender<(CameraId, CameraFault)>,
}

impl FrameSink {
    /// Delivers a depth frame. Returns `false` if it was dropped.
    pub fn depth(&self, camera: CameraId, frame: DepthFrame) -> bool {
        self.send(camera, CameraFrame::Depth(frame))
    }

    /// Delivers a color frame. Returns `false` if it was dropped.
    pub fn color(&self, camera: CameraId, frame: ColorImage) -> bool {
        self.send(camera, CameraFrame::Color(frame))
    }

    /// Reports a device fault. Returns `false` only if the controller is
    /// gone.
    pub fn fault(&self, camera: CameraId, fault: CameraFault) -> bool {
        self.faults.send((camera, fault)).is_ok()
    }

    fn send(&self, camera: CameraId, frame: CameraFrame) -> bool {
        self.sender.try_send((camera, frame)).is_ok()
    }
}

/// Orchestrates cameras, the reconstruction session, and the volume.
pub struct FusionController {
    options: FusionOptions,
    slots: SlotRegistry,
    scheduler: SequencingScheduler,
    render: RenderRequestCoordinator,
    status: StatusBar,
    fps: FpsCounter,
    preview_camera: Option<CameraId>,
    color_captured: bool,

    events_tx: Sender<FusionEvent>,
    events_rx: Receiver<FusionEvent>,
    frames_tx: Sender<(CameraId, CameraFrame)>,
    frames_rx: Receiver<(CameraId, CameraFrame)>,
    faults_tx: Sender<(CameraId, CameraFault)>,
    faults_rx: Receiver<(CameraId, CameraFault)>,

    volume: VolumeCoordinator,
}

impl FusionController {
    /// Creates a controller. The volume is created when the first camera
    /// is attached.
    pub fn new(backend: Box<dyn VolumeBackend>, options: FusionOptions) -> Result<Self> {
        let options = options.clamped();
        let volume = VolumeCoordinator::spawn(backend)?;
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_DEPTH);
        let (frames_tx, frames_rx) = bounded(FRAME_QUEUE_DEPTH);
        let (faults_tx, faults_rx) = unbounded();

        let mut render = RenderRequestCoordinator::new(VirtualCamera::for_volume(&options.volume));
        render.set_use_camera_view(options.use_camera_view_in_reconstruction);
        render.set_display_normals(options.display_normals);

        Ok(Self {
            slots: SlotRegistry::new(options.max_cameras),
            scheduler: SequencingScheduler::new(),
            render,
            status: StatusBar::new(options.status_throttle()),
            fps: FpsCounter::new(options.fps_interval(), Instant::now()),
            preview_camera: None,
            color_captured: false,
            events_tx,
            events_rx,
            frames_tx,
            frames_rx,
            faults_tx,
            faults_rx,
            volume,
            options,
        })
    }

    /// Returns the receiving end of the event channel.
    pub fn events(&self) -> Receiver<FusionEvent> {
        self.events_rx.clone()
    }

    /// Returns a sink for delivering frames from other threads.
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            sender: self.frames_tx.clone(),
            faults: self.faults_tx.clone(),
        }
    }

    /// Current options.
    pub fn options(&self) -> &FusionOptions {
        &self.options
    }

    /// Attached cameras.
    pub fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    /// The reconstruction session.
    pub fn session(&self) -> ReconstructionSession {
        self.scheduler.session()
    }

    /// Volume coordinator status.
    pub fn volume_status(&self) -> VolumeStatus {
        self.volume.status()
    }

    /// Whether a reconstruction volume exists.
    pub fn has_volume(&self) -> bool {
        self.volume.has_volume()
    }

    /// The preview camera.
    pub fn virtual_camera(&self) -> VirtualCamera {
        *self.render.virtual_camera()
    }

    /// Camera whose depth is previewed outside capture.
    pub fn preview_camera(&self) -> Option<CameraId> {
        self.preview_camera
    }

    // ---- Camera lifecycle ----

    /// Attaches a camera, turning its emitter on and applying its depth
    /// range. The first attach creates the volume.
    pub fn attach_camera(
        &mut self,
        device: Box<dyn DepthCamera>,
        settings: SlotSettings,
    ) -> Result<CameraId> {
        let id = self.slots.attach(device, settings)?;
        let slot = self.slots.require_mut(id)?;
        log::info!("camera {id} attached ({})", slot.connection_id());

        let mut faults = Vec::new();
        if let Err(fault) = slot.set_emitter_enabled(true) {
            faults.push(fault);
        }
        if let Err(fault) = slot.apply_depth_range() {
            faults.push(fault);
        }
        for fault in &faults {
            slot.handle_fault(fault);
        }
        for fault in faults {
            self.post_status(format!("Camera {id}: {fault}"));
        }

        if let Some(active) = self.scheduler.state().active_camera() {
            let faults = apply_emitters(EmitterPlan::Exclusive(active), &mut self.slots);
            self.handle_progress(Progress {
                faults,
                ..Progress::default()
            });
        }

        if self.preview_camera.is_none() {
            self.preview_camera = Some(id);
        }
        if !self.volume.has_volume() {
            // A failure has already been reported as an event.
            let _ = self.recreate_volume();
        }
        if self.options.reset_to_first_camera_view {
            self.reset_virtual_camera();
        }
        self.render.mark_view_changed();
        Ok(id)
    }

    /// Detaches a camera. A running pass is aborted; the volume keeps its
    /// content.
    pub fn detach_camera(&mut self, id: CameraId) -> Result<()> {
        if !self.slots.contains(id) {
            return Err(FusionError::CameraNotFound(id));
        }
        if self.scheduler.state().is_active() {
            let progress = self.scheduler.reset(&mut self.slots);
            self.handle_progress(progress);
            self.post_status(format!("Reconstruction aborted: camera {id} detached"));
        }

        drop(self.slots.remove(id));
        log::info!("camera {id} detached");

        if self.preview_camera == Some(id) {
            self.preview_camera = self.slots.by_index(0).map(|s| s.id());
        }
        self.render.mark_view_changed();
        Ok(())
    }

    /// Chooses the camera whose depth is previewed outside capture.
    pub fn select_preview_camera(&mut self, id: CameraId) -> Result<()> {
        self.slots.require(id)?;
        self.preview_camera = Some(id);
        Ok(())
    }

    // ---- Frames ----

    /// Stores a depth frame and lets the scheduler act on it.
    pub fn on_depth_frame(&mut self, camera: CameraId, frame: &DepthFrame) -> Result<()> {
        let slot = self.slots.require_mut(camera)?;
        let ready = slot.on_depth_frame(frame);
        let preview = slot.depth().map(depthfusion_core::DepthFloatImage::visualize);

        self.fps.frame();
        if self.is_previewed(camera) {
            // Only the previewed camera sizes the raycast.
            self.render.set_render_size(frame.width, frame.height);
            if let Some(image) = preview {
                self.emit(FusionEvent::FramePreviewReady(PreviewImage::Depth { camera, image }));
            }
        }

        if !self.volume.has_volume() {
            return Ok(());
        }
        let progress = match self.scheduler.on_depth_frame(
            &mut self.slots,
            ready,
            &self.volume,
            self.options.integration_weight,
        ) {
            Ok(progress) => progress,
            Err(e) => {
                self.post_status(e.to_string());
                return Err(e);
            }
        };
        self.handle_progress(progress);
        Ok(())
    }

    /// Stores a color frame.
    pub fn on_color_frame(&mut self, camera: CameraId, frame: ColorImage) -> Result<()> {
        self.slots.require_mut(camera)?.on_color_frame(frame);
        Ok(())
    }

    /// Handles a fault reported by a camera outside of a command.
    pub fn on_camera_fault(&mut self, camera: CameraId, fault: &CameraFault) -> Result<()> {
        self.slots.require_mut(camera)?.handle_fault(fault);
        self.handle_progress(Progress {
            faults: vec![(camera, fault.clone())],
            ..Progress::default()
        });
        Ok(())
    }

    // ---- Control loop ----

    /// Processes volume completions, then faults and frames from
    /// [`FrameSink`]s.
    ///
    /// Completions go first so frames see the latest session state. Faults
    /// go before frames so an excluded camera's queued frames are not
    /// integrated.
    pub fn pump(&mut self) -> Result<()> {
        self.drain_completions()?;
        while let Ok((camera, fault)) = self.faults_rx.try_recv() {
            Self::ignore_detached(self.on_camera_fault(camera, &fault))?;
        }
        while let Ok((camera, frame)) = self.frames_rx.try_recv() {
            let result = match frame {
                CameraFrame::Depth(frame) => self.on_depth_frame(camera, &frame),
                CameraFrame::Color(frame) => self.on_color_frame(camera, frame),
            };
            Self::ignore_detached(result)?;
        }
        Ok(())
    }

    fn ignore_detached(result: Result<()>) -> Result<()> {
        match result {
            Err(FusionError::CameraNotFound(id)) => {
                log::debug!("input from detached camera {id} ignored");
                Ok(())
            }
            other => other,
        }
    }

    fn drain_completions(&mut self) -> Result<()> {
        while let Some(completion) = self.volume.try_completion() {
            self.on_completion(completion)?;
        }
        Ok(())
    }

    /// Waits for all queued volume work, then pumps.
    pub fn sync(&mut self) -> Result<()> {
        self.volume.flush()?;
        self.pump()
    }

    /// Render tick: raycasts if the view changed and updates the status bar.
    pub fn tick(&mut self) -> Result<()> {
        let now = Instant::now();

        if self.volume.has_volume() {
            let color = self.color_available();
            if let Some(request) =
                self.render
                    .on_tick(self.scheduler.state(), self.scheduler.generation(), color)
            {
                self.volume.raycast(request)?;
            }
        }

        if let Some(message) = self.fps.report(now) {
            self.post_status(message);
        }
        if let Some(message) = self.status.tick(now) {
            self.emit(FusionEvent::StatusMessage(message));
        }
        Ok(())
    }

    // ---- Session commands ----

    /// Starts a reconstruction pass over all cameras.
    ///
    /// Returns the settings of every camera at the time of the call so the
    /// caller can persist them. Fails if no volume exists.
    pub fn reconstruct(&mut self) -> Result<Vec<(CameraId, SlotSettings)>> {
        if !self.volume.has_volume() {
            self.post_status("No reconstruction volume; cannot reconstruct");
            return Err(FusionError::NoVolume);
        }
        let settings = self.slots.settings_snapshot();
        if self.slots.is_empty() || self.scheduler.state().is_active() {
            return Ok(settings);
        }

        self.post_status("Reconstructing");
        let progress = self.scheduler.reconstruct(
            &mut self.slots,
            self.options.lead_in_frames,
            self.options.frames_per_camera,
        );
        self.handle_progress(progress);
        Ok(settings)
    }

    /// Returns the session to idle and clears the volume.
    ///
    /// The generation advances even if the volume reset fails.
    pub fn reset_session(&mut self) -> Result<()> {
        let progress = self.scheduler.reset(&mut self.slots);
        self.handle_progress(progress);
        self.color_captured = false;
        self.fps.restart(Instant::now());

        if let Err(e) = self.volume.reset(self.options.volume.world_to_volume()) {
            self.post_status(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Changes the volume resolution and recreates the volume.
    pub fn set_voxel_parameters(
        &mut self,
        voxels_per_meter: f32,
        voxels_x: u32,
        voxels_y: u32,
        voxels_z: u32,
    ) -> Result<()> {
        self.options.volume = VolumeParameters::new(voxels_per_meter, voxels_x, voxels_y, voxels_z);
        self.recreate_volume()
    }

    /// Pauses or resumes integration.
    pub fn set_integration_paused(&mut self, paused: bool) -> Result<()> {
        self.volume.set_paused(paused)
    }

    /// Sets the per-camera frame budget for the next pass.
    pub fn set_frames_per_camera(&mut self, frames: u32) {
        self.options.frames_per_camera = clamp_frames_per_camera(frames);
    }

    /// Sets the integration weight cap.
    pub fn set_integration_weight(&mut self, weight: u16) {
        self.options.integration_weight = clamp_integration_weight(weight);
    }

    /// Raycasts from the integrating camera during capture.
    pub fn set_use_camera_view_in_reconstruction(&mut self, use_camera_view: bool) {
        self.options.use_camera_view_in_reconstruction = use_camera_view;
        self.render.set_use_camera_view(use_camera_view);
    }

    /// Previews normals instead of the shaded surface.
    pub fn set_display_normals(&mut self, display_normals: bool) {
        self.options.display_normals = display_normals;
        self.render.set_display_normals(display_normals);
    }

    /// Extracts a mesh of the current volume.
    pub fn export_mesh(&mut self, decimation: u32) -> Result<Mesh> {
        match self.volume.extract_mesh(decimation) {
            Ok(mesh) => {
                // The export stalled the loop; start a fresh frame rate window.
                self.fps.restart(Instant::now());
                self.post_status(format!("Mesh exported: {} triangles", mesh.num_triangles()));
                Ok(mesh)
            }
            Err(e) => {
                self.post_status(e.to_string());
                Err(e)
            }
        }
    }

    // ---- Per-camera commands ----

    /// Sets a camera's mounting calibration. Returns the new world-to-camera
    /// transform.
    pub fn set_camera_calibration(
        &mut self,
        id: CameraId,
        angle_x: f32,
        angle_y: f32,
        angle_z: f32,
        axis_distance: f32,
    ) -> Result<Mat4> {
        let transform = self
            .slots
            .require_mut(id)?
            .set_calibration(angle_x, angle_y, angle_z, axis_distance);
        self.render.mark_view_changed();
        Ok(transform)
    }

    /// Includes or excludes a camera. Takes effect on its next frame.
    pub fn set_camera_use(&mut self, id: CameraId, use_camera: bool) -> Result<()> {
        self.slots.require_mut(id)?.set_use_in_reconstruction(use_camera);
        self.render.mark_view_changed();
        Ok(())
    }

    /// Enables or disables color capture for a camera.
    pub fn set_capture_color(&mut self, id: CameraId, capture_color: bool) -> Result<()> {
        self.slots.require_mut(id)?.set_capture_color(capture_color);
        self.render.mark_view_changed();
        Ok(())
    }

    /// Switches a camera between near and default range. A camera that
    /// rejects near mode is reported and excluded.
    pub fn set_near_mode(&mut self, id: CameraId, near_mode: bool) -> Result<()> {
        if let Err(fault) = self.slots.require_mut(id)?.set_near_mode(near_mode) {
            self.on_camera_fault(id, &fault)?;
        }
        Ok(())
    }

    /// Selects whether a camera's depth or color is mirrored.
    pub fn set_mirror_depth(&mut self, id: CameraId, mirror_depth: bool) -> Result<()> {
        self.slots.require_mut(id)?.set_mirror_depth(mirror_depth);
        Ok(())
    }

    /// Sets a camera's depth clip range in meters.
    pub fn set_depth_clip(&mut self, id: CameraId, min: f32, max: f32) -> Result<()> {
        if self.slots.require_mut(id)?.set_depth_clip(min, max) {
            Ok(())
        } else {
            Err(FusionError::InvalidDepthClip { min, max })
        }
    }

    // ---- Virtual camera ----

    /// Moves the virtual camera.
    pub fn set_virtual_camera_pose(&mut self, world_to_camera: Mat4) {
        self.render
            .set_virtual_camera(VirtualCamera::from_world_to_camera(world_to_camera));
    }

    /// Returns the virtual camera to its start pose: the first used
    /// camera's view if so configured, else the default pose.
    pub fn reset_virtual_camera(&mut self) {
        let first_used = self
            .slots
            .iter()
            .find(|s| s.use_in_reconstruction())
            .map(depthfusion_core::CameraSlot::calibration);
        let camera = match first_used {
            Some(calibration) if self.options.reset_to_first_camera_view => {
                VirtualCamera::from_calibration(&calibration)
            }
            _ => VirtualCamera::for_volume(&self.options.volume),
        };
        self.render.set_virtual_camera(camera);
    }

    // ---- Internals ----

    fn recreate_volume(&mut self) -> Result<()> {
        if self.scheduler.state() != SessionState::Idle {
            let progress = self.scheduler.reset(&mut self.slots);
            self.handle_progress(progress);
        }
        self.color_captured = false;

        match self.volume.create_volume(self.options.volume) {
            Ok(()) => {
                self.fps.restart(Instant::now());
                self.render.mark_view_changed();
                Ok(())
            }
            Err(e) => {
                log::warn!("volume creation failed: {e}");
                self.emit(FusionEvent::VolumeCreationFailed(e.to_string()));
                self.post_status(format!("Volume creation failed: {e}"));
                Err(e)
            }
        }
    }

    fn on_completion(&mut self, completion: VolumeCompletion) -> Result<()> {
        match completion {
            VolumeCompletion::Integrated {
                generation,
                camera,
                world_to_camera,
                outcome,
            } => {
                if !self.scheduler.on_integrate_complete(generation) {
                    return Ok(());
                }
                match outcome {
                    IntegrateOutcome::Integrated { with_color } => {
                        self.color_captured |= with_color;
                        let color = self.color_available();
                        if let Some(request) = self.render.on_integration_committed(
                            self.scheduler.state().is_active(),
                            world_to_camera,
                            generation,
                            color,
                        ) {
                            self.volume.raycast(request)?;
                        }
                    }
                    IntegrateOutcome::Paused => {
                        log::debug!("integration paused, frame from camera {camera} skipped");
                    }
                    IntegrateOutcome::NoVolume => {
                        self.post_status("No reconstruction volume");
                    }
                    IntegrateOutcome::Failed(e) => {
                        self.post_status(format!("Camera {camera}: {e}"));
                    }
                }
            }
            VolumeCompletion::Raycast {
                generation, result, ..
            } => {
                self.render.on_raycast_complete();
                if generation != self.scheduler.generation() {
                    log::trace!("stale raycast from generation {generation} discarded");
                    return Ok(());
                }
                match result {
                    Ok(frame) => self.emit(FusionEvent::FramePreviewReady(
                        PreviewImage::ShadedSurface {
                            image: frame.image,
                            point_cloud: frame.point_cloud,
                        },
                    )),
                    Err(e) => {
                        log::warn!("raycast failed: {e}");
                        self.post_status(e.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_progress(&mut self, progress: Progress) {
        let mut pending = vec![progress];
        while let Some(progress) = pending.pop() {
            if let Some(id) = progress.entered {
                self.post_status(format!("Reconstructing camera {id}"));
            }
            if progress.finished {
                self.render.mark_view_changed();
                self.emit(FusionEvent::ReconstructionDone);
                self.post_status("Done reconstructing");
            }
            for (camera, fault) in progress.faults {
                log::warn!("camera {camera}: {fault}");
                self.post_status(format!("Camera {camera}: {fault}"));
                if let Some(index) = self.slots.index_of(camera) {
                    pending.push(self.scheduler.on_camera_excluded(&mut self.slots, index));
                }
            }
        }
    }

    fn is_previewed(&self, camera: CameraId) -> bool {
        if self.render.use_camera_view() {
            if let Some(active) = self.scheduler.state().active_camera() {
                return self.slots.by_index(active).map(|s| s.id()) == Some(camera);
            }
        }
        self.preview_camera == Some(camera)
    }

    fn color_available(&self) -> bool {
        self.color_captured
            && self
                .slots
                .iter()
                .any(|s| s.use_in_reconstruction() && s.capture_color())
    }

    fn post_status(&mut self, message: impl Into<String>) {
        if let Some(message) = self.status.post(message, Instant::now()) {
            self.emit(FusionEvent::StatusMessage(message));
        }
    }

    fn emit(&self, event: FusionEvent) {
        if let Err(TrySendError::Full(_)) = self.events_tx.try_send(event) {
            log::debug!("event queue full, event dropped");
        }
    }
}

impl std::fmt::Debug for FusionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionController")
            .field("slots", &self.slots.len())
            .field("session", &self.scheduler.session())
            .field("volume", &self.volume.status())
            .finish_non_exhaustive()
    }
}
