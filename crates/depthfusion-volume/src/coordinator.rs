//! The volume coordinator: a single worker thread that owns the volume.
//!
//! Every operation on the volume is a message on one request queue, so no
//! two of them ever run at the same time. Create, reset, mesh extraction,
//! and dispose block the caller until the worker replies. Integrate and
//! raycast return immediately; their results come back as
//! [`VolumeCompletion`]s tagged with the caller's generation.
//!
//! The completion queue is unbounded: the worker never waits for the
//! caller to drain it, so a blocking call cannot stall behind undrained
//! completions.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use depthfusion_core::{
    BackendError, CameraId, ColorMappingJob, DepthFloatImage, FusionError, Mat4, Result,
    VolumeCreationError, VolumeParameters,
};

use crate::backend::{Mesh, RaycastFrame, RaycastMode, ReconstructionVolume, VolumeBackend};

const REQUEST_QUEUE_DEPTH: usize = 16;

/// A frame to fuse into the volume.
#[derive(Debug)]
pub struct IntegrateRequest {
    /// Session generation the frame belongs to.
    pub generation: u64,
    /// Camera the frame came from.
    pub camera: CameraId,
    /// Depth copied out of the camera slot.
    pub depth: DepthFloatImage,
    /// Color to map into depth space and fuse alongside, if captured.
    pub color: Option<ColorMappingJob>,
    /// Cap on a voxel's accumulated weight.
    pub max_weight: u16,
    /// Pose of the camera.
    pub world_to_camera: Mat4,
}

/// A preview raycast.
#[derive(Debug, Clone, Copy)]
pub struct RaycastRequest {
    /// Session generation the request belongs to.
    pub generation: u64,
    /// Pose to raycast from.
    pub world_to_camera: Mat4,
    /// What to render.
    pub mode: RaycastMode,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

/// How an integrate request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrateOutcome {
    /// The frame was fused.
    Integrated {
        /// Whether color was fused too.
        with_color: bool,
    },
    /// Integration is paused; the frame was skipped.
    Paused,
    /// There is no volume to integrate into.
    NoVolume,
    /// The backend failed.
    Failed(BackendError),
}

/// Result of an asynchronous volume operation.
#[derive(Debug)]
pub enum VolumeCompletion {
    /// An integrate request finished.
    Integrated {
        /// Generation the request was tagged with.
        generation: u64,
        /// Camera the frame came from.
        camera: CameraId,
        /// Pose the frame was fused from.
        world_to_camera: Mat4,
        /// What happened.
        outcome: IntegrateOutcome,
    },
    /// A raycast request finished.
    Raycast {
        /// Generation the request was tagged with.
        generation: u64,
        /// Pose the raycast was taken from.
        world_to_camera: Mat4,
        /// The rendered frame.
        result: Result<RaycastFrame>,
    },
}

/// Snapshot of the coordinator's state, readable without a round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumeStatus {
    /// Parameters of the current volume, if one exists.
    pub parameters: Option<VolumeParameters>,
    /// Whether integration is paused.
    pub paused: bool,
    /// Frames fused since the last reset.
    pub integrated_frames: u64,
}

enum VolumeRequest {
    Create {
        params: VolumeParameters,
        reply: Sender<std::result::Result<(), VolumeCreationError>>,
    },
    Reset {
        world_to_volume: Mat4,
        reply: Sender<Result<()>>,
    },
    Integrate(Box<IntegrateRequest>),
    Raycast(RaycastRequest),
    ExtractMesh {
        decimation: u32,
        reply: Sender<Result<Mesh>>,
    },
    SetPaused(bool),
    Dispose {
        reply: Sender<()>,
    },
    Flush {
        reply: Sender<()>,
    },
    Shutdown,
}

/// Handle to the volume worker thread.
///
/// Dropping the handle disposes the volume and joins the thread.
pub struct VolumeCoordinator {
    requests: Sender<VolumeRequest>,
    completions: Receiver<VolumeCompletion>,
    status: Arc<Mutex<VolumeStatus>>,
    worker: Option<JoinHandle<()>>,
}

impl VolumeCoordinator {
    /// Starts the worker thread around `backend`.
    pub fn spawn(backend: Box<dyn VolumeBackend>) -> Result<Self> {
        let (request_tx, request_rx) = bounded::<VolumeRequest>(REQUEST_QUEUE_DEPTH);
        let (completion_tx, completion_rx) = unbounded::<VolumeCompletion>();
        let status = Arc::new(Mutex::new(VolumeStatus::default()));

        let worker = Worker {
            backend,
            volume: None,
            paused: false,
            status: Arc::clone(&status),
            completions: completion_tx,
        };
        let handle = std::thread::Builder::new()
            .name("volume-coordinator".to_string())
            .spawn(move || worker.run(&request_rx))?;

        Ok(Self {
            requests: request_tx,
            completions: completion_rx,
            status,
            worker: Some(handle),
        })
    }

    /// Replaces the volume. The old volume is released first; on failure
    /// no volume exists afterwards. A new volume starts reset and unpaused.
    pub fn create_volume(&self, params: VolumeParameters) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.send(VolumeRequest::Create { params, reply })?;
        rx.recv().map_err(|_| FusionError::CoordinatorStopped)??;
        Ok(())
    }

    /// Clears the volume and unpauses integration.
    pub fn reset(&self, world_to_volume: Mat4) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.send(VolumeRequest::Reset {
            world_to_volume,
            reply,
        })?;
        rx.recv().map_err(|_| FusionError::CoordinatorStopped)?
    }

    /// Queues a frame for integration.
    pub fn integrate(&self, request: IntegrateRequest) -> Result<()> {
        self.send(VolumeRequest::Integrate(Box::new(request)))
    }

    /// Queues a preview raycast.
    pub fn raycast(&self, request: RaycastRequest) -> Result<()> {
        self.send(VolumeRequest::Raycast(request))
    }

    /// Extracts a mesh of the current volume.
    pub fn extract_mesh(&self, decimation: u32) -> Result<Mesh> {
        let (reply, rx) = bounded(1);
        self.send(VolumeRequest::ExtractMesh { decimation, reply })?;
        rx.recv().map_err(|_| FusionError::CoordinatorStopped)?
    }

    /// Pauses or resumes integration. Takes effect in queue order.
    pub fn set_paused(&self, paused: bool) -> Result<()> {
        self.send(VolumeRequest::SetPaused(paused))
    }

    /// Releases the volume.
    pub fn dispose(&self) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.send(VolumeRequest::Dispose { reply })?;
        rx.recv().map_err(|_| FusionError::CoordinatorStopped)
    }

    /// Blocks until every request queued so far has been processed.
    ///
    /// Completions of those requests are waiting in the completion queue
    /// when this returns.
    pub fn flush(&self) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.send(VolumeRequest::Flush { reply })?;
        rx.recv().map_err(|_| FusionError::CoordinatorStopped)
    }

    /// Returns the next completion, if one is ready.
    pub fn try_completion(&self) -> Option<VolumeCompletion> {
        self.completions.try_recv().ok()
    }

    /// Returns the current status snapshot.
    pub fn status(&self) -> VolumeStatus {
        *self.status.lock()
    }

    /// Whether a volume currently exists.
    pub fn has_volume(&self) -> bool {
        self.status.lock().parameters.is_some()
    }

    fn send(&self, request: VolumeRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| FusionError::CoordinatorStopped)
    }
}

impl Drop for VolumeCoordinator {
    fn drop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        // The worker never blocks on completions, so it always reaches this.
        let _ = self.requests.send(VolumeRequest::Shutdown);
        if handle.join().is_err() {
            log::error!("volume coordinator thread panicked");
        }
    }
}

impl std::fmt::Debug for VolumeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeCoordinator")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct Worker {
    backend: Box<dyn VolumeBackend>,
    volume: Option<Box<dyn ReconstructionVolume>>,
    paused: bool,
    status: Arc<Mutex<VolumeStatus>>,
    completions: Sender<VolumeCompletion>,
}

impl Worker {
    fn run(mut self, requests: &Receiver<VolumeRequest>) {
        log::debug!("volume coordinator started");
        for request in requests {
            match request {
                VolumeRequest::Create { params, reply } => {
                    let _ = reply.send(self.create(params));
                }
                VolumeRequest::Reset {
                    world_to_volume,
                    reply,
                } => {
                    let _ = reply.send(self.reset(world_to_volume));
                }
                VolumeRequest::Integrate(request) => {
                    let completion = self.integrate(*request);
                    if self.completions.send(completion).is_err() {
                        break;
                    }
                }
                VolumeRequest::Raycast(request) => {
                    let completion = self.raycast(request);
                    if self.completions.send(completion).is_err() {
                        break;
                    }
                }
                VolumeRequest::ExtractMesh { decimation, reply } => {
                    let _ = reply.send(self.extract_mesh(decimation));
                }
                VolumeRequest::SetPaused(paused) => {
                    self.paused = paused;
                    self.status.lock().paused = paused;
                }
                VolumeRequest::Dispose { reply } => {
                    self.dispose();
                    let _ = reply.send(());
                }
                VolumeRequest::Flush { reply } => {
                    let _ = reply.send(());
                }
                VolumeRequest::Shutdown => break,
            }
        }
        self.dispose();
        log::debug!("volume coordinator stopped");
    }

    fn create(&mut self, params: VolumeParameters) -> std::result::Result<(), VolumeCreationError> {
        self.dispose();

        let mut volume = self.backend.create_volume(&params)?;
        volume
            .reset(params.world_to_volume())
            .map_err(|e| VolumeCreationError::BackendUnavailable(e.0))?;
        self.volume = Some(volume);
        self.paused = false;

        let mut status = self.status.lock();
        status.parameters = Some(params);
        status.paused = false;
        status.integrated_frames = 0;
        drop(status);

        log::info!(
            "created volume {}x{}x{} at {} voxels/m",
            params.voxels_x,
            params.voxels_y,
            params.voxels_z,
            params.voxels_per_meter
        );
        Ok(())
    }

    fn reset(&mut self, world_to_volume: Mat4) -> Result<()> {
        let volume = self
            .volume
            .as_mut()
            .ok_or_else(|| FusionError::Reset("no reconstruction volume exists".to_string()))?;
        volume
            .reset(world_to_volume)
            .map_err(|e| FusionError::Reset(e.0))?;
        self.paused = false;

        let mut status = self.status.lock();
        status.paused = false;
        status.integrated_frames = 0;
        Ok(())
    }

    fn integrate(&mut self, request: IntegrateRequest) -> VolumeCompletion {
        let IntegrateRequest {
            generation,
            camera,
            depth,
            color,
            max_weight,
            world_to_camera,
        } = request;

        let outcome = match self.volume.as_mut() {
            None => IntegrateOutcome::NoVolume,
            Some(_) if self.paused => IntegrateOutcome::Paused,
            Some(volume) => {
                let with_color = color.is_some();
                let result = match color {
                    Some(job) => {
                        let mapped = job.run();
                        volume.integrate_depth_and_color(&depth, &mapped, max_weight, world_to_camera)
                    }
                    None => volume.integrate_depth(&depth, max_weight, world_to_camera),
                };
                match result {
                    Ok(()) => {
                        self.status.lock().integrated_frames += 1;
                        IntegrateOutcome::Integrated { with_color }
                    }
                    Err(e) => {
                        log::warn!("integrate from camera {camera} failed: {e}");
                        IntegrateOutcome::Failed(e)
                    }
                }
            }
        };

        VolumeCompletion::Integrated {
            generation,
            camera,
            world_to_camera,
            outcome,
        }
    }

    fn raycast(&mut self, request: RaycastRequest) -> VolumeCompletion {
        let result = match self.volume.as_mut() {
            None => Err(FusionError::NoVolume),
            Some(volume) => volume
                .calculate_point_cloud(
                    request.world_to_camera,
                    request.mode,
                    request.width,
                    request.height,
                )
                .map_err(FusionError::from),
        };
        VolumeCompletion::Raycast {
            generation: request.generation,
            world_to_camera: request.world_to_camera,
            result,
        }
    }

    fn extract_mesh(&mut self, decimation: u32) -> Result<Mesh> {
        let volume = self.volume.as_mut().ok_or(FusionError::NoVolume)?;
        volume
            .extract_mesh(decimation)
            .map_err(|e| FusionError::MeshExtraction(e.0))
    }

    fn dispose(&mut self) {
        if self.volume.take().is_some() {
            log::debug!("volume released");
        }
        self.status.lock().parameters = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{BackendCall, RecordingBackend};

    fn depth() -> DepthFloatImage {
        DepthFloatImage {
            width: 2,
            height: 1,
            data: vec![1.0, 1.0],
        }
    }

    fn integrate_request(generation: u64) -> IntegrateRequest {
        IntegrateRequest {
            generation,
            camera: CameraId(0),
            depth: depth(),
            color: None,
            max_weight: 200,
            world_to_camera: Mat4::IDENTITY,
        }
    }

    #[test]
    fn test_create_failure_leaves_no_volume() {
        let backend = RecordingBackend::with_memory_budget(1024);
        let coordinator = VolumeCoordinator::spawn(Box::new(backend)).unwrap();
        let err = coordinator
            .create_volume(VolumeParameters::default())
            .unwrap_err();
        assert!(matches!(
            err,
            FusionError::VolumeCreation(VolumeCreationError::InsufficientMemory { .. })
        ));
        assert!(!coordinator.has_volume());
        assert!(matches!(
            coordinator.reset(Mat4::IDENTITY),
            Err(FusionError::Reset(_))
        ));
    }

    #[test]
    fn test_undrained_completions_do_not_block_reset() {
        let coordinator = VolumeCoordinator::spawn(Box::new(RecordingBackend::new())).unwrap();
        coordinator
            .create_volume(VolumeParameters::new(256.0, 64, 64, 64))
            .unwrap();

        for generation in 0..200 {
            coordinator.integrate(integrate_request(generation)).unwrap();
            coordinator.reset(Mat4::IDENTITY).unwrap();
        }

        let mut drained = 0;
        while coordinator.try_completion().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 200);
    }

    #[test]
    fn test_integrate_produces_tagged_completion() {
        let backend = RecordingBackend::new();
        let log = backend.log();
        let coordinator = VolumeCoordinator::spawn(Box::new(backend)).unwrap();
        coordinator
            .create_volume(VolumeParameters::new(256.0, 64, 64, 64))
            .unwrap();
        coordinator.integrate(integrate_request(7)).unwrap();
        coordinator.flush().unwrap();

        match coordinator.try_completion() {
            Some(VolumeCompletion::Integrated {
                generation,
                outcome,
                ..
            }) => {
                assert_eq!(generation, 7);
                assert_eq!(outcome, IntegrateOutcome::Integrated { with_color: false });
            }
            other => panic!("unexpected completion {other:?}"),
        }
        assert_eq!(log.count(|c| matches!(c, BackendCall::IntegrateDepth)), 1);
        assert_eq!(coordinator.status().integrated_frames, 1);
    }

    #[test]
    fn test_paused_integrate_is_noop_until_reset() {
        let backend = RecordingBackend::new();
        let log = backend.log();
        let coordinator = VolumeCoordinator::spawn(Box::new(backend)).unwrap();
        coordinator
            .create_volume(VolumeParameters::new(256.0, 64, 64, 64))
            .unwrap();
        coordinator.set_paused(true).unwrap();
        coordinator.integrate(integrate_request(1)).unwrap();
        coordinator.flush().unwrap();
        assert!(matches!(
            coordinator.try_completion(),
            Some(VolumeCompletion::Integrated {
                outcome: IntegrateOutcome::Paused,
                ..
            })
        ));
        assert_eq!(log.count(|c| matches!(c, BackendCall::IntegrateDepth)), 0);

        coordinator.reset(Mat4::IDENTITY).unwrap();
        assert!(!coordinator.status().paused);
    }

    #[test]
    fn test_operations_never_overlap() {
        let backend = RecordingBackend::new();
        let log = backend.log();
        let coordinator = VolumeCoordinator::spawn(Box::new(backend)).unwrap();
        coordinator
            .create_volume(VolumeParameters::new(256.0, 64, 64, 64))
            .unwrap();
        for generation in 0..8 {
            coordinator.integrate(integrate_request(generation)).unwrap();
            coordinator
                .raycast(RaycastRequest {
                    generation,
                    world_to_camera: Mat4::IDENTITY,
                    mode: RaycastMode::Shaded,
                    width: 4,
                    height: 4,
                })
                .unwrap();
            let _ = coordinator.try_completion();
        }
        coordinator.flush().unwrap();
        assert_eq!(log.max_concurrency(), 1);
    }

    #[test]
    fn test_mesh_without_volume() {
        let coordinator = VolumeCoordinator::spawn(Box::new(RecordingBackend::new())).unwrap();
        assert!(matches!(
            coordinator.extract_mesh(1),
            Err(FusionError::NoVolume)
        ));
    }

    #[test]
    fn test_recreate_releases_old_volume() {
        let backend = RecordingBackend::new();
        let log = backend.log();
        let coordinator = VolumeCoordinator::spawn(Box::new(backend)).unwrap();
        coordinator
            .create_volume(VolumeParameters::new(256.0, 64, 64, 64))
            .unwrap();
        coordinator
            .create_volume(VolumeParameters::new(256.0, 128, 64, 64))
            .unwrap();
        assert_eq!(log.live_volumes(), 1);
        coordinator.dispose().unwrap();
        assert_eq!(log.live_volumes(), 0);
        assert!(!coordinator.has_volume());
    }
}
