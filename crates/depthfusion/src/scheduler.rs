//! Sequencing cameras through lead-in and capture.
//!
//! The [`SequencingScheduler`] owns the [`ReconstructionSession`] value and
//! carries out the side effects each transition asks for: switching
//! emitters on the camera slots and handing frames to the volume
//! coordinator.

use depthfusion_core::{
    CameraFault, CameraId, EmitterPlan, FrameDecision, FrameReady, FusionError,
    ReconstructionSession, Result, SessionState, SlotRegistry, Step,
};
use depthfusion_volume::{IntegrateRequest, VolumeCoordinator};

/// What happened as a result of a scheduler call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// Decision taken for the frame, for frame calls.
    pub decision: Option<FrameDecision>,
    /// Whether the pass reached `Done`.
    pub finished: bool,
    /// Camera that became active, if the active camera changed.
    pub entered: Option<CameraId>,
    /// Cameras that faulted while their emitter was switched.
    pub faults: Vec<(CameraId, CameraFault)>,
}

/// Drives the reconstruction session against real slots and volume.
#[derive(Debug, Clone, Default)]
pub struct SequencingScheduler {
    session: ReconstructionSession,
}

impl SequencingScheduler {
    /// Creates an idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session value.
    pub fn session(&self) -> ReconstructionSession {
        self.session
    }

    /// The current state.
    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// The current generation.
    pub fn generation(&self) -> u64 {
        self.session.generation
    }

    /// Starts a pass. A no-op with no cameras or while a pass is running.
    pub fn reconstruct(&mut self, slots: &mut SlotRegistry, lead_in: u32, target: u32) -> Progress {
        let step = self.session.reconstruct(&slots.use_flags(), lead_in, target);
        if step.session.generation != self.session.generation {
            log::info!(
                "reconstruction pass {} started: lead-in {lead_in}, {target} frames per camera",
                step.session.generation
            );
        }
        self.apply(step, slots)
    }

    /// Returns to idle and switches every emitter back on.
    pub fn reset(&mut self, slots: &mut SlotRegistry) -> Progress {
        let step = self.session.reset();
        log::info!("session reset, generation {}", step.session.generation);
        self.apply(step, slots)
    }

    /// Handles a depth frame a slot has just stored.
    ///
    /// Integrates through `volume` when the session asks for it. Fails with
    /// [`FusionError::CameraNotFound`] if the slot was detached since.
    pub fn on_depth_frame(
        &mut self,
        slots: &mut SlotRegistry,
        ready: FrameReady,
        volume: &VolumeCoordinator,
        max_weight: u16,
    ) -> Result<Progress> {
        let index = slots
            .index_of(ready.camera)
            .ok_or(FusionError::CameraNotFound(ready.camera))?;
        let step = self.session.on_depth_frame(index, &slots.use_flags());
        let decision = step.decision;
        let progress = self.apply(step, slots);

        match decision {
            Some(FrameDecision::Integrate {
                camera,
                generation,
                frame_number,
            }) => {
                match Self::integrate(slots, camera, generation, volume, max_weight) {
                    Ok(true) => {}
                    Ok(false) => {
                        // Nothing is in flight after all.
                        self.session = self.session.on_integrate_complete(generation).0;
                        return Ok(progress);
                    }
                    Err(e) => {
                        self.session = self.session.on_integrate_complete(generation).0;
                        return Err(e);
                    }
                }
                log::debug!(
                    "integrating frame {frame_number}/{} from camera index {camera}",
                    self.session.target
                );
            }
            Some(FrameDecision::SkipCamera { camera }) => {
                log::debug!("camera index {camera} is not in use, skipped");
            }
            Some(FrameDecision::DropInFlight) => {
                log::trace!(
                    "frame {} from camera {} dropped, integrate in flight",
                    ready.timestamp,
                    ready.camera
                );
            }
            _ => {}
        }
        Ok(progress)
    }

    /// Moves on if the camera at `index` is active and has just been excluded.
    pub fn on_camera_excluded(&mut self, slots: &mut SlotRegistry, index: usize) -> Progress {
        let step = self.session.on_camera_excluded(index, &slots.use_flags());
        self.apply(step, slots)
    }

    /// Records an integrate completion. Returns `false` if it is stale.
    pub fn on_integrate_complete(&mut self, generation: u64) -> bool {
        let (session, current) = self.session.on_integrate_complete(generation);
        self.session = session;
        if !current {
            log::trace!("stale integrate completion from generation {generation} discarded");
        }
        current
    }

    fn integrate(
        slots: &SlotRegistry,
        index: usize,
        generation: u64,
        volume: &VolumeCoordinator,
        max_weight: u16,
    ) -> Result<bool> {
        let Some(slot) = slots.by_index(index) else {
            return Ok(false);
        };
        let Some(depth) = slot.snapshot_depth() else {
            return Ok(false);
        };
        volume.integrate(IntegrateRequest {
            generation,
            camera: slot.id(),
            depth,
            color: slot.color_mapping_job(),
            max_weight,
            world_to_camera: slot.world_to_camera(),
        })?;
        Ok(true)
    }

    fn apply(&mut self, step: Step, slots: &mut SlotRegistry) -> Progress {
        let before = self.session.state.active_camera();
        self.session = step.session;

        let mut progress = Progress {
            decision: step.decision,
            finished: step.finished,
            ..Progress::default()
        };
        if let Some(plan) = step.emitters {
            progress.faults = apply_emitters(plan, slots);
        }

        let after = self.session.state.active_camera();
        if after != before {
            progress.entered = after.and_then(|i| slots.by_index(i)).map(|s| s.id());
        }
        if step.finished {
            log::info!("reconstruction pass {} done", self.session.generation);
        }
        progress
    }
}

/// Switches emitters so only the cameras `plan` allows are projecting.
///
/// A camera that refuses is excluded from reconstruction.
pub fn apply_emitters(plan: EmitterPlan, slots: &mut SlotRegistry) -> Vec<(CameraId, CameraFault)> {
    let mut faults = Vec::new();
    for (index, slot) in slots.iter_mut().enumerate() {
        let enabled = plan.is_enabled(index);
        if slot.emitter_enabled() == enabled {
            continue;
        }
        if let Err(fault) = slot.set_emitter_enabled(enabled) {
            slot.handle_fault(&fault);
            faults.push((slot.id(), fault));
        }
    }
    faults
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{wall_depth_frame, CameraMonitor, SyntheticCamera};
    use depthfusion_core::{SlotSettings, VolumeParameters};
    use depthfusion_volume::{BackendCall, RecordingBackend, VolumeCompletion};

    fn registry(count: usize) -> (SlotRegistry, Vec<CameraMonitor>) {
        let mut slots = SlotRegistry::new(3);
        let mut monitors = Vec::new();
        for i in 0..count {
            let (camera, monitor) = SyntheticCamera::new(format!("synthetic-{i}"));
            slots.attach(Box::new(camera), SlotSettings::default()).unwrap();
            monitors.push(monitor);
        }
        (slots, monitors)
    }

    fn feed(slots: &mut SlotRegistry, index: usize, timestamp: i64) -> FrameReady {
        let frame = wall_depth_frame(8, 6, 1500, timestamp);
        slots.by_index_mut(index).unwrap().on_depth_frame(&frame)
    }

    #[test]
    fn test_reconstruct_switches_emitters() {
        let (mut slots, monitors) = registry(2);
        let mut scheduler = SequencingScheduler::new();

        let progress = scheduler.reconstruct(&mut slots, 2, 1);
        assert_eq!(scheduler.state(), SessionState::LeadIn(0));
        assert_eq!(progress.entered, slots.by_index(0).map(|s| s.id()));
        assert!(monitors[0].emitter_enabled());
        assert!(!monitors[1].emitter_enabled());

        let progress = scheduler.reset(&mut slots);
        assert_eq!(scheduler.state(), SessionState::Idle);
        assert!(progress.faults.is_empty());
        assert!(monitors.iter().all(CameraMonitor::emitter_enabled));
    }

    #[test]
    fn test_reconstruct_without_cameras() {
        let (mut slots, _) = registry(0);
        let mut scheduler = SequencingScheduler::new();
        let progress = scheduler.reconstruct(&mut slots, 2, 1);
        assert_eq!(scheduler.state(), SessionState::Idle);
        assert_eq!(scheduler.generation(), 0);
        assert!(!progress.finished);
    }

    #[test]
    fn test_integrates_after_lead_in() {
        let (mut slots, _) = registry(1);
        let backend = RecordingBackend::new();
        let log = backend.log();
        let volume = VolumeCoordinator::spawn(Box::new(backend)).unwrap();
        volume.create_volume(VolumeParameters::default()).unwrap();

        let mut scheduler = SequencingScheduler::new();
        scheduler.reconstruct(&mut slots, 1, 2);

        let ready = feed(&mut slots, 0, 1);
        let progress = scheduler.on_depth_frame(&mut slots, ready, &volume, 200).unwrap();
        assert_eq!(progress.decision, Some(FrameDecision::LeadIn { elapsed: 1 }));

        let ready = feed(&mut slots, 0, 2);
        let progress = scheduler.on_depth_frame(&mut slots, ready, &volume, 200).unwrap();
        assert!(matches!(
            progress.decision,
            Some(FrameDecision::Integrate { frame_number: 1, .. })
        ));

        // Second frame arrives before the first integrate completed.
        let ready = feed(&mut slots, 0, 3);
        let progress = scheduler.on_depth_frame(&mut slots, ready, &volume, 200).unwrap();
        assert_eq!(progress.decision, Some(FrameDecision::DropInFlight));

        volume.flush().unwrap();
        let Some(VolumeCompletion::Integrated { generation, .. }) = volume.try_completion() else {
            panic!("expected an integrate completion");
        };
        assert!(scheduler.on_integrate_complete(generation));

        let ready = feed(&mut slots, 0, 4);
        let progress = scheduler.on_depth_frame(&mut slots, ready, &volume, 200).unwrap();
        assert!(progress.finished);
        assert_eq!(scheduler.state(), SessionState::Done);

        volume.flush().unwrap();
        assert_eq!(log.count(|c| *c == BackendCall::IntegrateDepth), 2);
    }

    #[test]
    fn test_integrate_without_stored_depth_clears_in_flight() {
        let (mut slots, _) = registry(1);
        let volume = VolumeCoordinator::spawn(Box::new(RecordingBackend::new())).unwrap();

        let mut scheduler = SequencingScheduler::new();
        scheduler.reconstruct(&mut slots, 0, 5);
        let ready = FrameReady {
            camera: slots.by_index(0).unwrap().id(),
            timestamp: 0,
        };
        let progress = scheduler.on_depth_frame(&mut slots, ready, &volume, 200).unwrap();
        assert!(matches!(progress.decision, Some(FrameDecision::Integrate { .. })));
        assert!(!scheduler.session().integrate_in_flight);
    }

    #[test]
    fn test_frame_is_attributed_to_its_camera() {
        let (mut slots, _) = registry(2);
        let volume = VolumeCoordinator::spawn(Box::new(RecordingBackend::new())).unwrap();
        let mut scheduler = SequencingScheduler::new();
        scheduler.reconstruct(&mut slots, 2, 1);

        let ready = feed(&mut slots, 1, 7);
        assert_eq!(ready.camera, slots.by_index(1).unwrap().id());
        let progress = scheduler.on_depth_frame(&mut slots, ready, &volume, 200).unwrap();
        assert_eq!(progress.decision, Some(FrameDecision::DropOtherCamera));
        assert_eq!(scheduler.state(), SessionState::LeadIn(0));

        let ready = feed(&mut slots, 1, 8);
        slots.remove(ready.camera);
        assert!(matches!(
            scheduler.on_depth_frame(&mut slots, ready, &volume, 200),
            Err(FusionError::CameraNotFound(id)) if id == ready.camera
        ));
    }

    #[test]
    fn test_stale_completion_is_rejected() {
        let (mut slots, _) = registry(1);
        let mut scheduler = SequencingScheduler::new();
        scheduler.reconstruct(&mut slots, 0, 5);
        let old = scheduler.generation();
        scheduler.reset(&mut slots);
        assert!(!scheduler.on_integrate_complete(old));
        assert!(scheduler.on_integrate_complete(scheduler.generation()));
    }

    #[test]
    fn test_emitter_fault_excludes_camera() {
        let (mut slots, monitors) = registry(2);
        monitors[1].set_emitter_fault(Some(CameraFault::Disconnected));

        let faults = apply_emitters(EmitterPlan::Exclusive(0), &mut slots);
        let id = slots.by_index(1).unwrap().id();
        assert_eq!(faults, vec![(id, CameraFault::Disconnected)]);
        assert!(!slots.by_index(1).unwrap().use_in_reconstruction());
        assert!(slots.by_index(0).unwrap().use_in_reconstruction());
    }

    #[test]
    fn test_excluded_active_camera_moves_on() {
        let (mut slots, monitors) = registry(2);
        let mut scheduler = SequencingScheduler::new();
        scheduler.reconstruct(&mut slots, 3, 3);

        slots.by_index_mut(0).unwrap().set_use_in_reconstruction(false);
        let progress = scheduler.on_camera_excluded(&mut slots, 0);
        assert_eq!(scheduler.state(), SessionState::LeadIn(1));
        assert_eq!(progress.entered, slots.by_index(1).map(|s| s.id()));
        assert!(!monitors[0].emitter_enabled());
        assert!(monitors[1].emitter_enabled());
    }
}
