//! The reconstruction session state machine.
//!
//! A [`ReconstructionSession`] is a plain value. Every transition consumes
//! the current session and returns a [`Step`] holding the next session plus
//! what the caller has to do: issue an integrate, reconfigure emitters, or
//! report completion. Nothing here touches hardware or the volume, so the
//! whole sequencing logic can be driven from tests.
//!
//! Cameras are addressed by their index in attach order. Callers pass the
//! current use-in-reconstruction flags on each transition; a flag turned
//! off mid-session is honored on the next frame from that camera.

/// Sequencing state of a reconstruction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No reconstruction running; frames only feed the preview.
    #[default]
    Idle,
    /// Waiting for camera `i` to settle after its emitter changed.
    LeadIn(usize),
    /// Integrating frames from camera `i`.
    Capturing(usize),
    /// Every camera has been visited.
    Done,
}

impl SessionState {
    /// Index of the camera the session currently targets.
    pub fn active_camera(self) -> Option<usize> {
        match self {
            Self::LeadIn(i) | Self::Capturing(i) => Some(i),
            Self::Idle | Self::Done => None,
        }
    }

    /// Whether the session is in lead-in or capture.
    pub fn is_active(self) -> bool {
        self.active_camera().is_some()
    }
}

/// Requested emitter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterPlan {
    /// Only camera `i` projects.
    Exclusive(usize),
    /// Every camera projects.
    AllEnabled,
}

impl EmitterPlan {
    /// Whether camera `index` should have its emitter on under this plan.
    pub fn is_enabled(self, index: usize) -> bool {
        match self {
            Self::Exclusive(i) => i == index,
            Self::AllEnabled => true,
        }
    }
}

/// What the caller should do with a depth frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    /// No reconstruction is running; preview only.
    PreviewOnly,
    /// The frame came from a camera other than the active one.
    DropOtherCamera,
    /// The frame was counted toward lead-in.
    LeadIn {
        /// Lead-in frames elapsed after this one.
        elapsed: u32,
    },
    /// The active camera is excluded from reconstruction and was skipped.
    SkipCamera {
        /// Index of the skipped camera.
        camera: usize,
    },
    /// An integrate is still in flight; this frame is dropped.
    DropInFlight,
    /// Integrate this frame.
    Integrate {
        /// Index of the camera whose frame is integrated.
        camera: usize,
        /// Generation to tag the integrate with.
        generation: u64,
        /// 1-based position of this frame in the camera's budget.
        frame_number: u32,
    },
}

/// Result of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Step {
    /// The session after the transition.
    pub session: ReconstructionSession,
    /// Decision about the frame, for frame transitions.
    pub decision: Option<FrameDecision>,
    /// Emitter configuration to apply, if it changed.
    pub emitters: Option<EmitterPlan>,
    /// Whether this transition reached [`SessionState::Done`].
    pub finished: bool,
}

impl Step {
    fn unchanged(session: ReconstructionSession) -> Self {
        Self {
            session,
            decision: None,
            emitters: None,
            finished: false,
        }
    }
}

/// Counters and state of one reconstruction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconstructionSession {
    /// Current state.
    pub state: SessionState,
    /// Lead-in frames seen from the active camera.
    pub lead_in_elapsed: u32,
    /// Frames integrated from the active camera.
    pub captured: u32,
    /// Frames to integrate per camera.
    pub target: u32,
    /// Lead-in frames to wait per camera.
    pub lead_in_threshold: u32,
    /// Bumped on every reconstruct and reset.
    pub generation: u64,
    /// Whether an integrate issued by this generation has not completed.
    pub integrate_in_flight: bool,
}

impl ReconstructionSession {
    /// Creates an idle session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a pass over all cameras.
    ///
    /// A no-op when no camera is attached or a pass is already running.
    /// Cameras excluded from reconstruction are skipped up front, so a
    /// pass with every camera excluded finishes immediately.
    pub fn reconstruct(self, uses: &[bool], lead_in_threshold: u32, target: u32) -> Step {
        if uses.is_empty() || self.state.is_active() {
            return Step::unchanged(self);
        }
        let started = Self {
            state: SessionState::Idle,
            lead_in_elapsed: 0,
            captured: 0,
            target,
            lead_in_threshold,
            generation: self.generation + 1,
            integrate_in_flight: false,
        };
        started.enter_camera(0, uses)
    }

    /// Returns to idle, invalidating all in-flight work.
    pub fn reset(self) -> Step {
        Step {
            session: Self {
                state: SessionState::Idle,
                lead_in_elapsed: 0,
                captured: 0,
                generation: self.generation + 1,
                integrate_in_flight: false,
                ..self
            },
            decision: None,
            emitters: Some(EmitterPlan::AllEnabled),
            finished: false,
        }
    }

    /// Handles a depth frame from camera `camera`.
    pub fn on_depth_frame(self, camera: usize, uses: &[bool]) -> Step {
        let Some(active) = self.state.active_camera() else {
            return self.with_decision(FrameDecision::PreviewOnly);
        };
        if camera != active {
            return self.with_decision(FrameDecision::DropOtherCamera);
        }
        if !uses.get(active).copied().unwrap_or(false) {
            let mut step = self.go_to_next(uses);
            step.decision = Some(FrameDecision::SkipCamera { camera: active });
            return step;
        }

        let mut session = self;
        if let SessionState::LeadIn(i) = session.state {
            if session.lead_in_elapsed < session.lead_in_threshold {
                session.lead_in_elapsed += 1;
                return session.with_decision(FrameDecision::LeadIn {
                    elapsed: session.lead_in_elapsed,
                });
            }
            session.state = SessionState::Capturing(i);
        }

        if session.integrate_in_flight {
            return session.with_decision(FrameDecision::DropInFlight);
        }

        session.integrate_in_flight = true;
        session.captured += 1;
        let decision = FrameDecision::Integrate {
            camera: active,
            generation: session.generation,
            frame_number: session.captured,
        };
        if session.captured >= session.target {
            let mut step = session.go_to_next(uses);
            step.decision = Some(decision);
            step
        } else {
            session.with_decision(decision)
        }
    }

    /// Moves past camera `camera` if it is the active one and has been
    /// excluded, without waiting for its next frame.
    pub fn on_camera_excluded(self, camera: usize, uses: &[bool]) -> Step {
        if self.state.active_camera() != Some(camera) || uses.get(camera).copied().unwrap_or(false) {
            return Step::unchanged(self);
        }
        let mut step = self.go_to_next(uses);
        step.decision = Some(FrameDecision::SkipCamera { camera });
        step
    }

    /// Records an integrate completion.
    ///
    /// Returns `false` if the completion belongs to an older generation
    /// and must be discarded.
    pub fn on_integrate_complete(self, generation: u64) -> (Self, bool) {
        if generation != self.generation {
            return (self, false);
        }
        (
            Self {
                integrate_in_flight: false,
                ..self
            },
            true,
        )
    }

    /// Whether a completion with `generation` is still current.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    fn with_decision(self, decision: FrameDecision) -> Step {
        Step {
            session: self,
            decision: Some(decision),
            emitters: None,
            finished: false,
        }
    }

    fn go_to_next(self, uses: &[bool]) -> Step {
        let next = self.state.active_camera().map_or(0, |i| i + 1);
        self.enter_camera(next, uses)
    }

    /// Moves to the first used camera at or after `from`, or to `Done`.
    fn enter_camera(self, from: usize, uses: &[bool]) -> Step {
        let next = (from..uses.len()).find(|&i| uses[i]);
        let session = Self {
            lead_in_elapsed: 0,
            captured: 0,
            state: next.map_or(SessionState::Done, SessionState::LeadIn),
            ..self
        };
        match next {
            Some(i) => Step {
                session,
                decision: None,
                emitters: Some(EmitterPlan::Exclusive(i)),
                finished: false,
            },
            None => Step {
                session,
                decision: None,
                emitters: Some(EmitterPlan::AllEnabled),
                finished: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn start(uses: &[bool]) -> Step {
        ReconstructionSession::new().reconstruct(uses, 30, 10)
    }

    #[test]
    fn test_reconstruct_without_cameras_is_noop() {
        let step = ReconstructionSession::new().reconstruct(&[], 30, 10);
        assert_eq!(step.session, ReconstructionSession::new());
        assert!(step.emitters.is_none());
    }

    #[test]
    fn test_reconstruct_enters_first_used_camera() {
        let step = start(&[false, true]);
        assert_eq!(step.session.state, SessionState::LeadIn(1));
        assert_eq!(step.emitters, Some(EmitterPlan::Exclusive(1)));
        assert_eq!(step.session.generation, 1);
    }

    #[test]
    fn test_all_disabled_finishes_immediately() {
        let step = start(&[false, false, false]);
        assert_eq!(step.session.state, SessionState::Done);
        assert!(step.finished);
        assert_eq!(step.emitters, Some(EmitterPlan::AllEnabled));
    }

    #[test]
    fn test_lead_in_then_capture_budget() {
        let uses = [true, false];
        let mut session = start(&uses).session;
        let mut integrates = 0;
        let mut finished = false;

        for _ in 0..40 {
            let step = session.on_depth_frame(0, &uses);
            if let Some(FrameDecision::Integrate { generation, .. }) = step.decision {
                integrates += 1;
                session = step.session.on_integrate_complete(generation).0;
            } else {
                session = step.session;
            }
            finished |= step.finished;
        }

        assert_eq!(integrates, 10);
        assert!(finished);
        assert_eq!(session.state, SessionState::Done);
    }

    #[test]
    fn test_lead_in_counts_threshold_frames() {
        let uses = [true];
        let mut session = start(&uses).session;
        for expected in 1..=30 {
            let step = session.on_depth_frame(0, &uses);
            assert_eq!(step.decision, Some(FrameDecision::LeadIn { elapsed: expected }));
            session = step.session;
        }
        let step = session.on_depth_frame(0, &uses);
        assert!(matches!(step.decision, Some(FrameDecision::Integrate { frame_number: 1, .. })));
        assert_eq!(step.session.state, SessionState::Capturing(0));
    }

    #[test]
    fn test_other_camera_frame_is_dropped() {
        let uses = [true, true];
        let mut session = ReconstructionSession::new().reconstruct(&uses, 0, 10).session;
        session = session.on_depth_frame(0, &uses).session;
        let (session, _) = session.on_integrate_complete(session.generation);
        assert_eq!(session.state, SessionState::Capturing(0));
        assert_eq!(session.captured, 1);

        let step = session.on_depth_frame(1, &uses);
        assert_eq!(step.decision, Some(FrameDecision::DropOtherCamera));
        assert_eq!(step.session, session);
    }

    #[test]
    fn test_frame_dropped_while_integrate_in_flight() {
        let uses = [true];
        let session = ReconstructionSession::new().reconstruct(&uses, 0, 10).session;
        let session = session.on_depth_frame(0, &uses).session;
        let step = session.on_depth_frame(0, &uses);
        assert_eq!(step.decision, Some(FrameDecision::DropInFlight));
        assert_eq!(step.session.captured, 1);
    }

    #[test]
    fn test_disabled_mid_session_is_skipped_on_next_frame() {
        let session = ReconstructionSession::new()
            .reconstruct(&[true, true], 5, 10)
            .session;
        let step = session.on_depth_frame(0, &[false, true]);
        assert_eq!(step.decision, Some(FrameDecision::SkipCamera { camera: 0 }));
        assert_eq!(step.session.state, SessionState::LeadIn(1));
        assert_eq!(step.emitters, Some(EmitterPlan::Exclusive(1)));
    }

    #[test]
    fn test_excluded_active_camera_is_skipped_without_frame() {
        let session = start(&[true, true]).session;
        let step = session.on_camera_excluded(0, &[false, true]);
        assert_eq!(step.session.state, SessionState::LeadIn(1));

        let unchanged = session.on_camera_excluded(1, &[true, false]);
        assert_eq!(unchanged.session, session);
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let uses = [true];
        let session = ReconstructionSession::new().reconstruct(&uses, 0, 10).session;
        let step = session.on_depth_frame(0, &uses);
        let Some(FrameDecision::Integrate { generation, .. }) = step.decision else {
            panic!("expected integrate");
        };
        let reset = step.session.reset().session;
        let (after, applied) = reset.on_integrate_complete(generation);
        assert!(!applied);
        assert_eq!(after, reset);
    }

    #[test]
    fn test_repeated_reset_bumps_generation() {
        let mut session = ReconstructionSession::new();
        for expected in 1..=3 {
            let step = session.reset();
            assert_eq!(step.session.generation, expected);
            assert_eq!(step.session.state, SessionState::Idle);
            assert!(step.decision.is_none());
            session = step.session;
        }
    }

    #[test]
    fn test_reconstruct_while_active_is_noop() {
        let session = start(&[true]).session;
        let step = session.reconstruct(&[true], 30, 10);
        assert_eq!(step.session, session);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reconstruct,
        Reset,
        Frame(usize),
        Complete,
        Toggle(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            1 => Just(Op::Reconstruct),
            1 => Just(Op::Reset),
            12 => (0usize..3).prop_map(Op::Frame),
            6 => Just(Op::Complete),
            1 => (0usize..3).prop_map(Op::Toggle),
        ]
    }

    proptest! {
        #[test]
        fn prop_session_invariants(
            initial in proptest::collection::vec(any::<bool>(), 1..=3),
            lead_in in 0u32..4,
            target in 1u32..4,
            ops in proptest::collection::vec(op(), 0..200),
        ) {
            let mut uses = initial;
            let count = uses.len();
            let mut emitters = vec![true; count];
            let mut session = ReconstructionSession::new();
            let mut pending: Option<u64> = None;
            let mut integrated_this_camera = 0u32;

            for op in ops {
                let before = session;
                let step = match op {
                    Op::Reconstruct => session.reconstruct(&uses, lead_in, target),
                    Op::Reset => session.reset(),
                    Op::Frame(cam) => session.on_depth_frame(cam % count, &uses),
                    Op::Complete => {
                        if let Some(generation) = pending.take() {
                            session = session.on_integrate_complete(generation).0;
                        }
                        continue;
                    }
                    Op::Toggle(cam) => {
                        uses[cam % count] = !uses[cam % count];
                        continue;
                    }
                };

                if let Some(plan) = step.emitters {
                    for (i, on) in emitters.iter_mut().enumerate() {
                        *on = plan.is_enabled(i);
                    }
                }
                if let Some(FrameDecision::Integrate { generation, .. }) = step.decision {
                    prop_assert!(pending.is_none() || pending != Some(generation));
                    pending = Some(generation);
                    integrated_this_camera += 1;
                    prop_assert!(integrated_this_camera <= target);
                }
                session = step.session;

                // Generation never decreases.
                prop_assert!(session.generation >= before.generation);

                if let Some(active) = session.state.active_camera() {
                    prop_assert!(active < count);
                    prop_assert_eq!(emitters.iter().filter(|&&on| on).count(), 1);
                    prop_assert!(emitters[active]);
                } else {
                    prop_assert!(emitters.iter().all(|&on| on));
                }

                if session.state.active_camera() != before.state.active_camera()
                    || session.generation != before.generation
                {
                    prop_assert_eq!(session.captured, 0);
                    prop_assert_eq!(session.lead_in_elapsed, 0);
                    integrated_this_camera = 0;
                }
            }
        }
    }
}
