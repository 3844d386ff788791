//! Synthetic cameras for running the pipeline without hardware.

use std::sync::Arc;

use parking_lot::Mutex;

use depthfusion_core::{CameraFault, CoordinateMapping, DepthCamera, DepthFrame, DepthRange};

#[derive(Debug)]
struct MonitorState {
    emitter_enabled: bool,
    emitter_switches: usize,
    range: DepthRange,
    near_supported: bool,
    emitter_fault: Option<CameraFault>,
}

/// Observes and steers a [`SyntheticCamera`] after it has been handed over.
#[derive(Debug, Clone)]
pub struct CameraMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl CameraMonitor {
    /// Whether the emitter is currently on.
    pub fn emitter_enabled(&self) -> bool {
        self.state.lock().emitter_enabled
    }

    /// Number of times the emitter was switched.
    pub fn emitter_switches(&self) -> usize {
        self.state.lock().emitter_switches
    }

    /// The depth range last applied.
    pub fn range(&self) -> DepthRange {
        self.state.lock().range
    }

    /// Makes the next emitter switches fail with `fault`, or succeed again with `None`.
    pub fn set_emitter_fault(&self, fault: Option<CameraFault>) {
        self.state.lock().emitter_fault = fault;
    }
}

/// A depth camera that accepts every command and tracks its state.
pub struct SyntheticCamera {
    connection_id: String,
    mapping: Arc<dyn CoordinateMapping>,
    state: Arc<Mutex<MonitorState>>,
}

impl SyntheticCamera {
    /// Creates a camera with an identity depth-to-color mapping.
    pub fn new(connection_id: impl Into<String>) -> (Self, CameraMonitor) {
        Self::with_mapping(connection_id, Arc::new(identity_mapping))
    }

    /// Creates a camera with a custom depth-to-color mapping.
    pub fn with_mapping(
        connection_id: impl Into<String>,
        mapping: Arc<dyn CoordinateMapping>,
    ) -> (Self, CameraMonitor) {
        let state = Arc::new(Mutex::new(MonitorState {
            emitter_enabled: true,
            emitter_switches: 0,
            range: DepthRange::Default,
            near_supported: true,
            emitter_fault: None,
        }));
        let camera = Self {
            connection_id: connection_id.into(),
            mapping,
            state: Arc::clone(&state),
        };
        (camera, CameraMonitor { state })
    }

    /// Makes the camera reject near mode.
    #[must_use]
    pub fn without_near_mode(self) -> Self {
        self.state.lock().near_supported = false;
        self
    }
}

impl DepthCamera for SyntheticCamera {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn set_emitter_enabled(&mut self, enabled: bool) -> Result<(), CameraFault> {
        let mut state = self.state.lock();
        if let Some(fault) = state.emitter_fault.clone() {
            return Err(fault);
        }
        if state.emitter_enabled != enabled {
            state.emitter_switches += 1;
        }
        state.emitter_enabled = enabled;
        Ok(())
    }

    fn set_range(&mut self, range: DepthRange) -> Result<(), CameraFault> {
        let mut state = self.state.lock();
        if range == DepthRange::Near && !state.near_supported {
            return Err(CameraFault::NearModeUnsupported);
        }
        state.range = range;
        Ok(())
    }

    fn coordinate_mapping(&self) -> Arc<dyn CoordinateMapping> {
        Arc::clone(&self.mapping)
    }
}

#[allow(clippy::cast_possible_wrap)]
fn identity_mapping(x: u32, y: u32) -> (i32, i32) {
    (x as i32, y as i32)
}

/// A depth frame of a flat wall `distance_mm` away.
pub fn wall_depth_frame(width: u32, height: u32, distance_mm: u16, timestamp: i64) -> DepthFrame {
    DepthFrame {
        samples: vec![distance_mm; width as usize * height as usize],
        width,
        height,
        timestamp,
    }
}
