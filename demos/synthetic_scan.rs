//! Demo running a full reconstruction pass over three synthetic cameras.
//!
//! Each camera sees a flat wall; one is excluded from reconstruction. Run
//! with `RUST_LOG=debug` to follow the scheduler.

use std::thread;
use std::time::Duration;

use depthfusion::*;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn main() -> Result<()> {
    init_logging();

    let options = FusionOptions {
        lead_in_frames: 5,
        frames_per_camera: 4,
        status_throttle_ms: 0,
        ..FusionOptions::default()
    };
    let backend = RecordingBackend::new();
    let log = backend.log();
    let mut controller = FusionController::new(Box::new(backend), options)?;
    let events = controller.events();

    let mut cameras = Vec::new();
    for (i, angle) in [0.0_f32, 120.0, 240.0].into_iter().enumerate() {
        let (camera, monitor) = SyntheticCamera::new(format!("synthetic-{i}"));
        let settings = SlotSettings {
            use_in_reconstruction: i != 2,
            calibration: CameraCalibration::new(0.0, angle, 0.0, 1.5),
            ..SlotSettings::default()
        };
        let id = controller.attach_camera(Box::new(camera), settings)?;
        cameras.push((id, monitor));
    }

    // Camera callbacks run on their own threads in a real rig.
    let sink = controller.frame_sink();
    let walls: Vec<(CameraId, u16)> = cameras
        .iter()
        .zip([1200, 1350, 1500])
        .map(|((id, _), distance)| (*id, distance))
        .collect();
    let feeder = thread::spawn(move || {
        for timestamp in 0..200 {
            for &(id, distance) in &walls {
                // A full queue drops the frame, as a busy device would.
                let _ = sink.depth(id, wall_depth_frame(WIDTH, HEIGHT, distance, timestamp));
            }
            thread::sleep(Duration::from_millis(2));
        }
    });

    controller.reconstruct()?;
    while controller.session().state != SessionState::Done {
        controller.sync()?;
        controller.tick()?;
        for event in events.try_iter() {
            match event {
                FusionEvent::StatusMessage(message) => println!("status: {message}"),
                FusionEvent::ReconstructionDone => println!("reconstruction done"),
                FusionEvent::VolumeCreationFailed(reason) => println!("volume failed: {reason}"),
                FusionEvent::FramePreviewReady(_) => {}
            }
        }
        if feeder.is_finished() && controller.session().state != SessionState::Done {
            println!("ran out of frames");
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    let _ = feeder.join();
    controller.sync()?;

    for (id, monitor) in &cameras {
        println!(
            "camera {id}: emitter {}, switched {} times",
            if monitor.emitter_enabled() { "on" } else { "off" },
            monitor.emitter_switches()
        );
    }

    let mesh = controller.export_mesh(1)?;
    println!(
        "{} integrations, mesh with {} triangles",
        log.count(|c| matches!(c, BackendCall::IntegrateDepth)),
        mesh.num_triangles()
    );
    Ok(())
}
