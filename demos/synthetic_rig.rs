//! Synthetic Rig Demo
//!
//! Generates a calibrated rig looking at an 8x5 marker, moves the marker along
//! a smooth trajectory and tracks it end to end. The tracked poses are compared
//! against ground truth.
//!
//! Besides the pose file, the demo writes a session configuration, one
//! calibration file per camera and the corner recording, so the same data can
//! be replayed with the `track_replay` example.
//!
//! Usage:
//! ```bash
//! cargo run --example synthetic_rig -- --cameras 3 --frames 200 --jitter 0.2
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{info, warn};
use marker_tracker::geometry::synthetic::{SyntheticRig, SyntheticSource};
use marker_tracker::session::CameraConfig;
use marker_tracker::util::{self, CsvPoseSink, RecordedCornerFinder, RecordingSink};
use marker_tracker::{GridSize, Intrinsics, PoseSink, Session, SessionConfig};
use nalgebra::{Isometry3, Vector3};
use serde_json::json;

/// Synthetic end-to-end tracking run
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of cameras
    #[arg(short = 'n', long, default_value = "2")]
    cameras: usize,

    /// Number of tracked frames
    #[arg(short = 'f', long, default_value = "120")]
    frames: usize,

    /// Pixel jitter amplitude added to every corner
    #[arg(short = 'j', long, default_value = "0.0")]
    jitter: f64,

    /// Output directory
    #[arg(short = 'o', long, default_value = "output")]
    output_dir: PathBuf,
}

fn trajectory(frames: usize) -> Vec<Isometry3<f64>> {
    (0..frames)
        .map(|i| {
            let s = i as f64 / frames.max(1) as f64 * std::f64::consts::TAU;
            Isometry3::new(
                Vector3::new(4.0 * s.sin(), 0.5 * (2.0 * s).sin(), 3.0 * (1.0 - s.cos())),
                Vector3::new(0.05 * s.sin(), 0.4 * s.sin(), 0.05 * s.cos()),
            )
        })
        .collect()
}

fn write_calibration(path: &Path, k: &Intrinsics) -> Result<(), Box<dyn std::error::Error>> {
    let document = json!({
        "cameraMatrix": {
            "type_id": "opencv-matrix",
            "rows": 3,
            "cols": 3,
            "dt": "d",
            "data": [k.fx, k.skew, k.cx, 0.0, k.fy, k.cy, 0.0, 0.0, 1.0]
        }
    });
    fs::write(path, serde_json::to_string_pretty(&document)?)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::Info)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    util::ensure_output_dir(&cli.output_dir)?;

    let cameras = (0..cli.cameras)
        .map(|i| CameraConfig {
            name: format!("cam{i}"),
            calibration: PathBuf::from(format!("cam{i}.json")),
        })
        .collect();
    let config = SessionConfig::new(cameras, GridSize::new(8, 5), 3.025);
    config.validate()?;
    let marker = config.marker();

    let rig = if cli.cameras == 2 {
        SyntheticRig::two_camera(&marker)
    } else {
        SyntheticRig::ring(&marker, cli.cameras, 35.0, 45.0)
    };
    let truth = trajectory(cli.frames);
    let source = SyntheticSource::new(rig.clone(), &marker, truth.clone())
        .with_pixel_jitter(cli.jitter)
        .with_dropout(cli.frames / 2, 0);

    // Everything needed to replay this run.
    for (camera, k) in config.cameras.iter().zip(rig.intrinsics()) {
        write_calibration(&cli.output_dir.join(&camera.calibration), &k)?;
    }
    fs::write(cli.output_dir.join("session.yaml"), config.to_yaml_string()?)?;
    let recording = fs::File::create(cli.output_dir.join("synthetic_corners.csv"))?;
    util::write_recording(recording, &source.recording())?;
    info!("Wrote replay data to {:?}", cli.output_dir);

    let mut session = Session::new(
        &config,
        rig.intrinsics(),
        source,
        RecordedCornerFinder,
        RecordingSink::default(),
    )?;
    session.bootstrap()?;
    let summary = session.run()?;
    info!("{:?}", summary);

    let sink = session.into_sink();
    let mut export = CsvPoseSink::create(cli.output_dir.join("synthetic_poses.csv"))?;
    let (mut max_angle, mut max_offset) = (0.0_f64, 0.0_f64);
    for published in &sink.poses {
        export.publish_pose(published.frame, &published.pose, &published.cloud)?;

        // Capture 0 is the bootstrap frame; tracking frame i shows truth[i].
        let expected = &truth[published.frame as usize];
        let angle = published
            .pose
            .rotation
            .angle_to(&expected.rotation.to_rotation_matrix());
        let offset = (published.pose.translation - (expected * marker.centroid()).coords).norm();
        max_angle = max_angle.max(angle);
        max_offset = max_offset.max(offset);
    }

    println!("Tracked {} of {} frames", summary.published, summary.frames);
    println!(
        "Max rotation error: {:.6} deg, max translation error: {:.6}",
        max_angle.to_degrees(),
        max_offset
    );
    if summary.published + summary.skipped() != summary.frames {
        warn!("frame accounting mismatch: {:?}", summary);
    }
    Ok(())
}
