//! Recorded Corner Replay
//!
//! Runs a full tracking session on a corner recording: loads the session
//! configuration and every camera's calibration, bootstraps the rig on the
//! first recorded frame set and tracks the marker through the rest.
//!
//! Usage:
//! ```bash
//! RUST_LOG=info cargo run --example track_replay -- \
//!   --config output/session.yaml \
//!   --recording output/synthetic_corners.csv \
//!   --output output/poses.csv
//! ```
//!
//! The output format follows the extension: `.csv` for one pose per row,
//! `.jsonl` for the rig followed by one pose (with its point cloud) per line.

use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;
use marker_tracker::session::InspectDecision;
use marker_tracker::util::{
    self, CsvPoseSink, JsonLinesPoseSink, RecordedCornerFinder, RecordedCornerSource,
};
use marker_tracker::{PoseSink, Session, SessionConfig};

/// Marker tracking over recorded corners
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Session configuration (YAML)
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Corner recording (CSV: frame,camera,index,u,v)
    #[arg(short = 'r', long)]
    recording: PathBuf,

    /// Pose output file (.csv or .jsonl)
    #[arg(short = 'o', long, default_value = "output/poses.csv")]
    output: PathBuf,

    /// Recorded frame sets to skip before bootstrapping
    #[arg(short = 's', long, default_value = "0")]
    skip: usize,
}

fn track<K: PoseSink>(
    config: &SessionConfig,
    cli: &Cli,
    sink: K,
) -> Result<(), Box<dyn std::error::Error>> {
    let intrinsics = config.load_intrinsics()?;
    let source = RecordedCornerSource::from_csv(&cli.recording, config.camera_count())?;
    let mut session = Session::new(config, intrinsics, source, RecordedCornerFinder, sink)?;

    if cli.skip > 0 {
        session.inspect(|i, _| {
            if i + 1 < cli.skip {
                InspectDecision::Continue
            } else {
                InspectDecision::Proceed
            }
        })?;
    }

    let rig = session.bootstrap()?;
    for camera in rig.cameras() {
        let c = camera.extrinsics.center();
        println!(
            "camera {} ({}): position ({:.3}, {:.3}, {:.3}), reprojection RMS {:.4} px",
            camera.index, config.cameras[camera.index].name, c.x, c.y, c.z, camera.reprojection_rms
        );
    }

    let summary = session.run()?;
    println!(
        "frames: {}, published: {}, marker not found: {}, triangulation failures: {}, alignment failures: {}",
        summary.frames,
        summary.published,
        summary.marker_not_found,
        summary.geometry_failures,
        summary.alignment_failures
    );
    if let Some(pose) = session.last_pose() {
        let t = pose.translation;
        println!("last pose: translation ({:.3}, {:.3}, {:.3})", t.x, t.y, t.z);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = SessionConfig::from_yaml_file(&cli.config)?;
    info!("Writing poses to {:?}", cli.output);

    if let Some(dir) = cli.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        util::ensure_output_dir(dir)?;
    }

    match extension(&cli.output).as_deref() {
        Some("jsonl") | Some("json") => track(&config, &cli, JsonLinesPoseSink::create(&cli.output)?),
        _ => track(&config, &cli, CsvPoseSink::create(&cli.output)?),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
