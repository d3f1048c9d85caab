//! Pose sinks: CSV and JSON-lines exporters and an in-memory recorder.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::Writer;
use log::info;
use nalgebra::Point3;
use serde::Serialize;

use crate::bootstrap::Rig;
use crate::camera::Intrinsics;
use crate::error::SinkError;
use crate::geometry::RigidTransform;
use crate::session::PoseSink;

/// A pose as handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedPose {
    pub frame: u64,
    pub pose: RigidTransform,
    pub cloud: Vec<Point3<f64>>,
}

/// Keeps everything it receives in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub rigs: Vec<Rig>,
    pub poses: Vec<PublishedPose>,
}

impl PoseSink for RecordingSink {
    fn publish_rig(&mut self, rig: &Rig) -> Result<(), SinkError> {
        self.rigs.push(rig.clone());
        Ok(())
    }

    fn publish_pose(
        &mut self,
        frame: u64,
        pose: &RigidTransform,
        cloud: &[Point3<f64>],
    ) -> Result<(), SinkError> {
        self.poses.push(PublishedPose {
            frame,
            pose: *pose,
            cloud: cloud.to_vec(),
        });
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PoseRow {
    frame: u64,
    qw: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    tx: f64,
    ty: f64,
    tz: f64,
}

impl PoseRow {
    fn new(frame: u64, pose: &RigidTransform) -> Self {
        let q = pose.quaternion();
        PoseRow {
            frame,
            qw: q.w,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            tx: pose.translation.x,
            ty: pose.translation.y,
            tz: pose.translation.z,
        }
    }
}

/// One CSV row per tracked frame: frame number, unit quaternion, translation.
pub struct CsvPoseSink<W: Write> {
    writer: Writer<W>,
}

impl CsvPoseSink<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| SinkError::Io(format!("couldn't create {}: {e}", path.display())))?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> CsvPoseSink<W> {
    pub fn from_writer(writer: W) -> Self {
        CsvPoseSink {
            writer: Writer::from_writer(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.to_string()))
    }
}

impl<W: Write> PoseSink for CsvPoseSink<W> {
    fn publish_rig(&mut self, rig: &Rig) -> Result<(), SinkError> {
        for camera in rig.cameras() {
            let c = camera.extrinsics.center();
            info!(
                "camera {}: center ({:.3}, {:.3}, {:.3})",
                camera.index, c.x, c.y, c.z
            );
        }
        Ok(())
    }

    fn publish_pose(
        &mut self,
        frame: u64,
        pose: &RigidTransform,
        _cloud: &[Point3<f64>],
    ) -> Result<(), SinkError> {
        self.writer.serialize(PoseRow::new(frame, pose))?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CameraRecord {
    index: usize,
    intrinsics: Intrinsics,
    /// Camera→world rotation as `[w, x, y, z]`.
    rotation: [f64; 4],
    /// Camera centre in world coordinates.
    position: [f64; 3],
    reprojection_rms: f64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line {
    Rig {
        cameras: Vec<CameraRecord>,
    },
    Pose {
        frame: u64,
        rotation: [f64; 4],
        translation: [f64; 3],
        cloud: Vec<[f64; 3]>,
    },
}

/// One JSON document per line: a `rig` line at bootstrap, then a `pose`
/// line (with the reconstructed cloud) for every tracked frame.
pub struct JsonLinesPoseSink<W: Write> {
    writer: W,
}

impl JsonLinesPoseSink<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| SinkError::Io(format!("couldn't create {}: {e}", path.display())))?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }
}

impl<W: Write> JsonLinesPoseSink<W> {
    pub fn from_writer(writer: W) -> Self {
        JsonLinesPoseSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, line: &Line) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> PoseSink for JsonLinesPoseSink<W> {
    fn publish_rig(&mut self, rig: &Rig) -> Result<(), SinkError> {
        let cameras = rig
            .cameras()
            .iter()
            .map(|camera| {
                let pose = camera.extrinsics.camera_to_world();
                let q = pose.rotation;
                let t = pose.translation.vector;
                CameraRecord {
                    index: camera.index,
                    intrinsics: camera.intrinsics,
                    rotation: [q.w, q.i, q.j, q.k],
                    position: [t.x, t.y, t.z],
                    reprojection_rms: camera.reprojection_rms,
                }
            })
            .collect();
        self.write_line(&Line::Rig { cameras })
    }

    fn publish_pose(
        &mut self,
        frame: u64,
        pose: &RigidTransform,
        cloud: &[Point3<f64>],
    ) -> Result<(), SinkError> {
        let q = pose.quaternion();
        let t = pose.translation;
        self.write_line(&Line::Pose {
            frame,
            rotation: [q.w, q.i, q.j, q.k],
            translation: [t.x, t.y, t.z],
            cloud: cloud.iter().map(|p| [p.x, p.y, p.z]).collect(),
        })
    }
}
