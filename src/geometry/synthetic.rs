//! Deterministic synthetic rigs and a camera source rendering a moving marker.
//!
//! Cameras follow the usual vision convention: `z` forward, `x` right and
//! `y` down in the image.

use nalgebra::{Isometry3, Point2, Point3, Vector3};

use crate::camera::{Intrinsics, ProjectionMatrix};
use crate::error::SourceError;
use crate::geometry::{Correspondence, MarkerPointSet};
use crate::session::CameraSource;
use crate::util::CornerFrame;

/// World→camera pose of a camera at `eye` looking at `target`.
///
/// `up` is the world direction that appears upwards in the image.
pub fn look_at(eye: &Point3<f64>, target: &Point3<f64>, up: &Vector3<f64>) -> Isometry3<f64> {
    Isometry3::face_towards(eye, target, &-up).inverse()
}

/// PS Eye-like intrinsics at 640x480.
pub fn default_intrinsics() -> Intrinsics {
    Intrinsics {
        fx: 540.2871,
        fy: 539.8843,
        cx: 318.4416,
        cy: 243.1127,
        skew: 0.0,
    }
}

/// A set of cameras with known intrinsics and world→camera poses.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticRig {
    cameras: Vec<(Intrinsics, Isometry3<f64>)>,
}

impl SyntheticRig {
    pub fn new(cameras: Vec<(Intrinsics, Isometry3<f64>)>) -> Self {
        SyntheticRig { cameras }
    }

    /// Two cameras above the marker, looking down at its centroid from
    /// opposite sides.
    pub fn two_camera(marker: &MarkerPointSet) -> Self {
        let c = marker.centroid();
        let eyes = [
            c + Vector3::new(-25.0, 45.0, -30.0),
            c + Vector3::new(30.0, 40.0, -25.0),
        ];
        Self::new(
            eyes.iter()
                .map(|eye| (default_intrinsics(), look_at(eye, &c, &Vector3::y())))
                .collect(),
        )
    }

    /// `count` cameras evenly spaced on a circle of `radius` around the marker
    /// centroid, `height` above it.
    pub fn ring(marker: &MarkerPointSet, count: usize, radius: f64, height: f64) -> Self {
        let c = marker.centroid();
        Self::new(
            (0..count)
                .map(|i| {
                    let angle = std::f64::consts::TAU * i as f64 / count as f64 + 0.3;
                    let eye = c + Vector3::new(radius * angle.cos(), height, radius * angle.sin());
                    (default_intrinsics(), look_at(&eye, &c, &Vector3::y()))
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn intrinsics(&self) -> Vec<Intrinsics> {
        self.cameras.iter().map(|(k, _)| *k).collect()
    }

    pub fn poses(&self) -> Vec<Isometry3<f64>> {
        self.cameras.iter().map(|(_, pose)| *pose).collect()
    }

    pub fn projections(&self) -> Vec<ProjectionMatrix> {
        self.cameras
            .iter()
            .map(|(k, pose)| ProjectionMatrix::from_parts(k, pose))
            .collect()
    }

    /// Projects `points` into one camera; `None` if any point is behind it.
    pub fn observe_camera(&self, camera: usize, points: &[Point3<f64>]) -> Option<Correspondence> {
        let (k, pose) = self.cameras.get(camera)?;
        points
            .iter()
            .map(|p| k.project(&pose.transform_point(p)))
            .collect()
    }

    /// Projects `points` into every camera.
    pub fn observe(&self, points: &[Point3<f64>]) -> Option<Vec<Correspondence>> {
        (0..self.len())
            .map(|camera| self.observe_camera(camera, points))
            .collect()
    }
}

/// Camera source showing the marker moving along a trajectory.
///
/// The first `lead_in` captures show the marker at its reference pose (for
/// inspection and bootstrap); capture `lead_in + i` shows it moved by
/// `trajectory[i]`. The source is exhausted after the last trajectory pose.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    rig: SyntheticRig,
    reference: Vec<Point3<f64>>,
    trajectory: Vec<Isometry3<f64>>,
    lead_in: usize,
    dropouts: Vec<(usize, usize)>,
    jitter: f64,
    cursor: usize,
    grabbed: bool,
}

impl SyntheticSource {
    pub fn new(rig: SyntheticRig, marker: &MarkerPointSet, trajectory: Vec<Isometry3<f64>>) -> Self {
        SyntheticSource {
            rig,
            reference: marker.points().to_vec(),
            trajectory,
            lead_in: 1,
            dropouts: Vec::new(),
            jitter: 0.0,
            cursor: 0,
            grabbed: false,
        }
    }

    pub fn with_lead_in(mut self, lead_in: usize) -> Self {
        self.lead_in = lead_in;
        self
    }

    /// Hides the marker from `camera` in capture number `capture`.
    pub fn with_dropout(mut self, capture: usize, camera: usize) -> Self {
        self.dropouts.push((capture, camera));
        self
    }

    /// Adds a deterministic pixel perturbation of at most `amplitude` per axis.
    pub fn with_pixel_jitter(mut self, amplitude: f64) -> Self {
        self.jitter = amplitude;
        self
    }

    pub fn rig(&self) -> &SyntheticRig {
        &self.rig
    }

    /// Total number of captures.
    pub fn len(&self) -> usize {
        self.lead_in + self.trajectory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marker motion applied in capture `capture`.
    pub fn pose_at(&self, capture: usize) -> Isometry3<f64> {
        capture
            .checked_sub(self.lead_in)
            .and_then(|i| self.trajectory.get(i).copied())
            .unwrap_or_else(Isometry3::identity)
    }

    /// Renders the corner frames of capture `capture`.
    pub fn frames_at(&self, capture: usize) -> Vec<CornerFrame> {
        let motion = self.pose_at(capture);
        let moved: Vec<Point3<f64>> = self.reference.iter().map(|p| motion * p).collect();

        (0..self.rig.len())
            .map(|camera| {
                let corners = if self.dropouts.contains(&(capture, camera)) {
                    None
                } else {
                    self.rig
                        .observe_camera(camera, &moved)
                        .map(|corners| self.perturb(capture, camera, corners))
                };
                CornerFrame {
                    frame: capture,
                    camera,
                    corners,
                }
            })
            .collect()
    }

    /// Every capture, as written by [`crate::util::write_recording`].
    pub fn recording(&self) -> Vec<Vec<CornerFrame>> {
        (0..self.len()).map(|capture| self.frames_at(capture)).collect()
    }

    fn perturb(&self, capture: usize, camera: usize, corners: Correspondence) -> Correspondence {
        if self.jitter == 0.0 {
            return corners;
        }
        corners
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let phase = i as f64 + 0.37 * camera as f64 + 0.11 * capture as f64;
                p + self.jitter * Point2::new((1.7 * phase).sin(), (2.3 * phase).cos()).coords
            })
            .collect()
    }
}

impl CameraSource for SyntheticSource {
    type Frame = CornerFrame;

    fn camera_count(&self) -> usize {
        self.rig.len()
    }

    fn grab_all(&mut self) -> Result<(), SourceError> {
        if self.cursor >= self.len() {
            return Err(SourceError::Exhausted);
        }
        self.grabbed = true;
        Ok(())
    }

    fn retrieve_all(&mut self) -> Result<Vec<CornerFrame>, SourceError> {
        if !std::mem::take(&mut self.grabbed) {
            return Err(SourceError::Device {
                camera: 0,
                message: "retrieve without grab".to_string(),
            });
        }
        let frames = self.frames_at(self.cursor);
        self.cursor += 1;
        Ok(frames)
    }
}
