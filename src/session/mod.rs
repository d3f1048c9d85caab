//! The tracking session: collaborator interfaces, state machine and driver.
//!
//! A session moves through
//! `Idle → Inspecting → Bootstrapping → Tracking → Terminated`.
//! Configuration and calibration failures during bootstrap are fatal and end
//! the session. Per-frame geometry and alignment failures only skip the frame;
//! the last published pose stays the visible state.
//!
//! The driver is a single-threaded synchronous pump. Every iteration grabs on
//! all cameras before retrieving any of them, and blocks until every camera
//! has delivered. There is no capture timeout. Cancellation is cooperative
//! through a [`StopSignal`] checked once per iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use nalgebra::Point3;

use crate::bootstrap::{self, Rig};
use crate::camera::Intrinsics;
use crate::error::{
    AlignmentError, CalibrationError, ConfigError, GeometryError, SessionError, SinkError,
    SourceError,
};
use crate::geometry::{
    Correspondence, GridSize, MarkerPointSet, RigidAligner, RigidTransform, Triangulator,
};

pub mod config;
pub mod stats;

pub use config::{CameraConfig, SessionConfig, TrackingOptions};
pub use stats::{FrameRateMeter, TrackingSummary};

/// Synchronized multi-camera capture.
///
/// `grab_all` latches a frame on every camera before any of them is decoded by
/// `retrieve_all`, keeping the inter-camera time skew small.
pub trait CameraSource {
    type Frame;

    fn camera_count(&self) -> usize;

    fn grab_all(&mut self) -> Result<(), SourceError>;

    /// One frame per camera, in camera order.
    fn retrieve_all(&mut self) -> Result<Vec<Self::Frame>, SourceError>;
}

/// Locates the marker corners in one frame.
pub trait CorrespondenceFinder<F> {
    /// Row-major corners of a `grid` sized marker, or `None` if the marker is
    /// not fully visible. Partial results are never returned.
    fn find(&mut self, frame: &F, grid: GridSize) -> Option<Correspondence>;
}

/// Consumer of bootstrap and tracking results.
pub trait PoseSink {
    /// Called once with the calibrated rig (camera→world poses and intrinsics).
    fn publish_rig(&mut self, rig: &Rig) -> Result<(), SinkError>;

    /// Called for every successfully tracked frame.
    fn publish_pose(
        &mut self,
        frame: u64,
        pose: &RigidTransform,
        cloud: &[Point3<f64>],
    ) -> Result<(), SinkError>;
}

/// Cooperative cancellation flag shared between the session and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Inspecting,
    Bootstrapping,
    Tracking,
    Terminated,
}

/// Verdict of the inspection callback for one captured frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectDecision {
    Continue,
    Proceed,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MarkerNotFound { camera: usize },
    Geometry(GeometryError),
    Alignment(AlignmentError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Published(RigidTransform),
    Skipped(SkipReason),
    /// The stop signal was raised before the frame was captured.
    Stopped,
}

pub struct Session<'a, S, F, K>
where
    S: CameraSource,
    F: CorrespondenceFinder<S::Frame>,
    K: PoseSink,
{
    config: &'a SessionConfig,
    marker: MarkerPointSet,
    intrinsics: Vec<Intrinsics>,
    source: S,
    finder: F,
    sink: K,
    triangulator: Triangulator,
    aligner: RigidAligner,
    state: SessionState,
    rig: Option<Rig>,
    last_pose: Option<RigidTransform>,
    frame: u64,
    stop: StopSignal,
    summary: TrackingSummary,
    meter: FrameRateMeter,
}

impl<'a, S, F, K> Session<'a, S, F, K>
where
    S: CameraSource,
    F: CorrespondenceFinder<S::Frame>,
    K: PoseSink,
{
    /// Creates an idle session.
    ///
    /// `intrinsics` must hold one entry per configured camera, and the source
    /// must deliver the same number of frames.
    pub fn new(
        config: &'a SessionConfig,
        intrinsics: Vec<Intrinsics>,
        source: S,
        finder: F,
        sink: K,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        if intrinsics.len() != config.camera_count() {
            return Err(ConfigError::InvalidSession(format!(
                "{} cameras configured but {} intrinsics supplied",
                config.camera_count(),
                intrinsics.len()
            ))
            .into());
        }
        if source.camera_count() != config.camera_count() {
            return Err(ConfigError::InvalidSession(format!(
                "{} cameras configured but the source delivers {}",
                config.camera_count(),
                source.camera_count()
            ))
            .into());
        }

        let marker = config.marker();
        Ok(Session {
            config,
            triangulator: Triangulator::new(marker.len())
                .with_rank_tolerance(config.tracking.triangulation_rank_tolerance),
            aligner: RigidAligner::new(config.tracking.alignment_rank_tolerance),
            marker,
            intrinsics,
            source,
            finder,
            sink,
            state: SessionState::Idle,
            rig: None,
            last_pose: None,
            frame: 0,
            stop: StopSignal::new(),
            summary: TrackingSummary::default(),
            meter: FrameRateMeter::new(Duration::from_millis(
                config.tracking.report_interval_ms,
            )),
        })
    }

    /// Uses an externally owned stop signal instead of the session's own.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn stop(&mut self) {
        self.stop.raise();
        self.terminate();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn marker(&self) -> &MarkerPointSet {
        &self.marker
    }

    pub fn rig(&self) -> Option<&Rig> {
        self.rig.as_ref()
    }

    /// The last successfully published pose.
    pub fn last_pose(&self) -> Option<&RigidTransform> {
        self.last_pose.as_ref()
    }

    pub fn summary(&self) -> &TrackingSummary {
        &self.summary
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    fn terminate(&mut self) {
        if self.state != SessionState::Terminated {
            debug!("session {:?} -> Terminated", self.state);
            self.state = SessionState::Terminated;
        }
    }

    fn stopped(&mut self) -> bool {
        if self.stop.is_raised() {
            self.terminate();
            true
        } else {
            false
        }
    }

    fn capture(&mut self) -> Result<Vec<S::Frame>, SourceError> {
        self.source.grab_all()?;
        let frames = self.source.retrieve_all()?;
        if frames.len() != self.intrinsics.len() {
            return Err(SourceError::Device {
                camera: frames.len().min(self.intrinsics.len()),
                message: format!(
                    "retrieved {} frames for {} cameras",
                    frames.len(),
                    self.intrinsics.len()
                ),
            });
        }
        Ok(frames)
    }

    /// Runs capture-only iterations until `decide` returns `Proceed` or `Quit`.
    ///
    /// No computation is done on the frames; they are handed to `decide`
    /// together with the iteration number so the caller can frame the marker.
    pub fn inspect<D>(&mut self, mut decide: D) -> Result<InspectDecision, SessionError>
    where
        D: FnMut(usize, &[S::Frame]) -> InspectDecision,
    {
        match self.state {
            SessionState::Idle | SessionState::Inspecting => {}
            other => return Err(SessionError::InvalidState(other)),
        }
        self.state = SessionState::Inspecting;

        let mut iteration = 0;
        loop {
            if self.stopped() {
                return Ok(InspectDecision::Quit);
            }
            let frames = match self.capture() {
                Ok(frames) => frames,
                Err(e) => {
                    self.terminate();
                    return Err(e.into());
                }
            };
            match decide(iteration, &frames) {
                InspectDecision::Continue => iteration += 1,
                InspectDecision::Proceed => return Ok(InspectDecision::Proceed),
                InspectDecision::Quit => {
                    self.terminate();
                    return Ok(InspectDecision::Quit);
                }
            }
        }
    }

    /// Captures one synchronized frame set and calibrates the rig from it.
    ///
    /// Any failure is fatal: the session moves to `Terminated` and the error
    /// is returned.
    pub fn bootstrap(&mut self) -> Result<&Rig, SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Inspecting => {}
            other => return Err(SessionError::InvalidState(other)),
        }
        if self.stopped() {
            return Err(SessionError::Stopped);
        }
        self.state = SessionState::Bootstrapping;

        match self.try_bootstrap() {
            Ok(rig) => {
                info!("bootstrap complete: {} cameras calibrated", rig.len());
                self.state = SessionState::Tracking;
                Ok(self.rig.insert(rig))
            }
            Err(e) => {
                error!("bootstrap failed: {}", e);
                self.terminate();
                Err(e)
            }
        }
    }

    fn try_bootstrap(&mut self) -> Result<Rig, SessionError> {
        let frames = self.capture()?;
        let grid = self.marker.grid_size();
        let correspondences = frames
            .iter()
            .enumerate()
            .map(|(camera, frame)| {
                self.finder
                    .find(frame, grid)
                    .ok_or(CalibrationError::MarkerNotFound { camera })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rig = bootstrap::bootstrap(
            &self.marker,
            &correspondences,
            &self.intrinsics,
            &self.config.bootstrap,
        )?;
        self.sink.publish_rig(&rig)?;
        Ok(rig)
    }

    /// One tracking iteration: capture, find, triangulate, align, publish.
    ///
    /// Frames where the marker is missing in any view, or whose geometry is
    /// degenerate, are skipped. Source and sink failures are returned as
    /// errors.
    pub fn track_frame(&mut self) -> Result<FrameOutcome, SessionError> {
        if self.state != SessionState::Tracking {
            return Err(SessionError::InvalidState(self.state));
        }
        if self.stopped() {
            return Ok(FrameOutcome::Stopped);
        }

        let frames = self.capture()?;
        let frame = self.frame;
        self.frame += 1;
        self.summary.frames += 1;

        let outcome = self.process(frame, &frames)?;
        match &outcome {
            FrameOutcome::Published(_) => {
                self.summary.published += 1;
                self.meter.tick();
            }
            FrameOutcome::Skipped(reason) => {
                match reason {
                    SkipReason::MarkerNotFound { camera } => {
                        self.summary.marker_not_found += 1;
                        debug!("frame {}: marker not found in camera {}", frame, camera);
                    }
                    SkipReason::Geometry(e) => {
                        self.summary.geometry_failures += 1;
                        warn!("frame {}: triangulation failed: {}", frame, e);
                    }
                    SkipReason::Alignment(e) => {
                        self.summary.alignment_failures += 1;
                        warn!("frame {}: alignment failed: {}", frame, e);
                    }
                }
            }
            FrameOutcome::Stopped => {}
        }
        Ok(outcome)
    }

    fn process(&mut self, frame: u64, frames: &[S::Frame]) -> Result<FrameOutcome, SessionError> {
        let grid = self.marker.grid_size();
        let mut correspondences = Vec::with_capacity(frames.len());
        for (camera, image) in frames.iter().enumerate() {
            match self.finder.find(image, grid) {
                Some(corners) => correspondences.push(corners),
                None => {
                    return Ok(FrameOutcome::Skipped(SkipReason::MarkerNotFound { camera }));
                }
            }
        }

        let projections = match &self.rig {
            Some(rig) => rig.projections(),
            None => return Err(SessionError::InvalidState(self.state)),
        };
        let cloud = match self.triangulator.triangulate(&projections, &correspondences) {
            Ok(cloud) => cloud,
            Err(e) => return Ok(FrameOutcome::Skipped(SkipReason::Geometry(e))),
        };
        let pose = match self.aligner.align(self.marker.points(), &cloud) {
            Ok(pose) => pose,
            Err(e) => return Ok(FrameOutcome::Skipped(SkipReason::Alignment(e))),
        };

        self.sink.publish_pose(frame, &pose, &cloud)?;
        self.last_pose = Some(pose);
        Ok(FrameOutcome::Published(pose))
    }

    /// Tracks until the stop signal is raised or the source is exhausted.
    pub fn run(&mut self) -> Result<TrackingSummary, SessionError> {
        if self.state != SessionState::Tracking {
            return Err(SessionError::InvalidState(self.state));
        }

        loop {
            match self.track_frame() {
                Ok(FrameOutcome::Stopped) => {
                    info!("stop requested after {} frames", self.summary.frames);
                    break;
                }
                Ok(_) => {}
                Err(SessionError::Source(SourceError::Exhausted)) => {
                    info!("camera source exhausted after {} frames", self.summary.frames);
                    break;
                }
                Err(e) => {
                    error!("tracking aborted: {}", e);
                    self.terminate();
                    return Err(e);
                }
            }
        }

        self.terminate();
        info!(
            "tracking finished: {} frames, {} published, {} skipped",
            self.summary.frames,
            self.summary.published,
            self.summary.skipped()
        );
        Ok(self.summary.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::synthetic::{SyntheticRig, SyntheticSource};
    use crate::util::{CornerFrame, RecordedCornerFinder, RecordingSink};
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Vector3};

    fn config() -> SessionConfig {
        let cameras = (0..2)
            .map(|i| CameraConfig {
                name: format!("cam{i}"),
                calibration: format!("cam{i}.yaml").into(),
            })
            .collect();
        SessionConfig::new(cameras, GridSize::new(8, 5), 3.025)
    }

    fn trajectory(n: usize) -> Vec<Isometry3<f64>> {
        (0..n)
            .map(|i| {
                let t = i as f64 * 0.1;
                Isometry3::new(Vector3::new(t, 0.0, -t), Vector3::y() * t * 0.5)
            })
            .collect()
    }

    type TestSession<'a> = Session<'a, SyntheticSource, RecordedCornerFinder, RecordingSink>;

    fn session(config: &SessionConfig, source: SyntheticSource) -> TestSession<'_> {
        let intrinsics = source.rig().intrinsics();
        Session::new(
            config,
            intrinsics,
            source,
            RecordedCornerFinder,
            RecordingSink::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_full_lifecycle() {
        let config = config();
        let marker = config.marker();
        let rig = SyntheticRig::two_camera(&marker);
        // Three inspection captures and the bootstrap capture see the marker
        // at its reference pose.
        let source = SyntheticSource::new(rig, &marker, trajectory(6)).with_lead_in(4);
        let mut session = session(&config, source);
        assert_eq!(session.state(), SessionState::Idle);

        let decision = session
            .inspect(|i, frames: &[CornerFrame]| {
                assert_eq!(frames.len(), 2);
                if i < 2 {
                    InspectDecision::Continue
                } else {
                    InspectDecision::Proceed
                }
            })
            .unwrap();
        assert_eq!(decision, InspectDecision::Proceed);
        assert_eq!(session.state(), SessionState::Inspecting);

        session.bootstrap().unwrap();
        assert_eq!(session.state(), SessionState::Tracking);
        assert_eq!(session.sink().rigs.len(), 1);

        let summary = session.run().unwrap();
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(summary.frames, 6);
        assert_eq!(summary.published, 6);

        let poses = &session.sink().poses;
        let truth = trajectory(6);
        for (published, expected) in poses.iter().zip(&truth) {
            assert_relative_eq!(
                published.pose.rotation,
                expected.rotation.to_rotation_matrix(),
                epsilon = 1e-6
            );
            assert_relative_eq!(
                published.pose.translation,
                (expected * marker.centroid()).coords,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_missing_marker_skips_frame_and_keeps_last_pose() {
        let config = config();
        let marker = config.marker();
        let rig = SyntheticRig::two_camera(&marker);
        // Tracking frame 1 is hidden from camera 1.
        let source =
            SyntheticSource::new(rig, &marker, trajectory(3)).with_dropout(2, 1);
        let mut session = session(&config, source);
        session.bootstrap().unwrap();

        assert!(matches!(
            session.track_frame().unwrap(),
            FrameOutcome::Published(_)
        ));
        let before = *session.last_pose().unwrap();
        assert_eq!(
            session.track_frame().unwrap(),
            FrameOutcome::Skipped(SkipReason::MarkerNotFound { camera: 1 })
        );
        assert_eq!(session.last_pose(), Some(&before));
        assert_eq!(session.state(), SessionState::Tracking);

        let summary = session.run().unwrap();
        assert_eq!(summary.marker_not_found, 1);
        assert_eq!(summary.published, 2);
    }

    #[test]
    fn test_bootstrap_failure_terminates() {
        let config = config();
        let marker = config.marker();
        let rig = SyntheticRig::two_camera(&marker);
        let source = SyntheticSource::new(rig, &marker, trajectory(2)).with_dropout(0, 0);
        let mut session = session(&config, source);

        let result = session.bootstrap();
        assert!(matches!(
            result,
            Err(SessionError::Calibration(CalibrationError::MarkerNotFound {
                camera: 0
            }))
        ));
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(matches!(
            session.track_frame(),
            Err(SessionError::InvalidState(SessionState::Terminated))
        ));
    }

    #[test]
    fn test_stop_signal_terminates() {
        let config = config();
        let marker = config.marker();
        let rig = SyntheticRig::two_camera(&marker);
        let source = SyntheticSource::new(rig, &marker, trajectory(10));
        let mut session = session(&config, source);
        let stop = session.stop_signal();
        session.bootstrap().unwrap();

        session.track_frame().unwrap();
        stop.raise();
        assert_eq!(session.track_frame().unwrap(), FrameOutcome::Stopped);
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(session.summary().frames, 1);
    }

    #[test]
    fn test_quit_during_inspection() {
        let config = config();
        let marker = config.marker();
        let rig = SyntheticRig::two_camera(&marker);
        let source = SyntheticSource::new(rig, &marker, trajectory(2));
        let mut session = session(&config, source);

        let decision = session.inspect(|_, _| InspectDecision::Quit).unwrap();
        assert_eq!(decision, InspectDecision::Quit);
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(session.bootstrap().is_err());
    }

    #[test]
    fn test_intrinsics_count_must_match_config() {
        let config = config();
        let marker = config.marker();
        let rig = SyntheticRig::two_camera(&marker);
        let intrinsics = rig.intrinsics()[..1].to_vec();
        let source = SyntheticSource::new(rig, &marker, trajectory(1));
        let result = Session::new(
            &config,
            intrinsics,
            source,
            RecordedCornerFinder,
            RecordingSink::default(),
        );
        assert!(matches!(
            result,
            Err(SessionError::Config(ConfigError::InvalidSession(_)))
        ));
    }
}
