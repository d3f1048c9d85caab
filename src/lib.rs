//! Marker Tracker Library
//!
//! Real-time 6-DoF pose tracking of a planar fiducial marker observed by two
//! or more fixed, pre-calibrated cameras. The library provides:
//! - Loading of per-camera intrinsics from OpenCV-style calibration files
//! - A one-shot extrinsic bootstrap locating every camera from one view of the
//!   marker (PnP with Levenberg-Marquardt refinement on tiny-solver)
//! - Linear multi-view triangulation of the marker corners
//! - Least-squares rigid alignment of the reference marker onto the
//!   reconstructed cloud, always returning a proper rotation
//! - A session driver tying these together behind camera-source,
//!   corner-finder and pose-sink interfaces

pub mod bootstrap;
pub mod camera;
pub mod error;
pub mod geometry;
pub mod optimization;
pub mod session;
pub mod util;

// Re-export commonly used types
pub use bootstrap::{bootstrap, BootstrapOptions, CalibratedCamera, CameraExtrinsics, Rig};
pub use camera::{CalibrationFile, Intrinsics, ProjectionMatrix};
pub use error::{
    AlignmentError, CalibrationError, ConfigError, GeometryError, SessionError, SinkError,
    SourceError,
};
pub use geometry::{
    align, triangulate, Correspondence, GridSize, MarkerPointSet, PointCloud, RigidAligner,
    RigidTransform, Triangulator,
};
pub use optimization::{Optimizer, PnpOptimizationCost};
pub use session::{
    CameraSource, CorrespondenceFinder, FrameOutcome, PoseSink, Session, SessionConfig,
    SessionState, StopSignal,
};
