//! Error taxonomy for the tracking pipeline.
//!
//! Configuration and calibration failures happen during the one-shot bootstrap
//! and are fatal to a session. Geometry and alignment failures happen per
//! frame and only cause that frame to be skipped.

/// Bad or missing calibration/configuration source.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(String),
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("{path} is missing the '{field}' field")]
    MissingField { path: String, field: String },
    #[error("Invalid camera matrix: {0}")]
    InvalidMatrix(String),
    #[error("Invalid intrinsics: {0}")]
    InvalidIntrinsics(String),
    #[error("Unsupported calibration format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid session configuration: {0}")]
    InvalidSession(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for ConfigError {
    fn from(err: yaml_rust::ScanError) -> Self {
        ConfigError::Parse {
            path: "<yaml>".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse {
            path: "<yaml>".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse {
            path: "<json>".to_string(),
            message: err.to_string(),
        }
    }
}

/// Extrinsic bootstrap (PnP) failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("camera {camera}: need at least {required} correspondences, got {got}")]
    InsufficientCorrespondences {
        camera: usize,
        required: usize,
        got: usize,
    },
    #[error("camera {camera}: {got} correspondences for {expected} reference points")]
    CountMismatch {
        camera: usize,
        expected: usize,
        got: usize,
    },
    #[error("{cameras} cameras supplied but {intrinsics} intrinsics")]
    CameraCountMismatch { cameras: usize, intrinsics: usize },
    #[error("need at least 2 cameras, got {0}")]
    NotEnoughCameras(usize),
    #[error("camera {camera}: observation contains non-finite coordinates")]
    NonFinite { camera: usize },
    #[error("camera {camera}: degenerate point configuration ({reason})")]
    DegenerateGeometry { camera: usize, reason: String },
    #[error("camera {camera}: solver did not converge")]
    SolverDidNotConverge { camera: usize },
    #[error("camera {camera}: {behind} of {total} points lie behind the camera")]
    NegativeDepth {
        camera: usize,
        behind: usize,
        total: usize,
    },
    #[error("camera {camera}: reprojection RMS {rms:.4} px exceeds {limit:.4} px")]
    ReprojectionTooLarge { camera: usize, rms: f64, limit: f64 },
    #[error("marker not found in camera {camera}")]
    MarkerNotFound { camera: usize },
    #[error("Numerical error: {0}")]
    NumericalError(String),
}

/// Degenerate or under-determined triangulation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("need at least 2 views, got {0}")]
    NotEnoughViews(usize),
    #[error("{projections} projection matrices but {views} correspondence sets")]
    ViewCountMismatch { projections: usize, views: usize },
    #[error("view {view}: {got} points, expected {expected}")]
    CardinalityMismatch {
        view: usize,
        expected: usize,
        got: usize,
    },
    #[error("view {view}: non-finite coordinates")]
    NonFinite { view: usize },
    #[error("point {index}: rays do not intersect (rank deficient system)")]
    RankDeficient { index: usize },
    #[error("point {index}: triangulated point lies at infinity")]
    PointAtInfinity { index: usize },
    #[error("svd failed")]
    SvdFailed,
}

/// Degenerate rigid-fit input.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("need at least 3 points, got {0}")]
    NotEnoughPoints(usize),
    #[error("reference has {reference} points, current has {current}")]
    CardinalityMismatch { reference: usize, current: usize },
    #[error("covariance is degenerate (singular values {0:?})")]
    DegenerateCovariance([f64; 3]),
    #[error("input contains non-finite coordinates")]
    NonFinite,
    #[error("svd failed")]
    SvdFailed,
}

/// Camera source failure.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// The source has no more frames; a replay reached its end.
    #[error("camera source exhausted")]
    Exhausted,
    #[error("camera {camera}: {message}")]
    Device { camera: usize, message: String },
    #[error("IO Error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

impl From<csv::Error> for SourceError {
    fn from(err: csv::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

/// Pose sink failure.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("IO Error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

impl From<csv::Error> for SinkError {
    fn from(err: csv::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialize(err.to_string())
    }
}

/// Any failure surfaced by the session driver.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("session stopped")]
    Stopped,
    #[error("operation not allowed in state {0:?}")]
    InvalidState(crate::session::SessionState),
}
