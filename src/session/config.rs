//! Session configuration, built once and passed by reference.
//!
//! ```yaml
//! cameras:
//!   - name: left
//!     calibration: calib/cam0.yaml
//!   - name: right
//!     calibration: calib/cam1.yaml
//! grid:
//!   width: 8
//!   height: 5
//! square_size: 3.025
//! bootstrap:
//!   refine: true
//!   max_reprojection_rms: 2.0
//! tracking:
//!   report_interval_ms: 1000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::bootstrap::BootstrapOptions;
use crate::camera::{self, Intrinsics};
use crate::error::ConfigError;
use crate::geometry::{alignment, triangulation, GridSize, MarkerPointSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    /// Calibration document; relative paths resolve against the config file.
    pub calibration: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingOptions {
    pub triangulation_rank_tolerance: f64,
    pub alignment_rank_tolerance: f64,
    /// Frame-rate logging window in milliseconds; 0 disables it.
    pub report_interval_ms: u64,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        TrackingOptions {
            triangulation_rank_tolerance: triangulation::DEFAULT_RANK_TOLERANCE,
            alignment_rank_tolerance: alignment::DEFAULT_RANK_TOLERANCE,
            report_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub cameras: Vec<CameraConfig>,
    pub grid: GridSize,
    pub square_size: f64,
    #[serde(default)]
    pub bootstrap: BootstrapOptions,
    #[serde(default)]
    pub tracking: TrackingOptions,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(cameras: Vec<CameraConfig>, grid: GridSize, square_size: f64) -> Self {
        SessionConfig {
            cameras,
            grid,
            square_size,
            bootstrap: BootstrapOptions::default(),
            tracking: TrackingOptions::default(),
            base_dir: None,
        }
    }

    /// Loads and validates a configuration file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("couldn't open {}: {e}", path.display())))?;
        let mut config: SessionConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        config.validate()?;
        info!(
            "Loaded session config {} ({} cameras, {}x{} grid)",
            path.display(),
            config.cameras.len(),
            config.grid.width,
            config.grid.height
        );
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.len() < 2 {
            return Err(ConfigError::InvalidSession(format!(
                "at least 2 cameras are required, got {}",
                self.cameras.len()
            )));
        }
        if self.grid.width < 2 || self.grid.height < 2 {
            return Err(ConfigError::InvalidSession(format!(
                "grid must be at least 2x2, got {}x{}",
                self.grid.width, self.grid.height
            )));
        }
        if !(self.square_size.is_finite() && self.square_size > 0.0) {
            return Err(ConfigError::InvalidSession(format!(
                "square_size must be positive, got {}",
                self.square_size
            )));
        }
        if !(self.bootstrap.max_reprojection_rms > 0.0) {
            return Err(ConfigError::InvalidSession(
                "bootstrap.max_reprojection_rms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    /// Reference geometry of the configured marker.
    pub fn marker(&self) -> MarkerPointSet {
        MarkerPointSet::grid(self.grid, self.square_size)
    }

    pub fn calibration_path(&self, camera: &CameraConfig) -> PathBuf {
        match &self.base_dir {
            Some(dir) if camera.calibration.is_relative() => dir.join(&camera.calibration),
            _ => camera.calibration.clone(),
        }
    }

    /// Loads every camera's intrinsics, in camera order.
    pub fn load_intrinsics(&self) -> Result<Vec<Intrinsics>, ConfigError> {
        self.cameras
            .iter()
            .map(|c| camera::load(self.calibration_path(c)))
            .collect()
    }
}
