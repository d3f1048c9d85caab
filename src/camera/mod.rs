//! Camera intrinsics and pinhole projection.
//!
//! Cameras in a rig are modelled as ideal pinholes described by a 3×3
//! calibration matrix. Lens distortion is estimated offline together with the
//! intrinsics but is not applied by the tracker.

use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub mod calibration_file;
pub mod pinhole;

pub use calibration_file::{load, CalibrationFile};
pub use pinhole::ProjectionMatrix;

/// Fixed intrinsic parameters of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl Intrinsics {
    /// Creates intrinsics without skew, validating them.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, ConfigError> {
        let intrinsics = Intrinsics {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        };
        validation::validate_intrinsics(&intrinsics)?;
        Ok(intrinsics)
    }

    /// Builds intrinsics from an upper-triangular calibration matrix.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidIntrinsics`] when the bottom row is not `(0, 0, 1)`,
    /// the matrix is not upper triangular, or the focal lengths are not positive.
    pub fn from_matrix(k: &Matrix3<f64>) -> Result<Self, ConfigError> {
        let tol = 1e-9;
        if k[(1, 0)].abs() > tol
            || k[(2, 0)].abs() > tol
            || k[(2, 1)].abs() > tol
            || (k[(2, 2)] - 1.0).abs() > tol
        {
            return Err(ConfigError::InvalidIntrinsics(format!(
                "camera matrix must be upper triangular with K[2,2] = 1, got {k}"
            )));
        }
        let intrinsics = Intrinsics {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            skew: k[(0, 1)],
        };
        validation::validate_intrinsics(&intrinsics)?;
        Ok(intrinsics)
    }

    /// The calibration matrix `K`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0,
        )
    }

    /// Maps a pixel to normalized image coordinates (`K⁻¹ · [u, v, 1]`).
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        let y = (pixel.y - self.cy) / self.fy;
        let x = (pixel.x - self.cx - self.skew * y) / self.fx;
        Point2::new(x, y)
    }

    /// Projects a point given in camera coordinates to pixels.
    ///
    /// Returns `None` for points at or behind the camera center.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.z < f64::EPSILON.sqrt() {
            return None;
        }
        let x = point.x / point.z;
        let y = point.y / point.z;
        Some(Point2::new(
            self.fx * x + self.skew * y + self.cx,
            self.fy * y + self.cy,
        ))
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), ConfigError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0)
            || !intrinsics.fx.is_finite()
            || !intrinsics.fy.is_finite()
        {
            return Err(ConfigError::InvalidIntrinsics(format!(
                "focal length must be positive, got fx={} fy={}",
                intrinsics.fx, intrinsics.fy
            )));
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() || !intrinsics.skew.is_finite()
        {
            return Err(ConfigError::InvalidIntrinsics(
                "principal point must be finite".to_string(),
            ));
        }
        Ok(())
    }
}
