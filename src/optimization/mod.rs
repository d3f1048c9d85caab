//! The `optimization` module estimates camera poses from 3D-2D correspondences.
//!
//! It defines the [`Optimizer`] trait, which outlines the common interface of
//! a pose estimation task, and [`PnpOptimizationCost`], the perspective-n-point
//! solver used by the extrinsic bootstrap.
//!
//! The estimation process involves:
//! 1. A linear estimation step producing an initial pose (plane-induced
//!    homography for planar targets, normalized DLT otherwise).
//! 2. A non-linear Levenberg-Marquardt step on tiny-solver refining the pose
//!    by minimizing the pixel reprojection error.

use std::fmt;

use nalgebra::{Isometry3, Matrix2xX, Matrix3xX, Point3};
use serde::{Deserialize, Serialize};

use crate::camera::Intrinsics;
use crate::error::CalibrationError;

pub mod pnp;

pub use pnp::PnpOptimizationCost;

/// Summary statistics of per-point reprojection errors, in pixels.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Projection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

/// A trait for camera pose estimation tasks.
///
/// Types implementing `Optimizer` refine the world→camera pose of one camera
/// from a set of 3D-2D point correspondences.
pub trait Optimizer {
    /// Computes an initial pose by solving a linear system.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The current pose has been replaced by the linear estimate.
    /// * `Err(CalibrationError)` - Insufficient or degenerate correspondences.
    fn linear_estimation(&mut self) -> Result<(), CalibrationError>
    where
        Self: Sized;

    /// Performs non-linear optimization of the current pose.
    ///
    /// # Arguments
    ///
    /// * `verbose` - If `true`, progress is logged at `info` level.
    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError>;

    /// The current world→camera pose estimate.
    fn get_pose(&self) -> Isometry3<f64>;

    /// Reprojection error statistics of the current pose.
    fn reprojection_error(&self) -> Result<ProjectionError, CalibrationError>;
}

/// Computes reprojection error statistics for a world→camera pose.
///
/// Points that cannot be projected (behind the camera) are skipped; if none
/// can be projected a [`CalibrationError::NumericalError`] is returned.
pub fn compute_reprojection_error(
    intrinsics: &Intrinsics,
    world_to_camera: &Isometry3<f64>,
    points3d: &Matrix3xX<f64>,
    points2d: &Matrix2xX<f64>,
) -> Result<ProjectionError, CalibrationError> {
    let mut errors = vec![];
    for (point3d, point2d) in points3d.column_iter().zip(points2d.column_iter()) {
        let camera_point = world_to_camera.transform_point(&Point3::from(point3d.into_owned()));
        if let Some(projected) = intrinsics.project(&camera_point) {
            errors.push((projected.coords - point2d).norm());
        }
    }

    if errors.is_empty() {
        return Err(CalibrationError::NumericalError(
            "no point projects into the camera".to_string(),
        ));
    }

    let n = errors.len() as f64;
    let mean = errors.iter().sum::<f64>() / n;

    let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let rmse = (errors.iter().map(|x| x.powi(2)).sum::<f64>() / n).sqrt();

    let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    let mut sorted_errors = errors;
    sorted_errors.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted_errors.len() % 2 == 0 {
        let mid = sorted_errors.len() / 2;
        (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
    } else {
        sorted_errors[sorted_errors.len() / 2]
    };

    Ok(ProjectionError {
        rmse,
        min,
        max,
        mean,
        stddev,
        median,
    })
}
