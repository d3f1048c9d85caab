//! Perspective-n-point pose estimation for one camera.
//!
//! The linear stage picks a solver from the shape of the 3-D point set:
//! planar sets (the fiducial grid) go through a plane-induced homography,
//! volumetric sets through a 12-unknown DLT. The non-linear stage refines a
//! rotation increment and the translation with tiny-solver's
//! Levenberg-Marquardt optimizer.

use std::collections::HashMap;
use std::fmt;

use log::{debug, info};
use nalgebra::{
    DMatrix, DVector, Isometry3, Matrix2xX, Matrix3, Matrix3x4, Matrix3xX, Point2, Point3,
    RealField, Rotation3, Translation3, UnitQuaternion, Vector2, Vector3,
};
use tiny_solver::factors::Factor;
use tiny_solver::optimizer::OptimizerOptions;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

use crate::camera::Intrinsics;
use crate::error::CalibrationError;
use crate::optimization::{compute_reprojection_error, Optimizer, ProjectionError};

/// Minimum number of correspondences for any pose estimate.
pub const MIN_CORRESPONDENCES: usize = 4;
/// Minimum number of correspondences for a non-planar point set.
pub const MIN_CORRESPONDENCES_NON_PLANAR: usize = 6;

const PARAMS_KEY: &str = "pose";
const MAX_SVD_ITERATIONS: usize = 500;

/// Pose estimation problem for a single camera.
#[derive(Clone)]
pub struct PnpOptimizationCost {
    camera: usize,
    intrinsics: Intrinsics,
    /// 3D points in world coordinates (3×N matrix).
    points3d: Matrix3xX<f64>,
    /// Corresponding pixels (2×N matrix).
    points2d: Matrix2xX<f64>,
    world_to_camera: Isometry3<f64>,
    planarity_tolerance: f64,
    max_iterations: usize,
}

impl PnpOptimizationCost {
    /// Creates a new pose problem.
    ///
    /// `camera` is only used to label errors and log lines.
    pub fn new(
        camera: usize,
        intrinsics: Intrinsics,
        points3d: Matrix3xX<f64>,
        points2d: Matrix2xX<f64>,
    ) -> Self {
        PnpOptimizationCost {
            camera,
            intrinsics,
            points3d,
            points2d,
            world_to_camera: Isometry3::identity(),
            planarity_tolerance: 1e-6,
            max_iterations: 100,
        }
    }

    /// Convenience constructor from point slices.
    pub fn from_points(
        camera: usize,
        intrinsics: Intrinsics,
        points3d: &[Point3<f64>],
        points2d: &[Point2<f64>],
    ) -> Self {
        let p3 = Matrix3xX::from_iterator(points3d.len(), points3d.iter().flat_map(|p| [p.x, p.y, p.z]));
        let p2 = Matrix2xX::from_iterator(points2d.len(), points2d.iter().flat_map(|p| [p.x, p.y]));
        Self::new(camera, intrinsics, p3, p2)
    }

    pub fn with_planarity_tolerance(mut self, tolerance: f64) -> Self {
        self.planarity_tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Depths of all points in the camera frame under the current pose.
    pub fn depths(&self) -> Vec<f64> {
        self.points3d
            .column_iter()
            .map(|p| {
                self.world_to_camera
                    .transform_point(&Point3::from(p.into_owned()))
                    .z
            })
            .collect()
    }

    fn check_counts(&self) -> Result<usize, CalibrationError> {
        let n = self.points3d.ncols();
        if self.points2d.ncols() != n {
            return Err(CalibrationError::CountMismatch {
                camera: self.camera,
                expected: n,
                got: self.points2d.ncols(),
            });
        }
        if n < MIN_CORRESPONDENCES {
            return Err(CalibrationError::InsufficientCorrespondences {
                camera: self.camera,
                required: MIN_CORRESPONDENCES,
                got: n,
            });
        }
        if !self.points3d.iter().chain(self.points2d.iter()).all(|v| v.is_finite()) {
            return Err(CalibrationError::NonFinite {
                camera: self.camera,
            });
        }
        Ok(n)
    }

    fn degenerate(&self, reason: &str) -> CalibrationError {
        CalibrationError::DegenerateGeometry {
            camera: self.camera,
            reason: reason.to_string(),
        }
    }

    /// Pose of a planar point set from the homography between the plane and
    /// the normalized image.
    fn planar_pose(
        &self,
        centroid: &Vector3<f64>,
        basis: &Matrix3<f64>,
    ) -> Result<Isometry3<f64>, CalibrationError> {
        let e1 = basis.column(0).into_owned();
        let e2 = basis.column(1).into_owned();
        let e3 = e1.cross(&e2);
        let plane_to_world = Matrix3::from_columns(&[e1, e2, e3]);

        let plane: Vec<Point2<f64>> = self
            .points3d
            .column_iter()
            .map(|p| {
                let d = p - centroid;
                Point2::new(e1.dot(&d), e2.dot(&d))
            })
            .collect();
        let image: Vec<Point2<f64>> = self
            .points2d
            .column_iter()
            .map(|p| self.intrinsics.normalize(&Point2::new(p[0], p[1])))
            .collect();

        let h = normalized_homography(&plane, &image)
            .ok_or_else(|| self.degenerate("homography estimation failed"))?;

        let h1 = h.column(0).into_owned();
        let h2 = h.column(1).into_owned();
        let h3 = h.column(2).into_owned();
        let norm = 0.5 * (h1.norm() + h2.norm());
        if norm <= f64::EPSILON {
            return Err(self.degenerate("homography has vanishing columns"));
        }
        let mut lambda = 1.0 / norm;
        // The plane origin is the point centroid, which must be in front.
        if lambda * h3.z < 0.0 {
            lambda = -lambda;
        }

        let r1 = h1 * lambda;
        let r2 = h2 * lambda;
        let rotation = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r1.cross(&r2)]))
            .ok_or_else(|| self.degenerate("rotation projection failed"))?;
        let t = h3 * lambda;

        let r_cw = rotation * plane_to_world.transpose();
        Ok(isometry(r_cw, t - r_cw * centroid))
    }

    /// Pose of a volumetric point set from the normalized DLT.
    fn dlt_pose(&self, centroid: &Vector3<f64>) -> Result<Isometry3<f64>, CalibrationError> {
        let n = self.points3d.ncols();
        let mean_dist = self
            .points3d
            .column_iter()
            .map(|p| (p - centroid).norm())
            .sum::<f64>()
            / n as f64;
        if mean_dist <= f64::EPSILON {
            return Err(self.degenerate("all points coincide"));
        }
        let scale = 3.0_f64.sqrt() / mean_dist;

        let mut a = DMatrix::<f64>::zeros(2 * n, 12);
        for (i, (pw, pi)) in self
            .points3d
            .column_iter()
            .zip(self.points2d.column_iter())
            .enumerate()
        {
            let x = (pw - centroid) * scale;
            let m = self.intrinsics.normalize(&Point2::new(pi[0], pi[1]));
            let (r0, r1) = (2 * i, 2 * i + 1);
            for k in 0..3 {
                a[(r0, k)] = x[k];
                a[(r0, 8 + k)] = -m.x * x[k];
                a[(r1, 4 + k)] = x[k];
                a[(r1, 8 + k)] = -m.y * x[k];
            }
            a[(r0, 3)] = 1.0;
            a[(r0, 11)] = -m.x;
            a[(r1, 7)] = 1.0;
            a[(r1, 11)] = -m.y;
        }

        let p = null_vector(a).ok_or_else(|| self.degenerate("DLT decomposition failed"))?;
        let p_norm = Matrix3x4::from_row_slice(p.as_slice());

        // Undo the point normalization: x_norm = scale * (x - centroid).
        let m = p_norm.fixed_view::<3, 3>(0, 0) * scale;
        let t = p_norm.column(3) - m * centroid;

        let mut s = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
        if s <= f64::EPSILON {
            return Err(self.degenerate("DLT solution has zero scale"));
        }
        if m.determinant() < 0.0 {
            s = -s;
        }
        let rotation = nearest_rotation(&(m / s))
            .ok_or_else(|| self.degenerate("rotation projection failed"))?;
        Ok(isometry(rotation, t / s))
    }
}

impl fmt::Debug for PnpOptimizationCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PnpOptimizationCost Summary:\n camera: {}\n intrinsics: {:?}\n points3d size: {}, points2d size: {} ",
            self.camera,
            self.intrinsics,
            self.points3d.ncols(),
            self.points2d.ncols(),
        )
    }
}

/// Reprojection cost for `tiny_solver`.
///
/// The parameter block is `[ω; t]`: a rotation increment applied on top of the
/// linear estimate, and the full translation. Points are stored already rotated
/// by the linear estimate so the increment starts at zero.
#[derive(Debug, Clone)]
struct PnpCost {
    rotated_points: Vec<Vector3<f64>>,
    pixels: Vec<Vector2<f64>>,
    intrinsics: Intrinsics,
}

impl<T: RealField> Factor<T> for PnpCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let pose = &params[0];
        let omega = Vector3::new(pose[0].clone(), pose[1].clone(), pose[2].clone());
        let t = Vector3::new(pose[3].clone(), pose[4].clone(), pose[5].clone());

        let c = |v: f64| T::from_f64(v).unwrap();
        let (fx, fy, cx, cy, skew) = (
            c(self.intrinsics.fx),
            c(self.intrinsics.fy),
            c(self.intrinsics.cx),
            c(self.intrinsics.cy),
            c(self.intrinsics.skew),
        );

        let mut residuals = DVector::zeros(self.pixels.len() * 2);
        for (i, (point, pixel)) in self.rotated_points.iter().zip(&self.pixels).enumerate() {
            let p = Vector3::new(c(point.x), c(point.y), c(point.z));
            let pc = rotate(&omega, &p) + t.clone();

            if pc.z < c(1e-9) {
                residuals[i * 2] = c(1e6);
                residuals[i * 2 + 1] = c(1e6);
                continue;
            }
            let x = pc.x.clone() / pc.z.clone();
            let y = pc.y.clone() / pc.z.clone();
            residuals[i * 2] =
                fx.clone() * x + skew.clone() * y.clone() + cx.clone() - c(pixel.x);
            residuals[i * 2 + 1] = fy.clone() * y + cy.clone() - c(pixel.y);
        }
        residuals
    }
}

/// Rotates `p` by the axis-angle vector `omega` (Rodrigues' formula).
fn rotate<T: RealField>(omega: &Vector3<T>, p: &Vector3<T>) -> Vector3<T> {
    let theta2 = omega.norm_squared();
    if theta2 > T::from_f64(1e-16).unwrap() {
        let theta = theta2.sqrt();
        let k = omega.unscale(theta.clone());
        let (sin, cos) = (theta.clone().sin(), theta.cos());
        let k_dot_p = k.dot(p);
        p * cos.clone() + k.cross(p) * sin + k * (k_dot_p * (T::from_f64(1.0).unwrap() - cos))
    } else {
        // First order; exact derivative at the origin.
        p + omega.cross(p)
    }
}

impl Optimizer for PnpOptimizationCost {
    fn linear_estimation(&mut self) -> Result<(), CalibrationError> {
        let n = self.check_counts()?;

        let centroid = self.points3d.column_mean();
        let mut centered = self.points3d.clone();
        for mut column in centered.column_iter_mut() {
            column -= &centroid;
        }
        let svd = centered
            .try_svd(true, false, f64::EPSILON, MAX_SVD_ITERATIONS)
            .ok_or_else(|| CalibrationError::NumericalError("svd failed in PnP".to_string()))?;
        let u = svd
            .u
            .ok_or_else(|| CalibrationError::NumericalError("svd failed in PnP".to_string()))?;
        let s = &svd.singular_values;
        let mut order: Vec<usize> = (0..s.len()).collect();
        order.sort_by(|&i, &j| s[j].total_cmp(&s[i]));

        if !(s[order[0]] > f64::EPSILON) || s[order[1]] <= 1e-9 * s[order[0]] {
            return Err(self.degenerate("points are collinear"));
        }
        let planar = order.len() < 3 || s[order[2]] <= self.planarity_tolerance * s[order[0]];

        let pose = if planar {
            let basis = Matrix3::from_columns(&[
                u.column(order[0]).into_owned(),
                u.column(order[1]).into_owned(),
                Vector3::zeros(),
            ]);
            self.planar_pose(&centroid, &basis)?
        } else if n >= MIN_CORRESPONDENCES_NON_PLANAR {
            self.dlt_pose(&centroid)?
        } else {
            return Err(CalibrationError::InsufficientCorrespondences {
                camera: self.camera,
                required: MIN_CORRESPONDENCES_NON_PLANAR,
                got: n,
            });
        };

        debug!(
            "camera {}: linear {} pose t={:?}",
            self.camera,
            if planar { "planar" } else { "DLT" },
            pose.translation.vector.as_slice()
        );
        self.world_to_camera = pose;
        Ok(())
    }

    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError> {
        self.check_counts()?;

        let rotation = self.world_to_camera.rotation;
        let cost = PnpCost {
            rotated_points: self
                .points3d
                .column_iter()
                .map(|p| rotation * p.into_owned())
                .collect(),
            pixels: self.points2d.column_iter().map(|p| p.into_owned()).collect(),
            intrinsics: self.intrinsics,
        };

        if verbose {
            info!("Starting PnP refinement for camera {}...", self.camera);
            info!("Number of point correspondences: {}", self.points3d.ncols());
        }

        let mut problem = tiny_solver::Problem::new();
        problem.add_residual_block(
            self.points2d.ncols() * 2,
            &[PARAMS_KEY],
            Box::new(cost),
            None,
        );

        let t = self.world_to_camera.translation.vector;
        let mut initial_values = HashMap::new();
        initial_values.insert(
            PARAMS_KEY.to_string(),
            DVector::from_vec(vec![0.0, 0.0, 0.0, t.x, t.y, t.z]),
        );

        let options = OptimizerOptions {
            max_iteration: self.max_iterations,
            ..OptimizerOptions::default()
        };
        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(&problem, &initial_values, Some(options))
            .ok_or(CalibrationError::SolverDidNotConverge {
                camera: self.camera,
            })?;
        let params = result
            .get(PARAMS_KEY)
            .filter(|p| p.len() == 6 && p.iter().all(|v| v.is_finite()))
            .ok_or(CalibrationError::SolverDidNotConverge {
                camera: self.camera,
            })?;

        let initial = self.world_to_camera;
        let initial_rms = self.reprojection_error().map(|e| e.rmse).ok();

        let increment =
            UnitQuaternion::from_scaled_axis(Vector3::new(params[0], params[1], params[2]));
        self.world_to_camera = Isometry3::from_parts(
            Translation3::new(params[3], params[4], params[5]),
            increment * rotation,
        );

        // Keep the starting pose if the solver wandered off.
        let refined_rms = self.reprojection_error().map(|e| e.rmse).ok();
        let worse = match (initial_rms, refined_rms) {
            (Some(before), Some(after)) => after > before,
            (Some(_), None) => true,
            _ => false,
        };
        if worse {
            debug!(
                "camera {}: refinement did not improve RMS ({:?} -> {:?}), keeping initial pose",
                self.camera, initial_rms, refined_rms
            );
            self.world_to_camera = initial;
        }

        if verbose {
            info!(
                "Camera {} refinement finished: {:?}",
                self.camera,
                self.reprojection_error()?
            );
        }
        Ok(())
    }

    fn get_pose(&self) -> Isometry3<f64> {
        self.world_to_camera
    }

    fn reprojection_error(&self) -> Result<ProjectionError, CalibrationError> {
        compute_reprojection_error(
            &self.intrinsics,
            &self.world_to_camera,
            &self.points3d,
            &self.points2d,
        )
    }
}

fn isometry(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Isometry3<f64> {
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation));
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

/// Projects a matrix onto SO(3) (polar decomposition via SVD, det = +1).
fn nearest_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.try_svd(true, true, f64::EPSILON, MAX_SVD_ITERATIONS)?;
    let u = svd.u?;
    let v_t = svd.v_t?;
    let d = (u * v_t).determinant().signum();
    Some(u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d)) * v_t)
}

/// Right singular vector of `a` for its smallest singular value.
///
/// Systems with fewer rows than columns are padded with zero rows so the
/// null space shows up in `Vᵀ`.
fn null_vector(a: DMatrix<f64>) -> Option<DVector<f64>> {
    let cols = a.ncols();
    let a = if a.nrows() < cols {
        a.resize_vertically(cols, 0.0)
    } else {
        a
    };
    let svd = a.try_svd(false, true, f64::EPSILON, MAX_SVD_ITERATIONS)?;
    let v_t = svd.v_t?;
    let smallest = svd.singular_values.imin();
    Some(v_t.row(smallest).transpose())
}

/// Similarity normalizing a 2-D point set to centroid 0 and mean distance √2.
fn hartley(points: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let c = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let mean_dist = points.iter().map(|p| (p.coords - c).norm()).sum::<f64>() / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = 2.0_f64.sqrt() / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0))
}

/// Homography `H` with `image ~ H · plane`, estimated by normalized DLT.
fn normalized_homography(plane: &[Point2<f64>], image: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let t_plane = hartley(plane)?;
    let t_image = hartley(image)?;
    let apply = |t: &Matrix3<f64>, p: &Point2<f64>| {
        let q = t * Vector3::new(p.x, p.y, 1.0);
        Point2::new(q.x / q.z, q.y / q.z)
    };

    let mut a = DMatrix::<f64>::zeros(2 * plane.len(), 9);
    for (i, (pw, pi)) in plane.iter().zip(image).enumerate() {
        let w = apply(&t_plane, pw);
        let m = apply(&t_image, pi);
        let (r0, r1) = (2 * i, 2 * i + 1);

        a[(r0, 0)] = -w.x;
        a[(r0, 1)] = -w.y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = m.x * w.x;
        a[(r0, 7)] = m.x * w.y;
        a[(r0, 8)] = m.x;

        a[(r1, 3)] = -w.x;
        a[(r1, 4)] = -w.y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = m.y * w.x;
        a[(r1, 7)] = m.y * w.y;
        a[(r1, 8)] = m.y;
    }

    let h = null_vector(a)?;
    let h_norm = Matrix3::from_row_slice(h.as_slice());
    Some(t_image.try_inverse()? * h_norm * t_plane)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::synthetic::look_at;
    use crate::geometry::{GridSize, MarkerPointSet};
    use approx::assert_relative_eq;

    fn intrinsics() -> Intrinsics {
        Intrinsics::new(540.2871, 539.8843, 318.4416, 243.1127).unwrap()
    }

    fn project(pose: &Isometry3<f64>, points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        let k = intrinsics();
        points
            .iter()
            .map(|p| k.project(&pose.transform_point(p)).unwrap())
            .collect()
    }

    fn assert_pose_eq(a: &Isometry3<f64>, b: &Isometry3<f64>, eps: f64) {
        assert_relative_eq!(
            a.rotation.to_rotation_matrix(),
            b.rotation.to_rotation_matrix(),
            epsilon = eps
        );
        assert_relative_eq!(a.translation.vector, b.translation.vector, epsilon = eps * 100.0);
    }

    #[test]
    fn test_planar_linear_estimation_recovers_pose() {
        let marker = MarkerPointSet::grid(GridSize::new(8, 5), 3.025);
        let truth = look_at(
            &Point3::new(-15.0, 45.0, -30.0),
            &marker.centroid(),
            &Vector3::y(),
        );
        let pixels = project(&truth, marker.points());

        let mut cost = PnpOptimizationCost::from_points(0, intrinsics(), marker.points(), &pixels);
        cost.linear_estimation().unwrap();
        assert_pose_eq(&cost.get_pose(), &truth, 1e-6);
    }

    #[test]
    fn test_refinement_keeps_exact_pose() {
        let marker = MarkerPointSet::grid(GridSize::new(8, 5), 3.025);
        let truth = look_at(
            &Point3::new(30.0, 40.0, -25.0),
            &marker.centroid(),
            &Vector3::y(),
        );
        let pixels = project(&truth, marker.points());

        let mut cost = PnpOptimizationCost::from_points(1, intrinsics(), marker.points(), &pixels);
        cost.linear_estimation().unwrap();
        cost.optimize(false).unwrap();
        assert_pose_eq(&cost.get_pose(), &truth, 1e-6);
        assert!(cost.reprojection_error().unwrap().rmse < 1e-6);
        assert!(cost.depths().iter().all(|&z| z > 0.0));
    }

    #[test]
    fn test_refinement_reduces_noisy_error() {
        let marker = MarkerPointSet::grid(GridSize::new(8, 5), 3.025);
        let truth = look_at(
            &Point3::new(10.0, 50.0, -20.0),
            &marker.centroid(),
            &Vector3::y(),
        );
        let pixels: Vec<Point2<f64>> = project(&truth, marker.points())
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let j = i as f64;
                Point2::new(p.x + 0.3 * (j * 1.7).sin(), p.y + 0.3 * (j * 2.3).cos())
            })
            .collect();

        let mut cost = PnpOptimizationCost::from_points(0, intrinsics(), marker.points(), &pixels);
        cost.linear_estimation().unwrap();
        let linear_rms = cost.reprojection_error().unwrap().rmse;
        cost.optimize(false).unwrap();
        let refined_rms = cost.reprojection_error().unwrap().rmse;

        assert!(refined_rms <= linear_rms + 1e-9);
        assert!(refined_rms < 0.5);
    }

    #[test]
    fn test_volumetric_dlt() {
        let points: Vec<Point3<f64>> = (0..10)
            .map(|i| {
                let t = i as f64;
                Point3::new((t * 0.9).sin() * 5.0, (t * 1.3).cos() * 4.0, t * 0.7)
            })
            .collect();
        let truth = look_at(
            &Point3::new(5.0, 30.0, -30.0),
            &Point3::new(0.0, 0.0, 3.0),
            &Vector3::y(),
        );
        let pixels = project(&truth, &points);

        let mut cost = PnpOptimizationCost::from_points(0, intrinsics(), &points, &pixels);
        cost.linear_estimation().unwrap();
        assert_pose_eq(&cost.get_pose(), &truth, 1e-6);
    }

    #[test]
    fn test_three_correspondences_rejected() {
        let marker = MarkerPointSet::grid(GridSize::new(3, 1), 1.0);
        let pixels = vec![Point2::new(1.0, 1.0); 3];
        let mut cost = PnpOptimizationCost::from_points(2, intrinsics(), marker.points(), &pixels);
        assert_eq!(
            cost.linear_estimation(),
            Err(CalibrationError::InsufficientCorrespondences {
                camera: 2,
                required: 4,
                got: 3
            })
        );
    }

    #[test]
    fn test_collinear_points_rejected() {
        let marker = MarkerPointSet::grid(GridSize::new(6, 1), 1.0);
        let pixels: Vec<Point2<f64>> = (0..6).map(|i| Point2::new(i as f64, 0.0)).collect();
        let mut cost = PnpOptimizationCost::from_points(0, intrinsics(), marker.points(), &pixels);
        assert!(matches!(
            cost.linear_estimation(),
            Err(CalibrationError::DegenerateGeometry { camera: 0, .. })
        ));
    }

    #[test]
    fn test_non_finite_pixel_rejected() {
        let marker = MarkerPointSet::grid(GridSize::new(8, 5), 3.025);
        let pose = look_at(
            &Point3::new(-15.0, 40.0, -30.0),
            &marker.centroid(),
            &Vector3::y(),
        );
        let mut pixels = project(&pose, marker.points());
        pixels[3] = Point2::new(f64::NAN, 10.0);

        let mut cost = PnpOptimizationCost::from_points(2, intrinsics(), marker.points(), &pixels);
        assert_eq!(
            cost.linear_estimation(),
            Err(CalibrationError::NonFinite { camera: 2 })
        );
        assert_eq!(
            cost.optimize(false),
            Err(CalibrationError::NonFinite { camera: 2 })
        );
    }

    #[test]
    fn test_rotate_matches_nalgebra() {
        let omega = Vector3::new(0.3, -0.4, 1.1);
        let p = Vector3::new(1.0, 2.0, -0.5);
        let expected = Rotation3::new(omega) * p;
        assert_relative_eq!(rotate(&omega, &p), expected, epsilon = 1e-12);
    }
}
