//! Linear multi-view triangulation of marker corners.
//!
//! For every corner index the observations from all views are stacked into a
//! homogeneous system `A · X = 0`. Each view contributes the two rows
//! `u · P₃ − P₁` and `v · P₃ − P₂`, so a third or fourth camera simply adds rows
//! to the same system. The solution is the right singular vector of `A` for the
//! smallest singular value, dehomogenized to a Euclidean point.

use log::trace;
use nalgebra::{DMatrix, Point2, Point3};

use crate::camera::ProjectionMatrix;
use crate::error::GeometryError;
use crate::geometry::{find_cardinality_mismatch, Correspondence, PointCloud};

/// Default relative tolerance below which the second smallest singular value
/// marks the system as rank deficient.
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-9;

/// Iteration cap for the per-point SVD; a well-posed 4-column system converges
/// in a handful of sweeps.
const MAX_SVD_ITERATIONS: usize = 200;

/// Triangulates marker corners for a fixed marker cardinality.
#[derive(Debug, Clone, Copy)]
pub struct Triangulator {
    expected_points: usize,
    rank_tolerance: f64,
}

impl Triangulator {
    pub fn new(expected_points: usize) -> Self {
        Triangulator {
            expected_points,
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        }
    }

    pub fn with_rank_tolerance(mut self, rank_tolerance: f64) -> Self {
        self.rank_tolerance = rank_tolerance;
        self
    }

    pub fn expected_points(&self) -> usize {
        self.expected_points
    }

    /// Reconstructs the marker corners from two or more views.
    ///
    /// # Errors
    ///
    /// * [`GeometryError::NotEnoughViews`] with fewer than two projection matrices.
    /// * [`GeometryError::ViewCountMismatch`] if projections and views differ in number.
    /// * [`GeometryError::CardinalityMismatch`] if any view has the wrong number of
    ///   points. This is checked before any numerical work.
    /// * [`GeometryError::NonFinite`] if a view or its projection matrix holds a
    ///   NaN or infinite value.
    /// * [`GeometryError::RankDeficient`] / [`GeometryError::PointAtInfinity`] when
    ///   the rays of a corner do not intersect in a finite point.
    pub fn triangulate(
        &self,
        projections: &[ProjectionMatrix],
        correspondences: &[Correspondence],
    ) -> Result<PointCloud, GeometryError> {
        if projections.len() < 2 {
            return Err(GeometryError::NotEnoughViews(projections.len()));
        }
        if projections.len() != correspondences.len() {
            return Err(GeometryError::ViewCountMismatch {
                projections: projections.len(),
                views: correspondences.len(),
            });
        }
        if let Some((view, got)) = find_cardinality_mismatch(self.expected_points, correspondences)
        {
            return Err(GeometryError::CardinalityMismatch {
                view,
                expected: self.expected_points,
                got,
            });
        }
        if let Some(view) = projections
            .iter()
            .zip(correspondences)
            .position(|(p, view)| {
                !p.matrix().iter().all(|v| v.is_finite())
                    || !view.iter().all(|uv| uv.x.is_finite() && uv.y.is_finite())
            })
        {
            return Err(GeometryError::NonFinite { view });
        }

        let mut observations: Vec<Point2<f64>> = Vec::with_capacity(projections.len());
        (0..self.expected_points)
            .map(|index| {
                observations.clear();
                observations.extend(correspondences.iter().map(|view| view[index]));
                self.triangulate_point(index, projections, &observations)
            })
            .collect()
    }

    fn triangulate_point(
        &self,
        index: usize,
        projections: &[ProjectionMatrix],
        observations: &[Point2<f64>],
    ) -> Result<Point3<f64>, GeometryError> {
        let mut a = DMatrix::<f64>::zeros(2 * projections.len(), 4);
        for (i, (p, uv)) in projections.iter().zip(observations).enumerate() {
            let row2 = p.row(2);
            let r0 = uv.x * row2 - p.row(0);
            let r1 = uv.y * row2 - p.row(1);
            // Unit rows keep pixel-scaled and metric-scaled equations balanced.
            a.row_mut(2 * i).copy_from(&normalize_row(r0));
            a.row_mut(2 * i + 1).copy_from(&normalize_row(r1));
        }

        let svd = a
            .try_svd(false, true, f64::EPSILON, MAX_SVD_ITERATIONS)
            .ok_or(GeometryError::SvdFailed)?;
        let v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&i, &j| svd.singular_values[j].total_cmp(&svd.singular_values[i]));
        let largest = svd.singular_values[order[0]];
        let smallest = order[order.len() - 1];
        let second_smallest = svd.singular_values[order[order.len() - 2]];

        trace!(
            "point {}: singular values {:?}",
            index,
            svd.singular_values.as_slice()
        );

        if !(largest > 0.0) || second_smallest <= self.rank_tolerance * largest {
            return Err(GeometryError::RankDeficient { index });
        }

        let x = v_t.row(smallest);
        let w = x[3];
        if w.abs() <= f64::EPSILON * x.norm() {
            return Err(GeometryError::PointAtInfinity { index });
        }
        let point = Point3::new(x[0] / w, x[1] / w, x[2] / w);
        if !point.coords.iter().all(|c| c.is_finite()) {
            return Err(GeometryError::PointAtInfinity { index });
        }
        Ok(point)
    }
}

fn normalize_row(row: nalgebra::RowVector4<f64>) -> nalgebra::RowVector4<f64> {
    let norm = row.norm();
    if norm > 0.0 {
        row / norm
    } else {
        row
    }
}

/// Triangulates with the default tolerance; the expected cardinality is taken
/// from `reference_len`.
pub fn triangulate(
    projections: &[ProjectionMatrix],
    correspondences: &[Correspondence],
    reference_len: usize,
) -> Result<PointCloud, GeometryError> {
    Triangulator::new(reference_len).triangulate(projections, correspondences)
}
