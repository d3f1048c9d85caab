//! Least-squares rigid alignment of the reference marker onto a live cloud.
//!
//! Both point sets are centred on their centroids, the cross-covariance
//! `H = Σ refᵢ · curᵢᵀ` is decomposed as `H = U · Σ · Vᵀ`, and the rotation is
//! `R = V · Uᵀ`. When that product is a reflection (`det R = −1`) the column of
//! `V` paired with the smallest singular value is negated before recomposing, so
//! every returned rotation is proper.

use log::trace;
use nalgebra::{Matrix3, Point3, Rotation3};

use crate::error::AlignmentError;
use crate::geometry::{centroid, RigidTransform};

/// Default relative tolerance on the second singular value of the covariance.
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-6;

const MAX_SVD_ITERATIONS: usize = 200;

/// Full result of an alignment, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub transform: RigidTransform,
    pub reference_centroid: Point3<f64>,
    pub current_centroid: Point3<f64>,
    /// Singular values of the cross-covariance, largest first.
    pub singular_values: [f64; 3],
    /// Whether the reflection correction had to be applied.
    pub reflection_corrected: bool,
    /// RMS distance between the rotated reference and the live cloud.
    pub rms_residual: f64,
}

/// Rigid aligner with a configurable degeneracy tolerance.
#[derive(Debug, Clone, Copy)]
pub struct RigidAligner {
    rank_tolerance: f64,
}

impl Default for RigidAligner {
    fn default() -> Self {
        RigidAligner {
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        }
    }
}

impl RigidAligner {
    pub fn new(rank_tolerance: f64) -> Self {
        RigidAligner { rank_tolerance }
    }

    /// Fits the rotation mapping `reference` onto `current`.
    ///
    /// The translation of the returned transform is the centroid of `current`.
    pub fn align(
        &self,
        reference: &[Point3<f64>],
        current: &[Point3<f64>],
    ) -> Result<RigidTransform, AlignmentError> {
        self.align_detailed(reference, current).map(|a| a.transform)
    }

    pub fn align_detailed(
        &self,
        reference: &[Point3<f64>],
        current: &[Point3<f64>],
    ) -> Result<Alignment, AlignmentError> {
        if reference.len() != current.len() {
            return Err(AlignmentError::CardinalityMismatch {
                reference: reference.len(),
                current: current.len(),
            });
        }
        if reference.len() < 3 {
            return Err(AlignmentError::NotEnoughPoints(reference.len()));
        }
        if reference
            .iter()
            .chain(current)
            .any(|p| !p.coords.iter().all(|c| c.is_finite()))
        {
            return Err(AlignmentError::NonFinite);
        }

        let reference_centroid = centroid(reference);
        let current_centroid = centroid(current);

        let covariance = reference
            .iter()
            .zip(current)
            .fold(Matrix3::zeros(), |acc, (r, c)| {
                acc + (r - reference_centroid) * (c - current_centroid).transpose()
            });

        let svd = covariance
            .try_svd(true, true, f64::EPSILON, MAX_SVD_ITERATIONS)
            .ok_or(AlignmentError::SvdFailed)?;
        let u = svd.u.ok_or(AlignmentError::SvdFailed)?;
        let v_t = svd.v_t.ok_or(AlignmentError::SvdFailed)?;
        let s = svd.singular_values;

        let mut sorted = [s[0], s[1], s[2]];
        sorted.sort_by(|a, b| b.total_cmp(a));
        trace!("covariance singular values {:?}", sorted);
        // Rank 0 (all points coincide) or rank 1 (collinear): rotation about
        // the line is undetermined.
        if !(sorted[0] > f64::MIN_POSITIVE) || sorted[1] <= self.rank_tolerance * sorted[0] {
            return Err(AlignmentError::DegenerateCovariance(sorted));
        }

        let mut v = v_t.transpose();
        let mut rotation = v * u.transpose();
        let reflection_corrected = rotation.determinant() < 0.0;
        if reflection_corrected {
            let smallest = s.imin();
            v.column_mut(smallest).neg_mut();
            rotation = v * u.transpose();
        }
        if rotation.determinant() <= 0.0 {
            return Err(AlignmentError::DegenerateCovariance(sorted));
        }
        let rotation = Rotation3::from_matrix_unchecked(rotation);

        let transform = RigidTransform {
            rotation,
            translation: current_centroid.coords,
            reference_centroid,
        };

        let rms_residual = (reference
            .iter()
            .zip(current)
            .map(|(r, c)| (transform.transform_point(r) - c).norm_squared())
            .sum::<f64>()
            / reference.len() as f64)
            .sqrt();

        Ok(Alignment {
            transform,
            reference_centroid,
            current_centroid,
            singular_values: sorted,
            reflection_corrected,
            rms_residual,
        })
    }
}

/// Aligns with the default tolerance.
pub fn align(
    reference: &[Point3<f64>],
    current: &[Point3<f64>],
) -> Result<RigidTransform, AlignmentError> {
    RigidAligner::default().align(reference, current)
}

/// Aligns with the default tolerance, returning diagnostics.
pub fn align_detailed(
    reference: &[Point3<f64>],
    current: &[Point3<f64>],
) -> Result<Alignment, AlignmentError> {
    RigidAligner::default().align_detailed(reference, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GridSize, MarkerPointSet};
    use approx::assert_relative_eq;
    use nalgebra::{Vector3, UnitQuaternion};

    fn apply(points: &[Point3<f64>], r: &Rotation3<f64>, t: &Vector3<f64>) -> Vec<Point3<f64>> {
        points.iter().map(|p| r * p + t).collect()
    }

    fn volumetric_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.0, 0.0, 3.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(-2.0, 0.5, 1.5),
        ]
    }

    #[test]
    fn test_recovers_rotation_for_volumetric_cloud() {
        let reference = volumetric_points();
        let r = Rotation3::from_euler_angles(0.4, -0.7, 1.9);
        let t = Vector3::new(10.0, -4.0, 2.5);
        let current = apply(&reference, &r, &t);

        let alignment = align_detailed(&reference, &current).unwrap();
        assert_relative_eq!(alignment.transform.rotation, r, epsilon = 1e-9);
        assert_relative_eq!(
            alignment.transform.translation,
            centroid(&current).coords,
            epsilon = 1e-12
        );
        assert!(alignment.rms_residual < 1e-9);
    }

    #[test]
    fn test_recovers_rotation_for_planar_marker() {
        let marker = MarkerPointSet::grid(GridSize::new(8, 5), 3.025);
        for (roll, pitch, yaw) in [(0.0, 0.0, 0.0), (0.3, 2.5, -1.0), (3.0, -0.2, 0.9)] {
            let r = Rotation3::from_euler_angles(roll, pitch, yaw);
            let t = Vector3::new(-7.0, 3.0, 12.0);
            let current = apply(marker.points(), &r, &t);

            let transform = align(marker.points(), &current).unwrap();
            assert_relative_eq!(transform.rotation, r, epsilon = 1e-9);
            assert_relative_eq!(transform.rotation.matrix().determinant(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_mirrored_cloud_never_yields_reflection() {
        // The mirror image of a volumetric cloud has a covariance whose plain
        // V·Uᵀ has determinant -1.
        let reference = volumetric_points();
        let mirrored: Vec<Point3<f64>> = reference
            .iter()
            .map(|p| Point3::new(-p.x, p.y, p.z))
            .collect();

        let alignment = align_detailed(&reference, &mirrored).unwrap();
        assert!(alignment.reflection_corrected);
        assert_relative_eq!(
            alignment.transform.rotation.matrix().determinant(),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_too_few_points() {
        let reference = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        assert_eq!(
            align(&reference, &reference),
            Err(AlignmentError::NotEnoughPoints(2))
        );
    }

    #[test]
    fn test_collinear_points_rejected() {
        let reference: Vec<Point3<f64>> =
            (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        assert!(matches!(
            align(&reference, &reference),
            Err(AlignmentError::DegenerateCovariance(_))
        ));
    }

    #[test]
    fn test_coincident_points_rejected() {
        let reference = vec![Point3::new(1.0, 2.0, 3.0); 4];
        assert!(matches!(
            align(&reference, &reference),
            Err(AlignmentError::DegenerateCovariance(_))
        ));
    }

    #[test]
    fn test_cardinality_mismatch() {
        let reference = volumetric_points();
        assert_eq!(
            align(&reference, &reference[..4]),
            Err(AlignmentError::CardinalityMismatch {
                reference: 6,
                current: 4
            })
        );
    }

    #[test]
    fn test_translation_is_live_centroid_not_displacement() {
        // The published translation is the absolute centroid of the live cloud.
        // The centroid-relative alternative is only available via displacement().
        let marker = MarkerPointSet::grid(GridSize::new(4, 3), 1.0);
        let current = marker.points().to_vec();
        let transform = align(marker.points(), &current).unwrap();

        assert_relative_eq!(transform.translation, marker.centroid().coords, epsilon = 1e-12);
        assert_relative_eq!(transform.displacement(), Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(transform.rotation, Rotation3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_align_is_idempotent() {
        let reference = volumetric_points();
        let q = UnitQuaternion::from_euler_angles(-0.3, 0.2, 2.2);
        let current = apply(&reference, &q.to_rotation_matrix(), &Vector3::new(1.0, 2.0, 3.0));

        let first = align(&reference, &current).unwrap();
        let second = align(&reference, &current).unwrap();
        assert_relative_eq!(first.rotation, second.rotation, epsilon = 1e-15);
        assert_relative_eq!(first.translation, second.translation, epsilon = 1e-15);
    }
}
