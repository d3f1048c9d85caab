//! One-shot extrinsic calibration of a static camera rig.
//!
//! Each camera is located independently from a single observation of the
//! marker at its reference position. The marker's initial pose therefore
//! defines the world frame for the whole session.

use log::{debug, info};
use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};

use crate::camera::{Intrinsics, ProjectionMatrix};
use crate::error::CalibrationError;
use crate::geometry::{Correspondence, MarkerPointSet};
use crate::optimization::pnp::MIN_CORRESPONDENCES;
use crate::optimization::{Optimizer, PnpOptimizationCost};

/// Knobs of the per-camera pose estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    /// Run Levenberg-Marquardt refinement after the linear estimate.
    pub refine: bool,
    pub max_iterations: usize,
    /// Largest acceptable reprojection RMS in pixels.
    pub max_reprojection_rms: f64,
    /// Relative singular-value threshold under which the marker is planar.
    pub planarity_tolerance: f64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        BootstrapOptions {
            refine: true,
            max_iterations: 100,
            max_reprojection_rms: 5.0,
            planarity_tolerance: 1e-6,
        }
    }
}

/// Pose of one camera relative to the world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraExtrinsics {
    pub world_to_camera: Isometry3<f64>,
}

impl CameraExtrinsics {
    pub fn new(world_to_camera: Isometry3<f64>) -> Self {
        CameraExtrinsics { world_to_camera }
    }

    /// Inverse pose, used for reporting and rendering.
    pub fn camera_to_world(&self) -> Isometry3<f64> {
        self.world_to_camera.inverse()
    }

    /// Optical centre in world coordinates.
    pub fn center(&self) -> Point3<f64> {
        self.camera_to_world().transform_point(&Point3::origin())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratedCamera {
    pub index: usize,
    pub intrinsics: Intrinsics,
    pub extrinsics: CameraExtrinsics,
    pub projection: ProjectionMatrix,
    pub reprojection_rms: f64,
}

/// The calibrated rig. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Rig {
    cameras: Vec<CalibratedCamera>,
}

impl Rig {
    pub fn new(cameras: Vec<CalibratedCamera>) -> Self {
        Rig { cameras }
    }

    pub fn cameras(&self) -> &[CalibratedCamera] {
        &self.cameras
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Projection matrices in camera order, ready for triangulation.
    pub fn projections(&self) -> Vec<ProjectionMatrix> {
        self.cameras.iter().map(|c| c.projection).collect()
    }
}

/// Locates every camera from one synchronized observation of the marker.
///
/// `correspondences[i]` and `intrinsics[i]` belong to camera `i`. Fails with
/// [`CalibrationError`] on the first camera that cannot be located; nothing is
/// retried. A rig needs at least two cameras to triangulate, so fewer is
/// rejected up front with [`CalibrationError::NotEnoughCameras`].
pub fn bootstrap(
    reference: &MarkerPointSet,
    correspondences: &[Correspondence],
    intrinsics: &[Intrinsics],
    options: &BootstrapOptions,
) -> Result<Rig, CalibrationError> {
    if correspondences.len() != intrinsics.len() {
        return Err(CalibrationError::CameraCountMismatch {
            cameras: correspondences.len(),
            intrinsics: intrinsics.len(),
        });
    }
    if correspondences.len() < 2 {
        return Err(CalibrationError::NotEnoughCameras(correspondences.len()));
    }

    let cameras = correspondences
        .iter()
        .zip(intrinsics)
        .enumerate()
        .map(|(index, (observed, k))| locate_camera(index, reference, observed, k, options))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Rig::new(cameras))
}

/// Runs PnP for a single camera and validates the solution.
pub fn locate_camera(
    index: usize,
    reference: &MarkerPointSet,
    observed: &Correspondence,
    intrinsics: &Intrinsics,
    options: &BootstrapOptions,
) -> Result<CalibratedCamera, CalibrationError> {
    if observed.len() < MIN_CORRESPONDENCES {
        return Err(CalibrationError::InsufficientCorrespondences {
            camera: index,
            required: MIN_CORRESPONDENCES,
            got: observed.len(),
        });
    }
    if observed.len() != reference.len() {
        return Err(CalibrationError::CountMismatch {
            camera: index,
            expected: reference.len(),
            got: observed.len(),
        });
    }

    let mut cost = PnpOptimizationCost::from_points(index, *intrinsics, reference.points(), observed)
        .with_planarity_tolerance(options.planarity_tolerance)
        .with_max_iterations(options.max_iterations);
    cost.linear_estimation()?;
    if options.refine {
        cost.optimize(false)?;
    }

    let behind = cost.depths().iter().filter(|&&z| !(z > 0.0)).count();
    if behind > 0 {
        return Err(CalibrationError::NegativeDepth {
            camera: index,
            behind,
            total: observed.len(),
        });
    }

    let error = cost.reprojection_error()?;
    debug!("camera {}: {:?}", index, error);
    if !error.rmse.is_finite() || error.rmse > options.max_reprojection_rms {
        return Err(CalibrationError::ReprojectionTooLarge {
            camera: index,
            rms: error.rmse,
            limit: options.max_reprojection_rms,
        });
    }

    let extrinsics = CameraExtrinsics::new(cost.get_pose());
    let center = extrinsics.center();
    info!(
        "camera {} located at ({:.3}, {:.3}, {:.3}), reprojection RMS {:.4} px",
        index, center.x, center.y, center.z, error.rmse
    );

    Ok(CalibratedCamera {
        index,
        intrinsics: *intrinsics,
        extrinsics,
        projection: ProjectionMatrix::from_parts(intrinsics, &extrinsics.world_to_camera),
        reprojection_rms: error.rmse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::synthetic::SyntheticRig;
    use crate::geometry::GridSize;
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Point3, Vector3};

    fn marker() -> MarkerPointSet {
        MarkerPointSet::grid(GridSize::new(8, 5), 3.025)
    }

    #[test]
    fn test_bootstrap_recovers_rig() {
        let marker = marker();
        let synthetic = SyntheticRig::two_camera(&marker);
        let observed = synthetic.observe(marker.points()).unwrap();

        let rig = bootstrap(
            &marker,
            &observed,
            &synthetic.intrinsics(),
            &BootstrapOptions::default(),
        )
        .unwrap();

        assert_eq!(rig.len(), 2);
        for (camera, truth) in rig.cameras().iter().zip(synthetic.poses()) {
            assert_relative_eq!(
                camera.extrinsics.world_to_camera.to_homogeneous(),
                truth.to_homogeneous(),
                epsilon = 1e-6
            );
            assert!(camera.reprojection_rms < 1e-6);
            assert_relative_eq!(
                camera.extrinsics.camera_to_world() * camera.extrinsics.world_to_camera,
                Isometry3::identity(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_three_correspondences_fail() {
        let marker = marker();
        let synthetic = SyntheticRig::two_camera(&marker);
        let mut observed = synthetic.observe(marker.points()).unwrap();
        observed[1].truncate(3);

        let result = bootstrap(
            &marker,
            &observed,
            &synthetic.intrinsics(),
            &BootstrapOptions::default(),
        );
        assert_eq!(
            result,
            Err(CalibrationError::InsufficientCorrespondences {
                camera: 1,
                required: 4,
                got: 3
            })
        );
    }

    #[test]
    fn test_count_mismatch_fails() {
        let marker = marker();
        let synthetic = SyntheticRig::two_camera(&marker);
        let mut observed = synthetic.observe(marker.points()).unwrap();
        observed[0].pop();

        let result = bootstrap(
            &marker,
            &observed,
            &synthetic.intrinsics(),
            &BootstrapOptions::default(),
        );
        assert_eq!(
            result,
            Err(CalibrationError::CountMismatch {
                camera: 0,
                expected: 40,
                got: 39
            })
        );
    }

    #[test]
    fn test_camera_count_mismatch_fails() {
        let marker = marker();
        let synthetic = SyntheticRig::two_camera(&marker);
        let observed = synthetic.observe(marker.points()).unwrap();
        let result = bootstrap(
            &marker,
            &observed,
            &synthetic.intrinsics()[..1],
            &BootstrapOptions::default(),
        );
        assert!(matches!(
            result,
            Err(CalibrationError::CameraCountMismatch { .. })
        ));
    }

    #[test]
    fn test_rig_needs_two_cameras() {
        let marker = marker();
        let synthetic = SyntheticRig::two_camera(&marker);
        let observed = synthetic.observe(marker.points()).unwrap();
        let options = BootstrapOptions::default();

        assert_eq!(
            bootstrap(&marker, &[], &[], &options),
            Err(CalibrationError::NotEnoughCameras(0))
        );
        assert_eq!(
            bootstrap(&marker, &observed[..1], &synthetic.intrinsics()[..1], &options),
            Err(CalibrationError::NotEnoughCameras(1))
        );
    }

    #[test]
    fn test_non_finite_corner_fails() {
        let marker = marker();
        let synthetic = SyntheticRig::two_camera(&marker);
        let mut observed = synthetic.observe(marker.points()).unwrap();
        observed[0][3] = Point2::new(f64::NAN, 10.0);

        let result = bootstrap(
            &marker,
            &observed,
            &synthetic.intrinsics(),
            &BootstrapOptions::default(),
        );
        assert_eq!(result, Err(CalibrationError::NonFinite { camera: 0 }));
    }

    #[test]
    fn test_outlier_corner_exceeds_rms_limit() {
        let marker = marker();
        let synthetic = SyntheticRig::two_camera(&marker);
        let mut observed = synthetic.observe(marker.points()).unwrap();
        observed[0][12].x += 10.0;

        let options = BootstrapOptions {
            max_reprojection_rms: 0.5,
            ..BootstrapOptions::default()
        };
        let result = locate_camera(0, &marker, &observed[0], &synthetic.intrinsics()[0], &options);
        match result {
            Err(CalibrationError::ReprojectionTooLarge { camera, rms, limit }) => {
                assert_eq!(camera, 0);
                assert_relative_eq!(limit, 0.5);
                assert!(rms > limit);
            }
            other => panic!("expected ReprojectionTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_marker_straddling_image_plane_has_negative_depth() {
        let marker = marker();
        let k = crate::geometry::synthetic::default_intrinsics();
        // Grazing view from above the marker: the first row lies behind the camera.
        let centroid = marker.centroid();
        let pose = crate::geometry::synthetic::look_at(
            &Point3::new(centroid.x, 3.0, 2.0),
            &Point3::new(centroid.x, 0.0, 8.0),
            &Vector3::y(),
        );
        let observed: Vec<Point2<f64>> = marker
            .points()
            .iter()
            .map(|p| {
                let pc = pose.transform_point(p);
                Point2::new(k.fx * pc.x / pc.z + k.cx, k.fy * pc.y / pc.z + k.cy)
            })
            .collect();

        let options = BootstrapOptions {
            refine: false,
            ..BootstrapOptions::default()
        };
        let result = locate_camera(0, &marker, &observed, &k, &options);
        assert_eq!(
            result,
            Err(CalibrationError::NegativeDepth {
                camera: 0,
                behind: 8,
                total: 40
            })
        );
    }

    #[test]
    fn test_projection_matches_extrinsics() {
        let marker = marker();
        let synthetic = SyntheticRig::two_camera(&marker);
        let observed = synthetic.observe(marker.points()).unwrap();
        let rig = bootstrap(
            &marker,
            &observed,
            &synthetic.intrinsics(),
            &BootstrapOptions {
                refine: false,
                ..BootstrapOptions::default()
            },
        )
        .unwrap();

        let p = rig.projections();
        let projected: Point2<f64> = p[1].project(&marker.points()[17]).unwrap();
        assert_relative_eq!(projected, observed[1][17], epsilon = 1e-6);
    }
}
