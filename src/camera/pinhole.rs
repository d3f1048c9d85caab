//! Projection matrices of calibrated pinhole cameras.
//!
//! A [`ProjectionMatrix`] composes a camera's intrinsics with its world→camera
//! pose, `P = K · [R | t]`, and maps homogeneous world points straight to
//! homogeneous pixels.

use nalgebra::{Isometry3, Matrix3x4, Point2, Point3, RowVector4, Vector4};

use crate::camera::Intrinsics;

/// A 3×4 camera projection matrix `K · [R | t]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionMatrix(Matrix3x4<f64>);

impl ProjectionMatrix {
    /// Composes intrinsics with a world→camera pose.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use marker_tracker::camera::{Intrinsics, ProjectionMatrix};
    /// use nalgebra::{Isometry3, Point3, Vector3};
    ///
    /// let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0).unwrap();
    /// let pose = Isometry3::translation(0.0, 0.0, 5.0);
    /// let p = ProjectionMatrix::from_parts(&k, &pose);
    /// let pixel = p.project(&Point3::new(0.0, 0.0, 0.0)).unwrap();
    /// assert!((pixel.x - 320.0).abs() < 1e-9);
    /// assert!((pixel.y - 240.0).abs() < 1e-9);
    /// ```
    pub fn from_parts(intrinsics: &Intrinsics, world_to_camera: &Isometry3<f64>) -> Self {
        let rt = world_to_camera.to_homogeneous().fixed_view::<3, 4>(0, 0).into_owned();
        ProjectionMatrix(intrinsics.k_matrix() * rt)
    }

    /// Wraps a raw 3×4 matrix.
    pub fn from_matrix(matrix: Matrix3x4<f64>) -> Self {
        ProjectionMatrix(matrix)
    }

    pub fn matrix(&self) -> &Matrix3x4<f64> {
        &self.0
    }

    pub fn row(&self, i: usize) -> RowVector4<f64> {
        self.0.row(i).into_owned()
    }

    /// Projects a world point to pixels.
    ///
    /// Returns `None` when the point lies on or behind the camera plane.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        let x = self.0 * Vector4::new(point.x, point.y, point.z, 1.0);
        if x.z < f64::EPSILON.sqrt() {
            return None;
        }
        Some(Point2::new(x.x / x.z, x.y / x.z))
    }
}
