//! Point sets, correspondences and rigid transforms shared by the pipeline.
//!
//! Every point sequence in the tracker is index aligned with the
//! [`MarkerPointSet`]: index `i` always denotes the same physical corner of the
//! marker, in the reference geometry, in each camera's 2-D correspondence and
//! in the reconstructed cloud.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub mod alignment;
pub mod synthetic;
pub mod triangulation;

pub use alignment::{align, align_detailed, Alignment, RigidAligner};
pub use triangulation::{triangulate, Triangulator};

/// Per-camera 2-D corner observations, row-major in grid order.
pub type Correspondence = Vec<Point2<f64>>;

/// Marker corners reconstructed from the current frame.
pub type PointCloud = Vec<Point3<f64>>;

/// Grid topology of the marker: inner corners per row and per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub width: usize,
    pub height: usize,
}

impl GridSize {
    pub fn new(width: usize, height: usize) -> Self {
        GridSize { width, height }
    }

    pub fn count(&self) -> usize {
        self.width * self.height
    }
}

/// Reference geometry of the marker in world coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPointSet {
    grid: GridSize,
    square_size: f64,
    points: Vec<Point3<f64>>,
}

impl MarkerPointSet {
    /// Lays the grid corners in the world XZ plane.
    ///
    /// Index `i = z * width + x` maps to `(x * square_size, 0, z * square_size)`,
    /// so the marker's initial position defines the world frame.
    pub fn grid(grid: GridSize, square_size: f64) -> Self {
        let mut points = Vec::with_capacity(grid.count());
        for z in 0..grid.height {
            for x in 0..grid.width {
                points.push(Point3::new(
                    x as f64 * square_size,
                    0.0,
                    z as f64 * square_size,
                ));
            }
        }
        MarkerPointSet {
            grid,
            square_size,
            points,
        }
    }

    pub fn grid_size(&self) -> GridSize {
        self.grid
    }

    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Centroid of the reference corners (the marker's initial position).
    pub fn centroid(&self) -> Point3<f64> {
        centroid(&self.points)
    }
}

/// Live pose of the marker: a proper rotation plus a translation in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    /// Centroid of the reference geometry the rotation was estimated about.
    pub reference_centroid: Point3<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        RigidTransform {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
            reference_centroid: Point3::origin(),
        }
    }

    pub fn rotation_matrix(&self) -> &Matrix3<f64> {
        self.rotation.matrix()
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&self.rotation)
    }

    /// Displacement of the marker centroid from its reference position.
    ///
    /// The published translation is the absolute centroid of the live cloud;
    /// this is the centroid-relative alternative.
    pub fn displacement(&self) -> Vector3<f64> {
        self.translation - self.reference_centroid.coords
    }

    /// Maps a reference corner to its live position:
    /// `R · (p - reference_centroid) + translation`.
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * (point - self.reference_centroid) + self.translation)
    }

    /// The transform as an isometry acting on centroid-relative coordinates.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.quaternion())
    }
}

/// Arithmetic mean of a point sequence; the origin for an empty slice.
pub fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    if points.is_empty() {
        return Point3::origin();
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / points.len() as f64)
}

/// Returns the index and length of the first sequence whose length differs
/// from `expected`.
pub fn find_cardinality_mismatch<T>(expected: usize, sequences: &[Vec<T>]) -> Option<(usize, usize)> {
    sequences
        .iter()
        .enumerate()
        .find(|(_, s)| s.len() != expected)
        .map(|(i, s)| (i, s.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_grid_layout_is_row_major_in_xz_plane() {
        let marker = MarkerPointSet::grid(GridSize::new(8, 5), 3.025);
        assert_eq!(marker.len(), 40);
        assert_eq!(marker.points()[0], Point3::new(0.0, 0.0, 0.0));
        assert_eq!(marker.points()[1], Point3::new(3.025, 0.0, 0.0));
        assert_eq!(marker.points()[8], Point3::new(0.0, 0.0, 3.025));
        assert!(marker.points().iter().all(|p| p.y == 0.0));
    }

    #[test]
    fn test_grid_centroid() {
        let marker = MarkerPointSet::grid(GridSize::new(8, 5), 3.025);
        let c = marker.centroid();
        assert_relative_eq!(c.x, 3.5 * 3.025, epsilon = 1e-12);
        assert_relative_eq!(c.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(c.z, 2.0 * 3.025, epsilon = 1e-12);
    }

    #[test]
    fn test_cardinality_mismatch() {
        let views = vec![vec![Point2::new(0.0, 0.0); 4], vec![Point2::new(0.0, 0.0); 3]];
        assert_eq!(find_cardinality_mismatch(4, &views), Some((1, 3)));
        assert_eq!(find_cardinality_mismatch(4, &views[..1]), None);
    }

    #[test]
    fn test_transform_point_and_displacement() {
        let transform = RigidTransform {
            rotation: Rotation3::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_2),
            translation: Vector3::new(1.0, 2.0, 3.0),
            reference_centroid: Point3::new(1.0, 0.0, 0.0),
        };
        assert_relative_eq!(
            transform.transform_point(&Point3::new(1.0, 0.0, 0.0)),
            Point3::new(1.0, 2.0, 3.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(transform.displacement(), Vector3::new(0.0, 2.0, 3.0));
    }
}
