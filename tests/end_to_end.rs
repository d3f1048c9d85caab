use approx::assert_relative_eq;
use marker_tracker::geometry::synthetic::{SyntheticRig, SyntheticSource};
use marker_tracker::session::{CameraConfig, FrameOutcome, SkipReason};
use marker_tracker::util::{
    write_recording, RecordedCornerFinder, RecordedCornerSource, RecordingSink,
};
use marker_tracker::{
    align, bootstrap, BootstrapOptions, CalibrationError, GeometryError, GridSize,
    MarkerPointSet, Session, SessionConfig, SessionState, Triangulator,
};
use nalgebra::{Isometry3, Point2, Rotation3, Vector3};

fn marker() -> MarkerPointSet {
    MarkerPointSet::grid(GridSize::new(8, 5), 3.025)
}

fn config(cameras: usize) -> SessionConfig {
    let cameras = (0..cameras)
        .map(|i| CameraConfig {
            name: format!("cam{i}"),
            calibration: format!("cam{i}.yaml").into(),
        })
        .collect();
    SessionConfig::new(cameras, GridSize::new(8, 5), 3.025)
}

#[test]
fn test_two_camera_pipeline_reproduces_reference() {
    let marker = marker();
    assert_eq!(marker.len(), 40);
    let synthetic = SyntheticRig::two_camera(&marker);
    let observed = synthetic.observe(marker.points()).unwrap();

    let rig = bootstrap(
        &marker,
        &observed,
        &synthetic.intrinsics(),
        &BootstrapOptions::default(),
    )
    .unwrap();

    let cloud = Triangulator::new(marker.len())
        .triangulate(&rig.projections(), &observed)
        .unwrap();
    for (reconstructed, reference) in cloud.iter().zip(marker.points()) {
        assert_relative_eq!(reconstructed, reference, epsilon = 1e-6);
    }

    let pose = align(marker.points(), &cloud).unwrap();
    assert_relative_eq!(pose.rotation, Rotation3::identity(), epsilon = 1e-6);
    assert_relative_eq!(pose.translation, marker.centroid().coords, epsilon = 1e-6);
    assert_relative_eq!(pose.rotation.matrix().determinant(), 1.0, epsilon = 1e-12);
}

#[test]
fn test_bootstrap_with_three_correspondences_fails() {
    let marker = MarkerPointSet::grid(GridSize::new(3, 1), 3.025);
    let k = marker_tracker::geometry::synthetic::default_intrinsics();
    let observed = vec![
        vec![
            Point2::new(300.0, 200.0),
            Point2::new(320.0, 200.0),
            Point2::new(340.0, 201.0),
        ];
        2
    ];

    let result = bootstrap(&marker, &observed, &[k, k], &BootstrapOptions::default());
    assert!(matches!(
        result,
        Err(CalibrationError::InsufficientCorrespondences { got: 3, .. })
    ));
}

#[test]
fn test_cardinality_mismatch_is_caught_before_triangulation() {
    let marker = marker();
    let synthetic = SyntheticRig::two_camera(&marker);
    let mut observed = synthetic.observe(marker.points()).unwrap();
    observed[1].truncate(39);

    let result = Triangulator::new(marker.len()).triangulate(&synthetic.projections(), &observed);
    assert_eq!(
        result,
        Err(GeometryError::CardinalityMismatch {
            view: 1,
            expected: 40,
            got: 39
        })
    );
}

#[test]
fn test_three_camera_session_tracks_moving_marker() {
    let config = config(3);
    let marker = config.marker();
    let rig = SyntheticRig::ring(&marker, 3, 35.0, 45.0);
    let truth: Vec<Isometry3<f64>> = (0..8)
        .map(|i| {
            let s = i as f64 * 0.2;
            Isometry3::new(Vector3::new(s, 0.2 * s, -s), Vector3::new(0.1 * s, 0.3 * s, 0.0))
        })
        .collect();
    let source = SyntheticSource::new(rig.clone(), &marker, truth.clone());

    let mut session = Session::new(
        &config,
        rig.intrinsics(),
        source,
        RecordedCornerFinder,
        RecordingSink::default(),
    )
    .unwrap();
    session.bootstrap().unwrap();
    let summary = session.run().unwrap();
    assert_eq!(summary.published, truth.len());
    assert_eq!(session.state(), SessionState::Terminated);

    for (published, expected) in session.sink().poses.iter().zip(&truth) {
        assert_relative_eq!(
            published.pose.rotation,
            expected.rotation.to_rotation_matrix(),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            published.pose.translation,
            (expected * marker.centroid()).coords,
            epsilon = 1e-6
        );
    }
}

#[test]
fn test_replayed_recording_skips_incomplete_frames() {
    let config = config(2);
    let marker = config.marker();
    let rig = SyntheticRig::two_camera(&marker);
    let truth = vec![Isometry3::translation(0.5, 0.0, 0.0); 3];
    let synthetic = SyntheticSource::new(rig.clone(), &marker, truth)
        .with_pixel_jitter(0.1)
        .with_dropout(2, 1);

    let mut buffer = Vec::new();
    write_recording(&mut buffer, &synthetic.recording()).unwrap();
    let source = RecordedCornerSource::from_reader(buffer.as_slice(), 2).unwrap();

    let mut session = Session::new(
        &config,
        rig.intrinsics(),
        source,
        RecordedCornerFinder,
        RecordingSink::default(),
    )
    .unwrap();
    session.bootstrap().unwrap();

    assert!(matches!(
        session.track_frame().unwrap(),
        FrameOutcome::Published(_)
    ));
    assert_eq!(
        session.track_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::MarkerNotFound { camera: 1 })
    );
    let last = session.last_pose().copied().unwrap();
    assert_relative_eq!(
        last.translation,
        marker.centroid().coords + Vector3::new(0.5, 0.0, 0.0),
        epsilon = 0.05
    );

    let summary = session.run().unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.published, 2);
    assert_eq!(summary.marker_not_found, 1);
}
