use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};

use edgeview::ingest::{CameraState, SyntheticCamera};
use edgeview::{
    EdgeProcessor, Frame, FrameProcessor, PipelineError, ResultPublisher, SessionController,
    SessionMode, SessionState, SourceSelection,
};

fn controller() -> SessionController {
    SessionController::new(Arc::new(ResultPublisher::new()))
        .with_video_pacing(Duration::from_millis(1))
}

/// Left half black, right half white.
fn split_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    });
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

#[test]
fn still_png_from_disk_produces_vertical_edge() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("split.png");
    std::fs::write(&path, split_png(20, 10)).expect("write png");

    let mut controller = controller();
    controller
        .select_source(SourceSelection::StillImage(
            path.to_string_lossy().into_owned(),
        ))
        .expect("select still");

    let published = controller.publisher().latest().expect("published frame");
    let frame = &published.frame;
    assert_eq!(frame.dimensions(), (20, 10));
    for y in 0..10 {
        let row: Vec<u8> = (0..20)
            .map(|x| frame.pixel(x, y).expect("in bounds")[1])
            .collect();
        assert_eq!(row.iter().filter(|v| **v == 255).count(), 1, "row {y}");
        assert_eq!(row[9], 255, "row {y}");
    }
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn processor_preserves_dimensions_and_replicates_gray() {
    let input = Frame::filled(37, 11, [255, 10, 200, 90]).expect("frame");
    let output = EdgeProcessor::new().process(input).expect("process");
    assert_eq!(output.dimensions(), (37, 11));
    assert!(output
        .data()
        .chunks_exact(4)
        .all(|px| px[0] == 255 && px[1] == px[2] && px[2] == px[3]));
}

#[test]
fn zero_area_frame_is_rejected() {
    let input = Frame::new(0, 0, Vec::new()).expect("empty frame");
    let err = EdgeProcessor::new().process(input).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::InvalidFrame(_))
    ));
}

#[test]
fn video_frames_arrive_with_increasing_sequences() {
    let mut controller = controller();
    let mut sub = controller.publisher().subscribe();
    controller
        .select_source(SourceSelection::Video(
            "stub://clip?duration_us=50000000&width=24&height=24".to_string(),
        ))
        .expect("select video");

    let mut sequences = Vec::new();
    while let Some(frame) = sub.wait(Duration::from_secs(5)) {
        sequences.push(frame.sequence);
        if frame.sequence == 5 {
            break;
        }
    }
    controller.wait_video();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(sequences.last(), Some(&5));
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn unreadable_video_is_swallowed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut controller = controller();
    controller
        .select_source(SourceSelection::Video(
            dir.path().join("missing.mp4").to_string_lossy().into_owned(),
        ))
        .expect("select video");
    controller.wait_video();
    assert!(controller.publisher().latest().is_none());
}

#[test]
fn switching_modes_supersedes_the_previous_session() {
    let camera = SyntheticCamera::open("stub://cam?fps=100")
        .expect("camera")
        .with_size(32, 24);
    let mut controller = SessionController::new(Arc::new(ResultPublisher::new()))
        .with_video_pacing(Duration::from_secs(60))
        .with_camera(Box::new(camera));
    let mut sub = controller.publisher().subscribe();

    controller
        .select_source(SourceSelection::Video(
            "stub://clip?duration_us=600000000".to_string(),
        ))
        .expect("select video");
    let video = sub.wait(Duration::from_secs(5)).expect("video frame");

    controller
        .select_source(SourceSelection::LiveCamera)
        .expect("select camera");
    assert_eq!(
        controller.state(),
        SessionState::Active(SessionMode::LiveCamera)
    );
    let camera = sub.wait(Duration::from_secs(5)).expect("camera frame");
    assert_ne!(camera.session, video.session);
    assert_eq!(camera.frame.dimensions(), (32, 24));

    controller
        .select_source(SourceSelection::StillImage(
            "stub://still?pattern=solid&rgb=ffffff".to_string(),
        ))
        .expect("select still");
    let still = controller.publisher().latest().expect("still frame");
    assert_ne!(still.session, camera.session);
    assert!(still.sequence > camera.sequence);
    assert_eq!(
        controller
            .camera_session()
            .lock()
            .expect("camera session")
            .state(),
        CameraState::Stopped
    );
}
