//! Session controller.
//!
//! A `SessionController` runs one source at a time. Selecting a source stops
//! whatever was running: the video worker is cancelled and joined, the camera
//! is stopped, and the old publishing token goes stale so nothing it still
//! holds can overwrite the new session's output.

use anyhow::Result;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::ingest::camera::{lock_session, CameraController, CameraSession, SharedCameraSession};
use crate::ingest::{StillImageSource, VideoSource};
use crate::process::{EdgeProcessor, FrameProcessor};
use crate::publish::{ResultPublisher, SessionToken};
use crate::{SessionMode, VIDEO_PACING_DELAY};

/// What to run next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSelection {
    /// Path or `stub://` reference of an encoded image.
    StillImage(String),
    /// Path or `stub://` reference of a video container.
    Video(String),
    /// The attached camera controller.
    LiveCamera,
}

impl SourceSelection {
    pub fn mode(&self) -> SessionMode {
        match self {
            SourceSelection::StillImage(_) => SessionMode::StillImage,
            SourceSelection::Video(_) => SessionMode::Video,
            SourceSelection::LiveCamera => SessionMode::LiveCamera,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active(SessionMode),
}

type ProcessorFactory = Box<dyn Fn() -> Box<dyn FrameProcessor> + Send>;

struct VideoTask {
    cancel: CancelToken,
    join: JoinHandle<()>,
}

impl VideoTask {
    fn stop(self) {
        self.cancel.cancel();
        self.join_quietly();
    }

    fn join_quietly(self) {
        if self.join.join().is_err() {
            log::error!("SessionController: video worker panicked");
        }
    }
}

pub struct SessionController {
    publisher: Arc<ResultPublisher>,
    camera: Option<Box<dyn CameraController>>,
    camera_session: SharedCameraSession,
    video: Option<VideoTask>,
    state: SessionState,
    new_processor: ProcessorFactory,
    video_pacing: Duration,
}

impl SessionController {
    pub fn new(publisher: Arc<ResultPublisher>) -> Self {
        let new_processor: ProcessorFactory =
            Box::new(|| Box::new(EdgeProcessor::new()) as Box<dyn FrameProcessor>);
        let camera_session = CameraSession::new(new_processor(), Arc::clone(&publisher)).shared();
        Self {
            publisher,
            camera: None,
            camera_session,
            video: None,
            state: SessionState::Idle,
            new_processor,
            video_pacing: VIDEO_PACING_DELAY,
        }
    }

    /// Attach the camera used by `SourceSelection::LiveCamera`.
    pub fn with_camera(mut self, camera: Box<dyn CameraController>) -> Self {
        self.camera = Some(camera);
        self
    }

    /// Replace the frame transform used by every source.
    pub fn with_processor<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn FrameProcessor> + Send + 'static,
    {
        self.camera_session =
            CameraSession::new(factory(), Arc::clone(&self.publisher)).shared();
        self.new_processor = Box::new(factory);
        self
    }

    /// Override the delay between sampled video frames.
    pub fn with_video_pacing(mut self, pacing: Duration) -> Self {
        self.video_pacing = pacing;
        self
    }

    /// Stop the current source and start `selection`.
    ///
    /// Source failures are logged, not returned. The only error is a
    /// `LiveCamera` selection with no camera attached, or a camera that
    /// refuses to start.
    pub fn select_source(&mut self, selection: SourceSelection) -> Result<()> {
        self.stop();
        let mode = selection.mode();
        log::info!("SessionController: selecting {}", mode);

        match selection {
            SourceSelection::StillImage(reference) => {
                self.state = SessionState::Active(mode);
                let mut processor = (self.new_processor)();
                match process_still(&reference, &self.publisher, processor.as_mut()) {
                    Ok(sequence) => log::info!(
                        "SessionController: published still {} as frame {}",
                        reference,
                        sequence
                    ),
                    Err(err) => {
                        log::error!("SessionController: still {} failed: {:#}", reference, err)
                    }
                }
                self.state = SessionState::Idle;
            }
            SourceSelection::Video(reference) => {
                let cancel = CancelToken::new();
                let publisher = Arc::clone(&self.publisher);
                let processor = (self.new_processor)();
                let pacing = self.video_pacing;
                let worker_cancel = cancel.clone();

                let join = std::thread::Builder::new()
                    .name("video-sampler".to_string())
                    .spawn(move || {
                        let mut processor = processor;
                        // Taken on the worker so a failed spawn leaves no active session.
                        let token = publisher.begin_session();
                        match run_video(
                            &reference,
                            worker_cancel,
                            token,
                            &publisher,
                            processor.as_mut(),
                            pacing,
                        ) {
                            Ok(published) => log::info!(
                                "SessionController: video {} published {} frames",
                                reference,
                                published
                            ),
                            Err(err) => log::error!(
                                "SessionController: video {} failed: {:#}",
                                reference,
                                err
                            ),
                        }
                    })
                    .map_err(|e| PipelineError::Device(format!("spawn video worker: {e}")))?;
                self.video = Some(VideoTask { cancel, join });
                self.state = SessionState::Active(mode);
            }
            SourceSelection::LiveCamera => {
                let camera = self.camera.as_mut().ok_or_else(|| {
                    PipelineError::Device("no camera controller attached".to_string())
                })?;
                camera.start(Arc::clone(&self.camera_session))?;
                log::info!("SessionController: camera {} started", camera.name());
                self.state = SessionState::Active(mode);
            }
        }
        Ok(())
    }

    /// Stop whatever is running and return to `Idle`.
    pub fn stop(&mut self) {
        if let Some(task) = self.video.take() {
            task.stop();
        }
        if let Some(camera) = self.camera.as_mut() {
            if let Err(err) = camera.stop() {
                log::error!("SessionController: camera stop failed: {:#}", err);
            }
        }
        lock_session(&self.camera_session).on_stop();
        if self.state != SessionState::Idle {
            log::info!("SessionController: session ended");
        }
        self.state = SessionState::Idle;
    }

    /// Current state. A video session whose worker has finished reports `Idle`.
    pub fn state(&self) -> SessionState {
        match self.state {
            SessionState::Active(SessionMode::Video)
                if self.video.as_ref().map_or(true, |t| t.join.is_finished()) =>
            {
                SessionState::Idle
            }
            SessionState::Active(SessionMode::LiveCamera)
                if !self.camera.as_ref().is_some_and(|c| c.is_running()) =>
            {
                SessionState::Idle
            }
            state => state,
        }
    }

    pub fn publisher(&self) -> Arc<ResultPublisher> {
        Arc::clone(&self.publisher)
    }

    pub fn camera_session(&self) -> SharedCameraSession {
        Arc::clone(&self.camera_session)
    }

    /// Block until the current video worker finishes on its own.
    pub fn wait_video(&mut self) {
        if let Some(task) = self.video.take() {
            task.join_quietly();
            self.state = SessionState::Idle;
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decode, process and publish one still image under a fresh session.
fn process_still(
    reference: &str,
    publisher: &ResultPublisher,
    processor: &mut dyn FrameProcessor,
) -> Result<u64> {
    let token = publisher.begin_session();
    let result = StillImageSource::open(reference)
        .and_then(StillImageSource::decode)
        .and_then(|frame| processor.process(frame))
        .and_then(|edges| publisher.publish(&token, edges));
    publisher.end_session(&token);
    result
}

/// Sample, process and publish a video until it ends, fails or is cancelled.
///
/// Returns the number of frames published. Stops early once `token` goes
/// stale; dropping the frame sequence releases the decoder.
fn run_video(
    reference: &str,
    cancel: CancelToken,
    token: SessionToken,
    publisher: &ResultPublisher,
    processor: &mut dyn FrameProcessor,
    pacing: Duration,
) -> Result<u64> {
    let result = publish_video(reference, cancel, &token, publisher, processor, pacing);
    publisher.end_session(&token);
    result
}

fn publish_video(
    reference: &str,
    cancel: CancelToken,
    token: &SessionToken,
    publisher: &ResultPublisher,
    processor: &mut dyn FrameProcessor,
    pacing: Duration,
) -> Result<u64> {
    let frames = VideoSource::open(reference)?
        .frames(cancel)
        .with_pacing(pacing);
    let mut published = 0;
    for sampled in frames {
        let sampled = sampled?;
        let edges = processor.process(sampled.frame)?;
        match publisher.publish(token, edges) {
            Ok(sequence) => {
                published += 1;
                log::debug!(
                    "SessionController: video frame at {}us published as {}",
                    sampled.timestamp_us,
                    sequence
                );
            }
            Err(err) => {
                log::warn!("SessionController: video superseded: {}", err);
                break;
            }
        }
    }
    Ok(published)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{CameraState, SyntheticCamera};
    use std::time::Instant;

    fn controller() -> SessionController {
        SessionController::new(Arc::new(ResultPublisher::new()))
            .with_video_pacing(Duration::from_millis(1))
    }

    #[test]
    fn still_selection_publishes_one_frame_and_returns_to_idle() -> Result<()> {
        let mut controller = controller();
        controller.select_source(SourceSelection::StillImage(
            "stub://still?width=100&height=100&pattern=solid".to_string(),
        ))?;

        let published = controller.publisher().latest().expect("published");
        assert_eq!(published.sequence, 1);
        assert_eq!(published.frame.dimensions(), (100, 100));
        assert!(published
            .frame
            .data()
            .chunks_exact(4)
            .all(|px| px == [0xFF, 0, 0, 0]));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.publisher().active_session(), None);
        Ok(())
    }

    #[test]
    fn failed_still_is_swallowed() -> Result<()> {
        let mut controller = controller();
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("missing.png");
        controller.select_source(SourceSelection::StillImage(
            missing.to_string_lossy().into_owned(),
        ))?;
        assert!(controller.publisher().latest().is_none());
        assert_eq!(controller.state(), SessionState::Idle);
        Ok(())
    }

    #[test]
    fn oversized_synthetic_still_is_swallowed() -> Result<()> {
        let mut controller = controller();
        controller.select_source(SourceSelection::StillImage(
            "stub://s?width=4294967295&height=4294967295".to_string(),
        ))?;
        assert!(controller.publisher().latest().is_none());
        assert_eq!(controller.state(), SessionState::Idle);
        Ok(())
    }

    #[test]
    fn video_publishes_every_sample_in_order() -> Result<()> {
        let mut controller = controller();
        let mut sub = controller.publisher().subscribe();
        controller.select_source(SourceSelection::Video(
            "stub://clip?duration_us=30000000&width=32&height=16".to_string(),
        ))?;
        assert_eq!(
            controller.state(),
            SessionState::Active(SessionMode::Video)
        );
        controller.wait_video();

        let latest = controller.publisher().latest().expect("published");
        assert_eq!(latest.sequence, 3);
        assert_eq!(latest.frame.dimensions(), (32, 16));
        assert_eq!(sub.poll().map(|f| f.sequence), Some(3));
        assert!(sub.poll().is_none());
        assert_eq!(controller.state(), SessionState::Idle);
        Ok(())
    }

    #[test]
    fn finished_video_releases_its_session() -> Result<()> {
        let mut controller = controller();
        controller.select_source(SourceSelection::Video(
            "stub://clip?duration_us=20000000".to_string(),
        ))?;
        controller.wait_video();
        let latest = controller.publisher().latest().expect("published");
        assert_eq!(latest.sequence, 2);
        assert_eq!(controller.publisher().active_session(), None);
        Ok(())
    }

    #[test]
    fn video_failure_keeps_earlier_frames() -> Result<()> {
        let mut controller = controller();
        controller.select_source(SourceSelection::Video(
            "stub://clip?duration_us=40000000&fail_at_us=20000000".to_string(),
        ))?;
        controller.wait_video();
        let latest = controller.publisher().latest().expect("published");
        assert_eq!(latest.sequence, 2);
        Ok(())
    }

    #[test]
    fn zero_duration_video_publishes_nothing() -> Result<()> {
        let mut controller = controller();
        controller.select_source(SourceSelection::Video(
            "stub://clip?duration_us=0".to_string(),
        ))?;
        controller.wait_video();
        assert!(controller.publisher().latest().is_none());
        Ok(())
    }

    #[test]
    fn new_selection_cancels_paced_video() -> Result<()> {
        let mut controller = SessionController::new(Arc::new(ResultPublisher::new()))
            .with_video_pacing(Duration::from_secs(30));
        let mut sub = controller.publisher().subscribe();
        controller.select_source(SourceSelection::Video(
            "stub://clip?duration_us=100000000".to_string(),
        ))?;
        let first = sub.wait(Duration::from_secs(5)).expect("first video frame");

        let started = Instant::now();
        controller.select_source(SourceSelection::StillImage(
            "stub://still?pattern=solid".to_string(),
        ))?;
        assert!(started.elapsed() < Duration::from_secs(5));

        let latest = controller.publisher().latest().expect("still frame");
        assert_ne!(latest.session, first.session);
        assert_eq!(latest.sequence, first.sequence + 1);
        Ok(())
    }

    #[test]
    fn live_camera_without_controller_is_an_error() {
        let mut controller = controller();
        let err = controller
            .select_source(SourceSelection::LiveCamera)
            .unwrap_err();
        assert!(matches!(
            PipelineError::kind_of(&err),
            Some(PipelineError::Device(_))
        ));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn live_camera_runs_until_stopped() -> Result<()> {
        let camera = SyntheticCamera::open("stub://cam?fps=200")?.with_size(40, 30);
        let mut controller = controller().with_camera(Box::new(camera));
        let mut sub = controller.publisher().subscribe();

        controller.select_source(SourceSelection::LiveCamera)?;
        assert_eq!(
            controller.state(),
            SessionState::Active(SessionMode::LiveCamera)
        );
        let frame = sub.wait(Duration::from_secs(5)).expect("camera frame");
        assert_eq!(frame.frame.dimensions(), (40, 30));

        controller.stop();
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(
            lock_session(&controller.camera_session()).state(),
            CameraState::Stopped
        );
        Ok(())
    }

    #[test]
    fn camera_takes_over_from_video() -> Result<()> {
        let camera = SyntheticCamera::open("stub://cam?fps=200")?.with_size(16, 16);
        let mut controller = SessionController::new(Arc::new(ResultPublisher::new()))
            .with_video_pacing(Duration::from_secs(30))
            .with_camera(Box::new(camera));
        let mut sub = controller.publisher().subscribe();

        controller.select_source(SourceSelection::Video(
            "stub://clip?duration_us=100000000".to_string(),
        ))?;
        let video_frame = sub.wait(Duration::from_secs(5)).expect("video frame");

        controller.select_source(SourceSelection::LiveCamera)?;
        let camera_frame = sub.wait(Duration::from_secs(5)).expect("camera frame");
        assert_ne!(camera_frame.session, video_frame.session);
        assert!(camera_frame.sequence > video_frame.sequence);

        controller.stop();
        let latest = controller.publisher().latest().expect("latest");
        assert_eq!(latest.session, camera_frame.session);
        Ok(())
    }

    #[test]
    fn superseded_video_publishes_nothing() -> Result<()> {
        let publisher = ResultPublisher::new();
        let video_token = publisher.begin_session();
        let camera_token = publisher.begin_session();

        let published = run_video(
            "stub://clip?duration_us=30000000",
            CancelToken::new(),
            video_token,
            &publisher,
            &mut EdgeProcessor::new(),
            Duration::from_millis(1),
        )?;
        assert_eq!(published, 0);
        assert!(publisher.latest().is_none());
        assert!(publisher.is_current(&camera_token));
        Ok(())
    }
}
