//! Live camera frame source.
//!
//! Camera frames are pushed, not pulled. A `CameraController` owns a capture
//! thread and drives a `CameraSession` through its callbacks:
//! - `on_start(width, height)` once the stream size is known
//! - `on_frame(frame)` for every captured frame, at the device's rate
//! - `on_stop()` when capture ends
//!
//! There is no buffering or backpressure: each frame is processed in place
//! and its result replaces whatever was published before.

use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use super::synthetic::{self, Pattern, StubRef};
use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::process::FrameProcessor;
use crate::publish::{ResultPublisher, SessionToken};

const DEFAULT_STUB_FPS: u32 = 30;

/// Lifecycle state of a camera session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraState {
    Stopped,
    Active { width: u32, height: u32 },
}

/// Counters for a camera session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CameraStats {
    pub frames_processed: u64,
    pub frames_published: u64,
    pub frames_rejected: u64,
}

/// Callback target for a camera stream.
pub struct CameraSession {
    state: CameraState,
    buffer: Option<Frame>,
    processor: Box<dyn FrameProcessor>,
    publisher: Arc<ResultPublisher>,
    token: Option<SessionToken>,
    stats: CameraStats,
}

/// Camera session shared between the controller and its capture thread.
pub type SharedCameraSession = Arc<Mutex<CameraSession>>;

impl CameraSession {
    pub fn new(processor: Box<dyn FrameProcessor>, publisher: Arc<ResultPublisher>) -> Self {
        Self {
            state: CameraState::Stopped,
            buffer: None,
            processor,
            publisher,
            token: None,
            stats: CameraStats::default(),
        }
    }

    pub fn shared(self) -> SharedCameraSession {
        Arc::new(Mutex::new(self))
    }

    /// Stream started: allocate the reusable buffer and take over the publisher.
    pub fn on_start(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::invalid_frame(format!(
                "camera stream {width}x{height} has no area"
            )));
        }
        if let CameraState::Active {
            width: old_w,
            height: old_h,
        } = self.state
        {
            log::info!(
                "CameraSession: restarting {}x{} stream as {}x{}",
                old_w,
                old_h,
                width,
                height
            );
        }
        self.buffer = Some(Frame::blank(width, height)?);
        if let Some(old) = self.token.take() {
            self.publisher.end_session(&old);
        }
        self.token = Some(self.publisher.begin_session());
        self.state = CameraState::Active { width, height };
        log::info!("CameraSession: started {}x{}", width, height);
        Ok(())
    }

    /// Stream stopped: release the buffer and the publisher. Idempotent.
    pub fn on_stop(&mut self) {
        if self.state == CameraState::Stopped {
            return;
        }
        self.buffer = None;
        if let Some(token) = self.token.take() {
            self.publisher.end_session(&token);
        }
        self.state = CameraState::Stopped;
        log::info!(
            "CameraSession: stopped after {} frames",
            self.stats.frames_processed
        );
    }

    /// Process one captured frame in place and publish the result.
    ///
    /// Returns the same frame for the capture layer to display or reuse.
    /// Rejected with `CameraStopped` outside `on_start`/`on_stop`.
    pub fn on_frame<'a>(&mut self, frame: &'a mut Frame) -> Result<&'a mut Frame> {
        let CameraState::Active { width, height } = self.state else {
            self.stats.frames_rejected += 1;
            return Err(PipelineError::CameraStopped.into());
        };
        if frame.dimensions() != (width, height) {
            self.stats.frames_rejected += 1;
            return Err(PipelineError::invalid_frame(format!(
                "camera frame {}x{} does not match stream {}x{}",
                frame.width(),
                frame.height(),
                width,
                height
            )));
        }
        let buffer = self
            .buffer
            .as_mut()
            .ok_or(PipelineError::CameraStopped)?;

        self.processor.process_into(frame, buffer)?;
        frame.copy_from(buffer)?;
        self.stats.frames_processed += 1;

        let superseded = match &self.token {
            Some(token) => match self.publisher.publish(token, buffer.clone()) {
                Ok(sequence) => {
                    self.stats.frames_published += 1;
                    log::debug!("CameraSession: published frame {}", sequence);
                    false
                }
                Err(err) => {
                    log::warn!("CameraSession: frame not published: {}", err);
                    true
                }
            },
            None => false,
        };
        if superseded {
            // Another session took over; stay quiet until the next start.
            self.token = None;
        }
        Ok(frame)
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn buffer_dimensions(&self) -> Option<(u32, u32)> {
        self.buffer.as_ref().map(Frame::dimensions)
    }

    pub fn stats(&self) -> CameraStats {
        self.stats
    }
}

pub(crate) fn lock_session(session: &SharedCameraSession) -> MutexGuard<'_, CameraSession> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

/// External camera subsystem.
///
/// `start` begins delivering frames to the session from a capture thread;
/// `stop` ends delivery and waits for the thread. Both are idempotent.
pub trait CameraController: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn start(&mut self, session: SharedCameraSession) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// Capture thread handle shared by controller backends.
pub(crate) struct CaptureWorker {
    cancel: CancelToken,
    join: JoinHandle<()>,
}

impl CaptureWorker {
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_cancel))
            .map_err(|e| PipelineError::Device(format!("spawn capture thread: {e}")))?;
        Ok(Self { cancel, join })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub(crate) fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.join
            .join()
            .map_err(|_| PipelineError::Device("capture thread panicked".to_string()).into())
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests and demos
// ----------------------------------------------------------------------------

/// Camera that renders moving bars. Keys: `width`, `height`, `fps`, `pattern`.
pub struct SyntheticCamera {
    device: String,
    width: u32,
    height: u32,
    fps: u32,
    pattern: Pattern,
    worker: Option<CaptureWorker>,
}

impl SyntheticCamera {
    pub fn open(reference: &str) -> Result<Self> {
        let stub = StubRef::parse(reference)?;
        let (width, height) = stub.dimensions()?;
        Ok(Self {
            device: reference.to_string(),
            width,
            height,
            fps: stub.u32_param("fps", DEFAULT_STUB_FPS)?.max(1),
            pattern: stub.pattern()?,
            worker: None,
        })
    }

    /// Override the stream size announced through `on_start`.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

impl CameraController for SyntheticCamera {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn start(&mut self, session: SharedCameraSession) -> Result<()> {
        self.stop()?;
        let (width, height, pattern) = (self.width, self.height, self.pattern);
        let interval = Duration::from_micros(1_000_000 / self.fps as u64);
        let device = self.device.clone();

        self.worker = Some(CaptureWorker::spawn("synthetic-camera", move |cancel| {
            if let Err(err) = lock_session(&session).on_start(width, height) {
                log::error!("SyntheticCamera: {} failed to start: {}", device, err);
                return;
            }
            let mut phase = 0u64;
            while !cancel.is_cancelled() {
                match synthetic::render(pattern, width, height, phase) {
                    Ok(mut frame) => {
                        if let Err(err) = lock_session(&session).on_frame(&mut frame) {
                            log::warn!("SyntheticCamera: frame dropped: {}", err);
                        }
                    }
                    Err(err) => log::error!("SyntheticCamera: render failed: {}", err),
                }
                phase += 1;
                if cancel.wait_timeout(interval) {
                    break;
                }
            }
            lock_session(&session).on_stop();
        })?);
        log::info!(
            "SyntheticCamera: streaming {} ({}x{} @ {} fps)",
            self.device,
            width,
            height,
            self.fps
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker.stop(),
            None => Ok(()),
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("SyntheticCamera: {}", err);
        }
    }
}

/// Open a camera controller for `device`: `stub://` or, with `camera-v4l2`, a V4L2 node.
pub fn open_camera(
    device: &str,
    width: u32,
    height: u32,
    target_fps: u32,
) -> Result<Box<dyn CameraController>> {
    if synthetic::is_stub(device) {
        return Ok(Box::new(SyntheticCamera::open(device)?.with_size(width, height)));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        Ok(Box::new(super::camera_v4l2::V4l2Camera::new(
            device, width, height, target_fps,
        )))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        let _ = target_fps;
        Err(PipelineError::Device(format!(
            "camera '{device}' requires the camera-v4l2 feature"
        ))
        .into())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
