//! edgeview: edge-detection frame pipeline.
//!
//! Frames come from a still image, a sampled video container or a live
//! camera, pass through a fixed grayscale + Canny filter, and land in a
//! single observable slot for a presentation layer to read.
//!
//! # Module Structure
//!
//! - `frame`: ARGB8888 pixel buffer
//! - `process`: `FrameProcessor` and the Canny `EdgeProcessor`
//! - `ingest`: frame sources (still, video, camera)
//! - `publish`: `ResultPublisher`, session tokens and subscriptions
//! - `session`: `SessionController`, which owns the active source
//! - `cancel`: cooperative cancellation for background workers
//! - `config`, `ui`: CLI support

use std::time::Duration;

pub mod cancel;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod process;
pub mod publish;
pub mod session;
pub mod ui;

pub use cancel::CancelToken;
pub use config::{CameraConfig, EdgeviewConfig};
pub use error::PipelineError;
pub use frame::Frame;
pub use ingest::{
    CameraController, CameraSession, CameraState, StillImageSource, SyntheticCamera,
    VideoDecoder, VideoSource,
};
pub use process::{EdgeProcessor, FrameProcessor};
pub use publish::{PublishedFrame, ResultPublisher, SessionId, SessionToken, Subscription};
pub use session::{SessionController, SessionState, SourceSelection};

/// Hysteresis low threshold on L1 gradient magnitude.
pub const EDGE_LOW_THRESHOLD: i32 = 50;

/// Hysteresis high threshold on L1 gradient magnitude.
pub const EDGE_HIGH_THRESHOLD: i32 = 150;

/// Spacing between sampled video timestamps (10 s).
pub const VIDEO_SAMPLE_INTERVAL_US: u64 = 10_000_000;

/// Delay between successive sampled video frames.
pub const VIDEO_PACING_DELAY: Duration = Duration::from_secs(1);

/// Which kind of source a session is driving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    StillImage,
    Video,
    LiveCamera,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::StillImage => "still",
            SessionMode::Video => "video",
            SessionMode::LiveCamera => "camera",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
