//! Frame sources.
//!
//! Three kinds of input feed the pipeline:
//! - Still images (PNG/JPEG), decoded once
//! - Video containers (feature: video-ffmpeg), sampled every ten seconds
//! - Live cameras (feature: camera-v4l2), pushing frames through callbacks
//!
//! Every kind also accepts a `stub://` reference that renders synthetic
//! frames, for tests and for running without media libraries.

pub mod camera;
#[cfg(feature = "camera-v4l2")]
pub mod camera_v4l2;
pub mod still;
mod synthetic;
pub mod video;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod video_ffmpeg;

pub use camera::{
    open_camera, CameraController, CameraSession, CameraState, CameraStats, SharedCameraSession,
    SyntheticCamera,
};
#[cfg(feature = "camera-v4l2")]
pub use camera_v4l2::V4l2Camera;
pub use still::StillImageSource;
pub use video::{sample_timestamps, SampledFrame, VideoDecoder, VideoFrames, VideoSource};
