//! Sampled video frame source.
//!
//! `VideoSource` wraps a `VideoDecoder` and produces a lazy, finite sequence
//! of frames taken every `VIDEO_SAMPLE_INTERVAL_US` of container time. The
//! sequence:
//! - Reads the container duration on first use
//! - Asks the decoder for the frame nearest to each sample timestamp
//! - Waits `VIDEO_PACING_DELAY` between successive emitted frames
//! - Checks its `CancelToken` before every decode and every pacing wait
//!
//! A decode failure is yielded once and ends the sequence. The decoder is
//! released as soon as the sequence ends, whatever the reason.

use anyhow::Result;
use std::iter::StepBy;
use std::ops::Range;
use std::time::Duration;

use super::synthetic::{self, Pattern, StubRef};
#[cfg(feature = "video-ffmpeg")]
use super::video_ffmpeg::FfmpegVideoDecoder;
use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::{VIDEO_PACING_DELAY, VIDEO_SAMPLE_INTERVAL_US};

const DEFAULT_STUB_DURATION_US: u64 = 25_000_000;
const DEFAULT_STUB_FPS: u32 = 30;

/// Random-access video decoder.
///
/// Decoders are opened and used on the thread that samples them, so the
/// trait does not require `Send`.
pub trait VideoDecoder {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Total container duration in microseconds.
    fn duration_us(&mut self) -> Result<u64>;

    /// Frame closest to `timestamp_us`, which need not be an exact match.
    ///
    /// `Ok(None)` means the decoder has no frame for that position; the
    /// sampler skips it.
    fn frame_at(&mut self, timestamp_us: u64) -> Result<Option<Frame>>;
}

/// One sampled frame and the timestamp it was requested at.
#[derive(Clone, Debug)]
pub struct SampledFrame {
    pub timestamp_us: u64,
    pub frame: Frame,
}

/// Video container source.
pub struct VideoSource {
    reference: String,
    decoder: Box<dyn VideoDecoder>,
}

impl VideoSource {
    /// Open a local container path or a `stub://` reference.
    pub fn open(reference: &str) -> Result<Self> {
        if synthetic::is_stub(reference) {
            let decoder = SyntheticVideoDecoder::new(StubRef::parse(reference)?)?;
            return Ok(Self::from_decoder(reference, Box::new(decoder)));
        }
        if !synthetic::is_local_path(reference) {
            return Err(PipelineError::decode(format!(
                "video '{reference}' is not a local path"
            )));
        }
        #[cfg(feature = "video-ffmpeg")]
        {
            let decoder = FfmpegVideoDecoder::open(reference)?;
            Ok(Self::from_decoder(reference, Box::new(decoder)))
        }
        #[cfg(not(feature = "video-ffmpeg"))]
        {
            Err(PipelineError::LibraryInit(
                "video decoding requires the video-ffmpeg feature".to_string(),
            )
            .into())
        }
    }

    /// Wrap an already opened decoder.
    pub fn from_decoder(reference: &str, decoder: Box<dyn VideoDecoder>) -> Self {
        log::info!(
            "VideoSource: opened {} ({})",
            reference,
            decoder.name()
        );
        Self {
            reference: reference.to_string(),
            decoder,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn duration_us(&mut self) -> Result<u64> {
        self.decoder.duration_us()
    }

    /// Consume the source into its paced frame sequence.
    pub fn frames(self, cancel: CancelToken) -> VideoFrames {
        VideoFrames {
            source: Some(self),
            cancel,
            pacing: VIDEO_PACING_DELAY,
            timestamps: None,
            pace_pending: false,
            emitted: 0,
        }
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        log::debug!("VideoSource: released decoder for {}", self.reference);
    }
}

/// Sample timestamps for a container of `duration_us`: 0, 10 s, 20 s, ...
/// strictly below the duration.
pub fn sample_timestamps(duration_us: u64) -> StepBy<Range<u64>> {
    (0..duration_us).step_by(VIDEO_SAMPLE_INTERVAL_US as usize)
}

/// Lazy, paced, cancellable frame sequence. See the module docs.
pub struct VideoFrames {
    source: Option<VideoSource>,
    cancel: CancelToken,
    pacing: Duration,
    timestamps: Option<StepBy<Range<u64>>>,
    pace_pending: bool,
    emitted: u64,
}

impl VideoFrames {
    /// Override the delay between emitted frames.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Frames yielded so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// True once the decoder has been released.
    pub fn is_finished(&self) -> bool {
        self.source.is_none()
    }

    fn finish(&mut self, reason: &str) -> Option<Result<SampledFrame>> {
        if let Some(source) = self.source.take() {
            log::info!(
                "VideoSource: {} {} after {} frames",
                source.reference,
                reason,
                self.emitted
            );
        }
        None
    }

    fn fail(&mut self, err: anyhow::Error) -> Option<Result<SampledFrame>> {
        self.finish("failed");
        Some(Err(err))
    }
}

impl Iterator for VideoFrames {
    type Item = Result<SampledFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let source = self.source.as_mut()?;

        if self.timestamps.is_none() {
            match source.decoder.duration_us() {
                Ok(duration_us) => {
                    log::debug!(
                        "VideoSource: {} lasts {}us",
                        source.reference,
                        duration_us
                    );
                    self.timestamps = Some(sample_timestamps(duration_us));
                }
                Err(err) => return self.fail(err),
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                return self.finish("cancelled");
            }
            let Some(timestamp_us) = self.timestamps.as_mut().and_then(|ts| ts.next()) else {
                return self.finish("completed");
            };
            if self.pace_pending {
                self.pace_pending = false;
                if self.cancel.wait_timeout(self.pacing) {
                    return self.finish("cancelled");
                }
            }
            if self.cancel.is_cancelled() {
                return self.finish("cancelled");
            }

            let source = self.source.as_mut()?;
            match source.decoder.frame_at(timestamp_us) {
                Ok(Some(frame)) => {
                    self.emitted += 1;
                    self.pace_pending = true;
                    return Some(Ok(SampledFrame {
                        timestamp_us,
                        frame,
                    }));
                }
                Ok(None) => {
                    log::debug!(
                        "VideoSource: no frame near {}us in {}, skipping",
                        timestamp_us,
                        source.reference
                    );
                }
                Err(err) => return self.fail(err),
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic decoder (stub://) for tests
// ----------------------------------------------------------------------------

/// Keys: `duration_us` (or `unknown`), `fps`, `fail_at_us`, `width`, `height`, `pattern`.
struct SyntheticVideoDecoder {
    duration_us: Option<u64>,
    fps: u32,
    fail_at_us: Option<u64>,
    width: u32,
    height: u32,
    pattern: Pattern,
}

impl SyntheticVideoDecoder {
    fn new(stub: StubRef) -> Result<Self> {
        let duration_us = match stub.raw_param("duration_us") {
            Some("unknown") => None,
            _ => Some(
                stub.u64_param("duration_us")?
                    .unwrap_or(DEFAULT_STUB_DURATION_US),
            ),
        };
        let (width, height) = stub.dimensions()?;
        Ok(Self {
            duration_us,
            fps: stub.u32_param("fps", DEFAULT_STUB_FPS)?.max(1),
            fail_at_us: stub.u64_param("fail_at_us")?,
            width,
            height,
            pattern: stub.pattern()?,
        })
    }

    /// Index of the frame whose presentation time is closest to `timestamp_us`.
    fn nearest_index(&self, timestamp_us: u64, duration_us: u64) -> u64 {
        let fps = self.fps as u64;
        let last = (duration_us.saturating_mul(fps) / 1_000_000).saturating_sub(1);
        let index = timestamp_us.saturating_mul(fps).saturating_add(500_000) / 1_000_000;
        index.min(last)
    }
}

impl VideoDecoder for SyntheticVideoDecoder {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn duration_us(&mut self) -> Result<u64> {
        self.duration_us
            .ok_or_else(|| PipelineError::decode("container has no duration metadata"))
    }

    fn frame_at(&mut self, timestamp_us: u64) -> Result<Option<Frame>> {
        if self.fail_at_us.is_some_and(|fail_at| timestamp_us >= fail_at) {
            return Err(PipelineError::decode(format!(
                "corrupt packet near {timestamp_us}us"
            )));
        }
        let duration_us = self.duration_us()?;
        if timestamp_us >= duration_us {
            return Ok(None);
        }
        let index = self.nearest_index(timestamp_us, duration_us);
        synthetic::render(self.pattern, self.width, self.height, index).map(Some)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn stub_frames(reference: &str) -> Result<VideoFrames> {
        Ok(VideoSource::open(reference)?
            .frames(CancelToken::new())
            .with_pacing(Duration::from_millis(1)))
    }

    #[test]
    fn timestamps_step_by_ten_seconds() {
        let ts: Vec<u64> = sample_timestamps(25_000_000).collect();
        assert_eq!(ts, vec![0, 10_000_000, 20_000_000]);
        assert_eq!(sample_timestamps(0).count(), 0);
        assert_eq!(sample_timestamps(10_000_000).count(), 1);
        assert_eq!(sample_timestamps(10_000_001).count(), 2);
    }

    #[test]
    fn emits_one_frame_per_sample_in_order() -> Result<()> {
        let frames: Vec<SampledFrame> =
            stub_frames("stub://clip?duration_us=45000000&width=8&height=6")?
                .collect::<Result<_>>()?;
        let ts: Vec<u64> = frames.iter().map(|f| f.timestamp_us).collect();
        assert_eq!(ts, vec![0, 10_000_000, 20_000_000, 30_000_000, 40_000_000]);
        assert!(frames.iter().all(|f| f.frame.dimensions() == (8, 6)));
        Ok(())
    }

    #[test]
    fn zero_duration_emits_nothing() -> Result<()> {
        let mut frames = stub_frames("stub://empty?duration_us=0")?;
        assert!(frames.next().is_none());
        assert!(frames.is_finished());
        Ok(())
    }

    #[test]
    fn missing_duration_fails_once_then_ends() -> Result<()> {
        let mut frames = stub_frames("stub://clip?duration_us=unknown")?;
        let err = frames.next().expect("error item").unwrap_err();
        assert!(matches!(
            PipelineError::kind_of(&err),
            Some(PipelineError::Decode(_))
        ));
        assert!(frames.next().is_none());
        assert!(frames.is_finished());
        Ok(())
    }

    #[test]
    fn mid_stream_failure_keeps_earlier_frames() -> Result<()> {
        let mut frames = stub_frames("stub://clip?duration_us=50000000&fail_at_us=20000000")?;
        assert_eq!(frames.next().expect("first").map(|f| f.timestamp_us)?, 0);
        assert_eq!(
            frames.next().expect("second").map(|f| f.timestamp_us)?,
            10_000_000
        );
        assert!(frames.next().expect("failure").is_err());
        assert!(frames.next().is_none());
        assert_eq!(frames.emitted(), 2);
        Ok(())
    }

    #[test]
    fn pacing_separates_emitted_frames() -> Result<()> {
        let mut frames = VideoSource::open("stub://clip?duration_us=20000000")?
            .frames(CancelToken::new())
            .with_pacing(Duration::from_millis(40));
        let start = Instant::now();
        frames.next().expect("first")?;
        assert!(start.elapsed() < Duration::from_millis(40));
        frames.next().expect("second")?;
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(frames.next().is_none());
        Ok(())
    }

    #[test]
    fn cancel_interrupts_pacing_wait() -> Result<()> {
        let cancel = CancelToken::new();
        let mut frames = VideoSource::open("stub://clip?duration_us=90000000")?
            .frames(cancel.clone())
            .with_pacing(Duration::from_secs(30));
        frames.next().expect("first")?;

        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        let start = Instant::now();
        assert!(frames.next().is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(frames.is_finished());
        handle.join().expect("canceller thread");
        Ok(())
    }

    #[test]
    fn cancelled_before_start_decodes_nothing() -> Result<()> {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut frames = VideoSource::open("stub://clip")?.frames(cancel);
        assert!(frames.next().is_none());
        assert_eq!(frames.emitted(), 0);
        Ok(())
    }

    #[test]
    fn nearest_frame_rounds_to_closest_index() -> Result<()> {
        let decoder = SyntheticVideoDecoder::new(StubRef::parse("stub://clip?fps=10")?)?;
        // 10 fps: frames at 0, 100ms, 200ms...
        assert_eq!(decoder.nearest_index(149_000, 1_000_000), 1);
        assert_eq!(decoder.nearest_index(151_000, 1_000_000), 2);
        assert_eq!(decoder.nearest_index(5_000_000, 1_000_000), 9);
        Ok(())
    }

    #[test]
    fn nearest_frame_saturates_on_huge_timestamps() -> Result<()> {
        let decoder = SyntheticVideoDecoder::new(StubRef::parse("stub://clip?fps=60")?)?;
        assert_eq!(decoder.nearest_index(u64::MAX, u64::MAX), u64::MAX / 1_000_000 - 1);
        Ok(())
    }

    #[cfg(not(feature = "video-ffmpeg"))]
    #[test]
    fn local_video_without_ffmpeg_is_library_init() {
        let err = VideoSource::open("/tmp/clip.mp4").err().expect("refused");
        assert!(matches!(
            PipelineError::kind_of(&err),
            Some(PipelineError::LibraryInit(_))
        ));
    }

    #[test]
    fn remote_urls_are_refused() {
        let err = VideoSource::open("rtsp://camera/stream").err().expect("refused");
        assert!(matches!(
            PipelineError::kind_of(&err),
            Some(PipelineError::Decode(_))
        ));
    }
}
