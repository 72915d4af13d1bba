//! FFmpeg-backed video decoder.
//!
//! Random access is a seek to the nearest preceding keyframe followed by a
//! forward decode until the presentation time passes the target; the closer
//! of the two frames straddling the target wins.

use anyhow::Result;
use ffmpeg_next as ffmpeg;
use image::RgbaImage;

use super::video::VideoDecoder;
use crate::error::PipelineError;
use crate::frame::Frame;

pub(crate) struct FfmpegVideoDecoder {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

impl FfmpegVideoDecoder {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init()
            .map_err(|e| PipelineError::LibraryInit(format!("initialize ffmpeg: {e}")))?;
        let input = ffmpeg::format::input(&path)
            .map_err(|e| PipelineError::decode(format!("failed to open '{path}': {e}")))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| PipelineError::decode(format!("'{path}' has no video track")))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| PipelineError::decode(format!("load video decoder parameters: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PipelineError::decode(format!("open ffmpeg video decoder: {e}")))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGBA,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| PipelineError::decode(format!("create ffmpeg scaler: {e}")))?;

        log::info!(
            "FfmpegVideoDecoder: {} ({}x{})",
            path,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
        })
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn duration_us(&mut self) -> Result<u64> {
        // Container duration is expressed in AV_TIME_BASE units (microseconds).
        let duration = self.input.duration();
        if duration <= 0 {
            return Err(PipelineError::decode(format!(
                "'{}' has no duration metadata",
                self.path
            )));
        }
        Ok(duration as u64)
    }

    fn frame_at(&mut self, timestamp_us: u64) -> Result<Option<Frame>> {
        let target = i64::try_from(timestamp_us)
            .map_err(|_| PipelineError::decode("timestamp out of range"))?;
        self.input
            .seek(target, ..target)
            .map_err(|e| PipelineError::decode(format!("seek to {target}us: {e}")))?;
        self.decoder.flush();

        let time_base = self.time_base;
        let mut current = ffmpeg::frame::Video::empty();
        let mut previous: Option<(ffmpeg::frame::Video, i64)> = None;

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .map_err(|e| PipelineError::decode(format!("send packet to decoder: {e}")))?;

            while self.decoder.receive_frame(&mut current).is_ok() {
                let pts_us = presentation_us(&current, time_base);
                if pts_us >= target {
                    let pick = match previous {
                        Some((prev, prev_us)) if target - prev_us < pts_us - target => prev,
                        _ => current,
                    };
                    return to_frame(&mut self.scaler, &pick).map(Some);
                }
                let decoded = std::mem::replace(&mut current, ffmpeg::frame::Video::empty());
                previous = Some((decoded, pts_us));
            }
        }

        // Target lies past the last decodable frame: drain and take the tail.
        if let Err(err) = self.decoder.send_eof() {
            log::debug!("FfmpegVideoDecoder: send eof on {}: {}", self.path, err);
        }
        while self.decoder.receive_frame(&mut current).is_ok() {
            let pts_us = presentation_us(&current, time_base);
            let decoded = std::mem::replace(&mut current, ffmpeg::frame::Video::empty());
            previous = Some((decoded, pts_us));
        }
        match previous {
            Some((frame, _)) => to_frame(&mut self.scaler, &frame).map(Some),
            None => Ok(None),
        }
    }
}

fn presentation_us(frame: &ffmpeg::frame::Video, time_base: ffmpeg::Rational) -> i64 {
    let pts = frame.timestamp().or_else(|| frame.pts()).unwrap_or(0) as i128;
    let num = time_base.numerator() as i128;
    let den = (time_base.denominator() as i128).max(1);
    (pts * num * 1_000_000 / den) as i64
}

fn to_frame(
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &ffmpeg::frame::Video,
) -> Result<Frame> {
    let mut rgba = ffmpeg::frame::Video::empty();
    scaler
        .run(decoded, &mut rgba)
        .map_err(|e| PipelineError::decode(format!("scale frame to RGBA: {e}")))?;

    let width = rgba.width();
    let height = rgba.height();
    let row_bytes = width as usize * 4;
    let stride = rgba.stride(0);
    let data = rgba.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .ok_or_else(|| PipelineError::decode("ffmpeg frame row is out of bounds"))?,
        );
    }
    let image = RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| PipelineError::decode("ffmpeg frame does not fit its dimensions"))?;
    Ok(Frame::from_rgba_image(&image))
}
