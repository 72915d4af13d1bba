//! V4L2 camera controller.
//!
//! The device and its mmap stream are opened on the capture thread and never
//! leave it. The negotiated format (not the requested one) is what the
//! session sees through `on_start`.

use anyhow::Result;
use ouroboros::self_referencing;

use super::camera::{lock_session, CameraController, CaptureWorker, SharedCameraSession};
use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::frame::Frame;

const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Camera {
    device: String,
    width: u32,
    height: u32,
    target_fps: u32,
    worker: Option<CaptureWorker>,
}

#[self_referencing]
struct CaptureState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(device: &str, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            device: device.to_string(),
            width,
            height,
            target_fps,
            worker: None,
        }
    }
}

impl CameraController for V4l2Camera {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn start(&mut self, session: SharedCameraSession) -> Result<()> {
        self.stop()?;
        let request = Request {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            target_fps: self.target_fps,
        };
        self.worker = Some(CaptureWorker::spawn("v4l2-camera", move |cancel| {
            if let Err(err) = capture(&request, &session, &cancel) {
                log::error!("V4l2Camera: {}: {:#}", request.device, err);
            }
            lock_session(&session).on_stop();
        })?);
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

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("V4l2Camera: {}", err);
        }
    }
}

struct Request {
    device: String,
    width: u32,
    height: u32,
    target_fps: u32,
}

fn capture(request: &Request, session: &SharedCameraSession, cancel: &CancelToken) -> Result<()> {
    use v4l::buffer::Type;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;

    let device = v4l::Device::with_path(&request.device)
        .map_err(|e| PipelineError::Device(format!("open {}: {e}", request.device)))?;
    let mut format = device
        .format()
        .map_err(|e| PipelineError::Device(format!("read v4l2 format: {e}")))?;
    format.width = request.width;
    format.height = request.height;
    format.fourcc = v4l::FourCC::new(b"RGB3");

    let format = match device.set_format(&format) {
        Ok(format) => format,
        Err(err) => {
            log::warn!(
                "V4l2Camera: failed to set format on {}: {}",
                request.device,
                err
            );
            device.format().map_err(|e| {
                PipelineError::Device(format!("read v4l2 format after set failure: {e}"))
            })?
        }
    };
    if format.fourcc != v4l::FourCC::new(b"RGB3") {
        return Err(PipelineError::Device(format!(
            "{} does not deliver RGB3 frames (got {})",
            request.device, format.fourcc
        ))
        .into());
    }

    if request.target_fps > 0 {
        let params = v4l::video::capture::Parameters::with_fps(request.target_fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!(
                "V4l2Camera: failed to set fps on {}: {}",
                request.device,
                err
            );
        }
    }

    let (width, height) = (format.width, format.height);
    let packed_len = width as usize * height as usize * 3;
    let mut state = CaptureStateBuilder {
        device,
        stream_builder: |device| {
            v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| PipelineError::Device(format!("create v4l2 buffer stream: {e}")))
        },
    }
    .try_build()?;

    lock_session(session).on_start(width, height)?;
    log::info!(
        "V4l2Camera: streaming {} ({}x{})",
        request.device,
        width,
        height
    );

    while !cancel.is_cancelled() {
        let mut frame = state.with_mut(|fields| -> Result<Frame> {
            let (buf, _meta) = fields
                .stream
                .next()
                .map_err(|e| PipelineError::Device(format!("capture v4l2 frame: {e}")))?;
            // Drivers may report padded buffers; short ones are rejected below.
            let packed = buf.get(..packed_len).unwrap_or(buf);
            Frame::from_rgb24(width, height, packed)
        })?;
        if let Err(err) = lock_session(session).on_frame(&mut frame) {
            log::warn!("V4l2Camera: frame dropped: {}", err);
        }
    }
    Ok(())
}
