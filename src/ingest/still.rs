//! Still image frame source.
//!
//! Decodes one encoded image (PNG or JPEG) into one `Frame`. The source is
//! consumed by `decode`, so it emits exactly one frame and then is gone.

use anyhow::Result;
use std::path::PathBuf;

use super::synthetic::{self, StubRef};
use crate::error::PipelineError;
use crate::frame::Frame;

enum StillInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Synthetic(StubRef),
}

/// Single-image source.
pub struct StillImageSource {
    input: StillInput,
}

impl StillImageSource {
    /// Open a local path or a `stub://` reference. Other URL schemes are refused.
    pub fn open(reference: &str) -> Result<Self> {
        if synthetic::is_stub(reference) {
            return Ok(Self {
                input: StillInput::Synthetic(StubRef::parse(reference)?),
            });
        }
        if !synthetic::is_local_path(reference) {
            return Err(PipelineError::decode(format!(
                "still image '{reference}' is not a local path"
            )));
        }
        Ok(Self {
            input: StillInput::Path(PathBuf::from(reference)),
        })
    }

    /// Decode from an in-memory encoded image.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            input: StillInput::Bytes(bytes),
        }
    }

    /// Decode the image.
    pub fn decode(self) -> Result<Frame> {
        let frame = match self.input {
            StillInput::Path(path) => {
                let bytes = std::fs::read(&path).map_err(|e| {
                    PipelineError::decode(format!("failed to read {}: {}", path.display(), e))
                })?;
                decode_encoded(&bytes)?
            }
            StillInput::Bytes(bytes) => decode_encoded(&bytes)?,
            StillInput::Synthetic(stub) => {
                let (width, height) = stub.dimensions()?;
                synthetic::render(stub.pattern()?, width, height, 0)?
            }
        };
        log::debug!(
            "StillImageSource: decoded {}x{} frame",
            frame.width(),
            frame.height()
        );
        Ok(frame)
    }
}

fn decode_encoded(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes).map_err(PipelineError::from)?;
    Ok(Frame::from_dynamic_image(&image))
}
