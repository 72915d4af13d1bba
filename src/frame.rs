//! ARGB frame buffer.
//!
//! `Frame` is the unit that flows through the pipeline:
//! - Sources produce it (decoded image, sampled video frame, camera capture)
//! - The processor reads one frame and writes another of the same size
//! - The publisher freezes it behind an `Arc` once published
//!
//! Pixels are interleaved A,R,G,B with 8 bits per channel. The buffer length
//! always equals `width * height * 4`; every constructor enforces that.

use anyhow::Result;
use image::{DynamicImage, RgbaImage};
use std::fmt;

use crate::error::PipelineError;

/// Bytes per pixel (A, R, G, B).
pub const ARGB_CHANNELS: usize = 4;

const OPAQUE: u8 = 0xFF;

/// Interleaved ARGB8888 pixel buffer.
///
/// A zero-area frame can be constructed (a degenerate decode), but the
/// processor refuses it.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap an existing ARGB buffer. Fails with `InvalidFrame` on a length mismatch.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(PipelineError::invalid_frame(format!(
                "ARGB buffer length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Opaque black frame.
    pub fn blank(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, [OPAQUE, 0, 0, 0])
    }

    /// Frame with every pixel set to `argb`.
    pub fn filled(width: u32, height: u32, argb: [u8; 4]) -> Result<Self> {
        let len = byte_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / ARGB_CHANNELS {
            data.extend_from_slice(&argb);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Convert from the `image` crate's RGBA layout.
    pub fn from_rgba_image(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = Vec::with_capacity(image.as_raw().len());
        for px in image.as_raw().chunks_exact(4) {
            data.extend_from_slice(&[px[3], px[0], px[1], px[2]]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Convert any decoded image, normalizing to 8-bit RGBA first.
    pub fn from_dynamic_image(image: &DynamicImage) -> Self {
        Self::from_rgba_image(&image.to_rgba8())
    }

    /// Build an opaque frame from packed RGB24 (as delivered by capture devices).
    pub fn from_rgb24(width: u32, height: u32, rgb: &[u8]) -> Result<Self> {
        let pixels = byte_len(width, height)? / ARGB_CHANNELS;
        if rgb.len() != pixels * 3 {
            return Err(PipelineError::invalid_frame(format!(
                "RGB frame length mismatch: expected {}, got {}",
                pixels * 3,
                rgb.len()
            )));
        }
        let mut data = Vec::with_capacity(pixels * ARGB_CHANNELS);
        for px in rgb.chunks_exact(3) {
            data.extend_from_slice(&[OPAQUE, px[0], px[1], px[2]]);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Convert back to RGBA for encoding.
    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        let mut rgba = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(ARGB_CHANNELS) {
            rgba.extend_from_slice(&[px[1], px[2], px[3], px[0]]);
        }
        RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| PipelineError::invalid_frame("RGBA buffer does not fit dimensions"))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of pixels.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel access. The length cannot change through this slice.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// ARGB value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * ARGB_CHANNELS;
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, argb: [u8; 4]) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(PipelineError::invalid_frame(format!(
                "pixel ({x}, {y}) outside {}x{} frame",
                self.width, self.height
            )));
        }
        let i = (y as usize * self.width as usize + x as usize) * ARGB_CHANNELS;
        self.data[i..i + ARGB_CHANNELS].copy_from_slice(&argb);
        Ok(())
    }

    /// Overwrite this frame's pixels with `other`'s. Dimensions must match.
    pub fn copy_from(&mut self, other: &Frame) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(PipelineError::invalid_frame(format!(
                "cannot copy {}x{} frame into {}x{} frame",
                other.width, other.height, self.width, self.height
            )));
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }
}

// Pixel bytes are never dumped into logs.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn byte_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(ARGB_CHANNELS))
        .ok_or_else(|| PipelineError::invalid_frame("ARGB frame dimensions overflow"))
}
