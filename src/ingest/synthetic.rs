//! `stub://` references for synthetic sources.
//!
//! Grammar: `stub://<name>?key=value&key=value`. Every source kind reads the
//! keys it understands and ignores the rest.

use anyhow::Result;
use std::collections::HashMap;

use crate::error::PipelineError;
use crate::frame::{byte_len, Frame, ARGB_CHANNELS};

pub(crate) const STUB_SCHEME: &str = "stub://";

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;
/// Largest synthetic frame, in pixels (8192x8192).
const MAX_PIXELS: u64 = 8192 * 8192;
const BAR_WIDTH: u64 = 8;
const BAR_DARK: u8 = 32;
const BAR_LIGHT: u8 = 224;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pattern {
    /// Vertical bars that shift with the frame phase.
    Bars,
    Solid([u8; 3]),
}

#[derive(Clone, Debug)]
pub(crate) struct StubRef {
    pub(crate) name: String,
    params: HashMap<String, String>,
}

impl StubRef {
    pub(crate) fn parse(reference: &str) -> Result<Self> {
        let rest = reference.strip_prefix(STUB_SCHEME).ok_or_else(|| {
            PipelineError::decode(format!("'{reference}' is not a stub:// reference"))
        })?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, query),
            None => (rest, ""),
        };
        let params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    pub(crate) fn raw_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub(crate) fn u64_param(&self, key: &str) -> Result<Option<u64>> {
        match self.params.get(key) {
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                PipelineError::decode(format!(
                    "stub://{} has malformed '{}' value '{}'",
                    self.name, key, raw
                ))
            }),
            None => Ok(None),
        }
    }

    pub(crate) fn u32_param(&self, key: &str, default: u32) -> Result<u32> {
        let value = self.u64_param(key)?.unwrap_or(default as u64);
        u32::try_from(value).map_err(|_| {
            PipelineError::decode(format!("stub://{} '{}' out of range", self.name, key))
        })
    }

    pub(crate) fn dimensions(&self) -> Result<(u32, u32)> {
        let width = self.u32_param("width", DEFAULT_WIDTH)?;
        let height = self.u32_param("height", DEFAULT_HEIGHT)?;
        if width as u64 * height as u64 > MAX_PIXELS {
            return Err(PipelineError::decode(format!(
                "stub://{} size {}x{} exceeds {} pixels",
                self.name, width, height, MAX_PIXELS
            )));
        }
        Ok((width, height))
    }

    pub(crate) fn pattern(&self) -> Result<Pattern> {
        match self.params.get("pattern").map(String::as_str) {
            None | Some("bars") => Ok(Pattern::Bars),
            Some("solid") => Ok(Pattern::Solid(self.rgb()?)),
            Some(other) => Err(PipelineError::decode(format!(
                "stub://{} has unknown pattern '{}'",
                self.name, other
            ))),
        }
    }

    fn rgb(&self) -> Result<[u8; 3]> {
        let Some(hex) = self.params.get("rgb") else {
            return Ok([128, 128, 128]);
        };
        let malformed =
            || PipelineError::decode(format!("stub://{} has malformed rgb '{}'", self.name, hex));
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(malformed());
        }
        let mut rgb = [0u8; 3];
        for (i, channel) in rgb.iter_mut().enumerate() {
            *channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| malformed())?;
        }
        Ok(rgb)
    }
}

/// Render a synthetic frame. `phase` moves the bar pattern between frames.
pub(crate) fn render(pattern: Pattern, width: u32, height: u32, phase: u64) -> Result<Frame> {
    match pattern {
        Pattern::Solid([r, g, b]) => Frame::filled(width, height, [0xFF, r, g, b]),
        Pattern::Bars => {
            let row_len = byte_len(width, 1)?;
            let mut frame = Frame::filled(width, height, [0xFF, BAR_DARK, BAR_DARK, BAR_DARK])?;
            if row_len == 0 {
                return Ok(frame);
            }
            for row in frame.data_mut().chunks_exact_mut(row_len) {
                for (x, px) in row.chunks_exact_mut(ARGB_CHANNELS).enumerate() {
                    if ((x as u64).saturating_add(phase) / BAR_WIDTH) % 2 == 1 {
                        px.copy_from_slice(&[0xFF, BAR_LIGHT, BAR_LIGHT, BAR_LIGHT]);
                    }
                }
            }
            Ok(frame)
        }
    }
}

pub(crate) fn is_stub(reference: &str) -> bool {
    reference.starts_with(STUB_SCHEME)
}

/// Local filesystem path: non-empty and carrying no URL scheme.
pub(crate) fn is_local_path(reference: &str) -> bool {
    !reference.trim().is_empty() && !reference.contains("://")
}
