use anyhow::Result;

use crate::frame::Frame;
use crate::process::luma::{argb_to_luma, expand_luma};
use crate::process::processor::{ensure_same_shape, FrameProcessor};
use crate::{EDGE_HIGH_THRESHOLD, EDGE_LOW_THRESHOLD};

// tan(22.5 deg) in Q15.
const TG22: i64 = 13573;

const SUPPRESSED: u8 = 0;
const WEAK: u8 = 1;
const STRONG: u8 = 2;

const EDGE: u8 = 255;

/// Grayscale + Canny edge detector with fixed hysteresis thresholds.
///
/// Scratch buffers are kept between calls so a camera stream of constant
/// size does not reallocate per frame.
pub struct EdgeProcessor {
    low: i32,
    high: i32,
    luma: Vec<u8>,
    dx: Vec<i32>,
    dy: Vec<i32>,
    magnitude: Vec<i32>,
    marks: Vec<u8>,
    stack: Vec<usize>,
}

impl EdgeProcessor {
    pub fn new() -> Self {
        Self {
            low: EDGE_LOW_THRESHOLD,
            high: EDGE_HIGH_THRESHOLD,
            luma: Vec::new(),
            dx: Vec::new(),
            dy: Vec::new(),
            magnitude: Vec::new(),
            marks: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// 3x3 Sobel with replicated border and L1 magnitude.
    fn gradients(&mut self, width: usize, height: usize) {
        let len = width * height;
        self.dx.clear();
        self.dx.resize(len, 0);
        self.dy.clear();
        self.dy.resize(len, 0);
        self.magnitude.clear();
        self.magnitude.resize(len, 0);

        let luma = &self.luma;
        let at = |x: usize, y: usize| luma[y * width + x] as i32;

        for y in 0..height {
            let up = y.saturating_sub(1);
            let down = (y + 1).min(height - 1);
            for x in 0..width {
                let left = x.saturating_sub(1);
                let right = (x + 1).min(width - 1);

                let gx = (at(right, up) + 2 * at(right, y) + at(right, down))
                    - (at(left, up) + 2 * at(left, y) + at(left, down));
                let gy = (at(left, down) + 2 * at(x, down) + at(right, down))
                    - (at(left, up) + 2 * at(x, up) + at(right, up));

                let i = y * width + x;
                self.dx[i] = gx;
                self.dy[i] = gy;
                self.magnitude[i] = gx.abs() + gy.abs();
            }
        }
    }

    /// Thin ridges along the gradient direction and classify survivors.
    fn suppress_non_maxima(&mut self, width: usize, height: usize) {
        self.marks.clear();
        self.marks.resize(width * height, SUPPRESSED);
        self.stack.clear();

        let magnitude = &self.magnitude;
        // Out-of-image neighbors read as zero magnitude.
        let mag = |x: isize, y: isize| -> i32 {
            if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
                0
            } else {
                magnitude[y as usize * width + x as usize]
            }
        };

        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                let m = magnitude[i];
                if m <= self.low {
                    continue;
                }

                let (gx, gy) = (self.dx[i], self.dy[i]);
                let (xi, yi) = (x as isize, y as isize);
                let xs = gx.unsigned_abs() as i64;
                let ys = (gy.unsigned_abs() as i64) << 15;
                let tg22x = xs * TG22;

                let is_max = if ys < tg22x {
                    m > mag(xi - 1, yi) && m >= mag(xi + 1, yi)
                } else {
                    let tg67x = tg22x + (xs << 16);
                    if ys > tg67x {
                        m > mag(xi, yi - 1) && m >= mag(xi, yi + 1)
                    } else {
                        let s: isize = if (gx ^ gy) < 0 { -1 } else { 1 };
                        m > mag(xi - s, yi - 1) && m > mag(xi + s, yi + 1)
                    }
                };

                if !is_max {
                    continue;
                }
                if m > self.high {
                    self.marks[i] = STRONG;
                    self.stack.push(i);
                } else {
                    self.marks[i] = WEAK;
                }
            }
        }
    }

    /// Promote weak pixels 8-connected to a strong pixel.
    fn trace_hysteresis(&mut self, width: usize, height: usize) {
        while let Some(i) = self.stack.pop() {
            let (x, y) = ((i % width) as isize, (i / width) as isize);
            for oy in -1..=1 {
                for ox in -1..=1 {
                    if ox == 0 && oy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x + ox, y + oy);
                    if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                        continue;
                    }
                    let j = ny as usize * width + nx as usize;
                    if self.marks[j] == WEAK {
                        self.marks[j] = STRONG;
                        self.stack.push(j);
                    }
                }
            }
        }

        for (value, &mark) in self.luma.iter_mut().zip(self.marks.iter()) {
            *value = if mark == STRONG { EDGE } else { 0 };
        }
    }
}

impl Default for EdgeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProcessor for EdgeProcessor {
    fn name(&self) -> &'static str {
        "canny"
    }

    fn process_into(&mut self, input: &Frame, output: &mut Frame) -> Result<()> {
        ensure_same_shape(input, output)?;
        let (width, height) = (input.width() as usize, input.height() as usize);

        argb_to_luma(input, &mut self.luma);
        self.gradients(width, height);
        self.suppress_non_maxima(width, height);
        self.trace_hysteresis(width, height);
        expand_luma(&self.luma, output);
        Ok(())
    }
}
