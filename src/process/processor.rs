use anyhow::Result;

use crate::error::PipelineError;
use crate::frame::Frame;

/// Frame transform trait.
///
/// A processor reads one frame and writes one frame of identical dimensions.
/// It never suspends and keeps no reference to either frame after the call.
pub trait FrameProcessor: Send {
    /// Processor identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Transform `input` into `output`.
    ///
    /// Both frames must have the same positive dimensions; otherwise the call
    /// fails with `InvalidFrame` and `output` is left untouched.
    fn process_into(&mut self, input: &Frame, output: &mut Frame) -> Result<()>;

    /// Transform an owned frame, returning a freshly allocated result.
    fn process(&mut self, input: Frame) -> Result<Frame> {
        if input.is_empty() {
            return Err(PipelineError::invalid_frame(format!(
                "cannot process {}x{} frame",
                input.width(),
                input.height()
            )));
        }
        let mut output = Frame::blank(input.width(), input.height())?;
        self.process_into(&input, &mut output)?;
        Ok(output)
    }
}

pub(crate) fn ensure_same_shape(input: &Frame, output: &Frame) -> Result<()> {
    if input.is_empty() {
        return Err(PipelineError::invalid_frame(format!(
            "cannot process {}x{} frame",
            input.width(),
            input.height()
        )));
    }
    if input.dimensions() != output.dimensions() {
        return Err(PipelineError::invalid_frame(format!(
            "output {}x{} does not match input {}x{}",
            output.width(),
            output.height(),
            input.width(),
            input.height()
        )));
    }
    Ok(())
}
