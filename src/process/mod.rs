mod canny;
mod luma;
mod processor;

pub use canny::EdgeProcessor;
pub use processor::FrameProcessor;
