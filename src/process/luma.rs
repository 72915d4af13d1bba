use crate::frame::{Frame, ARGB_CHANNELS};

// BT.601 weights in 14-bit fixed point (sum = 1 << 14).
const R_WEIGHT: u32 = 4899;
const G_WEIGHT: u32 = 9617;
const B_WEIGHT: u32 = 1868;
const SHIFT: u32 = 14;
const ROUND: u32 = 1 << (SHIFT - 1);

/// Write one luminance byte per pixel of `frame` into `out`.
pub(crate) fn argb_to_luma(frame: &Frame, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(frame.area());
    for px in frame.data().chunks_exact(ARGB_CHANNELS) {
        let y = (px[1] as u32 * R_WEIGHT + px[2] as u32 * G_WEIGHT + px[3] as u32 * B_WEIGHT
            + ROUND)
            >> SHIFT;
        out.push(y as u8);
    }
}

/// Replicate each luminance byte across R, G and B of `frame`, alpha opaque.
pub(crate) fn expand_luma(luma: &[u8], frame: &mut Frame) {
    for (px, &y) in frame
        .data_mut()
        .chunks_exact_mut(ARGB_CHANNELS)
        .zip(luma.iter())
    {
        px.copy_from_slice(&[0xFF, y, y, y]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn primaries_follow_standard_weights() -> Result<()> {
        let mut frame = Frame::blank(4, 1)?;
        frame.set_pixel(0, 0, [0xFF, 255, 0, 0])?;
        frame.set_pixel(1, 0, [0xFF, 0, 255, 0])?;
        frame.set_pixel(2, 0, [0xFF, 0, 0, 255])?;
        frame.set_pixel(3, 0, [0xFF, 255, 255, 255])?;

        let mut luma = Vec::new();
        argb_to_luma(&frame, &mut luma);
        assert_eq!(luma, vec![76, 150, 29, 255]);
        Ok(())
    }

    #[test]
    fn expand_writes_gray_opaque_pixels() -> Result<()> {
        let mut frame = Frame::filled(2, 1, [0, 1, 2, 3])?;
        expand_luma(&[7, 200], &mut frame);
        assert_eq!(frame.pixel(0, 0), Some([0xFF, 7, 7, 7]));
        assert_eq!(frame.pixel(1, 0), Some([0xFF, 200, 200, 200]));
        Ok(())
    }
}
