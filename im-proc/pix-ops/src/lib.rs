//! Pixel-level primitives for the camera pipeline: rotation and mirroring,
//! half-resolution downscale, text overlay, colorspace conversion and PGM
//! mask handling.
//!
//! All operations work on plain byte slices or [`Frame`]s; scratch buffers
//! are caller-owned so the per-frame path allocates nothing.

use yuv_frame::Frame;

mod font;
mod pgm;

pub use pgm::{load_pgm_mask, PgmError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("destination must be {0}x{1}, got {2}x{3}")]
    BadDestination(u32, u32, u32, u32),
    #[error("width {0} and height {1} must both be multiples of 16 for substream scaling")]
    NotModulo16(u32, u32),
    #[error("mask length {0} does not match plane length {1}")]
    MaskSizeMismatch(usize, usize),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Whether this rotation exchanges width and height.
    pub fn transposes(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Mirror axis. `Horizontal` flips across the horizontal axis (top and
/// bottom exchange); `Vertical` flips across the vertical axis (left and
/// right exchange).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flip {
    None,
    Horizontal,
    Vertical,
}

/// Rotate a plane 180 degrees in place. Plain byte reversal: the last pixel
/// of the last row becomes the first pixel of the first row.
#[inline]
fn rotate_180_inplace(plane: &mut [u8]) {
    plane.reverse();
}

fn flip_across_horizontal_axis(plane: &mut [u8], width: usize, height: usize) {
    for row in 0..height / 2 {
        let (top, rest) = plane.split_at_mut((height - row - 1) * width);
        let top_row = &mut top[row * width..row * width + width];
        let bottom_row = &mut rest[..width];
        top_row.swap_with_slice(bottom_row);
    }
}

fn flip_across_vertical_axis(plane: &mut [u8], width: usize, height: usize) {
    for row in plane.chunks_exact_mut(width).take(height) {
        row.reverse();
    }
}

/// Quarter-turn clockwise into `dst`; `dst` receives a `height x width`
/// plane.
fn rotate_90cw(src: &[u8], dst: &mut [u8], width: usize, height: usize) {
    for y in 0..height {
        for x in 0..width {
            dst[x * height + (height - 1 - y)] = src[y * width + x];
        }
    }
}

fn rotate_90ccw(src: &[u8], dst: &mut [u8], width: usize, height: usize) {
    for y in 0..height {
        for x in 0..width {
            dst[(width - 1 - x) * height + y] = src[y * width + x];
        }
    }
}

/// Apply the configured rotation then flip to all three planes of `frame`.
///
/// 180-degree rotation and flips run in place. Quarter turns write each
/// plane into `scratch` and copy back, then the frame's dimensions are
/// swapped. `scratch` grows to the Y-plane size on first use and is
/// otherwise untouched.
pub fn rotate(frame: &mut Frame, rotation: Rotation, flip: Flip, scratch: &mut Vec<u8>) {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let (cw, ch) = (w / 2, h / 2);

    match rotation {
        Rotation::None => {}
        Rotation::Deg180 => {
            let (y, u, v) = frame.planes_mut();
            rotate_180_inplace(y);
            rotate_180_inplace(u);
            rotate_180_inplace(v);
        }
        Rotation::Deg90 | Rotation::Deg270 => {
            scratch.resize(w * h, 0);
            let cw_now = cw;
            let ch_now = ch;
            let (y, u, v) = frame.planes_mut();
            for (plane, pw, ph) in [(y, w, h), (u, cw_now, ch_now), (v, cw_now, ch_now)] {
                let dst = &mut scratch[..pw * ph];
                if rotation == Rotation::Deg90 {
                    rotate_90cw(plane, dst, pw, ph);
                } else {
                    rotate_90ccw(plane, dst, pw, ph);
                }
                plane.copy_from_slice(dst);
            }
            frame.swap_dims();
        }
    }

    // Flip after rotation, against the rotated dimensions.
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let (cw, ch) = (w / 2, h / 2);
    match flip {
        Flip::None => {}
        Flip::Horizontal => {
            let (y, u, v) = frame.planes_mut();
            flip_across_horizontal_axis(y, w, h);
            flip_across_horizontal_axis(u, cw, ch);
            flip_across_horizontal_axis(v, cw, ch);
        }
        Flip::Vertical => {
            let (y, u, v) = frame.planes_mut();
            flip_across_vertical_axis(y, w, h);
            flip_across_vertical_axis(u, cw, ch);
            flip_across_vertical_axis(v, cw, ch);
        }
    }
}

/// 2:1 box downscale for the substream path.
///
/// Requires the source dimensions to be multiples of 16 and `dst` to be
/// exactly half-size in both dimensions.
pub fn scale_half(src: &Frame, dst: &mut Frame) -> Result<()> {
    let (sw, sh) = (src.width(), src.height());
    if sw % 16 != 0 || sh % 16 != 0 {
        return Err(Error::NotModulo16(sw, sh));
    }
    if dst.width() != sw / 2 || dst.height() != sh / 2 {
        return Err(Error::BadDestination(sw / 2, sh / 2, dst.width(), dst.height()));
    }

    fn scale_plane(src: &[u8], dst: &mut [u8], sw: usize, sh: usize) {
        let dw = sw / 2;
        for dy in 0..sh / 2 {
            let r0 = &src[2 * dy * sw..2 * dy * sw + sw];
            let r1 = &src[(2 * dy + 1) * sw..(2 * dy + 1) * sw + sw];
            let drow = &mut dst[dy * dw..dy * dw + dw];
            for dx in 0..dw {
                let sum = r0[2 * dx] as u16
                    + r0[2 * dx + 1] as u16
                    + r1[2 * dx] as u16
                    + r1[2 * dx + 1] as u16;
                drow[dx] = ((sum + 2) / 4) as u8;
            }
        }
    }

    let (sw, sh) = (sw as usize, sh as usize);
    let (dy, du, dv) = dst.planes_mut();
    scale_plane(src.y_plane(), dy, sw, sh);
    scale_plane(src.u_plane(), du, sw / 2, sh / 2);
    scale_plane(src.v_plane(), dv, sw / 2, sh / 2);
    Ok(())
}

/// Where overlay text is anchored.
#[derive(Clone, Copy, Debug)]
pub struct TextAnchor {
    pub x: u32,
    pub y: u32,
}

/// Draw `text` into the Y plane with the built-in raster font.
///
/// Glyphs render white on a black outline so they stay legible on any
/// background. Newlines start a new row of glyphs. Anything outside the
/// frame is clipped. Chroma is left untouched.
pub fn draw_text(frame: &mut Frame, anchor: TextAnchor, text: &str, scale: u32) {
    let scale = scale.clamp(1, 10) as usize;
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let y_plane = frame.y_plane_mut();

    let glyph_w = (font::GLYPH_WIDTH + 1) * scale;
    let glyph_h = (font::GLYPH_HEIGHT + 1) * scale;

    let mut pen_x = anchor.x as usize;
    let mut pen_y = anchor.y as usize;
    for ch in text.chars() {
        if ch == '\n' {
            pen_x = anchor.x as usize;
            pen_y += glyph_h;
            continue;
        }
        let bitmap = font::glyph(ch);
        for (gy, row_bits) in bitmap.iter().enumerate() {
            for gx in 0..font::GLYPH_WIDTH {
                if row_bits & (0x10 >> gx) == 0 {
                    continue;
                }
                // One font pixel covers a scale x scale block; outline by
                // darkening the border of an enlarged block.
                let px0 = pen_x + gx * scale;
                let py0 = pen_y + gy * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (px, py) = (px0 + dx, py0 + dy);
                        if px < w && py < h {
                            y_plane[py * w + px] = 255;
                        }
                    }
                }
                // Outline below and to the right.
                for d in 0..=scale {
                    let (px, py) = (px0 + d, py0 + scale);
                    if px < w && py < h && y_plane[py * w + px] != 255 {
                        y_plane[py * w + px] = 0;
                    }
                    let (px, py) = (px0 + scale, py0 + d);
                    if px < w && py < h && y_plane[py * w + px] != 255 {
                        y_plane[py * w + px] = 0;
                    }
                }
            }
        }
        pen_x += glyph_w;
    }
}

/// Convert packed RGB8 into a planar YUV420p buffer (BT.601).
pub fn rgb_to_yuv420p(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    debug_assert_eq!(rgb.len(), w * h * 3);
    let mut out = vec![0u8; yuv_frame::yuv420p_len(width, height)];
    let (y_plane, rest) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = rest.split_at_mut(w * h / 4);

    for py in 0..h {
        for px in 0..w {
            let i = (py * w + px) * 3;
            let (r, g, b) = (rgb[i] as i32, rgb[i + 1] as i32, rgb[i + 2] as i32);
            let y = (77 * r + 150 * g + 29 * b) >> 8;
            y_plane[py * w + px] = y.clamp(0, 255) as u8;
        }
    }
    // Chroma from the top-left pixel of each 2x2 block.
    let cw = w / 2;
    for cy in 0..h / 2 {
        for cx in 0..cw {
            let i = (cy * 2 * w + cx * 2) * 3;
            let (r, g, b) = (rgb[i] as i32, rgb[i + 1] as i32, rgb[i + 2] as i32);
            let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
            let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
            u_plane[cy * cw + cx] = u.clamp(0, 255) as u8;
            v_plane[cy * cw + cx] = v.clamp(0, 255) as u8;
        }
    }
    out
}

/// Convert a frame to packed RGB8 (BT.601), e.g. for JPEG encoding.
pub fn yuv420p_to_rgb(frame: &Frame) -> Vec<u8> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let y_plane = frame.y_plane();
    let u_plane = frame.u_plane();
    let v_plane = frame.v_plane();
    let cw = w / 2;

    let mut rgb = vec![0u8; w * h * 3];
    for py in 0..h {
        for px in 0..w {
            let y = y_plane[py * w + px] as i32;
            let u = u_plane[(py / 2) * cw + px / 2] as i32 - 128;
            let v = v_plane[(py / 2) * cw + px / 2] as i32 - 128;
            let r = y + ((359 * v) >> 8);
            let g = y - ((88 * u + 183 * v) >> 8);
            let b = y + ((454 * u) >> 8);
            let i = (py * w + px) * 3;
            rgb[i] = r.clamp(0, 255) as u8;
            rgb[i + 1] = g.clamp(0, 255) as u8;
            rgb[i + 2] = b.clamp(0, 255) as u8;
        }
    }
    rgb
}

/// Black out every pixel whose mask entry is zero. Applied destructively,
/// before the frame reaches storage or the stream.
pub fn apply_privacy_mask(frame: &mut Frame, mask: &[u8]) -> Result<()> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    if mask.len() != w * h {
        return Err(Error::MaskSizeMismatch(mask.len(), w * h));
    }
    let cw = w / 2;
    let (y_plane, u_plane, v_plane) = frame.planes_mut();
    for (i, m) in mask.iter().enumerate() {
        if *m == 0 {
            y_plane[i] = 0;
            let (px, py) = (i % w, i / w);
            u_plane[(py / 2) * cw + px / 2] = 128;
            v_plane[(py / 2) * cw + px / 2] = 128;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yuv_frame::FrameStamp;

    fn frame_with_pattern(w: u32, h: u32) -> Frame {
        let mut f = Frame::black(w, h, FrameStamp::now(0)).unwrap();
        let wu = w as usize;
        for (i, p) in f.y_plane_mut().iter_mut().enumerate() {
            *p = ((i % wu) * 3 + (i / wu) * 7) as u8;
        }
        f
    }

    #[test]
    fn test_rotate_180_twice_is_identity() {
        let orig = frame_with_pattern(16, 8);
        let mut f = orig.clone();
        let mut scratch = Vec::new();
        rotate(&mut f, Rotation::Deg180, Flip::None, &mut scratch);
        rotate(&mut f, Rotation::Deg180, Flip::None, &mut scratch);
        assert_eq!(f.data(), orig.data());
    }

    #[test]
    fn test_rotate_90_then_270_is_identity() {
        let orig = frame_with_pattern(16, 8);
        let mut f = orig.clone();
        let mut scratch = Vec::new();
        rotate(&mut f, Rotation::Deg90, Flip::None, &mut scratch);
        assert_eq!((f.width(), f.height()), (8, 16));
        rotate(&mut f, Rotation::Deg270, Flip::None, &mut scratch);
        assert_eq!((f.width(), f.height()), (16, 8));
        assert_eq!(f.data(), orig.data());
    }

    #[test]
    fn test_rotate_90_moves_corner() {
        let mut f = Frame::black(8, 8, FrameStamp::now(0)).unwrap();
        f.y_plane_mut()[0] = 200; // top-left
        let mut scratch = Vec::new();
        rotate(&mut f, Rotation::Deg90, Flip::None, &mut scratch);
        // Top-left goes to top-right under a clockwise quarter turn.
        assert_eq!(f.y_plane()[7], 200);
    }

    #[test]
    fn test_flip_involution() {
        for flip in [Flip::Horizontal, Flip::Vertical] {
            let orig = frame_with_pattern(16, 16);
            let mut f = orig.clone();
            let mut scratch = Vec::new();
            rotate(&mut f, Rotation::None, flip, &mut scratch);
            assert_ne!(f.data(), orig.data());
            rotate(&mut f, Rotation::None, flip, &mut scratch);
            assert_eq!(f.data(), orig.data());
        }
    }

    #[test]
    fn test_scale_half_dims() {
        let src = frame_with_pattern(32, 16);
        let mut dst = Frame::black(16, 8, FrameStamp::now(0)).unwrap();
        scale_half(&src, &mut dst).unwrap();
        // Uniform plane regions stay uniform after box filtering.
        let mut flat = Frame::black(32, 16, FrameStamp::now(0)).unwrap();
        for p in flat.y_plane_mut() {
            *p = 100;
        }
        scale_half(&flat, &mut dst).unwrap();
        assert!(dst.y_plane().iter().all(|&p| p == 100));
    }

    #[test]
    fn test_scale_half_rejects_non_modulo_16() {
        let src = frame_with_pattern(24, 16);
        let mut dst = Frame::black(16, 8, FrameStamp::now(0)).unwrap();
        assert!(matches!(
            scale_half(&src, &mut dst),
            Err(Error::NotModulo16(24, 16))
        ));
    }

    #[test]
    fn test_draw_text_clips() {
        let mut f = Frame::black(16, 16, FrameStamp::now(0)).unwrap();
        // Anchored near the edge: must not panic, must change some pixels.
        draw_text(&mut f, TextAnchor { x: 12, y: 12 }, "88:88", 1);
        assert!(f.y_plane().iter().any(|&p| p == 255));
    }

    #[test]
    fn test_rgb_yuv_gray_roundtrip() {
        let rgb: Vec<u8> = std::iter::repeat([120u8, 120, 120])
            .take(16 * 8)
            .flatten()
            .collect();
        let yuv = rgb_to_yuv420p(&rgb, 16, 8);
        let f = Frame::from_planar(16, 8, yuv, FrameStamp::now(0)).unwrap();
        let back = yuv420p_to_rgb(&f);
        for px in back.chunks_exact(3) {
            for c in px {
                assert!((*c as i32 - 120).abs() <= 3, "channel {c} too far from 120");
            }
        }
    }

    #[test]
    fn test_privacy_mask_blacks_out() {
        let mut f = frame_with_pattern(16, 8);
        let mut mask = vec![255u8; 16 * 8];
        mask[0] = 0;
        mask[17] = 0;
        apply_privacy_mask(&mut f, &mask).unwrap();
        assert_eq!(f.y_plane()[0], 0);
        assert_eq!(f.y_plane()[17], 0);
        assert_ne!(f.y_plane()[1], 0);
    }
}
