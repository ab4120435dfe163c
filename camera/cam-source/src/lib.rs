//! The capability every camera backend exposes to the pipeline, plus the
//! source error taxonomy and the file-polling backend.

use std::time::Instant;

use yuv_frame::Frame;

mod file_poll;

pub use file_poll::FilePollSource;

/// How acquiring a frame can fail.
///
/// Only [`SourceError::Lost`] is structural: it triggers the camera-lost
/// hook and the reconnect loop. Everything else is counted, logged and the
/// frame dropped.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// Retryable I/O hiccup; retry until the deadline.
    #[error("transient io error: {0}")]
    TransientIo(std::io::Error),
    /// The deadline passed without a frame.
    #[error("timeout")]
    Timeout,
    /// Malformed response or non-200 status.
    #[error("protocol error (status {0})")]
    Protocol(u16),
    /// Partial JPEG, missing SOI, unknown content type.
    #[error("decode failure: {0}")]
    DecodeFailure(String),
    /// Socket closed, device vanished. Triggers reconnect.
    #[error("connection lost: {0}")]
    Lost(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// A source of frames. Implementations block, bounded by `deadline`.
pub trait FrameSource: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Block until the next frame or `deadline`, whichever is first.
    fn next_frame(&mut self, deadline: Instant) -> Result<Frame>;

    /// Tear down and re-establish the source after [`SourceError::Lost`].
    /// The default is suitable for sources that recover implicitly.
    fn reopen(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Decode a JPEG buffer into a YUV420p frame.
///
/// Used by the file and network backends. The decoded dimensions must
/// satisfy the modulo-8 rule; anything else is a decode failure because it
/// was already validated at startup.
pub fn decode_jpeg_frame(jpeg: &[u8], stamp: yuv_frame::FrameStamp) -> Result<Frame> {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| SourceError::DecodeFailure(e.to_string()))?;
    let rgb = img.to_rgb8();
    let (w, h) = (rgb.width(), rgb.height());
    let yuv = pix_ops::rgb_to_yuv420p(rgb.as_raw(), w, h);
    Frame::from_planar(w, h, yuv, stamp).map_err(|e| SourceError::DecodeFailure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_jpeg_frame() {
        // Encode a small gray image, decode it back into YUV.
        let rgb = image::RgbImage::from_pixel(32, 16, image::Rgb([90, 90, 90]));
        let mut jpeg = Vec::new();
        rgb.write_to(
            &mut std::io::Cursor::new(&mut jpeg),
            image::ImageFormat::Jpeg,
        )
        .unwrap();
        let frame = decode_jpeg_frame(&jpeg, yuv_frame::FrameStamp::now(0)).unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 16));
        let mean: u32 = frame.y_plane().iter().map(|&p| p as u32).sum::<u32>()
            / frame.y_plane().len() as u32;
        assert!((80..=100).contains(&mean));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_jpeg_frame(b"not a jpeg", yuv_frame::FrameStamp::now(0)).unwrap_err();
        assert!(matches!(err, SourceError::DecodeFailure(_)));
    }
}
