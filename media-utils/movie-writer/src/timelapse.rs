//! Timelapse movie writing.
//!
//! Codec `mpg` runs in APPEND mode: one file accumulates frames across
//! sessions because the MPEG-PS stream is concatenation-safe. Every other
//! codec runs in NEW mode with a fresh file per session. `swf` is accepted
//! for compatibility and silently mapped to `mpg`.

use std::path::{Path, PathBuf};

use tracing::warn;
use yuv_frame::Frame;

use crate::{FfmpegWriter, MovieEncoder, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelapseMode {
    Append,
    New,
}

/// Normalize the configured timelapse codec and pick the file mode.
pub fn timelapse_mode(codec: &str) -> (TimelapseMode, &'static str) {
    match codec {
        "mpg" => (TimelapseMode::Append, "mpg"),
        "swf" => {
            warn!("timelapse codec swf is mapped to mpg");
            (TimelapseMode::Append, "mpg")
        }
        "mpeg4" | "mp4" => (TimelapseMode::New, "mpeg4"),
        _ => (TimelapseMode::New, "mpeg4"),
    }
}

pub struct TimelapseWriter {
    mode: TimelapseMode,
    codec: &'static str,
    inner: Option<Box<FfmpegWriter>>,
}

impl TimelapseWriter {
    pub fn new(configured_codec: &str) -> Self {
        let (mode, codec) = timelapse_mode(configured_codec);
        Self {
            mode,
            codec,
            inner: None,
        }
    }

    pub fn mode(&self) -> TimelapseMode {
        self.mode
    }

    pub fn extension(&self) -> &'static str {
        crate::movie_extension(self.codec)
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.inner.as_ref().map(|w| w.path())
    }

    /// Open the interval's file. In APPEND mode new sessions extend the
    /// existing file.
    pub fn open(&mut self, path: &Path, width: u32, height: u32, fps: u32) -> Result<()> {
        let writer = match self.mode {
            TimelapseMode::Append => {
                FfmpegWriter::create_appending(path, self.codec, width, height, fps)?
            }
            TimelapseMode::New => FfmpegWriter::create(path, self.codec, width, height, fps)?,
        };
        self.inner = Some(Box::new(writer));
        Ok(())
    }

    pub fn put(&mut self, frame: &Frame) -> Result<()> {
        match self.inner.as_mut() {
            Some(writer) => writer.put(frame),
            None => Err(crate::Error::Closed),
        }
    }

    /// Close the current file, returning its path for `FileClose`
    /// dispatch.
    pub fn close(&mut self) -> Result<Option<PathBuf>> {
        match self.inner.take() {
            Some(writer) => {
                let path = writer.path().to_path_buf();
                writer.close()?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        assert_eq!(timelapse_mode("mpg"), (TimelapseMode::Append, "mpg"));
        assert_eq!(timelapse_mode("swf"), (TimelapseMode::Append, "mpg"));
        assert_eq!(timelapse_mode("mpeg4"), (TimelapseMode::New, "mpeg4"));
        assert_eq!(timelapse_mode("anything"), (TimelapseMode::New, "mpeg4"));
    }

    #[test]
    fn test_closed_writer_rejects_frames() {
        let mut w = TimelapseWriter::new("mpeg4");
        assert!(!w.is_open());
        let frame = Frame::black(16, 16, yuv_frame::FrameStamp::now(0)).unwrap();
        assert!(matches!(w.put(&frame), Err(crate::Error::Closed)));
        assert!(w.close().unwrap().is_none());
    }
}
