//! Frame source backed by a JPEG file that some other process rewrites.
//!
//! The file's mtime is polled on a 500 ms quantum; each change is decoded
//! as a new frame. Useful for ftp-upload cameras and for testing.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;
use yuv_frame::{Frame, FrameStamp};

use crate::{decode_jpeg_frame, FrameSource, Result, SourceError};

const POLL_QUANTUM: Duration = Duration::from_millis(500);

pub struct FilePollSource {
    path: PathBuf,
    width: u32,
    height: u32,
    last_mtime: Option<SystemTime>,
    sequence: u64,
}

impl FilePollSource {
    /// Open the source and decode one frame up front to learn (and
    /// validate) the dimensions.
    pub fn open(path: PathBuf) -> Result<Self> {
        let jpeg = std::fs::read(&path).map_err(io_to_source)?;
        let frame = decode_jpeg_frame(&jpeg, FrameStamp::now(0))?;
        yuv_frame::check_dims(frame.width(), frame.height())
            .map_err(|e| SourceError::DecodeFailure(e.to_string()))?;
        debug!(path = %path.display(), w = frame.width(), h = frame.height(), "file source opened");
        Ok(Self {
            path,
            width: frame.width(),
            height: frame.height(),
            last_mtime: None,
            sequence: 0,
        })
    }

    fn mtime(&self) -> Result<SystemTime> {
        let meta = std::fs::metadata(&self.path).map_err(io_to_source)?;
        meta.modified().map_err(io_to_source)
    }
}

fn io_to_source(e: std::io::Error) -> SourceError {
    match e.kind() {
        std::io::ErrorKind::NotFound => SourceError::Lost(e.to_string()),
        _ => SourceError::TransientIo(e),
    }
}

impl FrameSource for FilePollSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn next_frame(&mut self, deadline: Instant) -> Result<Frame> {
        loop {
            let mtime = self.mtime()?;
            if self.last_mtime != Some(mtime) {
                self.last_mtime = Some(mtime);
                let jpeg = std::fs::read(&self.path).map_err(io_to_source)?;
                self.sequence += 1;
                let frame = decode_jpeg_frame(&jpeg, FrameStamp::now(self.sequence))?;
                if (frame.width(), frame.height()) != (self.width, self.height) {
                    return Err(SourceError::DecodeFailure(format!(
                        "file changed size to {}x{}",
                        frame.width(),
                        frame.height()
                    )));
                }
                return Ok(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SourceError::Timeout);
            }
            std::thread::sleep(POLL_QUANTUM.min(deadline - now));
        }
    }
}
