//! Re-broadcast processed frames through a V4L2 output (loopback) device
//! so other applications can read them as a normal camera.
//!
//! The device must report the video-output capability; the format is
//! forced to planar YUV420 at the camera's dimensions and every frame is
//! pushed as one full buffer.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("device {0} does not support video output")]
    NotAnOutputDevice(String),
    #[error("device accepted {0} instead of YU12")]
    WrongFormat(String),
    #[error("frame is {got} bytes but the device expects {expected}")]
    SizeMismatch { got: usize, expected: usize },
    #[error("loopback is only supported on linux")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(target_os = "linux")]
pub use linux::LoopbackWriter;

#[cfg(target_os = "linux")]
mod linux {
    use super::{Error, Result};
    use tracing::info;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream as MmapStream;
    use v4l::io::traits::OutputStream;
    use v4l::video::Output;
    use v4l::{Device, Format, FourCC};
    use yuv_frame::Frame;

    pub struct LoopbackWriter {
        _dev: Device,
        stream: MmapStream<'static>,
        expected_len: usize,
    }

    impl LoopbackWriter {
        pub fn open(path: &str, width: u32, height: u32) -> Result<Self> {
            let dev = Device::with_path(path)?;
            let caps = dev.query_caps()?;
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_OUTPUT) {
                return Err(Error::NotAnOutputDevice(path.to_string()));
            }
            let fourcc = FourCC::new(b"YU12");
            let actual = Output::set_format(&dev, &Format::new(width, height, fourcc))?;
            if actual.fourcc != fourcc {
                return Err(Error::WrongFormat(actual.fourcc.to_string()));
            }
            let stream = MmapStream::with_buffers(&dev, Type::VideoOutput, 2)?;
            info!(path, width, height, "loopback output opened");
            Ok(Self {
                _dev: dev,
                stream,
                expected_len: yuv_frame::yuv420p_len(width, height),
            })
        }

        /// Push one frame. Single writer, no retry: a failed write is the
        /// caller's to log and drop.
        pub fn put(&mut self, frame: &Frame) -> Result<()> {
            let data = frame.data();
            if data.len() != self.expected_len {
                return Err(Error::SizeMismatch {
                    got: data.len(),
                    expected: self.expected_len,
                });
            }
            let (buf_out, meta_out) = OutputStream::next(&mut self.stream)?;
            let buf_out = &mut buf_out[..data.len()];
            buf_out.copy_from_slice(data);
            meta_out.field = 0;
            meta_out.bytesused = data.len() as u32;
            Ok(())
        }
    }
}
