//! The Linux capture backend.

use std::time::Instant;

use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};
use yuv_frame::{Frame, FrameStamp};

use cam_source::{FrameSource, Result, SourceError};

use crate::yuyv_to_yuv420p;

/// Negotiation preference, best first.
const PREFERRED_FOURCC: [&[u8; 4]; 3] = [b"YU12", b"YUYV", b"MJPG"];

pub struct V4l2Source {
    path: String,
    // The stream holds its own reference to the device handle; the Device
    // is kept for renegotiation on reopen.
    _dev: Device,
    stream: MmapStream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
    sequence: u64,
}

impl V4l2Source {
    pub fn open(path: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        yuv_frame::check_dims(width, height)
            .map_err(|e| SourceError::DecodeFailure(e.to_string()))?;
        let (dev, stream, fourcc, actual_w, actual_h) = open_device(path, width, height, fps)?;
        Ok(Self {
            path: path.to_string(),
            _dev: dev,
            stream,
            width: actual_w,
            height: actual_h,
            fourcc,
            sequence: 0,
        })
    }
}

fn open_device(
    path: &str,
    width: u32,
    height: u32,
    fps: u32,
) -> Result<(Device, MmapStream<'static>, FourCC, u32, u32)> {
    let dev = Device::with_path(path).map_err(map_io_error)?;

    let available: Vec<FourCC> = dev
        .enum_formats()
        .map_err(map_io_error)?
        .into_iter()
        .map(|d| d.fourcc)
        .collect();
    let fourcc = PREFERRED_FOURCC
        .iter()
        .map(|f| FourCC::new(f))
        .find(|f| available.contains(f))
        .ok_or_else(|| {
            SourceError::DecodeFailure(format!(
                "device {path} offers none of YU12/YUYV/MJPG (got {available:?})"
            ))
        })?;

    let requested = Format::new(width, height, fourcc);
    let actual = dev.set_format(&requested).map_err(map_io_error)?;
    if actual.fourcc != fourcc {
        return Err(SourceError::DecodeFailure(format!(
            "device {path} refused {fourcc}, offered {}",
            actual.fourcc
        )));
    }
    yuv_frame::check_dims(actual.width, actual.height)
        .map_err(|e| SourceError::DecodeFailure(e.to_string()))?;

    if fps > 0 {
        let params = v4l::video::capture::Parameters::with_fps(fps);
        if let Err(e) = dev.set_params(&params) {
            debug!("device {path} rejected frame rate {fps}: {e}");
        }
    }

    let stream = MmapStream::with_buffers(&dev, Type::VideoCapture, 4).map_err(map_io_error)?;
    info!(
        path,
        w = actual.width,
        h = actual.height,
        fourcc = %actual.fourcc,
        "v4l2 capture opened"
    );
    Ok((dev, stream, fourcc, actual.width, actual.height))
}

fn map_io_error(e: std::io::Error) -> SourceError {
    const EIO: i32 = 5;
    const ENODEV: i32 = 19;
    match e.raw_os_error() {
        // The device went away.
        Some(code) if code == ENODEV || code == EIO => SourceError::Lost(e.to_string()),
        _ => match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => SourceError::Timeout,
            std::io::ErrorKind::NotFound => SourceError::Lost(e.to_string()),
            _ => SourceError::TransientIo(e),
        },
    }
}

impl FrameSource for V4l2Source {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn next_frame(&mut self, deadline: Instant) -> Result<Frame> {
        loop {
            match CaptureStream::next(&mut self.stream) {
                Ok((buf, _meta)) => {
                    self.sequence += 1;
                    let stamp = FrameStamp::now(self.sequence);
                    let expected_yuv = yuv_frame::yuv420p_len(self.width, self.height);
                    return match &self.fourcc.repr {
                        b"YU12" => {
                            if buf.len() < expected_yuv {
                                return Err(SourceError::DecodeFailure(format!(
                                    "short YU12 buffer: {} < {expected_yuv}",
                                    buf.len()
                                )));
                            }
                            Frame::from_planar(
                                self.width,
                                self.height,
                                buf[..expected_yuv].to_vec(),
                                stamp,
                            )
                            .map_err(|e| SourceError::DecodeFailure(e.to_string()))
                        }
                        b"YUYV" => {
                            let packed = (self.width * self.height * 2) as usize;
                            if buf.len() < packed {
                                return Err(SourceError::DecodeFailure(format!(
                                    "short YUYV buffer: {} < {packed}",
                                    buf.len()
                                )));
                            }
                            let yuv = yuyv_to_yuv420p(&buf[..packed], self.width, self.height);
                            Frame::from_planar(self.width, self.height, yuv, stamp)
                                .map_err(|e| SourceError::DecodeFailure(e.to_string()))
                        }
                        b"MJPG" => cam_source::decode_jpeg_frame(buf, stamp),
                        other => Err(SourceError::DecodeFailure(format!(
                            "unsupported negotiated format {other:?}"
                        ))),
                    };
                }
                Err(e) => {
                    let mapped = map_io_error(e);
                    match mapped {
                        // EAGAIN-class: retry until the deadline.
                        SourceError::Timeout | SourceError::TransientIo(_) => {
                            if Instant::now() >= deadline {
                                return Err(SourceError::Timeout);
                            }
                            std::thread::sleep(std::time::Duration::from_millis(2));
                        }
                        other => return Err(other),
                    }
                }
            }
        }
    }

    fn reopen(&mut self) -> Result<()> {
        let (dev, stream, fourcc, w, h) = open_device(&self.path, self.width, self.height, 0)?;
        if (w, h) != (self.width, self.height) {
            return Err(SourceError::DecodeFailure(format!(
                "device came back as {w}x{h}, expected {}x{}",
                self.width, self.height
            )));
        }
        self._dev = dev;
        self.stream = stream;
        self.fourcc = fourcc;
        Ok(())
    }
}
