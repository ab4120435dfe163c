//! Movie output via a child ffmpeg process fed Y4M frames on stdin.
//!
//! The pipeline only ever says "open movie / push frame / close movie";
//! codec choice, container muxing and timestamp arithmetic are the child
//! process's business. The same mechanism drives event movies, the
//! timelapse writer (with its append-across-sessions mpg mode) and the
//! user-defined external pipe.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::{debug, info, warn};
use yuv_frame::Frame;

mod extpipe;
mod timelapse;

pub use extpipe::ExtPipe;
pub use timelapse::{timelapse_mode, TimelapseMode, TimelapseWriter};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("y4m error: {0}")]
    Y4m(#[from] y4m::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    FfmpegFailed {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("writer is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;

/// The open/put/close capability every movie sink exposes. The daemon's
/// movie driver holds these as trait objects so tests can substitute a
/// recording fake.
pub trait MovieEncoder: Send {
    fn put(&mut self, frame: &Frame) -> Result<()>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// Creates encoders for a configured codec. One factory per camera.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, path: &Path, width: u32, height: u32, fps: u32)
        -> Result<Box<dyn MovieEncoder>>;
}

/// Map a configured codec word to ffmpeg arguments and the container
/// extension.
fn codec_args(codec: &str) -> (Vec<&'static str>, &'static str) {
    match codec {
        "mpg" => (vec!["-f", "mpeg", "-c:v", "mpeg1video"], "mpg"),
        "mpeg4" | "mp4" => (vec!["-c:v", "mpeg4"], "mp4"),
        "mkv" => (vec!["-c:v", "mpeg4"], "mkv"),
        other => {
            debug!("unknown movie codec {other:?}, using mpeg4");
            (vec!["-c:v", "mpeg4"], "mp4")
        }
    }
}

/// File extension for a codec word.
pub fn movie_extension(codec: &str) -> &'static str {
    codec_args(codec).1
}

enum OutputTarget {
    /// ffmpeg writes the file itself.
    File(PathBuf),
    /// ffmpeg writes the container to stdout and we append it to the
    /// target, so sessions accumulate in one file.
    AppendTo(PathBuf),
}

pub struct FfmpegWriter {
    child: Child,
    enc: Option<y4m::Encoder<std::process::ChildStdin>>,
    appender: Option<std::thread::JoinHandle<std::io::Result<u64>>>,
    path: PathBuf,
}

impl FfmpegWriter {
    pub fn create(path: &Path, codec: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        Self::create_inner(OutputTarget::File(path.to_path_buf()), codec, width, height, fps)
    }

    /// Append-mode creation for the mpg timelapse.
    pub fn create_appending(
        path: &Path,
        codec: &str,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self> {
        Self::create_inner(
            OutputTarget::AppendTo(path.to_path_buf()),
            codec,
            width,
            height,
            fps,
        )
    }

    fn create_inner(
        target: OutputTarget,
        codec: &str,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self> {
        let (codec_argv, _ext) = codec_args(codec);
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-f", "yuv4mpegpipe", "-i", "-"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(codec_argv.iter().map(|s| s.to_string()));

        let (path, stdout, appending) = match &target {
            OutputTarget::File(path) => {
                args.push(path.display().to_string());
                (path.clone(), Stdio::null(), false)
            }
            OutputTarget::AppendTo(path) => {
                args.push("pipe:1".to_string());
                (path.clone(), Stdio::piped(), true)
            }
        };

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()?;

        let appender = if appending {
            let mut out = child.stdout.take().expect("stdout was piped");
            let target_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            Some(std::thread::Builder::new().name("movie-append".to_string()).spawn(
                move || {
                    let mut target_file = target_file;
                    std::io::copy(&mut out, &mut target_file)
                },
            )?)
        } else {
            None
        };

        let stdin = child.stdin.take().expect("stdin was piped");
        let fps = fps.max(2); // very slow sources still get a sane timebase
        let enc = y4m::encode(width as usize, height as usize, y4m::Ratio::new(fps as usize, 1))
            .with_colorspace(y4m::Colorspace::C420)
            .write_header(stdin)?;

        info!(path = %path.display(), codec, width, height, fps, "movie opened");
        Ok(Self {
            child,
            enc: Some(enc),
            appender,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn collect_failure(&mut self, status: std::process::ExitStatus) -> Error {
        let mut stderr = String::new();
        if let Some(mut err) = self.child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }
        Error::FfmpegFailed { status, stderr }
    }
}

impl MovieEncoder for FfmpegWriter {
    fn put(&mut self, frame: &Frame) -> Result<()> {
        let enc = self.enc.as_mut().ok_or(Error::Closed)?;
        let planes = [frame.y_plane(), frame.u_plane(), frame.v_plane()];
        match enc.write_frame(&y4m::Frame::new(planes, None)) {
            Ok(()) => Ok(()),
            Err(y4m::Error::IoError(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                // ffmpeg died under us; surface its complaint.
                let status = self.child.wait()?;
                Err(self.collect_failure(status))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        // Dropping the encoder closes stdin, telling ffmpeg to finish the
        // container trailer.
        drop(self.enc.take());
        let status = self.child.wait()?;
        if let Some(appender) = self.appender.take() {
            match appender.join() {
                Ok(Ok(bytes)) => debug!(bytes, "timelapse append finished"),
                Ok(Err(e)) => warn!("timelapse append failed: {e}"),
                Err(_) => warn!("timelapse append thread panicked"),
            }
        }
        if status.success() {
            info!(path = %self.path.display(), "movie closed");
            Ok(())
        } else {
            let err = self.collect_failure(status);
            Err(err)
        }
    }
}

/// The production factory: one ffmpeg child per movie.
pub struct FfmpegFactory {
    codec: String,
}

impl FfmpegFactory {
    pub fn new(codec: &str) -> Self {
        Self {
            codec: codec.to_string(),
        }
    }
}

impl EncoderFactory for FfmpegFactory {
    fn create(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn MovieEncoder>> {
        Ok(Box::new(FfmpegWriter::create(
            path,
            &self.codec,
            width,
            height,
            fps,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_mapping() {
        assert_eq!(movie_extension("mpg"), "mpg");
        assert_eq!(movie_extension("mpeg4"), "mp4");
        assert_eq!(movie_extension("mystery"), "mp4");
    }

    fn ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_write_short_movie() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut wtr: Box<dyn MovieEncoder> = Box::new(
            FfmpegWriter::create(&path, "mpeg4", 64, 48, 10).unwrap(),
        );
        for seq in 0..5 {
            let frame = Frame::black(64, 48, yuv_frame::FrameStamp::now(seq)).unwrap();
            wtr.put(&frame).unwrap();
        }
        wtr.close().unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        assert!(len > 0, "movie file is empty");
    }

    #[test]
    fn test_append_mode_accumulates() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lapse.mpg");
        for _session in 0..2 {
            let mut wtr = Box::new(
                FfmpegWriter::create_appending(&path, "mpg", 64, 48, 10).unwrap(),
            );
            for seq in 0..3 {
                let frame = Frame::black(64, 48, yuv_frame::FrameStamp::now(seq)).unwrap();
                MovieEncoder::put(wtr.as_mut(), &frame).unwrap();
            }
            MovieEncoder::close(wtr).unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        assert!(len > 0);
    }
}
