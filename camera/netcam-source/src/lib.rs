//! Network camera acquisition: HTTP-family sources (single-shot JPEG,
//! multipart MJPEG, MJPG-block) and the RTSP wrapper.
//!
//! Each source runs a producer thread that blocks on the network and
//! publishes completed frames into a shared latest-frame slot; the
//! pipeline consumes through [`cam_source::FrameSource`]. A lost
//! connection is retried every five seconds until the source is shut
//! down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use yuv_frame::{Frame, FrameStamp};

use cam_source::{FrameSource, Result, SourceError};

mod http;
mod rtsp;
mod shared;
mod url;

pub use rtsp::{ReadDeadline, RtspPacketSource, RtspSource, READ_DEADLINE};
pub use url::{NetcamUrl, Scheme};

use http::{ContentKind, HttpConnection};
use shared::{Payload, Shared, WaitOutcome};

/// Delay between reconnect attempts after a lost connection.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct NetcamOptions {
    /// Reuse the socket for single-shot sources (HTTP/1.1 keep-alive).
    pub keepalive: bool,
    /// Per-read socket timeout.
    pub read_timeout: Duration,
}

impl Default for NetcamOptions {
    fn default() -> Self {
        Self {
            keepalive: false,
            read_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct NetcamSource {
    shared: Arc<Shared>,
    width: u32,
    height: u32,
    consumed_seq: u64,
    seen_lost: u64,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl NetcamSource {
    /// Connect, fetch the first frame synchronously (startup is fatal when
    /// even one frame cannot be had), then hand the connection to the
    /// producer thread.
    pub fn connect(raw_url: &str, opts: NetcamOptions) -> Result<Self> {
        let parsed = NetcamUrl::parse(raw_url)?;
        match parsed.scheme {
            Scheme::Http | Scheme::Mjpeg | Scheme::Jpeg => {}
            Scheme::Rtsp => {
                return Err(SourceError::DecodeFailure(
                    "rtsp urls take the RtspSource path".to_string(),
                ))
            }
            Scheme::Ftp => {
                return Err(SourceError::DecodeFailure(
                    "ftp sources need the ftp collaborator; none is configured".to_string(),
                ))
            }
            Scheme::File | Scheme::V4l2 => {
                return Err(SourceError::DecodeFailure(
                    "local urls are not network cameras".to_string(),
                ))
            }
        }

        let mut conn = HttpConnection::connect(&parsed, opts.keepalive, opts.read_timeout)?;
        let first_jpeg = conn.next_jpeg()?;
        let first = cam_source::decode_jpeg_frame(&first_jpeg, FrameStamp::now(0))?;
        yuv_frame::check_dims(first.width(), first.height())
            .map_err(|e| SourceError::DecodeFailure(e.to_string()))?;
        let (width, height) = (first.width(), first.height());
        info!(url = raw_url, width, height, "netcam connected");

        let shared = Shared::new();
        shared.publish(&mut Payload::Jpeg(first_jpeg));

        let shared2 = shared.clone();
        let handle = std::thread::Builder::new()
            .name("netcam-producer".to_string())
            .spawn(move || producer_loop(conn, parsed, opts, shared2))
            .map_err(SourceError::TransientIo)?;

        Ok(Self {
            shared,
            width,
            height,
            consumed_seq: 0,
            seen_lost: 0,
            handle: Some(handle),
        })
    }

    /// Ask the producer to stop and wait up to `timeout` for it.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.shared.request_finish();
        join_with_timeout(self.handle.take(), timeout, "netcam-producer")
    }
}

impl Drop for NetcamSource {
    fn drop(&mut self) {
        self.shared.request_finish();
    }
}

impl FrameSource for NetcamSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn next_frame(&mut self, deadline: Instant) -> Result<Frame> {
        match self
            .shared
            .wait_next(self.consumed_seq, self.seen_lost, deadline)
        {
            WaitOutcome::Frame(Payload::Jpeg(jpeg), seq) => {
                self.consumed_seq = seq;
                let frame = cam_source::decode_jpeg_frame(&jpeg, FrameStamp::now(seq))?;
                if (frame.width(), frame.height()) != (self.width, self.height) {
                    return Err(SourceError::DecodeFailure(format!(
                        "camera changed size to {}x{}",
                        frame.width(),
                        frame.height()
                    )));
                }
                Ok(frame)
            }
            WaitOutcome::Frame(Payload::Decoded(frame), seq) => {
                self.consumed_seq = seq;
                Ok(frame)
            }
            WaitOutcome::Lost(n) => {
                self.seen_lost = n;
                Err(SourceError::Lost("netcam connection lost".to_string()))
            }
            WaitOutcome::TimedOut => Err(SourceError::Timeout),
            WaitOutcome::Finished => Err(SourceError::Lost("source shut down".to_string())),
        }
    }
}

fn producer_loop(
    mut conn: HttpConnection,
    url: NetcamUrl,
    opts: NetcamOptions,
    shared: Arc<Shared>,
) {
    let mut payload = Payload::Jpeg(Vec::new());
    let mut reconnect_attempts: u64 = 0;
    let mut decode_failures: u64 = 0;

    'outer: while !shared.finish_requested() {
        // Single-shot sources need a fresh request per frame.
        let rearm_result = match conn.head.kind {
            Some(ContentKind::JpegSingle) => conn.rearm_single(),
            _ => Ok(()),
        };

        let result = rearm_result.and_then(|()| conn.next_jpeg());
        match result {
            Ok(jpeg) => {
                reconnect_attempts = 0;
                if let Payload::Jpeg(buf) = &mut payload {
                    buf.clear();
                    buf.extend_from_slice(&jpeg);
                }
                shared.publish(&mut payload);
            }
            Err(SourceError::Timeout) => continue,
            Err(SourceError::TransientIo(e)) => {
                warn!("netcam read error (frame dropped): {e}");
            }
            Err(SourceError::DecodeFailure(msg)) => {
                decode_failures += 1;
                if decode_failures % 25 == 1 {
                    warn!(decode_failures, "netcam frame dropped: {msg}");
                }
            }
            Err(err) => {
                shared.mark_lost();
                loop {
                    if shared.finish_requested() {
                        break 'outer;
                    }
                    if reconnect_attempts == 0 || reconnect_attempts % 12 == 0 {
                        warn!(
                            attempts = reconnect_attempts,
                            "netcam connection lost ({err}), reconnecting"
                        );
                    }
                    reconnect_attempts += 1;
                    sleep_interruptible(&shared, RECONNECT_INTERVAL);
                    match HttpConnection::connect(&url, opts.keepalive, opts.read_timeout) {
                        Ok(new_conn) => {
                            conn = new_conn;
                            info!("netcam reconnected");
                            continue 'outer;
                        }
                        Err(e) => {
                            warn!("netcam reconnect failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

/// Sleep in short steps so a finish request cuts the wait short.
pub(crate) fn sleep_interruptible(shared: &Shared, total: Duration) {
    let step = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if shared.finish_requested() {
            return;
        }
        std::thread::sleep(step.min(deadline - Instant::now()));
    }
}

/// Poll a producer thread's completion, bounded by `timeout`. Returns true
/// when the thread finished; a stuck thread is left detached and logged.
pub(crate) fn join_with_timeout(
    handle: Option<std::thread::JoinHandle<()>>,
    timeout: Duration,
    name: &str,
) -> bool {
    let Some(handle) = handle else {
        return true;
    };
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    warn!("{name} thread did not stop within {timeout:?}, detaching");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn test_jpeg(luma: u8) -> Vec<u8> {
        let rgb = image::RgbImage::from_pixel(32, 16, image::Rgb([luma, luma, luma]));
        let mut jpeg = Vec::new();
        rgb.write_to(
            &mut std::io::Cursor::new(&mut jpeg),
            image::ImageFormat::Jpeg,
        )
        .unwrap();
        jpeg
    }

    /// Serve `frames` multipart parts on an ephemeral port, then close.
    fn spawn_multipart_server(frames: usize) -> (String, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/stream");
        let handle = std::thread::spawn(move || {
            if let Ok((mut socket, _)) = listener.accept() {
                let jpeg = test_jpeg(90);
                let _ = socket.write_all(
                    b"HTTP/1.0 200 OK\r\n\
                      Content-Type: multipart/x-mixed-replace; boundary=vigilframe\r\n\r\n",
                );
                for _ in 0..frames {
                    let part = format!(
                        "--vigilframe\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        jpeg.len()
                    );
                    if socket.write_all(part.as_bytes()).is_err() {
                        break;
                    }
                    if socket.write_all(&jpeg).is_err() {
                        break;
                    }
                    let _ = socket.write_all(b"\r\n");
                    std::thread::sleep(Duration::from_millis(5));
                }
                // Socket drops here: simulated connection loss.
            }
        });
        (url, handle)
    }

    #[test]
    fn test_multipart_stream_then_loss() {
        let (url, server) = spawn_multipart_server(10);
        let mut src = NetcamSource::connect(
            &url,
            NetcamOptions {
                keepalive: false,
                read_timeout: Duration::from_millis(500),
            },
        )
        .unwrap();
        assert_eq!((src.width(), src.height()), (32, 16));

        let mut got = 0;
        let mut lost = false;
        for _ in 0..60 {
            match src.next_frame(Instant::now() + Duration::from_millis(300)) {
                Ok(frame) => {
                    assert_eq!(frame.width(), 32);
                    got += 1;
                }
                Err(SourceError::Lost(_)) => {
                    lost = true;
                    break;
                }
                Err(SourceError::Timeout) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(got >= 1, "no frames received");
        assert!(lost, "loss never surfaced");
        assert!(src.shutdown(Duration::from_secs(8)));
        server.join().unwrap();
    }

    #[test]
    fn test_single_shot_http() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/snapshot.jpg");
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let jpeg = test_jpeg(120);
            let head = format!(
                "HTTP/1.0 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                jpeg.len()
            );
            socket.write_all(head.as_bytes()).unwrap();
            socket.write_all(&jpeg).unwrap();
        });

        let mut src = NetcamSource::connect(
            &url,
            NetcamOptions {
                keepalive: false,
                read_timeout: Duration::from_millis(500),
            },
        )
        .unwrap();
        let frame = src
            .next_frame(Instant::now() + Duration::from_secs(2))
            .unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 16));
        src.shutdown(Duration::from_secs(8));
        server.join().unwrap();
    }

    #[test]
    fn test_single_shot_keepalive_serves_multiple_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/snapshot.jpg");
        let server = std::thread::spawn(move || {
            use std::io::Read;
            let (mut socket, _) = listener.accept().unwrap();
            let jpeg = test_jpeg(100);
            let mut discard = [0u8; 4096];
            for _ in 0..3 {
                // Read the request head, then answer on the same socket.
                let _ = socket.read(&mut discard);
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: Keep-Alive\r\n\r\n",
                    jpeg.len()
                );
                socket.write_all(head.as_bytes()).unwrap();
                socket.write_all(&jpeg).unwrap();
            }
        });

        let mut src = NetcamSource::connect(
            &url,
            NetcamOptions {
                keepalive: true,
                read_timeout: Duration::from_millis(500),
            },
        )
        .unwrap();
        let mut got = 0;
        for _ in 0..40 {
            match src.next_frame(Instant::now() + Duration::from_millis(200)) {
                Ok(_) => got += 1,
                Err(SourceError::Timeout) => continue,
                Err(SourceError::Lost(_)) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            if got >= 2 {
                break;
            }
        }
        assert!(got >= 2, "keep-alive rearm produced {got} frames");
        src.shutdown(Duration::from_secs(8));
        server.join().unwrap();
    }

    #[test]
    fn test_mjpg_block_stream() {
        use crate::http::MjpgBlockHeader;
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/blockcam");
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket
                .write_all(
                    b"HTTP/1.0 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n",
                )
                .unwrap();
            let jpeg = test_jpeg(80);
            // Serve a few frames, each sliced into 1000-byte chunks.
            for seq in 0..4u32 {
                for chunk in jpeg.chunks(1000) {
                    let header = MjpgBlockHeader {
                        chunk_size: chunk.len() as u32,
                        frame_size: jpeg.len() as u32,
                        frame_seq: seq,
                    };
                    if socket.write_all(&header.encode()).is_err() {
                        return;
                    }
                    if socket.write_all(chunk).is_err() {
                        return;
                    }
                }
            }
        });

        let mut src = NetcamSource::connect(
            &url,
            NetcamOptions {
                keepalive: false,
                read_timeout: Duration::from_millis(500),
            },
        )
        .unwrap();
        assert_eq!((src.width(), src.height()), (32, 16));
        let mut got = 0;
        for _ in 0..40 {
            match src.next_frame(Instant::now() + Duration::from_millis(200)) {
                Ok(_) => got += 1,
                Err(SourceError::Timeout) => continue,
                Err(SourceError::Lost(_)) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            if got >= 2 {
                break;
            }
        }
        assert!(got >= 1, "block reassembly produced no frames");
        src.shutdown(Duration::from_secs(8));
        server.join().unwrap();
    }

    #[test]
    fn test_non_200_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/x");
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket
                .write_all(b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .unwrap();
        });
        let err = NetcamSource::connect(&url, NetcamOptions::default()).unwrap_err();
        assert!(matches!(err, SourceError::Protocol(404)));
        server.join().unwrap();
    }
}
