//! Blocking HTTP client for network cameras: single-shot JPEG,
//! multipart/x-mixed-replace streams and MJPG-block streams.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use cam_source::{Result, SourceError};
use tracing::{debug, warn};

use crate::url::NetcamUrl;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Receive buffer growth quantum.
const RECV_BLOCK: usize = 16 * 1024;
const USER_AGENT: &str = concat!("vigil/", env!("CARGO_PKG_VERSION"));

/// What the response headers said the body will look like.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ContentKind {
    /// `multipart/x-mixed-replace`; one JPEG per part.
    MjpegMultipart { boundary: String },
    /// `image/jpeg`; one image per request.
    JpegSingle,
    /// `application/octet-stream`; JPEG sliced into MJPG-block chunks.
    MjpgBlock,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub content_length: Option<usize>,
    pub connection_close: bool,
    pub kind: Option<ContentKind>,
}

pub(crate) struct HttpConnection {
    stream: TcpStream,
    /// Received-but-unconsumed bytes.
    buf: Vec<u8>,
    url: NetcamUrl,
    keepalive: bool,
    pub head: ResponseHead,
}

impl HttpConnection {
    /// Open the socket, issue the first request and parse the response
    /// head.
    pub fn connect(url: &NetcamUrl, keepalive: bool, read_timeout: Duration) -> Result<Self> {
        let addrs: Vec<_> = (url.host.as_str(), url.port)
            .to_socket_addrs()
            .map_err(|e| SourceError::Lost(format!("resolve {}: {e}", url.host)))?
            .collect();
        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = stream.ok_or_else(|| {
            SourceError::Lost(format!(
                "connect {}:{}: {}",
                url.host,
                url.port,
                last_err.map_or_else(|| "no addresses".to_string(), |e| e.to_string())
            ))
        })?;
        stream
            .set_read_timeout(Some(read_timeout))
            .map_err(SourceError::TransientIo)?;

        let mut conn = Self {
            stream,
            buf: Vec::with_capacity(RECV_BLOCK),
            url: url.clone(),
            keepalive,
            head: ResponseHead::default(),
        };
        conn.send_request()?;
        conn.read_response_head()?;
        Ok(conn)
    }

    pub fn send_request(&mut self) -> Result<()> {
        let version = if self.keepalive { "1.1" } else { "1.0" };
        let mut req = format!(
            "GET {} HTTP/{version}\r\nHost: {}\r\nUser-Agent: {USER_AGENT}\r\n",
            self.url.path, self.url.host
        );
        if self.keepalive {
            req.push_str("Connection: Keep-Alive\r\n");
        }
        if let Some(auth) = self.url.basic_auth() {
            req.push_str("Authorization: Basic ");
            req.push_str(&auth);
            req.push_str("\r\n");
        }
        req.push_str("\r\n");
        self.stream
            .write_all(req.as_bytes())
            .map_err(map_io_error)?;
        Ok(())
    }

    /// Read and parse one header block, leaving body bytes buffered.
    pub fn read_response_head(&mut self) -> Result<()> {
        let head_end = loop {
            if let Some(pos) = memchr::memmem::find(&self.buf, b"\r\n\r\n") {
                break pos;
            }
            if self.buf.len() > 64 * 1024 {
                return Err(SourceError::DecodeFailure(
                    "response header block too large".to_string(),
                ));
            }
            self.fill()?;
        };
        let head_bytes: Vec<u8> = self.buf.drain(..head_end + 4).collect();
        let head = parse_response_head(&head_bytes)?;
        if head.status != 200 {
            return Err(SourceError::Protocol(head.status));
        }
        debug!(?head, "netcam response head");
        self.head = head;
        Ok(())
    }

    /// Pull one more block from the socket into the receive buffer.
    fn fill(&mut self) -> Result<usize> {
        let mut block = [0u8; RECV_BLOCK];
        let n = self.stream.read(&mut block).map_err(map_io_error)?;
        if n == 0 {
            return Err(SourceError::Lost("peer closed the connection".to_string()));
        }
        self.buf.extend_from_slice(&block[..n]);
        Ok(n)
    }

    /// Read one frame according to the negotiated content kind.
    pub fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        match self.head.kind.clone() {
            Some(ContentKind::MjpegMultipart { boundary }) => self.next_multipart_body(&boundary),
            Some(ContentKind::JpegSingle) => self.next_single_body(),
            Some(ContentKind::MjpgBlock) => self.next_block_frame(),
            None => Err(SourceError::DecodeFailure(
                "unknown content type".to_string(),
            )),
        }
    }

    fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.buf.len() < n {
            self.fill()?;
        }
        Ok(self.buf.drain(..n).collect())
    }

    /// Discard until the marker is consumed; returns bytes skipped.
    fn skip_past(&mut self, marker: &[u8]) -> Result<usize> {
        loop {
            if let Some(pos) = memchr::memmem::find(&self.buf, marker) {
                self.buf.drain(..pos + marker.len());
                return Ok(pos);
            }
            // Keep a marker's worth of tail so a split marker is found on
            // the next pass.
            if self.buf.len() > marker.len() {
                let keep_from = self.buf.len() - marker.len();
                self.buf.drain(..keep_from);
            }
            self.fill()?;
        }
    }

    fn next_multipart_body(&mut self, boundary: &str) -> Result<Vec<u8>> {
        let marker = format!("--{boundary}");
        self.skip_past(marker.as_bytes())?;
        // Part headers run to the blank line.
        let head_end = loop {
            if let Some(pos) = memchr::memmem::find(&self.buf, b"\r\n\r\n") {
                break pos;
            }
            self.fill()?;
        };
        let part_head: Vec<u8> = self.buf.drain(..head_end + 4).collect();
        let content_length = parse_content_length(&part_head);

        let body = if let Some(len) = content_length {
            self.take(len)?
        } else {
            // No length: the body runs to the next boundary marker.
            let end = loop {
                if let Some(pos) = memchr::memmem::find(&self.buf, marker.as_bytes()) {
                    break pos;
                }
                self.fill()?;
            };
            let mut body: Vec<u8> = self.buf.drain(..end).collect();
            // Drop the CRLF that precedes the boundary.
            while body.last() == Some(&b'\r') || body.last() == Some(&b'\n') {
                body.pop();
            }
            body
        };
        Ok(skip_to_soi(&body)?.to_vec())
    }

    fn next_single_body(&mut self) -> Result<Vec<u8>> {
        let body = if let Some(len) = self.head.content_length {
            self.take(len)?
        } else {
            // Read to close.
            loop {
                match self.fill() {
                    Ok(_) => {}
                    Err(SourceError::Lost(_)) => break,
                    Err(e) => return Err(e),
                }
            }
            std::mem::take(&mut self.buf)
        };
        Ok(skip_to_soi(&body)?.to_vec())
    }

    /// Issue the follow-up request for a single-shot keep-alive source.
    pub fn rearm_single(&mut self) -> Result<()> {
        if self.head.connection_close || !self.keepalive {
            return Err(SourceError::Lost(
                "single-shot source without keep-alive".to_string(),
            ));
        }
        self.send_request()?;
        self.read_response_head()
    }

    fn next_block_frame(&mut self) -> Result<Vec<u8>> {
        let mut frame: Vec<u8> = Vec::new();
        let mut expected_total: Option<usize> = None;
        loop {
            let header = self.take(MJPG_BLOCK_HEADER_LEN)?;
            let header = MjpgBlockHeader::parse(&header)?;
            if let Some(total) = expected_total {
                if total != header.frame_size as usize {
                    warn!("MJPG block frame size changed mid-frame, resyncing");
                    frame.clear();
                }
            }
            expected_total = Some(header.frame_size as usize);
            let chunk = self.take(header.chunk_size as usize)?;
            frame.extend_from_slice(&chunk);
            if frame.len() >= header.frame_size as usize {
                return Ok(skip_to_soi(&frame)?.to_vec());
            }
        }
    }
}

pub(crate) const MJPG_BLOCK_HEADER_LEN: usize = 16;

/// Fixed-size chunk header used by MJPG-block cameras: magic, this chunk's
/// size, the total frame size, and a frame sequence number.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MjpgBlockHeader {
    pub chunk_size: u32,
    pub frame_size: u32,
    #[allow(dead_code)]
    pub frame_seq: u32,
}

impl MjpgBlockHeader {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < MJPG_BLOCK_HEADER_LEN || &raw[..4] != b"MJPG" {
            return Err(SourceError::DecodeFailure(
                "bad MJPG block magic".to_string(),
            ));
        }
        let word = |i: usize| u32::from_le_bytes(raw[i..i + 4].try_into().unwrap());
        Ok(Self {
            chunk_size: word(4),
            frame_size: word(8),
            frame_seq: word(12),
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> [u8; MJPG_BLOCK_HEADER_LEN] {
        let mut out = [0u8; MJPG_BLOCK_HEADER_LEN];
        out[..4].copy_from_slice(b"MJPG");
        out[4..8].copy_from_slice(&self.chunk_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.frame_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.frame_seq.to_le_bytes());
        out
    }
}

fn map_io_error(e: std::io::Error) -> SourceError {
    use std::io::ErrorKind::*;
    match e.kind() {
        WouldBlock | TimedOut => SourceError::Timeout,
        ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof | NotConnected => {
            SourceError::Lost(e.to_string())
        }
        _ => SourceError::TransientIo(e),
    }
}

/// Some cameras prepend garbage before the JPEG start-of-image marker;
/// skip to it or reject the body.
pub(crate) fn skip_to_soi(body: &[u8]) -> Result<&[u8]> {
    memchr::memmem::find(body, &[0xFF, 0xD8])
        .map(|pos| &body[pos..])
        .ok_or_else(|| SourceError::DecodeFailure("no JPEG SOI marker in body".to_string()))
}

pub(crate) fn parse_response_head(raw: &[u8]) -> Result<ResponseHead> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| SourceError::DecodeFailure("empty response".to_string()))?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SourceError::DecodeFailure(format!("bad status line {status_line:?}")))?;

    let mut head = ResponseHead {
        status,
        ..Default::default()
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.to_ascii_lowercase().as_str() {
            "content-type" => {
                let lower = value.to_ascii_lowercase();
                if lower.starts_with("multipart/x-mixed-replace")
                    || lower.starts_with("multipart/mixed")
                {
                    let boundary = parse_boundary(value).ok_or_else(|| {
                        SourceError::DecodeFailure(format!(
                            "multipart content type without boundary: {value:?}"
                        ))
                    })?;
                    head.kind = Some(ContentKind::MjpegMultipart { boundary });
                } else if lower.starts_with("image/jpeg") {
                    head.kind = Some(ContentKind::JpegSingle);
                } else if lower.starts_with("application/octet-stream") {
                    head.kind = Some(ContentKind::MjpgBlock);
                }
            }
            "content-length" => {
                head.content_length = value.parse().ok();
            }
            "connection" => {
                head.connection_close = value.eq_ignore_ascii_case("close");
            }
            _ => {}
        }
    }
    Ok(head)
}

/// Extract the boundary parameter; it may be double-quoted.
fn parse_boundary(content_type: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        if let Some(value) = param
            .strip_prefix("boundary=")
            .or_else(|| param.strip_prefix("BOUNDARY="))
        {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head_multipart() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n";
        let head = parse_response_head(raw).unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(
            head.kind,
            Some(ContentKind::MjpegMultipart {
                boundary: "frame".to_string()
            })
        );
    }

    #[test]
    fn test_parse_head_quoted_boundary() {
        let raw =
            b"HTTP/1.1 200 OK\r\nContent-Type: multipart/mixed; boundary=\"--myframe\"\r\n\r\n";
        let head = parse_response_head(raw).unwrap();
        assert_eq!(
            head.kind,
            Some(ContentKind::MjpegMultipart {
                boundary: "--myframe".to_string()
            })
        );
    }

    #[test]
    fn test_parse_head_single_jpeg() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: 123\r\nConnection: close\r\n\r\n";
        let head = parse_response_head(raw).unwrap();
        assert_eq!(head.kind, Some(ContentKind::JpegSingle));
        assert_eq!(head.content_length, Some(123));
        assert!(head.connection_close);
    }

    #[test]
    fn test_parse_head_octet_stream() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n";
        let head = parse_response_head(raw).unwrap();
        assert_eq!(head.kind, Some(ContentKind::MjpgBlock));
    }

    #[test]
    fn test_skip_to_soi() {
        let body = [0x00, 0x11, 0xFF, 0xD8, 0xFF, 0xE0];
        assert_eq!(skip_to_soi(&body).unwrap(), &body[2..]);
        assert!(skip_to_soi(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_block_header_round_trip() {
        let h = MjpgBlockHeader {
            chunk_size: 1000,
            frame_size: 2500,
            frame_seq: 7,
        };
        let parsed = MjpgBlockHeader::parse(&h.encode()).unwrap();
        assert_eq!(parsed.chunk_size, 1000);
        assert_eq!(parsed.frame_size, 2500);
        assert_eq!(parsed.frame_seq, 7);
    }

    #[test]
    fn test_block_header_rejects_bad_magic() {
        assert!(MjpgBlockHeader::parse(&[0u8; 16]).is_err());
    }
}

fn parse_content_length(part_head: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(part_head);
    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}
