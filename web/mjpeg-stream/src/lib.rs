//! Live MJPEG streaming.
//!
//! Each camera owns a latest-JPEG slot (full resolution plus an optional
//! half-resolution substream). The pipeline publishes into the slot on its
//! stream tick — and only encodes when somebody is actually watching; the
//! HTTP side serves each slot as a multipart/x-mixed-replace stream.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use yuv_frame::Frame;

mod server;

pub use server::router;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("jpeg encode failed: {0}")]
    Encode(String),
}

/// One latest-image slot with its viewer count.
pub struct Channel {
    tx: tokio::sync::watch::Sender<Option<Bytes>>,
    clients: AtomicUsize,
}

impl Channel {
    fn new() -> Self {
        let (tx, _rx) = tokio::sync::watch::channel(None);
        Self {
            tx,
            clients: AtomicUsize::new(0),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    pub fn publish(&self, jpeg: Bytes) {
        // Store even with zero receivers: the next client gets the most
        // recent image immediately.
        self.tx.send_replace(Some(jpeg));
    }

    fn subscribe(&self) -> tokio::sync::watch::Receiver<Option<Bytes>> {
        self.tx.subscribe()
    }
}

/// The per-camera publishing surface handed to the pipeline thread.
pub struct CameraStream {
    pub camera_id: u32,
    pub name: String,
    pub full: Channel,
    /// Present only when the source dimensions allow the half-resolution
    /// substream (multiples of 16).
    pub sub: Option<Channel>,
}

impl CameraStream {
    /// Whether any client watches either stream; the pipeline skips JPEG
    /// encoding entirely otherwise.
    pub fn has_viewers(&self) -> bool {
        self.full.client_count() > 0
            || self.sub.as_ref().map_or(false, |s| s.client_count() > 0)
    }
}

/// Registry the HTTP server navigates; cameras register at startup.
#[derive(Default)]
pub struct StreamRegistry {
    cameras: parking_lot::RwLock<BTreeMap<u32, Arc<CameraStream>>>,
}

impl StreamRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, camera_id: u32, name: &str, substream: bool) -> Arc<CameraStream> {
        let stream = Arc::new(CameraStream {
            camera_id,
            name: name.to_string(),
            full: Channel::new(),
            sub: substream.then(Channel::new),
        });
        self.cameras.write().insert(camera_id, stream.clone());
        stream
    }

    pub fn unregister(&self, camera_id: u32) {
        self.cameras.write().remove(&camera_id);
    }

    pub fn get(&self, camera_id: u32) -> Option<Arc<CameraStream>> {
        self.cameras.read().get(&camera_id).cloned()
    }

    pub fn list(&self) -> Vec<(u32, String)> {
        self.cameras
            .read()
            .values()
            .map(|c| (c.camera_id, c.name.clone()))
            .collect()
    }
}

/// JPEG-encode a frame at the given quality (1..=100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Bytes, Error> {
    let rgb = pix_ops::yuv420p_to_rgb(frame);
    let img: image::RgbImage =
        image::ImageBuffer::from_raw(frame.width(), frame.height(), rgb)
            .expect("rgb buffer length matches dimensions");
    let mut out = Vec::new();
    let mut enc = image::codecs::jpeg::JpegEncoder::new_with_quality(
        &mut out,
        quality.clamp(1, 100),
    );
    enc.encode_image(&img).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_round_trip() {
        let reg = StreamRegistry::new();
        let cam = reg.register(3, "yard", true);
        assert!(cam.sub.is_some());
        assert_eq!(reg.list(), vec![(3, "yard".to_string())]);
        assert!(reg.get(3).is_some());
        reg.unregister(3);
        assert!(reg.get(3).is_none());
    }

    #[test]
    fn test_no_viewers_by_default() {
        let reg = StreamRegistry::new();
        let cam = reg.register(1, "door", false);
        assert!(!cam.has_viewers());
        cam.full.publish(Bytes::from_static(b"xx"));
        assert!(!cam.has_viewers());
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = Frame::black(32, 16, yuv_frame::FrameStamp::now(0)).unwrap();
        let jpeg = encode_jpeg(&frame, 75).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
