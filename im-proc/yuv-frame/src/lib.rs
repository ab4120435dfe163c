//! Owned planar YUV 4:2:0 frames and the fixed-capacity pre-capture ring.

use std::collections::VecDeque;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("image dimensions {0}x{1} must both be multiples of 8")]
    BadDimensions(u32, u32),
    #[error("buffer length {got} does not match {expected} for {w}x{h} YUV420p")]
    BadBufferLength {
        got: usize,
        expected: usize,
        w: u32,
        h: u32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Number of bytes in a YUV420p image of the given dimensions.
pub const fn yuv420p_len(width: u32, height: u32) -> usize {
    let wh = width as usize * height as usize;
    wh + wh / 2
}

/// When and where a frame was captured.
#[derive(Clone, Copy, Debug)]
pub struct FrameStamp {
    /// Wall-clock capture time.
    pub datetime: chrono::DateTime<chrono::Utc>,
    /// Monotonic capture time, for interval arithmetic.
    pub instant: std::time::Instant,
    /// Per-source sequence number, monotonically increasing.
    pub sequence: u64,
}

impl FrameStamp {
    pub fn now(sequence: u64) -> Self {
        Self {
            datetime: chrono::Utc::now(),
            instant: std::time::Instant::now(),
            sequence,
        }
    }
}

/// One decoded image: three planes in a single contiguous buffer.
///
/// The Y plane is `width*height` bytes, followed by U then V at
/// `width/2 * height/2` each. For passthrough recording the source may
/// attach the original compressed packet.
#[derive(Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    pub stamp: FrameStamp,
    pub packet: Option<Vec<u8>>,
}

impl Frame {
    /// A black frame (Y=16, U=V=128).
    pub fn black(width: u32, height: u32, stamp: FrameStamp) -> Result<Self> {
        check_dims(width, height)?;
        let wh = width as usize * height as usize;
        let mut data = vec![16u8; yuv420p_len(width, height)];
        for b in data[wh..].iter_mut() {
            *b = 128;
        }
        Ok(Self {
            width,
            height,
            data,
            stamp,
            packet: None,
        })
    }

    pub fn from_planar(width: u32, height: u32, data: Vec<u8>, stamp: FrameStamp) -> Result<Self> {
        check_dims(width, height)?;
        let expected = yuv420p_len(width, height);
        if data.len() != expected {
            return Err(Error::BadBufferLength {
                got: data.len(),
                expected,
                w: width,
                h: height,
            });
        }
        Ok(Self {
            width,
            height,
            data,
            stamp,
            packet: None,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Dimensions of the U and V planes.
    #[inline]
    pub fn chroma_dims(&self) -> (u32, u32) {
        (self.width / 2, self.height / 2)
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    #[inline]
    pub fn y_plane_mut(&mut self) -> &mut [u8] {
        let n = self.luma_len();
        &mut self.data[..n]
    }

    pub fn u_plane(&self) -> &[u8] {
        let (y, c) = (self.luma_len(), self.chroma_len());
        &self.data[y..y + c]
    }

    pub fn v_plane(&self) -> &[u8] {
        let (y, c) = (self.luma_len(), self.chroma_len());
        &self.data[y + c..]
    }

    /// Mutable views of all three planes at once.
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y, c) = (self.luma_len(), self.chroma_len());
        let (yp, rest) = self.data.split_at_mut(y);
        let (up, vp) = rest.split_at_mut(c);
        debug_assert_eq!(vp.len(), c);
        (yp, up, vp)
    }

    /// Exchange width and height, leaving the pixel buffer untouched.
    ///
    /// Used by quarter-turn rotation, which writes the transposed planes
    /// back into the same buffer.
    pub fn swap_dims(&mut self) {
        std::mem::swap(&mut self.width, &mut self.height);
    }

    #[inline]
    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    fn chroma_len(&self) -> usize {
        self.luma_len() / 4
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.stamp.sequence)
            .field("packet", &self.packet.as_ref().map(|p| p.len()))
            .finish()
    }
}

/// Check the main-path dimension requirement.
pub fn check_dims(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
        return Err(Error::BadDimensions(width, height));
    }
    Ok(())
}

/// Fixed-capacity ring of recent frames.
///
/// Slots are written in increasing sequence order; when an event starts the
/// ring is drained oldest-first. At most `pre_capture` frames are retained;
/// the backing store is allocated once at `pre_capture + 3` slots and never
/// reallocated.
pub struct ImageRing {
    retain: usize,
    inner: VecDeque<Frame>,
}

impl ImageRing {
    /// `pre_capture` is the number of frames replayed on event onset.
    pub fn new(pre_capture: usize) -> Self {
        Self {
            retain: pre_capture,
            inner: VecDeque::with_capacity(pre_capture + 3),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        if let Some(last) = self.inner.back() {
            debug_assert!(frame.stamp.sequence > last.stamp.sequence);
        }
        self.inner.push_back(frame);
        while self.inner.len() > self.retain {
            self.inner.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove and return all buffered frames, oldest first.
    pub fn drain_oldest_first(&mut self) -> VecDeque<Frame> {
        std::mem::take(&mut self.inner)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

fn _test_frame_is_send() {
    // Compile-time test to ensure Frame implements Send trait.
    fn implements<T: Send>() {}
    implements::<Frame>();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(seq: u64) -> FrameStamp {
        FrameStamp::now(seq)
    }

    #[test]
    fn test_plane_layout() {
        let frame = Frame::black(16, 8, stamp(0)).unwrap();
        assert_eq!(frame.y_plane().len(), 16 * 8);
        assert_eq!(frame.u_plane().len(), 8 * 4);
        assert_eq!(frame.v_plane().len(), 8 * 4);
        assert!(frame.y_plane().iter().all(|&p| p == 16));
        assert!(frame.u_plane().iter().all(|&p| p == 128));
        assert!(frame.v_plane().iter().all(|&p| p == 128));
    }

    #[test]
    fn test_rejects_non_modulo_8() {
        assert!(Frame::black(15, 8, stamp(0)).is_err());
        assert!(Frame::black(16, 10, stamp(0)).is_err());
        assert!(Frame::black(0, 8, stamp(0)).is_err());
    }

    #[test]
    fn test_rejects_short_buffer() {
        let data = vec![0u8; 10];
        assert!(Frame::from_planar(16, 16, data, stamp(0)).is_err());
    }

    #[test]
    fn test_planes_mut_disjoint() {
        let mut frame = Frame::black(16, 16, stamp(0)).unwrap();
        {
            let (y, u, v) = frame.planes_mut();
            y[0] = 1;
            u[0] = 2;
            v[0] = 3;
        }
        assert_eq!(frame.y_plane()[0], 1);
        assert_eq!(frame.u_plane()[0], 2);
        assert_eq!(frame.v_plane()[0], 3);
    }

    #[test]
    fn test_ring_capacity_and_order() {
        let mut ring = ImageRing::new(3);
        for seq in 0..10u64 {
            ring.push(Frame::black(8, 8, stamp(seq)).unwrap());
            assert!(ring.len() <= 3);
        }
        let drained = ring.drain_oldest_first();
        let seqs: Vec<u64> = drained.iter().map(|f| f.stamp.sequence).collect();
        assert_eq!(seqs, vec![7, 8, 9]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_zero_pre_capture() {
        let mut ring = ImageRing::new(0);
        ring.push(Frame::black(8, 8, stamp(0)).unwrap());
        assert!(ring.is_empty());
    }
}
