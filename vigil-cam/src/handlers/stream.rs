//! Stream publisher: JPEG-encode the current frame into the camera's
//! latest-image slot, but only when somebody is watching.

use tracing::warn;

use crate::event::{EventCall, FollowUp};

use super::CameraHandlers;

impl CameraHandlers {
    pub(super) fn stream_put(&mut self, call: &EventCall) -> Vec<FollowUp> {
        if !self.stream.has_viewers() {
            return Vec::new();
        }
        let Some(frame) = call.image else {
            return Vec::new();
        };
        let quality = self.cfg.read().web.stream_quality as u8;

        match mjpeg_stream::encode_jpeg(frame, quality) {
            Ok(jpeg) => self.stream.full.publish(jpeg),
            Err(e) => {
                warn!("stream encode failed: {e}");
                return Vec::new();
            }
        }

        // Half-resolution substream for low-bandwidth viewers, only when
        // the dimensions allow it.
        if let Some(sub) = &self.stream.sub {
            if sub.client_count() > 0 {
                let (w, h) = (frame.width() / 2, frame.height() / 2);
                if self.substream_frame.is_none() {
                    self.substream_frame = yuv_frame::Frame::black(w, h, frame.stamp).ok();
                }
                if let Some(small) = self.substream_frame.as_mut() {
                    match pix_ops::scale_half(frame, small) {
                        Ok(()) => match mjpeg_stream::encode_jpeg(small, quality) {
                            Ok(jpeg) => sub.publish(jpeg),
                            Err(e) => warn!("substream encode failed: {e}"),
                        },
                        Err(e) => warn!("substream scale failed: {e}"),
                    }
                }
            }
        }
        Vec::new()
    }
}
