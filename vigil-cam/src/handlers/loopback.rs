//! Push processed frames into the V4L2 loopback devices.

use tracing::warn;

use crate::event::{EventCall, FollowUp};

use super::CameraHandlers;

impl CameraHandlers {
    pub(super) fn loopback_put(&mut self, call: &EventCall, motion: bool) -> Vec<FollowUp> {
        let writer = if motion {
            self.loopback_motion.as_mut()
        } else {
            self.loopback.as_mut()
        };
        if let (Some(writer), Some(frame)) = (writer, call.image) {
            // Single writer, no retry.
            if let Err(e) = writer.put(frame) {
                warn!(motion, "loopback write failed: {e}");
            }
        }
        Vec::new()
    }
}
