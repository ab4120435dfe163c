//! Producer/consumer handoff for network sources.
//!
//! The producer thread fills a receiving buffer; when a frame completes the
//! receiving and latest buffers are exchanged under the mutex and the
//! condition variable wakes the pipeline. The consumer clones the latest
//! payload out under the same mutex and decodes outside it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use yuv_frame::Frame;

/// What a network source delivers per frame.
#[derive(Clone, Debug)]
pub enum Payload {
    /// Compressed JPEG, decoded by the consumer.
    Jpeg(Vec<u8>),
    /// Already decoded by the collaborator (RTSP path).
    Decoded(Frame),
}

#[derive(Debug)]
pub(crate) struct SharedState {
    pub latest: Option<Payload>,
    pub latest_seq: u64,
    pub last_frame_at: Instant,
    /// Incremented on every connected -> lost transition.
    pub lost_transitions: u64,
    pub connected: bool,
    pub finish: bool,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub state: Mutex<SharedState>,
    pub pic_ready: Condvar,
}

impl Shared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SharedState {
                latest: None,
                latest_seq: 0,
                last_frame_at: Instant::now(),
                lost_transitions: 0,
                connected: false,
                finish: false,
            }),
            pic_ready: Condvar::new(),
        })
    }

    /// Publish a completed frame, exchanging `payload` with the previous
    /// latest buffer (whose allocation the producer then reuses).
    pub fn publish(&self, payload: &mut Payload) {
        let mut state = self.state.lock();
        if let Some(prev) = state.latest.as_mut() {
            std::mem::swap(prev, payload);
        } else {
            state.latest = Some(payload.clone());
        }
        state.latest_seq += 1;
        state.last_frame_at = Instant::now();
        state.connected = true;
        drop(state);
        self.pic_ready.notify_all();
    }

    pub fn mark_lost(&self) {
        let mut state = self.state.lock();
        if state.connected {
            state.connected = false;
            state.lost_transitions += 1;
        }
        drop(state);
        self.pic_ready.notify_all();
    }

    pub fn request_finish(&self) {
        self.state.lock().finish = true;
        self.pic_ready.notify_all();
    }

    pub fn finish_requested(&self) -> bool {
        self.state.lock().finish
    }

    /// Outcome of waiting for the next published frame.
    pub fn wait_next(
        &self,
        last_consumed_seq: u64,
        seen_lost_transitions: u64,
        deadline: Instant,
    ) -> WaitOutcome {
        let mut state = self.state.lock();
        loop {
            if state.finish {
                return WaitOutcome::Finished;
            }
            // Deliver a pending frame before reporting a loss, so a frame
            // published just before the disconnect is not dropped.
            if state.latest_seq > last_consumed_seq {
                let payload = state
                    .latest
                    .clone()
                    .expect("latest_seq advanced without a payload");
                return WaitOutcome::Frame(payload, state.latest_seq);
            }
            if state.lost_transitions > seen_lost_transitions {
                return WaitOutcome::Lost(state.lost_transitions);
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let timeout = deadline - now;
            self.pic_ready
                .wait_for(&mut state, timeout.min(Duration::from_millis(500)));
        }
    }
}

pub(crate) enum WaitOutcome {
    Frame(Payload, u64),
    Lost(u64),
    TimedOut,
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_wakes_waiter() {
        let shared = Shared::new();
        let shared2 = shared.clone();
        let waiter = std::thread::spawn(move || {
            shared2.wait_next(0, 0, Instant::now() + Duration::from_secs(5))
        });
        std::thread::sleep(Duration::from_millis(20));
        shared.publish(&mut Payload::Jpeg(vec![1, 2, 3]));
        match waiter.join().unwrap() {
            WaitOutcome::Frame(Payload::Jpeg(buf), seq) => {
                assert_eq!(buf, vec![1, 2, 3]);
                assert_eq!(seq, 1);
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn test_wait_times_out() {
        let shared = Shared::new();
        match shared.wait_next(0, 0, Instant::now() + Duration::from_millis(30)) {
            WaitOutcome::TimedOut => {}
            _ => panic!("expected timeout"),
        }
    }

    #[test]
    fn test_lost_transition_reported_once() {
        let shared = Shared::new();
        shared.publish(&mut Payload::Jpeg(vec![0]));
        shared.mark_lost();
        let deadline = Instant::now() + Duration::from_secs(1);
        let seen = match shared.wait_next(1, 0, deadline) {
            WaitOutcome::Lost(n) => n,
            _ => panic!("expected lost"),
        };
        // Having acknowledged the transition, the next wait just times out.
        match shared.wait_next(1, seen, Instant::now() + Duration::from_millis(30)) {
            WaitOutcome::TimedOut => {}
            _ => panic!("expected timeout"),
        }
    }
}
