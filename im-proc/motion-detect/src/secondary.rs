//! Optional heavyweight secondary classifier.
//!
//! The primary detector is cheap and runs inline; a secondary classifier
//! (HOG, Haar, a neural model) owns its own scratch state and runs on a
//! dedicated thread, fed through a bounded mailbox and publishing results
//! back through another. The pipeline folds results into the verdict of
//! whatever frame is current when the result arrives.

use tracing::{debug, error};
use yuv_frame::Frame;

/// What the secondary classifier concluded about a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondaryVerdict {
    /// The detection is real; keep the positive.
    Confirm,
    /// Downgrade the primary positive to negative.
    Veto,
    /// No opinion.
    Indeterminate,
}

/// A classifier with its own model state. Implementations are free to take
/// hundreds of milliseconds; the mailbox decouples them from the frame
/// rate.
pub trait SecondaryClassifier: Send {
    fn classify(&mut self, frame: &Frame) -> SecondaryVerdict;
}

pub struct SecondaryDetector {
    tx: crossbeam_channel::Sender<(Frame, u64)>,
    rx: crossbeam_channel::Receiver<(u64, SecondaryVerdict)>,
    /// Submit at most one frame per this many sequence numbers.
    interval: u64,
    last_submitted: Option<u64>,
}

impl SecondaryDetector {
    pub fn new(
        mut classifier: Box<dyn SecondaryClassifier>,
        interval: u64,
    ) -> std::io::Result<Self> {
        let (tx, worker_rx) = crossbeam_channel::bounded::<(Frame, u64)>(2);
        let (worker_tx, rx) = crossbeam_channel::bounded::<(u64, SecondaryVerdict)>(10);

        std::thread::Builder::new()
            .name("secondary-det".to_string())
            .spawn(move || {
                loop {
                    let (frame, seq) = match worker_rx.recv() {
                        Ok(x) => x,
                        Err(crossbeam_channel::RecvError) => {
                            // Normal at camera shutdown.
                            debug!("secondary mailbox disconnected");
                            break;
                        }
                    };
                    let verdict = classifier.classify(&frame);
                    if worker_tx.send((seq, verdict)).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            tx,
            rx,
            interval: interval.max(1),
            last_submitted: None,
        })
    }

    /// Offer a frame to the classifier. Obeys the configured throttle and
    /// drops the frame when the worker is still busy.
    pub fn submit(&mut self, frame: &Frame) {
        let seq = frame.stamp.sequence;
        if let Some(last) = self.last_submitted {
            if seq < last + self.interval {
                return;
            }
        }
        if self.tx.is_full() {
            debug!(seq, "secondary classifier busy, dropping frame");
            return;
        }
        if self.tx.send((frame.clone(), seq)).is_err() {
            error!("secondary classifier thread is gone");
            return;
        }
        self.last_submitted = Some(seq);
    }

    /// Collect the most recent finished result, if any.
    pub fn poll(&mut self) -> Option<(u64, SecondaryVerdict)> {
        let mut latest = None;
        loop {
            match self.rx.try_recv() {
                Ok(msg) => latest = Some(msg),
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    error!("secondary classifier thread is gone");
                    break;
                }
            }
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yuv_frame::FrameStamp;

    /// Confirms bright frames, vetoes dark ones.
    struct BrightnessClassifier;

    impl SecondaryClassifier for BrightnessClassifier {
        fn classify(&mut self, frame: &Frame) -> SecondaryVerdict {
            let sum: u64 = frame.y_plane().iter().map(|&p| p as u64).sum();
            let mean = sum / frame.y_plane().len() as u64;
            if mean > 128 {
                SecondaryVerdict::Confirm
            } else {
                SecondaryVerdict::Veto
            }
        }
    }

    fn frame(seq: u64, luma: u8) -> Frame {
        let mut f = Frame::black(16, 16, FrameStamp::now(seq)).unwrap();
        f.y_plane_mut().iter_mut().for_each(|p| *p = luma);
        f
    }

    #[test]
    fn test_round_trip() {
        let mut det = SecondaryDetector::new(Box::new(BrightnessClassifier), 1).unwrap();
        det.submit(&frame(1, 200));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let result = loop {
            if let Some(r) = det.poll() {
                break r;
            }
            assert!(std::time::Instant::now() < deadline, "worker never answered");
            std::thread::sleep(std::time::Duration::from_millis(5));
        };
        assert_eq!(result, (1, SecondaryVerdict::Confirm));
    }

    #[test]
    fn test_throttle() {
        let mut det = SecondaryDetector::new(Box::new(BrightnessClassifier), 10).unwrap();
        det.submit(&frame(1, 10));
        // Too soon: dropped without queueing.
        det.submit(&frame(2, 10));
        assert_eq!(det.last_submitted, Some(1));
        det.submit(&frame(11, 10));
        assert_eq!(det.last_submitted, Some(11));
    }
}
