//! The per-camera event state machine.
//!
//! Consumes one detector verdict per frame and produces the event calls
//! that make up an "event": pre-capture replay, `FirstMotion`, the
//! per-frame image set, the quiet-gap countdown and `EndMotion`.

use yuv_frame::{Frame, ImageRing};

use crate::event::EventKind;

/// Which image an emission refers to; the camera loop resolves this
/// against the frame in flight.
#[derive(Debug)]
pub enum EventImage {
    None,
    /// The frame passed to [`EventStateMachine::on_frame`].
    Current,
    /// The detector's annotated change-plane image.
    MotionOverlay,
    /// A frame replayed from the pre-capture ring.
    Stored(Frame),
}

#[derive(Debug)]
pub struct Emission {
    pub kind: EventKind,
    pub image: EventImage,
}

impl Emission {
    fn bare(kind: EventKind) -> Self {
        Self {
            kind,
            image: EventImage::None,
        }
    }

    fn current(kind: EventKind) -> Self {
        Self {
            kind,
            image: EventImage::Current,
        }
    }
}

/// Hysteresis parameters, snapshotted from the camera configuration.
#[derive(Clone, Copy, Debug)]
pub struct StateConfig {
    pub minimum_motion_frames: u32,
    /// Quiet frames after the last motion frame before the event ends.
    /// Zero makes every motion frame its own event.
    pub event_gap: u32,
    pub post_capture: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Idle,
    Arming(u32),
    Active,
    Gap {
        gap_remaining: u32,
        post_remaining: u32,
    },
}

pub struct EventStateMachine {
    mode: Mode,
    event_id: u64,
    ring: ImageRing,
    area_fired: bool,
}

impl EventStateMachine {
    pub fn new(pre_capture: usize) -> Self {
        Self {
            mode: Mode::Idle,
            event_id: 0,
            ring: ImageRing::new(pre_capture),
            area_fired: false,
        }
    }

    /// Event number for `%v`; valid from `FirstMotion` through `EndMotion`.
    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    pub fn in_event(&self) -> bool {
        matches!(self.mode, Mode::Active | Mode::Gap { .. })
    }

    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            Mode::Idle => "idle",
            Mode::Arming(_) => "arming",
            Mode::Active => "active",
            Mode::Gap { .. } => "gap",
        }
    }

    /// Feed one frame's verdict. `manual` forces an event open regardless
    /// of the verdict (user trigger or emulate_motion).
    pub fn on_frame(
        &mut self,
        cfg: &StateConfig,
        motion: bool,
        area: bool,
        manual: bool,
        frame: &Frame,
    ) -> Vec<Emission> {
        let mut out = Vec::new();
        let motion = motion || manual;

        match self.mode {
            Mode::Idle => {
                if motion && (manual || cfg.minimum_motion_frames == 0) {
                    self.start_event(cfg, area, &mut out);
                } else if motion {
                    self.ring.push(frame.clone());
                    self.mode = Mode::Arming(1);
                } else {
                    self.ring.push(frame.clone());
                }
            }
            Mode::Arming(n) => {
                if !motion {
                    // Arming failed; back to quiescent buffering.
                    self.ring.push(frame.clone());
                    self.mode = Mode::Idle;
                } else if n >= cfg.minimum_motion_frames || manual {
                    self.start_event(cfg, area, &mut out);
                } else {
                    self.ring.push(frame.clone());
                    self.mode = Mode::Arming(n + 1);
                }
            }
            Mode::Active => {
                if motion {
                    self.emit_motion_frame_set(area, &mut out);
                    if cfg.event_gap == 0 {
                        out.push(Emission::bare(EventKind::EndMotion));
                        self.mode = Mode::Idle;
                    }
                } else {
                    self.mode = Mode::Gap {
                        gap_remaining: cfg.event_gap,
                        post_remaining: cfg.post_capture,
                    };
                    self.gap_frame(&mut out);
                }
            }
            Mode::Gap { .. } => {
                if motion {
                    // Same event resumes; no new FirstMotion.
                    self.mode = Mode::Active;
                    self.emit_motion_frame_set(area, &mut out);
                } else {
                    self.gap_frame(&mut out);
                }
            }
        }
        out
    }

    /// Close out an open event, e.g. on shutdown or configuration reload.
    pub fn finalize(&mut self) -> Vec<Emission> {
        let mut out = Vec::new();
        if self.in_event() {
            out.push(Emission::bare(EventKind::EndMotion));
        }
        self.mode = Mode::Idle;
        self.ring.clear();
        out
    }

    fn start_event(&mut self, cfg: &StateConfig, area: bool, out: &mut Vec<Emission>) {
        self.event_id += 1;
        self.area_fired = false;
        self.mode = Mode::Active;
        out.push(Emission::bare(EventKind::FirstMotion));
        // Replay buffered history, oldest first, then the current frame
        // through the normal path.
        for stored in self.ring.drain_oldest_first() {
            out.push(Emission {
                kind: EventKind::ImageDetected,
                image: EventImage::Stored(stored),
            });
        }
        self.emit_motion_frame_set(area, out);
        if cfg.event_gap == 0 {
            out.push(Emission::bare(EventKind::EndMotion));
            self.mode = Mode::Idle;
        }
    }

    fn emit_motion_frame_set(&mut self, area: bool, out: &mut Vec<Emission>) {
        out.push(Emission::current(EventKind::MotionDetected));
        if area && !self.area_fired {
            self.area_fired = true;
            out.push(Emission::current(EventKind::AreaDetected));
        }
        out.push(Emission::current(EventKind::ImageDetected));
        out.push(Emission {
            kind: EventKind::ImagemDetected,
            image: EventImage::MotionOverlay,
        });
        out.push(Emission::current(EventKind::ImageFrame));
        out.push(Emission {
            kind: EventKind::ImagemFrame,
            image: EventImage::MotionOverlay,
        });
    }

    fn gap_frame(&mut self, out: &mut Vec<Emission>) {
        let Mode::Gap {
            gap_remaining,
            post_remaining,
        } = &mut self.mode
        else {
            unreachable!("gap_frame outside gap mode");
        };
        if *post_remaining > 0 {
            *post_remaining -= 1;
            out.push(Emission::current(EventKind::ImageDetected));
        } else {
            // The movie keeps recording through the quiet gap.
            out.push(Emission::current(EventKind::FfmpegPut));
        }
        if *gap_remaining > 0 {
            *gap_remaining -= 1;
        }
        if *gap_remaining == 0 {
            out.push(Emission::bare(EventKind::EndMotion));
            self.mode = Mode::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yuv_frame::FrameStamp;

    fn frame(seq: u64) -> Frame {
        Frame::black(16, 16, FrameStamp::now(seq)).unwrap()
    }

    fn cfg(min: u32, gap: u32, post: u32) -> StateConfig {
        StateConfig {
            minimum_motion_frames: min,
            event_gap: gap,
            post_capture: post,
        }
    }

    fn kinds(emissions: &[Emission]) -> Vec<EventKind> {
        emissions.iter().map(|e| e.kind).collect()
    }

    /// Drive the machine over a motion pattern; returns all emissions with
    /// the frame index they fired on.
    fn run(
        machine: &mut EventStateMachine,
        cfg: &StateConfig,
        pattern: &[bool],
    ) -> Vec<(usize, EventKind)> {
        let mut out = Vec::new();
        for (idx, motion) in pattern.iter().enumerate() {
            for e in machine.on_frame(cfg, *motion, false, false, &frame(idx as u64)) {
                out.push((idx, e.kind));
            }
        }
        out
    }

    #[test]
    fn test_happy_path_scenario() {
        // 100 frames, motion on 40..=60, min=2, gap=5, pre_capture=3.
        let mut pattern = vec![false; 100];
        for m in pattern.iter_mut().take(61).skip(40) {
            *m = true;
        }
        let mut machine = EventStateMachine::new(3);
        let events = run(&mut machine, &cfg(2, 5, 0), &pattern);

        let firsts: Vec<usize> = events
            .iter()
            .filter(|(_, k)| *k == EventKind::FirstMotion)
            .map(|(i, _)| *i)
            .collect();
        assert_eq!(firsts, vec![42], "arming takes two frames, event opens on 42");

        let ends: Vec<usize> = events
            .iter()
            .filter(|(_, k)| *k == EventKind::EndMotion)
            .map(|(i, _)| *i)
            .collect();
        assert_eq!(ends, vec![65], "gap of five quiet frames after 60");

        // Pre-capture drain happens at frame 42: three stored frames plus
        // the current one.
        let images_at_42 = events
            .iter()
            .filter(|(i, k)| *i == 42 && *k == EventKind::ImageDetected)
            .count();
        assert_eq!(images_at_42, 4);

        // Exactly one event.
        assert_eq!(machine.event_id(), 1);
    }

    #[test]
    fn test_pre_capture_drain_order() {
        let mut machine = EventStateMachine::new(3);
        let c = cfg(0, 5, 0);
        for seq in 0..5 {
            assert!(machine.on_frame(&c, false, false, false, &frame(seq)).is_empty());
        }
        let emissions = machine.on_frame(&c, true, false, false, &frame(5));
        assert_eq!(emissions[0].kind, EventKind::FirstMotion);
        let stored: Vec<u64> = emissions
            .iter()
            .filter_map(|e| match &e.image {
                EventImage::Stored(f) => Some(f.stamp.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(stored, vec![2, 3, 4], "oldest first, capped at pre_capture");
    }

    #[test]
    fn test_minimum_zero_fires_immediately() {
        let mut machine = EventStateMachine::new(0);
        let emissions = machine.on_frame(&cfg(0, 5, 0), true, false, false, &frame(0));
        assert_eq!(emissions[0].kind, EventKind::FirstMotion);
    }

    #[test]
    fn test_arming_dropout_resets() {
        let mut machine = EventStateMachine::new(2);
        let c = cfg(3, 5, 0);
        let events = run(&mut machine, &c, &[true, true, false, true, true, true, true]);
        // First burst never armed; second burst arms over frames 3..5 and
        // fires on 6.
        let firsts: Vec<usize> = events
            .iter()
            .filter(|(_, k)| *k == EventKind::FirstMotion)
            .map(|(i, _)| *i)
            .collect();
        assert_eq!(firsts, vec![6]);
    }

    #[test]
    fn test_gap_reentry_keeps_event_id() {
        let mut machine = EventStateMachine::new(0);
        let c = cfg(0, 10, 0);
        // motion, brief quiet, motion again: one event.
        let events = run(
            &mut machine,
            &c,
            &[true, false, false, true, true, false, false],
        );
        let firsts = events
            .iter()
            .filter(|(_, k)| *k == EventKind::FirstMotion)
            .count();
        assert_eq!(firsts, 1);
        assert_eq!(machine.event_id(), 1);
        assert!(machine.in_event());
    }

    #[test]
    fn test_event_gap_zero_single_frame_events() {
        let mut machine = EventStateMachine::new(0);
        let c = cfg(0, 0, 0);
        let events = run(&mut machine, &c, &[true, true, true]);
        let firsts = events
            .iter()
            .filter(|(_, k)| *k == EventKind::FirstMotion)
            .count();
        let ends = events
            .iter()
            .filter(|(_, k)| *k == EventKind::EndMotion)
            .count();
        assert_eq!(firsts, 3);
        assert_eq!(ends, 3);
        assert_eq!(machine.event_id(), 3);
    }

    #[test]
    fn test_gap_frames_keep_movie_running() {
        let mut machine = EventStateMachine::new(0);
        let c = cfg(0, 3, 0);
        let events = run(&mut machine, &c, &[true, false, false, false]);
        let puts: Vec<usize> = events
            .iter()
            .filter(|(_, k)| *k == EventKind::FfmpegPut)
            .map(|(i, _)| *i)
            .collect();
        assert_eq!(puts, vec![1, 2, 3]);
        let ends: Vec<usize> = events
            .iter()
            .filter(|(_, k)| *k == EventKind::EndMotion)
            .map(|(i, _)| *i)
            .collect();
        assert_eq!(ends, vec![3]);
    }

    #[test]
    fn test_post_capture_records_extra_frames() {
        let mut machine = EventStateMachine::new(0);
        let c = cfg(0, 5, 2);
        let events = run(&mut machine, &c, &[true, false, false, false, false, false]);
        let image_frames: Vec<usize> = events
            .iter()
            .filter(|(_, k)| *k == EventKind::ImageDetected)
            .map(|(i, _)| *i)
            .collect();
        // Frame 0 is the motion frame; 1 and 2 are post-capture.
        assert_eq!(image_frames, vec![0, 1, 2]);
    }

    #[test]
    fn test_area_fires_once_per_event() {
        let mut machine = EventStateMachine::new(0);
        let c = cfg(0, 5, 0);
        let mut areas = 0;
        for seq in 0..5 {
            let emissions = machine.on_frame(&c, true, true, false, &frame(seq));
            areas += emissions
                .iter()
                .filter(|e| e.kind == EventKind::AreaDetected)
                .count();
        }
        assert_eq!(areas, 1);
    }

    #[test]
    fn test_manual_trigger_skips_arming() {
        let mut machine = EventStateMachine::new(0);
        let c = cfg(10, 5, 0);
        let emissions = machine.on_frame(&c, false, false, true, &frame(0));
        assert_eq!(emissions[0].kind, EventKind::FirstMotion);
    }

    #[test]
    fn test_finalize_ends_open_event() {
        let mut machine = EventStateMachine::new(0);
        let c = cfg(0, 5, 0);
        machine.on_frame(&c, true, false, false, &frame(0));
        assert!(machine.in_event());
        let emissions = machine.finalize();
        assert_eq!(kinds(&emissions), vec![EventKind::EndMotion]);
        assert!(!machine.in_event());

        // Nothing to do when idle.
        assert!(machine.finalize().is_empty());
    }
}
