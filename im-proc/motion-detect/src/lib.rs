//! Frame differencing against a running reference image, with noise
//! auto-tuning, morphological despeckle, connected-component labeling, a
//! whole-frame lightswitch heuristic and an adaptive per-pixel smart mask.
//!
//! The detector is deliberately synchronous and allocation-free on the
//! per-frame path; the optional heavyweight secondary classifier runs on
//! its own thread (see [`secondary`]).

use serde::{Deserialize, Serialize};
use tracing::debug;
use yuv_frame::Frame;

mod despeckle;
mod labeling;
pub mod secondary;

use despeckle::Step;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("mask length {0} does not match detector plane {1}")]
    MaskSizeMismatch(usize, usize),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Smart-mask tuning: per-frame bump for a changed pixel, the level above
/// which diffs are suppressed, and the level at which a pixel is forced
/// back into the background.
const SMART_BUMP: u16 = 5;
const SMART_SUPPRESS: u16 = 100;
const SMART_FORCE: u16 = 220;

/// Detection parameters, a read-only snapshot taken from the camera
/// configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum largest-blob pixel count for motion.
    pub threshold: u32,
    /// Upper bound on the largest blob; 0 disables.
    pub threshold_maximum: u32,
    /// Per-pixel difference floor.
    pub noise_level: u8,
    /// Recompute `noise_level` from quiescent frames.
    pub noise_tune: bool,
    /// Despeckle pipeline letter codes, e.g. "EedDl". Empty disables.
    pub despeckle_filter: String,
    /// Whole-frame change percentage that asserts the lightswitch; 0
    /// disables.
    pub lightswitch_percent: u8,
    /// Frames suppressed after a lightswitch (also the startup
    /// stabilization window).
    pub lightswitch_frames: u16,
    /// 0 disables the smart mask; 1..=10 scales its decay rate.
    pub smart_mask_speed: u8,
    /// 3x3 grid cells (1..=9) that raise the area-detected flag.
    pub area_detect: Vec<u8>,
    /// Largest-blob x standard deviation veto; 0 disables.
    pub threshold_sdevx: u32,
    /// Largest-blob y standard deviation veto; 0 disables.
    pub threshold_sdevy: u32,
    /// Largest-blob radial standard deviation veto; 0 disables.
    pub threshold_sdevxy: u32,
    /// Elongation veto: max(w,h)*100/min(w,h) above this rejects; 0
    /// disables.
    pub threshold_ratio: u32,
    /// Veto when the blob w/h ratio (x100) moves more than this between
    /// consecutive positive frames; 0 disables.
    pub threshold_ratio_change: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 1500,
            threshold_maximum: 0,
            noise_level: 32,
            noise_tune: true,
            despeckle_filter: String::new(),
            lightswitch_percent: 0,
            lightswitch_frames: 5,
            smart_mask_speed: 0,
            area_detect: Vec::new(),
            threshold_sdevx: 0,
            threshold_sdevy: 0,
            threshold_sdevxy: 0,
            threshold_ratio: 0,
            threshold_ratio_change: 0,
        }
    }
}

/// Bounding box of the largest blob. `x`/`y` are the box center, which is
/// what templates and the tracking hooks consume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Per-frame detector output. Never stored beyond the frame being handled.
#[derive(Clone, Debug, Default)]
pub struct Verdict {
    pub changed_pixels: u32,
    pub noise: u8,
    pub labels: u16,
    pub largest_label_pixels: u32,
    pub bbox: Rect,
    pub lightswitch: bool,
    /// Candidate changes suppressed by the fixed mask.
    pub in_mask: u32,
    pub area_detected: bool,
    pub motion: bool,
    /// Frame shape disagreed with the reference; the camera loop should
    /// rebuild the detector.
    pub error: bool,
}

pub struct MotionDetector {
    width: usize,
    height: usize,
    cfg: DetectorConfig,
    steps: Vec<Step>,
    reference: Vec<u8>,
    seeded: bool,
    frames_seen: u64,
    /// Remaining frames of lightswitch suppression; reference re-seeds when
    /// this hits zero.
    lightswitch_remaining: u16,
    fixed_mask: Option<Vec<u8>>,
    smart_buffer: Vec<u16>,
    smart_final: Vec<u8>,
    change: Vec<u8>,
    scratch: Vec<u8>,
    last_ratio: Option<u32>,
}

impl MotionDetector {
    pub fn new(width: u32, height: u32, cfg: DetectorConfig) -> Self {
        let n = width as usize * height as usize;
        let steps = despeckle::parse_filter(&cfg.despeckle_filter);
        Self {
            width: width as usize,
            height: height as usize,
            cfg,
            steps,
            reference: vec![0; n],
            seeded: false,
            frames_seen: 0,
            lightswitch_remaining: 0,
            fixed_mask: None,
            smart_buffer: vec![0; n],
            smart_final: vec![255; n],
            change: vec![0; n],
            scratch: vec![0; n],
            last_ratio: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    /// Apply a changed parameter set without losing the reference or the
    /// smart mask. Callers should only invoke this when the configuration
    /// actually changed, since it also resets the auto-tuned noise level.
    pub fn set_config(&mut self, cfg: DetectorConfig) {
        self.steps = despeckle::parse_filter(&cfg.despeckle_filter);
        self.cfg = cfg;
    }

    /// Install (or clear) the user-supplied binary mask. Zero excludes a
    /// pixel from diff counting.
    pub fn set_fixed_mask(&mut self, mask: Option<Vec<u8>>) -> Result<()> {
        if let Some(ref m) = mask {
            if m.len() != self.reference.len() {
                return Err(Error::MaskSizeMismatch(m.len(), self.reference.len()));
            }
        }
        self.fixed_mask = mask;
        Ok(())
    }

    /// Forget the reference; the next frame re-seeds it and is reported
    /// quiescent. Used after reconnecting a lost camera and on
    /// configuration reload.
    pub fn reset(&mut self) {
        self.seeded = false;
        self.frames_seen = 0;
        self.lightswitch_remaining = 0;
        self.smart_buffer.iter_mut().for_each(|b| *b = 0);
        self.smart_final.iter_mut().for_each(|b| *b = 255);
        self.last_ratio = None;
    }

    /// The binary change plane of the most recent [`detect`](Self::detect)
    /// call, for the annotated motion image.
    pub fn change_plane(&self) -> &[u8] {
        &self.change
    }

    pub fn reference(&self) -> &[u8] {
        &self.reference
    }

    /// Build the annotated motion image: the change plane as luma over
    /// neutral chroma.
    pub fn motion_image(&self, stamp: yuv_frame::FrameStamp) -> Frame {
        let mut frame = Frame::black(self.width as u32, self.height as u32, stamp)
            .expect("detector dimensions were validated at startup");
        frame.y_plane_mut().copy_from_slice(&self.change);
        frame
    }

    /// Score one frame against the reference.
    pub fn detect(&mut self, frame: &Frame) -> Verdict {
        let mut verdict = Verdict {
            noise: self.cfg.noise_level,
            ..Default::default()
        };

        if frame.width() as usize != self.width || frame.height() as usize != self.height {
            verdict.error = true;
            return verdict;
        }

        let cur = frame.y_plane();
        self.frames_seen += 1;

        if !self.seeded {
            self.reference.copy_from_slice(cur);
            self.seeded = true;
            self.change.iter_mut().for_each(|c| *c = 0);
            return verdict;
        }

        // Lightswitch recovery: stay quiet, then re-seed.
        if self.lightswitch_remaining > 0 {
            self.lightswitch_remaining -= 1;
            verdict.lightswitch = true;
            self.change.iter_mut().for_each(|c| *c = 0);
            if self.lightswitch_remaining == 0 {
                self.reference.copy_from_slice(cur);
            }
            return verdict;
        }

        // Per-pixel diff into the binary change plane.
        let noise = self.cfg.noise_level;
        let smart_enabled = self.cfg.smart_mask_speed > 0;
        let mut changed: u32 = 0;
        let mut masked_out: u32 = 0;
        let mut quiet_dev_sum: u64 = 0;
        let mut quiet_count: u64 = 0;
        for i in 0..cur.len() {
            let d = cur[i].abs_diff(self.reference[i]);
            if d <= noise {
                quiet_dev_sum += d as u64;
                quiet_count += 1;
                self.change[i] = 0;
                continue;
            }
            if let Some(mask) = &self.fixed_mask {
                if mask[i] == 0 {
                    masked_out += 1;
                    self.change[i] = 0;
                    continue;
                }
            }
            if smart_enabled {
                self.smart_buffer[i] = (self.smart_buffer[i] + SMART_BUMP).min(u16::MAX / 2);
                if self.smart_final[i] == 0 {
                    self.change[i] = 0;
                    continue;
                }
            }
            self.change[i] = 255;
            changed += 1;
        }
        verdict.in_mask = masked_out;

        // Startup stabilization: learn the scene, report nothing.
        let startup = self.frames_seen <= self.cfg.lightswitch_frames as u64 + 1;
        if startup {
            self.blend_reference_all(cur);
            self.change.iter_mut().for_each(|c| *c = 0);
            return verdict;
        }

        // Whole-frame brightness jump.
        let total = (self.width * self.height) as u32;
        if self.cfg.lightswitch_percent > 0 {
            let pct = changed as u64 * 100 / total as u64;
            if pct >= self.cfg.lightswitch_percent as u64 {
                debug!(pct, "lightswitch detected, suppressing output");
                self.lightswitch_remaining = self.cfg.lightswitch_frames.max(1);
                verdict.lightswitch = true;
                self.change.iter_mut().for_each(|c| *c = 0);
                return verdict;
            }
        }

        // Despeckle pipeline, then final labeling.
        for step in &self.steps {
            match step {
                Step::Erode9 => {
                    despeckle::erode9(&mut self.change, &mut self.scratch, self.width, self.height)
                }
                Step::Erode5 => {
                    despeckle::erode5(&mut self.change, &mut self.scratch, self.width, self.height)
                }
                Step::Dilate9 => {
                    despeckle::dilate9(&mut self.change, &mut self.scratch, self.width, self.height)
                }
                Step::Dilate5 => {
                    despeckle::dilate5(&mut self.change, &mut self.scratch, self.width, self.height)
                }
                Step::Label => {
                    let labeled =
                        labeling::label_components(&self.change, self.width, self.height);
                    if labeled.largest != 0 {
                        for (c, lab) in self.change.iter_mut().zip(labeled.labels.iter()) {
                            if *lab != labeled.largest {
                                *c = 0;
                            }
                        }
                    }
                }
            }
        }
        changed = self.change.iter().filter(|&&c| c != 0).count() as u32;
        verdict.changed_pixels = changed;

        let labeled = labeling::label_components(&self.change, self.width, self.height);
        verdict.labels = labeled.total;
        verdict.largest_label_pixels = labeled.largest_pixels;

        if labeled.largest != 0 {
            let stats = self.blob_stats(&labeled);
            verdict.bbox = stats.bbox;
            verdict.area_detected = self.area_hit(&stats);

            verdict.motion = labeled.largest_pixels > self.cfg.threshold
                && (self.cfg.threshold_maximum == 0
                    || labeled.largest_pixels < self.cfg.threshold_maximum)
                && self.shape_accepts(&stats, labeled.largest_pixels);
        }

        // Noise auto-tune happens on quiet frames only.
        if self.cfg.noise_tune && !verdict.motion && quiet_count > 0 {
            let avg = (quiet_dev_sum / quiet_count) as u32 + 2;
            self.cfg.noise_level = avg.min(255) as u8;
            verdict.noise = self.cfg.noise_level;
        }

        self.update_reference(cur, &labeled);
        if smart_enabled {
            self.decay_smart_mask();
        }

        verdict
    }

    /// Blend the whole frame into the reference (no motion anywhere).
    fn blend_reference_all(&mut self, cur: &[u8]) {
        for (r, c) in self.reference.iter_mut().zip(cur.iter()) {
            *r = (((*r as u32) * 15 + *c as u32) / 16) as u8;
        }
    }

    /// Pixels outside the largest blob blend into the reference; pixels
    /// inside it age their smart-mask entry and, after long enough, are
    /// forced back into the background.
    fn update_reference(&mut self, cur: &[u8], labeled: &labeling::LabelResult) {
        if labeled.largest == 0 {
            self.blend_reference_all(cur);
            return;
        }
        for i in 0..cur.len() {
            if labeled.labels[i] != labeled.largest {
                self.reference[i] =
                    (((self.reference[i] as u32) * 15 + cur[i] as u32) / 16) as u8;
            } else if self.cfg.smart_mask_speed > 0 && self.smart_buffer[i] >= SMART_FORCE {
                self.reference[i] = cur[i];
                self.smart_buffer[i] = 0;
            }
        }
    }

    fn decay_smart_mask(&mut self) {
        // Higher speeds decay more often, reclassifying stuck pixels
        // sooner.
        let interval = (11 - self.cfg.smart_mask_speed.min(10)) as u64 * 10;
        if self.frames_seen % interval.max(1) != 0 {
            return;
        }
        for (buf, fin) in self.smart_buffer.iter_mut().zip(self.smart_final.iter_mut()) {
            *buf /= 2;
            *fin = if *buf > SMART_SUPPRESS { 0 } else { 255 };
        }
    }

    fn blob_stats(&self, labeled: &labeling::LabelResult) -> BlobStats {
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let (mut sum_x, mut sum_y) = (0u64, 0u64);
        let mut n = 0u64;
        for y in 0..self.height {
            for x in 0..self.width {
                if labeled.labels[y * self.width + x] == labeled.largest {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                    sum_x += x as u64;
                    sum_y += y as u64;
                    n += 1;
                }
            }
        }
        let (cx, cy) = (sum_x / n, sum_y / n);
        // Second pass for spread, now that the centroid is known.
        let (mut var_x, mut var_y) = (0u64, 0u64);
        for y in 0..self.height {
            for x in 0..self.width {
                if labeled.labels[y * self.width + x] == labeled.largest {
                    let dx = x as i64 - cx as i64;
                    let dy = y as i64 - cy as i64;
                    var_x += (dx * dx) as u64;
                    var_y += (dy * dy) as u64;
                }
            }
        }
        BlobStats {
            bbox: Rect {
                x: cx as u32,
                y: cy as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            },
            sdev_x: ((var_x / n) as f64).sqrt() as u32,
            sdev_y: ((var_y / n) as f64).sqrt() as u32,
            sdev_xy: (((var_x + var_y) / n) as f64).sqrt() as u32,
        }
    }

    fn shape_accepts(&mut self, stats: &BlobStats, _pixels: u32) -> bool {
        let cfg = &self.cfg;
        if cfg.threshold_sdevx > 0 && stats.sdev_x > cfg.threshold_sdevx {
            return false;
        }
        if cfg.threshold_sdevy > 0 && stats.sdev_y > cfg.threshold_sdevy {
            return false;
        }
        if cfg.threshold_sdevxy > 0 && stats.sdev_xy > cfg.threshold_sdevxy {
            return false;
        }
        let (w, h) = (stats.bbox.width.max(1), stats.bbox.height.max(1));
        if cfg.threshold_ratio > 0 {
            let elongation = w.max(h) * 100 / w.min(h);
            if elongation > cfg.threshold_ratio {
                return false;
            }
        }
        let ratio = w * 100 / h;
        if cfg.threshold_ratio_change > 0 {
            if let Some(prev) = self.last_ratio {
                if ratio.abs_diff(prev) > cfg.threshold_ratio_change {
                    self.last_ratio = Some(ratio);
                    return false;
                }
            }
        }
        self.last_ratio = Some(ratio);
        true
    }

    fn area_hit(&self, stats: &BlobStats) -> bool {
        if self.cfg.area_detect.is_empty() {
            return false;
        }
        // Cells number 1..=9, row major over a 3x3 partition; the blob
        // center decides which cell is hit.
        let col = (stats.bbox.x as usize * 3 / self.width).min(2);
        let row = (stats.bbox.y as usize * 3 / self.height).min(2);
        let cell = (row * 3 + col + 1) as u8;
        self.cfg.area_detect.contains(&cell)
    }
}

struct BlobStats {
    bbox: Rect,
    sdev_x: u32,
    sdev_y: u32,
    sdev_xy: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use yuv_frame::FrameStamp;

    const W: u32 = 64;
    const H: u32 = 64;

    fn flat_frame(seq: u64, luma: u8) -> Frame {
        let mut f = Frame::black(W, H, FrameStamp::now(seq)).unwrap();
        f.y_plane_mut().iter_mut().for_each(|p| *p = luma);
        f
    }

    fn frame_with_block(seq: u64, bg: u8, block: u8, x0: usize, y0: usize, side: usize) -> Frame {
        let mut f = flat_frame(seq, bg);
        let w = W as usize;
        let y_plane = f.y_plane_mut();
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                y_plane[y * w + x] = block;
            }
        }
        f
    }

    fn settle(det: &mut MotionDetector, bg: u8) {
        // Seed frame plus the startup stabilization window.
        for seq in 0..12 {
            let v = det.detect(&flat_frame(seq, bg));
            assert!(!v.motion);
        }
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            threshold: 50,
            noise_tune: false,
            noise_level: 16,
            lightswitch_frames: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_quiescent_scene_never_fires() {
        let mut det = MotionDetector::new(W, H, test_config());
        for seq in 0..50 {
            let v = det.detect(&flat_frame(seq, 100));
            assert!(!v.motion);
            assert_eq!(v.changed_pixels, 0);
        }
    }

    #[test]
    fn test_block_fires_with_bbox() {
        let mut det = MotionDetector::new(W, H, test_config());
        settle(&mut det, 100);
        let v = det.detect(&frame_with_block(100, 100, 220, 16, 16, 16));
        assert!(v.motion);
        assert_eq!(v.largest_label_pixels, 256);
        assert_eq!(v.labels, 1);
        assert_eq!(v.bbox.width, 16);
        assert_eq!(v.bbox.height, 16);
        // Center of a block spanning 16..31 inclusive.
        assert!((23..=24).contains(&v.bbox.x));
        assert!((23..=24).contains(&v.bbox.y));
    }

    #[test]
    fn test_threshold_maximum_vetoes() {
        let mut cfg = test_config();
        cfg.threshold_maximum = 200;
        let mut det = MotionDetector::new(W, H, cfg);
        settle(&mut det, 100);
        let v = det.detect(&frame_with_block(100, 100, 220, 16, 16, 16));
        assert!(!v.motion);
        assert_eq!(v.largest_label_pixels, 256);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let mut det = MotionDetector::new(W, H, test_config());
        let wrong = Frame::black(32, 32, FrameStamp::now(0)).unwrap();
        let v = det.detect(&wrong);
        assert!(v.error);
    }

    #[test]
    fn test_lightswitch_suppresses_and_reseeds() {
        let mut cfg = test_config();
        cfg.lightswitch_percent = 50;
        cfg.lightswitch_frames = 5;
        let mut det = MotionDetector::new(W, H, cfg);
        settle(&mut det, 40);
        // Lights on: everything brightens at once.
        let v = det.detect(&flat_frame(100, 200));
        assert!(v.lightswitch);
        assert!(!v.motion);
        assert_eq!(v.changed_pixels, 0);
        for seq in 101..106 {
            let v = det.detect(&flat_frame(seq, 200));
            assert!(v.lightswitch, "frame {seq} should still be suppressed");
            assert_eq!(v.changed_pixels, 0);
        }
        // Recovered: the bright scene is the new reference.
        let v = det.detect(&flat_frame(106, 200));
        assert!(!v.lightswitch);
        assert!(!v.motion);
        assert_eq!(v.changed_pixels, 0);
    }

    #[test]
    fn test_full_mask_blocks_everything() {
        let mut det = MotionDetector::new(W, H, test_config());
        det.set_fixed_mask(Some(vec![0u8; (W * H) as usize])).unwrap();
        settle(&mut det, 100);
        let v = det.detect(&frame_with_block(100, 100, 220, 16, 16, 16));
        assert!(!v.motion);
        assert_eq!(v.changed_pixels, 0);
        assert_eq!(v.in_mask, 256);
    }

    #[test]
    fn test_mask_size_validated() {
        let mut det = MotionDetector::new(W, H, test_config());
        assert!(det.set_fixed_mask(Some(vec![0u8; 7])).is_err());
    }

    #[test]
    fn test_despeckle_removes_single_pixels() {
        let mut cfg = test_config();
        cfg.despeckle_filter = "E".to_string();
        cfg.threshold = 1;
        let mut det = MotionDetector::new(W, H, cfg);
        settle(&mut det, 100);
        // Isolated speckles vanish under a 3x3 erode.
        let mut f = flat_frame(100, 100);
        let w = W as usize;
        let y_plane = f.y_plane_mut();
        for i in [5 * w + 5, 20 * w + 40, 50 * w + 9] {
            y_plane[i] = 255;
        }
        let v = det.detect(&f);
        assert_eq!(v.changed_pixels, 0);
        assert!(!v.motion);
    }

    #[test]
    fn test_label_step_keeps_largest_only() {
        let mut cfg = test_config();
        cfg.despeckle_filter = "l".to_string();
        cfg.threshold = 10;
        let mut det = MotionDetector::new(W, H, cfg);
        settle(&mut det, 100);
        // A big block and a small distant blob; labeling keeps the block.
        let mut f = frame_with_block(100, 100, 220, 8, 8, 12);
        let w = W as usize;
        let y_plane = f.y_plane_mut();
        for y in 50..53 {
            for x in 50..53 {
                y_plane[y * w + x] = 220;
            }
        }
        let v = det.detect(&f);
        assert_eq!(v.labels, 1);
        assert_eq!(v.changed_pixels, 144);
        assert!(v.motion);
    }

    #[test]
    fn test_area_detect_center_cell() {
        let mut cfg = test_config();
        cfg.area_detect = vec![5]; // center cell
        let mut det = MotionDetector::new(W, H, cfg);
        settle(&mut det, 100);
        let v = det.detect(&frame_with_block(100, 100, 220, 24, 24, 16));
        assert!(v.motion);
        assert!(v.area_detected);

        // Top-left block does not hit cell 5.
        let mut det = MotionDetector::new(W, H, {
            let mut cfg = test_config();
            cfg.area_detect = vec![5];
            cfg
        });
        settle(&mut det, 100);
        let v = det.detect(&frame_with_block(100, 100, 220, 0, 0, 12));
        assert!(!v.area_detected);
    }

    #[test]
    fn test_reset_reseeds_quietly() {
        let mut det = MotionDetector::new(W, H, test_config());
        settle(&mut det, 100);
        det.reset();
        // A completely different scene right after reset: no motion.
        let v = det.detect(&flat_frame(200, 240));
        assert!(!v.motion);
        assert_eq!(v.changed_pixels, 0);
    }

    #[test]
    fn test_verdict_deterministic() {
        let make = || {
            let mut det = MotionDetector::new(W, H, test_config());
            settle(&mut det, 100);
            det
        };
        let frame = frame_with_block(100, 100, 220, 16, 16, 16);
        let mut a = make();
        let mut b = make();
        let (va, vb) = (a.detect(&frame), b.detect(&frame));
        assert_eq!(va.changed_pixels, vb.changed_pixels);
        assert_eq!(va.largest_label_pixels, vb.largest_label_pixels);
        assert_eq!(va.bbox, vb.bbox);
        assert_eq!(va.motion, vb.motion);
    }

    #[test]
    fn test_elongation_veto() {
        let mut cfg = test_config();
        cfg.threshold = 20;
        cfg.threshold_ratio = 300; // reject blobs more than 3:1
        let mut det = MotionDetector::new(W, H, cfg);
        settle(&mut det, 100);
        // A 2x40 sliver: elongation 2000.
        let mut f = flat_frame(100, 100);
        let w = W as usize;
        let y_plane = f.y_plane_mut();
        for y in 10..12 {
            for x in 10..50 {
                y_plane[y * w + x] = 220;
            }
        }
        let v = det.detect(&f);
        assert!(!v.motion);
        assert!(v.largest_label_pixels > 20);
    }
}
