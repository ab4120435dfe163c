//! The per-camera pipeline thread: acquire, transform, detect, classify,
//! dispatch. Also owns the reconnect policy, the orthogonal timers
//! (snapshot, timelapse, stream tick) and teardown on shutdown or
//! configuration recycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use cam_source::{FrameSource, SourceError};
use motion_detect::{DetectorConfig, MotionDetector, Verdict};
use movie_writer::EncoderFactory;
use path_template::TemplateContext;
use vigil_config::Config;
use yuv_frame::Frame;

use crate::event::{EventCall, EventKind};
use crate::handlers::{CameraHandlers, DispatchCtx};
use crate::state::{EventImage, EventStateMachine, StateConfig};

/// Delay between attempts to bring a dead source back.
const SOURCE_RETRY: Duration = Duration::from_secs(5);

/// Control bits shared between the pipeline thread, the signal handlers
/// and the web surface.
#[derive(Default)]
pub struct CameraFlags {
    pub finish: AtomicBool,
    pub pause: AtomicBool,
    pub recycle: AtomicBool,
    pub snapshot_request: AtomicBool,
    pub event_trigger: AtomicBool,
    pub timelapse_end_request: AtomicBool,
}

pub struct CameraHandle {
    pub camera_id: u32,
    pub cfg: Arc<RwLock<Config>>,
    pub flags: Arc<CameraFlags>,
    /// Stamped by the pipeline each iteration; the app watchdog reads it.
    pub last_progress: Arc<Mutex<Instant>>,
    pub join: std::thread::JoinHandle<()>,
}

impl CameraHandle {
    pub fn request_finish(&self) {
        self.flags.finish.store(true, Ordering::SeqCst);
    }
}

pub fn spawn_camera(
    cfg: Arc<RwLock<Config>>,
    registry: Arc<mjpeg_stream::StreamRegistry>,
    factory: Arc<dyn EncoderFactory>,
    start_paused: bool,
) -> CameraHandle {
    let camera_id = cfg.read().system.camera_id;
    let flags = Arc::new(CameraFlags::default());
    flags.pause.store(start_paused, Ordering::SeqCst);
    let last_progress = Arc::new(Mutex::new(Instant::now()));

    let thread_cfg = cfg.clone();
    let thread_flags = flags.clone();
    let thread_progress = last_progress.clone();
    let join = std::thread::Builder::new()
        .name(format!("cam{camera_id}"))
        .spawn(move || {
            run_camera(thread_cfg, thread_flags, thread_progress, registry, factory);
        })
        .expect("spawning a camera thread");

    CameraHandle {
        camera_id,
        cfg,
        flags,
        last_progress,
        join,
    }
}

fn detector_config(cfg: &Config) -> DetectorConfig {
    DetectorConfig {
        threshold: cfg.detect.threshold,
        threshold_maximum: cfg.detect.threshold_maximum,
        noise_level: cfg.detect.noise_level.clamp(1, 255) as u8,
        noise_tune: cfg.detect.noise_tune,
        despeckle_filter: cfg.detect.despeckle_filter.clone(),
        lightswitch_percent: cfg.detect.lightswitch_percent.min(100) as u8,
        lightswitch_frames: cfg.detect.lightswitch_frames.min(u16::MAX as u32) as u16,
        smart_mask_speed: cfg.detect.smart_mask_speed.min(10) as u8,
        area_detect: cfg.area_cells(),
        threshold_sdevx: cfg.detect.threshold_sdevx,
        threshold_sdevy: cfg.detect.threshold_sdevy,
        threshold_sdevxy: cfg.detect.threshold_sdevxy,
        threshold_ratio: cfg.detect.threshold_ratio,
        threshold_ratio_change: cfg.detect.threshold_ratio_change,
    }
}

fn rotation_of(cfg: &Config) -> (pix_ops::Rotation, pix_ops::Flip) {
    let rotation = match cfg.source.rotate {
        90 => pix_ops::Rotation::Deg90,
        180 => pix_ops::Rotation::Deg180,
        270 => pix_ops::Rotation::Deg270,
        _ => pix_ops::Rotation::None,
    };
    let flip = match cfg.source.flip_axis.as_str() {
        "horizontal" => pix_ops::Flip::Horizontal,
        "vertical" => pix_ops::Flip::Vertical,
        _ => pix_ops::Flip::None,
    };
    (rotation, flip)
}

/// Splice `netcam_userpass` into a URL that carries no credentials of its
/// own.
fn effective_netcam_url(cfg: &Config) -> String {
    let url = cfg.source.netcam_url.clone();
    let userpass = &cfg.source.netcam_userpass;
    if userpass.is_empty() || url.contains('@') {
        return url;
    }
    match url.split_once("://") {
        Some((scheme, rest)) => format!("{scheme}://{userpass}@{rest}"),
        None => url,
    }
}

fn build_source(cfg: &Config) -> Result<Box<dyn FrameSource>, String> {
    if cfg.is_netcam() {
        let url = effective_netcam_url(cfg);
        let scheme = url.split("://").next().unwrap_or("").to_ascii_lowercase();
        match scheme.as_str() {
            "rtsp" | "rtmp" => Err(
                "rtsp sources need the decoder collaborator; none is configured".to_string(),
            ),
            "file" => {
                let path = url.trim_start_matches("file://").to_string();
                cam_source::FilePollSource::open(path.into())
                    .map(|s| Box::new(s) as Box<dyn FrameSource>)
                    .map_err(|e| e.to_string())
            }
            _ => netcam_source::NetcamSource::connect(
                &url,
                netcam_source::NetcamOptions {
                    keepalive: cfg.source.netcam_keepalive,
                    read_timeout: Duration::from_secs(cfg.source.read_timeout.max(1) as u64),
                },
            )
            .map(|s| Box::new(s) as Box<dyn FrameSource>)
            .map_err(|e| e.to_string()),
        }
    } else {
        #[cfg(target_os = "linux")]
        {
            v4l2_source::V4l2Source::open(
                &cfg.source.video_device,
                cfg.source.width,
                cfg.source.height,
                cfg.source.framerate,
            )
            .map(|s| Box::new(s) as Box<dyn FrameSource>)
            .map_err(|e| e.to_string())
        }
        #[cfg(not(target_os = "linux"))]
        {
            Err("local capture devices are only supported on linux".to_string())
        }
    }
}

/// Bucket identifier for timelapse rollover; when it changes, the current
/// timelapse file ends.
fn timelapse_bucket(mode: &str, ts: chrono::DateTime<chrono::Local>) -> String {
    match mode {
        "hourly" => ts.format("%Y%m%d%H").to_string(),
        "daily" => ts.format("%Y%m%d").to_string(),
        "weekly-sunday" => ts.format("%Y-%U").to_string(),
        "weekly-monday" => ts.format("%Y-%W").to_string(),
        "monthly" => ts.format("%Y%m").to_string(),
        // manual: never rolls on its own
        _ => "manual".to_string(),
    }
}

struct FrameTimers {
    last_snapshot: Instant,
    last_timelapse: Instant,
    last_stream_tick: Instant,
    timelapse_bucket: Option<String>,
}

/// Tracks the `%q` shot index: resets at each wall-clock second.
struct ShotCounter {
    second: i64,
    shot: u32,
}

impl ShotCounter {
    fn advance(&mut self, ts: chrono::DateTime<chrono::Local>) -> u32 {
        let now = ts.timestamp();
        if now == self.second {
            self.shot += 1;
        } else {
            self.second = now;
            self.shot = 0;
        }
        self.shot
    }
}

fn run_camera(
    cfg: Arc<RwLock<Config>>,
    flags: Arc<CameraFlags>,
    last_progress: Arc<Mutex<Instant>>,
    registry: Arc<mjpeg_stream::StreamRegistry>,
    factory: Arc<dyn EncoderFactory>,
) {
    let camera_id = cfg.read().system.camera_id;
    let hostname = hostname();

    'recycle: while !flags.finish.load(Ordering::SeqCst) {
        flags.recycle.store(false, Ordering::SeqCst);
        let snapshot = cfg.read().clone();

        let mut source = match build_source(&snapshot) {
            Ok(source) => source,
            Err(msg) => {
                error!(camera = camera_id, "source open failed: {msg}");
                if !sleep_checking_finish(&flags, SOURCE_RETRY) {
                    break 'recycle;
                }
                continue 'recycle;
            }
        };

        let (rotation, flip) = rotation_of(&snapshot);
        // Quarter turns exchange the pipeline dimensions.
        let (width, height) = if rotation.transposes() {
            (source.height(), source.width())
        } else {
            (source.width(), source.height())
        };
        let substream_ok = width % 16 == 0 && height % 16 == 0;
        if !substream_ok {
            info!(
                camera = camera_id,
                width, height, "dimensions not multiples of 16, substream disabled"
            );
        }

        let mut applied_detector_cfg = detector_config(&snapshot);
        let mut detector = MotionDetector::new(width, height, applied_detector_cfg.clone());
        if !snapshot.detect.mask_file.is_empty() {
            match pix_ops::load_pgm_mask(
                std::path::Path::new(&snapshot.detect.mask_file),
                width,
                height,
            ) {
                Ok(mask) => {
                    if let Err(e) = detector.set_fixed_mask(Some(mask)) {
                        error!(camera = camera_id, "mask rejected: {e}");
                    }
                }
                Err(e) => error!(camera = camera_id, "could not load mask_file: {e}"),
            }
        }
        let privacy_mask = if snapshot.image.privacy_mask.is_empty() {
            None
        } else {
            match pix_ops::load_pgm_mask(
                std::path::Path::new(&snapshot.image.privacy_mask),
                width,
                height,
            ) {
                Ok(mask) => Some(mask),
                Err(e) => {
                    error!(camera = camera_id, "could not load privacy_mask: {e}");
                    None
                }
            }
        };

        let stream = registry.register(camera_id, &snapshot.system.camera_name, substream_ok);

        let sql = build_sql(&snapshot);
        let mut handlers = CameraHandlers::new(
            cfg.clone(),
            width,
            height,
            stream,
            factory.clone(),
            sql,
        );
        open_loopbacks(&mut handlers, &snapshot, width, height);

        let mut secondary = build_secondary(&snapshot);
        let mut secondary_veto = false;

        let mut machine = EventStateMachine::new(snapshot.detect.pre_capture as usize);
        let mut scratch: Vec<u8> = Vec::new();
        let mut timers = FrameTimers {
            last_snapshot: Instant::now(),
            last_timelapse: Instant::now(),
            last_stream_tick: Instant::now() - Duration::from_secs(3600),
            timelapse_bucket: None,
        };
        let mut shots = ShotCounter { second: 0, shot: 0 };
        // The `%C` text is rendered once at event start and held constant
        // for the event's lifetime.
        let mut event_text = String::new();
        let mut connected = true;
        let mut last_frame_at = Instant::now();
        let mut fps_window_start = Instant::now();
        let mut fps_window_frames: u32 = 0;
        let mut measured_fps: u32 = snapshot.source.framerate;
        let mut decode_errors: u64 = 0;

        info!(camera = camera_id, width, height, "camera pipeline running");

        loop {
            if flags.finish.load(Ordering::SeqCst) || flags.recycle.load(Ordering::SeqCst) {
                let stopping = flags.finish.load(Ordering::SeqCst);
                teardown(&mut machine, &mut handlers, camera_id, &hostname, stopping);
                registry.unregister(camera_id);
                if stopping {
                    break 'recycle;
                }
                continue 'recycle;
            }

            let frame_budget =
                Duration::from_secs_f64(1.0 / snapshot.source.framerate.max(2) as f64);
            let deadline = Instant::now()
                + frame_budget.max(Duration::from_millis(250));

            let mut frame = match source.next_frame(deadline) {
                Ok(frame) => {
                    if !connected {
                        info!(camera = camera_id, "camera found");
                        connected = true;
                        detector.reset();
                        dispatch_bare(&mut handlers, EventKind::CameraFound, camera_id, &hostname);
                    }
                    last_frame_at = Instant::now();
                    frame
                }
                Err(SourceError::Timeout) => {
                    // The idle watchdog decides when quiet becomes lost.
                    if connected
                        && last_frame_at.elapsed()
                            > Duration::from_secs(snapshot.source.device_tmo.max(1) as u64)
                    {
                        warn!(camera = camera_id, "no frames within device_tmo, camera lost");
                        connected = false;
                        dispatch_bare(&mut handlers, EventKind::CameraLost, camera_id, &hostname);
                        let _ = source.reopen();
                    }
                    continue;
                }
                Err(SourceError::Lost(msg)) => {
                    if connected {
                        warn!(camera = camera_id, "connection lost: {msg}");
                        connected = false;
                        dispatch_bare(&mut handlers, EventKind::CameraLost, camera_id, &hostname);
                    }
                    if !sleep_checking_finish(&flags, SOURCE_RETRY) {
                        continue;
                    }
                    if let Err(e) = source.reopen() {
                        debug!(camera = camera_id, "reopen failed: {e}");
                    }
                    continue;
                }
                Err(e) => {
                    decode_errors += 1;
                    if decode_errors % 50 == 1 {
                        warn!(camera = camera_id, decode_errors, "frame dropped: {e}");
                    }
                    continue;
                }
            };

            *last_progress.lock() = Instant::now();
            fps_window_frames += 1;
            if fps_window_start.elapsed() >= Duration::from_secs(1) {
                measured_fps = fps_window_frames.max(1);
                fps_window_frames = 0;
                fps_window_start = Instant::now();
            }

            pix_ops::rotate(&mut frame, rotation, flip, &mut scratch);
            if let Some(mask) = &privacy_mask {
                let _ = pix_ops::apply_privacy_mask(&mut frame, mask);
            }

            let runtime = cfg.read().clone();

            // Non-restart detection parameters take effect immediately.
            let fresh_detector_cfg = detector_config(&runtime);
            if fresh_detector_cfg != applied_detector_cfg {
                detector.set_config(fresh_detector_cfg.clone());
                applied_detector_cfg = fresh_detector_cfg;
            }

            // Detection runs on the clean (pre-overlay) image.
            let mut verdict = detector.detect(&frame);
            if verdict.error {
                warn!(camera = camera_id, "frame shape changed, rebuilding detector");
                detector = MotionDetector::new(width, height, detector_config(&runtime));
                continue;
            }

            if let Some(sec) = secondary.as_mut() {
                if verdict.motion {
                    sec.submit(&frame);
                }
                if let Some((_seq, result)) = sec.poll() {
                    secondary_veto = result == motion_detect::secondary::SecondaryVerdict::Veto;
                }
                if secondary_veto {
                    verdict.motion = false;
                }
            }

            let paused = flags.pause.load(Ordering::SeqCst);
            if paused {
                verdict.motion = false;
            }

            let ts = chrono::Local::now();
            let shot = shots.advance(ts);

            draw_overlays(
                &mut frame,
                &runtime,
                &verdict,
                &machine,
                ts,
                measured_fps,
                &hostname,
                shot,
            );

            let manual = !paused
                && (runtime.detect.emulate_motion
                    || flags.event_trigger.swap(false, Ordering::SeqCst));

            let state_cfg = StateConfig {
                minimum_motion_frames: runtime.detect.minimum_motion_frames,
                event_gap: runtime.detect.event_gap,
                post_capture: runtime.detect.post_capture,
            };
            let emissions = machine.on_frame(
                &state_cfg,
                verdict.motion,
                verdict.area_detected,
                manual,
                &frame,
            );

            if emissions
                .iter()
                .any(|e| e.kind == EventKind::FirstMotion)
            {
                let basic = build_template(
                    &runtime,
                    &verdict,
                    &machine,
                    shot,
                    width,
                    height,
                    measured_fps,
                    &hostname,
                    0,
                );
                event_text =
                    path_template::expand(&runtime.image.text_event, ts, None, 0, &basic);
            }

            let mut template = build_template(
                &runtime,
                &verdict,
                &machine,
                shot,
                width,
                height,
                measured_fps,
                &hostname,
                handlers.db_event_id(),
            );
            template.text_event = event_text.clone();
            let needs_motion_image = !emissions.is_empty();
            let motion_image = needs_motion_image.then(|| detector.motion_image(frame.stamp));
            let ctx = DispatchCtx {
                template: &template,
                motion_image: motion_image.as_ref(),
                fps: measured_fps,
            };

            for emission in &emissions {
                let image: Option<&Frame> = match &emission.image {
                    EventImage::None => None,
                    EventImage::Current => Some(&frame),
                    EventImage::MotionOverlay => motion_image.as_ref(),
                    EventImage::Stored(stored) => Some(stored),
                };
                let call = EventCall {
                    kind: emission.kind,
                    image,
                    filename: None,
                    file_type: None,
                    ts,
                };
                handlers.dispatch(&call, &ctx);
            }

            run_timers(
                &mut timers,
                &mut handlers,
                &runtime,
                &flags,
                &frame,
                &ctx,
                ts,
            );

            // Best-effort pacing toward the target rate.
            let elapsed = last_frame_at.elapsed();
            if elapsed < frame_budget {
                std::thread::sleep(frame_budget - elapsed);
            }
        }
    }
    debug!(camera = camera_id, "camera thread exiting");
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn build_sql(cfg: &Config) -> Option<event_log::EventLogger> {
    if cfg.db.database_type != "sqlite3" {
        return None;
    }
    match event_log::SqliteDb::open(cfg.db.database_dbname.clone().into()) {
        Ok(db) => Some(event_log::EventLogger::new(Box::new(db))),
        Err(e) => {
            error!("could not open event database: {e}");
            None
        }
    }
}

fn build_secondary(cfg: &Config) -> Option<motion_detect::secondary::SecondaryDetector> {
    if !cfg.detect.secondary_detect {
        return None;
    }
    // The heavyweight classifier is a collaborator; without one
    // configured at build time, a brightness-gate stand-in keeps the
    // mailbox plumbing exercised.
    struct NullClassifier;
    impl motion_detect::secondary::SecondaryClassifier for NullClassifier {
        fn classify(&mut self, _frame: &Frame) -> motion_detect::secondary::SecondaryVerdict {
            motion_detect::secondary::SecondaryVerdict::Indeterminate
        }
    }
    match motion_detect::secondary::SecondaryDetector::new(
        Box::new(NullClassifier),
        cfg.detect.secondary_interval.max(1) as u64,
    ) {
        Ok(det) => Some(det),
        Err(e) => {
            error!("secondary detector thread failed to start: {e}");
            None
        }
    }
}

fn open_loopbacks(handlers: &mut CameraHandlers, cfg: &Config, width: u32, height: u32) {
    #[cfg(target_os = "linux")]
    {
        if !cfg.pipe.video_pipe.is_empty() {
            match v4l2_loopback::LoopbackWriter::open(&cfg.pipe.video_pipe, width, height) {
                Ok(writer) => handlers.loopback = Some(writer),
                Err(e) => error!("could not open loopback {}: {e}", cfg.pipe.video_pipe),
            }
        }
        if !cfg.pipe.video_pipe_motion.is_empty() {
            match v4l2_loopback::LoopbackWriter::open(&cfg.pipe.video_pipe_motion, width, height) {
                Ok(writer) => handlers.loopback_motion = Some(writer),
                Err(e) => {
                    error!(
                        "could not open motion loopback {}: {e}",
                        cfg.pipe.video_pipe_motion
                    )
                }
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (handlers, cfg, width, height);
    }
}

#[allow(clippy::too_many_arguments)]
fn build_template(
    cfg: &Config,
    verdict: &Verdict,
    machine: &EventStateMachine,
    shot: u32,
    width: u32,
    height: u32,
    fps: u32,
    hostname: &str,
    db_event_id: u64,
) -> TemplateContext {
    TemplateContext {
        event_number: machine.event_id(),
        shot,
        changed_pixels: verdict.changed_pixels,
        noise: verdict.noise,
        motion_width: verdict.bbox.width,
        motion_height: verdict.bbox.height,
        motion_center_x: verdict.bbox.x,
        motion_center_y: verdict.bbox.y,
        threshold: cfg.detect.threshold,
        total_labels: verdict.labels,
        camera_id: cfg.system.camera_id,
        camera_name: cfg.system.camera_name.clone(),
        text_event: cfg.image.text_event.clone(),
        width,
        height,
        fps,
        hostname: hostname.to_string(),
        db_event_id,
        version: env!("CARGO_PKG_VERSION"),
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_overlays(
    frame: &mut Frame,
    cfg: &Config,
    verdict: &Verdict,
    machine: &EventStateMachine,
    ts: chrono::DateTime<chrono::Local>,
    fps: u32,
    hostname: &str,
    shot: u32,
) {
    let scale = cfg.image.text_scale.clamp(1, 10);
    let glyph_h = 8 * scale;
    let template = build_template(
        cfg,
        verdict,
        machine,
        shot,
        frame.width(),
        frame.height(),
        fps,
        hostname,
        0,
    );

    if cfg.image.text_changes {
        let text = verdict.changed_pixels.to_string();
        let x = frame.width().saturating_sub(10 + text.len() as u32 * 6 * scale);
        pix_ops::draw_text(frame, pix_ops::TextAnchor { x, y: 10 }, &text, scale);
    }
    if !cfg.image.text_left.is_empty() {
        let text = path_template::expand(&cfg.image.text_left, ts, None, 0, &template)
            .replace("\\n", "\n");
        let lines = text.lines().count().max(1) as u32;
        let y = frame.height().saturating_sub(10 + lines * glyph_h);
        pix_ops::draw_text(frame, pix_ops::TextAnchor { x: 10, y }, &text, scale);
    }
    if !cfg.image.text_right.is_empty() {
        let text = path_template::expand(&cfg.image.text_right, ts, None, 0, &template)
            .replace("\\n", "\n");
        let lines: Vec<&str> = text.lines().collect();
        let widest = lines.iter().map(|l| l.len()).max().unwrap_or(0) as u32;
        let x = frame.width().saturating_sub(10 + widest * 6 * scale);
        let y = frame
            .height()
            .saturating_sub(10 + lines.len().max(1) as u32 * glyph_h);
        pix_ops::draw_text(frame, pix_ops::TextAnchor { x, y }, &text, scale);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_timers(
    timers: &mut FrameTimers,
    handlers: &mut CameraHandlers,
    cfg: &Config,
    flags: &CameraFlags,
    frame: &Frame,
    ctx: &DispatchCtx,
    ts: chrono::DateTime<chrono::Local>,
) {
    // Snapshot: periodic or requested through the control surface.
    let snapshot_due = cfg.picture.snapshot_interval > 0
        && timers.last_snapshot.elapsed()
            >= Duration::from_secs(cfg.picture.snapshot_interval as u64);
    if snapshot_due || flags.snapshot_request.swap(false, Ordering::SeqCst) {
        timers.last_snapshot = Instant::now();
        handlers.dispatch(
            &EventCall::with_image(EventKind::ImageSnapshot, frame, ts),
            ctx,
        );
    }

    // Timelapse: rollover first, then the interval frame.
    if cfg.timelapse.timelapse_interval > 0 {
        let bucket = timelapse_bucket(&cfg.timelapse.timelapse_mode, ts);
        let rolled = timers
            .timelapse_bucket
            .as_ref()
            .map_or(false, |prev| *prev != bucket);
        let manual_end = flags.timelapse_end_request.swap(false, Ordering::SeqCst);
        if rolled || manual_end {
            handlers.dispatch(&EventCall::bare(EventKind::TimelapseEnd, ts), ctx);
        }
        timers.timelapse_bucket = Some(bucket);

        if timers.last_timelapse.elapsed()
            >= Duration::from_secs(cfg.timelapse.timelapse_interval as u64)
        {
            timers.last_timelapse = Instant::now();
            handlers.dispatch(&EventCall::with_image(EventKind::Timelapse, frame, ts), ctx);
        }
    }

    // Stream cadence.
    let tick = Duration::from_secs_f64(1.0 / cfg.web.stream_maxrate.max(1) as f64);
    if timers.last_stream_tick.elapsed() >= tick {
        timers.last_stream_tick = Instant::now();
        handlers.dispatch(&EventCall::with_image(EventKind::StreamTick, frame, ts), ctx);
    }
}

fn teardown(
    machine: &mut EventStateMachine,
    handlers: &mut CameraHandlers,
    camera_id: u32,
    hostname: &str,
    stopping: bool,
) {
    let ts = chrono::Local::now();
    let template = TemplateContext {
        event_number: machine.event_id(),
        camera_id,
        hostname: hostname.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        ..Default::default()
    };
    let ctx = DispatchCtx {
        template: &template,
        motion_image: None,
        fps: 0,
    };
    for emission in machine.finalize() {
        let call = EventCall::bare(emission.kind, ts);
        handlers.dispatch(&call, &ctx);
    }
    handlers.close_all(&ctx, ts);
    if stopping {
        handlers.dispatch(&EventCall::bare(EventKind::Stop, ts), &ctx);
        info!(camera = camera_id, "camera stopped");
    } else {
        info!(camera = camera_id, "camera recycling");
    }
}

fn dispatch_bare(
    handlers: &mut CameraHandlers,
    kind: EventKind,
    camera_id: u32,
    hostname: &str,
) {
    let template = TemplateContext {
        camera_id,
        hostname: hostname.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        ..Default::default()
    };
    let ctx = DispatchCtx {
        template: &template,
        motion_image: None,
        fps: 0,
    };
    handlers.dispatch(&EventCall::bare(kind, chrono::Local::now()), &ctx);
}

fn sleep_checking_finish(flags: &CameraFlags, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if flags.finish.load(Ordering::SeqCst) || flags.recycle.load(Ordering::SeqCst) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    true
}
