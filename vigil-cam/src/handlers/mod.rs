//! Per-camera handler state and the dispatcher that drives it.
//!
//! Handlers are small methods on [`CameraHandlers`]; the dispatcher walks
//! the static table for the call's kind and runs each in order. Handlers
//! never call back into the dispatcher; instead they return follow-up
//! calls (a movie driver announcing its new file, the extpipe closing)
//! which the dispatcher processes in arrival order after the original
//! call.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use path_template::TemplateContext;
use tracing::{debug, error, warn};
use yuv_frame::Frame;

use movie_writer::{EncoderFactory, ExtPipe, MovieEncoder, TimelapseWriter};
use vigil_config::Config;

use crate::event::{EventCall, EventKind, FileType, FollowUp, HandlerId};

mod movie;
mod picture;
mod shell;
mod sql;
mod stream;

#[cfg(target_os = "linux")]
mod loopback;

pub use shell::spawn_hook;

/// Everything the handlers need about the frame in flight beyond the call
/// itself.
pub struct DispatchCtx<'a> {
    pub template: &'a TemplateContext,
    /// The annotated change-plane image of the current frame.
    pub motion_image: Option<&'a Frame>,
    /// Measured source rate, for movie timebases.
    pub fps: u32,
}

pub(crate) struct MovieFile {
    enc: Box<dyn MovieEncoder>,
    path: String,
    file_type: FileType,
    opened_at: std::time::Instant,
}

pub struct CameraHandlers {
    pub(crate) cfg: Arc<RwLock<Config>>,
    pub(crate) camera_id: u32,
    /// Pipeline (post-rotation) dimensions.
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) stream: Arc<mjpeg_stream::CameraStream>,
    pub(crate) factory: Arc<dyn EncoderFactory>,
    pub(crate) movie: Option<MovieFile>,
    pub(crate) movie_motion: Option<MovieFile>,
    pub(crate) timelapse: TimelapseWriter,
    pub(crate) extpipe: Option<ExtPipe>,
    pub(crate) extpipe_filename: String,
    pub(crate) sql: Option<event_log::EventLogger>,
    #[cfg(target_os = "linux")]
    pub(crate) loopback: Option<v4l2_loopback::LoopbackWriter>,
    #[cfg(target_os = "linux")]
    pub(crate) loopback_motion: Option<v4l2_loopback::LoopbackWriter>,
    /// Scratch for the half-resolution substream image.
    pub(crate) substream_frame: Option<Frame>,
}

impl CameraHandlers {
    pub fn new(
        cfg: Arc<RwLock<Config>>,
        width: u32,
        height: u32,
        stream: Arc<mjpeg_stream::CameraStream>,
        factory: Arc<dyn EncoderFactory>,
        sql: Option<event_log::EventLogger>,
    ) -> Self {
        let (camera_id, timelapse_codec) = {
            let cfg = cfg.read();
            (
                cfg.system.camera_id,
                cfg.timelapse.timelapse_codec.clone(),
            )
        };
        Self {
            cfg,
            camera_id,
            width,
            height,
            stream,
            factory,
            movie: None,
            movie_motion: None,
            timelapse: TimelapseWriter::new(&timelapse_codec),
            extpipe: None,
            extpipe_filename: String::new(),
            sql,
            #[cfg(target_os = "linux")]
            loopback: None,
            #[cfg(target_os = "linux")]
            loopback_motion: None,
            substream_frame: None,
        }
    }

    /// Best-effort database event id for `%{dbeventid}` templates.
    pub fn db_event_id(&self) -> u64 {
        self.sql.as_ref().map_or(0, |s| s.last_event_id())
    }

    /// Fan one event call out across its handlers, then any follow-ups.
    pub fn dispatch(&mut self, call: &EventCall, ctx: &DispatchCtx) {
        let mut queue: VecDeque<FollowUp> = VecDeque::new();
        self.run_handlers(call, ctx, &mut queue);
        while let Some(follow) = queue.pop_front() {
            let follow_call = EventCall {
                kind: follow.kind,
                image: None,
                filename: Some(&follow.filename),
                file_type: Some(follow.file_type),
                ts: call.ts,
            };
            self.run_handlers(&follow_call, ctx, &mut queue);
        }
    }

    fn run_handlers(&mut self, call: &EventCall, ctx: &DispatchCtx, queue: &mut VecDeque<FollowUp>) {
        for handler in crate::event::handlers_for(call.kind) {
            let followups = self.run_one(handler, call, ctx);
            queue.extend(followups);
        }
    }

    fn run_one(&mut self, handler: HandlerId, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        use HandlerId::*;
        match handler {
            SqlNewFile => self.sql_new_file(call, ctx),
            ShellOnPictureSave => self.shell_on_picture_save(call, ctx),
            LogNewFile => {
                debug!(
                    camera = self.camera_id,
                    file_type = ?call.file_type,
                    filename = call.filename,
                    "file saved"
                );
                Vec::new()
            }
            Beep => self.beep(),
            ShellOnMotionDetected => self.shell_simple(call, ctx, |c| &c.scripts.on_motion_detected),
            ShellOnAreaDetected => self.shell_simple(call, ctx, |c| &c.scripts.on_area_detected),
            SqlFirstMotion => self.sql_first_motion(call, ctx),
            ShellOnEventStart => self.shell_simple(call, ctx, |c| &c.scripts.on_event_start),
            MovieOpen => self.movie_open(call, ctx),
            ExtpipeOpen => self.extpipe_open(call, ctx),
            ShellOnEventEnd => self.shell_simple(call, ctx, |c| &c.scripts.on_event_end),
            MovieClose => self.movie_close(),
            ExtpipeClose => self.extpipe_close(),
            ImageWriter => self.image_writer(call, ctx),
            MoviePut => self.movie_put(call, ctx),
            ExtpipePut => self.extpipe_put(call, ctx),
            MotionImageWriter => self.motion_image_writer(call, ctx),
            SnapshotWriter => self.snapshot_writer(call, ctx),
            LoopbackPut => self.loopback_put(call, false),
            LoopbackMotionPut => self.loopback_put(call, true),
            StreamPut => self.stream_put(call),
            ShellOnMovieEnd => self.shell_on_movie_end(call, ctx),
            SqlFileClose => self.sql_file_close(call, ctx),
            TimelapsePut => self.timelapse_put(call, ctx),
            TimelapseClose => self.timelapse_close(),
            ShellOnCameraLost => self.shell_simple(call, ctx, |c| &c.scripts.on_camera_lost),
            ShellOnCameraFound => self.shell_simple(call, ctx, |c| &c.scripts.on_camera_found),
            StreamStop => {
                debug!(camera = self.camera_id, "stream stopping");
                Vec::new()
            }
        }
    }

    fn beep(&mut self) -> Vec<FollowUp> {
        if !self.cfg.read().system.quiet {
            use std::io::Write;
            let mut out = std::io::stdout();
            let _ = out.write_all(b"\x07");
            let _ = out.flush();
        }
        Vec::new()
    }

    /// Run a plain shell hook (no filename argument) if configured.
    fn shell_simple(
        &mut self,
        call: &EventCall,
        ctx: &DispatchCtx,
        select: fn(&Config) -> &String,
    ) -> Vec<FollowUp> {
        let command = select(&self.cfg.read()).clone();
        if !command.is_empty() {
            let expanded = path_template::expand(&command, call.ts, None, 0, ctx.template);
            spawn_hook(&expanded);
        }
        Vec::new()
    }

    fn shell_on_picture_save(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        // Fires for image files only; movies announce through
        // on_movie_start.
        let (on_picture_save, on_movie_start) = {
            let cfg = self.cfg.read();
            (
                cfg.scripts.on_picture_save.clone(),
                cfg.scripts.on_movie_start.clone(),
            )
        };
        let Some(file_type) = call.file_type else {
            return Vec::new();
        };
        let command = if file_type.intersects(FileType::IMAGE_ANY) {
            on_picture_save
        } else {
            on_movie_start
        };
        if !command.is_empty() {
            let expanded = path_template::expand(
                &command,
                call.ts,
                call.filename,
                file_type.code(),
                ctx.template,
            );
            spawn_hook(&expanded);
        }
        Vec::new()
    }

    fn shell_on_movie_end(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        let command = self.cfg.read().scripts.on_movie_end.clone();
        let Some(file_type) = call.file_type else {
            return Vec::new();
        };
        if file_type.intersects(FileType::MOVIE_ANY) && !command.is_empty() {
            let expanded = path_template::expand(
                &command,
                call.ts,
                call.filename,
                file_type.code(),
                ctx.template,
            );
            spawn_hook(&expanded);
        }
        Vec::new()
    }

    #[cfg(not(target_os = "linux"))]
    fn loopback_put(&mut self, _call: &EventCall, _motion: bool) -> Vec<FollowUp> {
        Vec::new()
    }

    /// Close everything that holds a file. Called by the camera loop on
    /// shutdown and recycle, after the state machine's final EndMotion has
    /// been dispatched.
    pub fn close_all(&mut self, ctx: &DispatchCtx, ts: chrono::DateTime<chrono::Local>) {
        let mut queue: VecDeque<FollowUp> = VecDeque::new();
        queue.extend(self.movie_close());
        queue.extend(self.extpipe_close());
        match self.timelapse.close() {
            Ok(Some(path)) => queue.push_back(FollowUp {
                kind: EventKind::FileClose,
                filename: path.display().to_string(),
                file_type: FileType::MOVIE_TIMELAPSE,
            }),
            Ok(None) => {}
            Err(e) => error!("timelapse close failed: {e}"),
        }
        while let Some(follow) = queue.pop_front() {
            let follow_call = EventCall {
                kind: follow.kind,
                image: None,
                filename: Some(&follow.filename),
                file_type: Some(follow.file_type),
                ts,
            };
            self.run_handlers(&follow_call, ctx, &mut queue);
        }
    }
}

/// Join `target_dir` and an expanded template stem, bounded to PATH_MAX.
pub(crate) fn compose_path(target_dir: &str, stem: &str, ext: &str) -> std::path::PathBuf {
    const PATH_MAX: usize = 4096;
    let mut full = format!("{target_dir}/{stem}");
    let mut budget = PATH_MAX.saturating_sub(ext.len() + 2);
    if full.len() > budget {
        warn!("path too long, truncating: {full:?}");
        while !full.is_char_boundary(budget) {
            budget -= 1;
        }
        full.truncate(budget);
    }
    std::path::PathBuf::from(format!("{full}.{ext}"))
}

/// Create any missing directory components of `path` with mode 0755.
pub(crate) fn create_parent_dirs(path: &std::path::Path) -> std::io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true).mode(0o755);
        builder.create(parent)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(parent)
    }
}
