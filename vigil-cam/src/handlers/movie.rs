//! Movie side effects: the event movie pair (normal and motion-mask), the
//! timelapse writer and the external pipe.

use tracing::{error, info, warn};

use movie_writer::ExtPipe;

use crate::event::{EventCall, EventKind, FileType, FollowUp};

use super::{compose_path, create_parent_dirs, CameraHandlers, DispatchCtx, MovieFile};

impl CameraHandlers {
    pub(super) fn movie_open(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        let (output, output_motion, target_dir, template, codec) = {
            let cfg = self.cfg.read();
            (
                cfg.movie.movie_output,
                cfg.movie.movie_output_motion,
                cfg.system.target_dir.clone(),
                cfg.movie.movie_filename.clone(),
                cfg.movie.movie_codec.clone(),
            )
        };
        let mut followups = Vec::new();
        let ext = movie_writer::movie_extension(&codec);
        let stem = path_template::expand(&template, call.ts, None, 0, ctx.template);
        let fps = ctx.fps.max(2);

        if output {
            let path = compose_path(&target_dir, &stem, ext);
            match self.open_one_movie(&path, fps) {
                Ok(file) => {
                    followups.push(FollowUp {
                        kind: EventKind::FileCreate,
                        filename: file.path.clone(),
                        file_type: FileType::MOVIE,
                    });
                    self.movie = Some(file);
                }
                Err(e) => {
                    // The motion pipeline keeps running without a movie.
                    error!("movie open failed: {e}");
                }
            }
        }
        if output_motion {
            let path = compose_path(&target_dir, &format!("{stem}m"), ext);
            match self.open_one_movie(&path, fps) {
                Ok(mut file) => {
                    file.file_type = FileType::MOVIE_MOTION;
                    followups.push(FollowUp {
                        kind: EventKind::FileCreate,
                        filename: file.path.clone(),
                        file_type: FileType::MOVIE_MOTION,
                    });
                    self.movie_motion = Some(file);
                }
                Err(e) => {
                    error!("motion movie open failed: {e}");
                }
            }
        }
        followups
    }

    fn open_one_movie(
        &self,
        path: &std::path::Path,
        fps: u32,
    ) -> movie_writer::Result<MovieFile> {
        create_parent_dirs(path)?;
        let enc = self.factory.create(path, self.width, self.height, fps)?;
        Ok(MovieFile {
            enc,
            path: path.display().to_string(),
            file_type: FileType::MOVIE,
            opened_at: std::time::Instant::now(),
        })
    }

    pub(super) fn movie_put(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        let mut followups = Vec::new();

        // A very long event rolls the movie file over.
        let max_time = self.cfg.read().movie.movie_max_time;
        if max_time > 0 {
            let over = self
                .movie
                .as_ref()
                .map_or(false, |m| m.opened_at.elapsed().as_secs() >= max_time as u64);
            if over {
                info!(camera = self.camera_id, "movie_max_time reached, rolling over");
                followups.extend(self.movie_close());
                followups.extend(self.movie_open(call, ctx));
            }
        }

        if let Some(movie) = self.movie.as_mut() {
            if let Some(frame) = call.image {
                if let Err(e) = movie.enc.put(frame) {
                    warn!("movie frame dropped: {e}");
                }
            }
        }
        if let Some(movie) = self.movie_motion.as_mut() {
            if let Some(frame) = ctx.motion_image {
                if let Err(e) = movie.enc.put(frame) {
                    warn!("motion movie frame dropped: {e}");
                }
            }
        }
        followups
    }

    pub(super) fn movie_close(&mut self) -> Vec<FollowUp> {
        let mut followups = Vec::new();
        for file in [self.movie.take(), self.movie_motion.take()]
            .into_iter()
            .flatten()
        {
            let MovieFile {
                enc,
                path,
                file_type,
                ..
            } = file;
            if let Err(e) = enc.close() {
                // Disk-full and friends: the file may be truncated but
                // FileClose still fires so downstream sees it.
                error!("movie close failed for {path}: {e}");
            }
            followups.push(FollowUp {
                kind: EventKind::FileClose,
                filename: path,
                file_type,
            });
        }
        followups
    }

    pub(super) fn timelapse_put(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        let (target_dir, template, fps) = {
            let cfg = self.cfg.read();
            (
                cfg.system.target_dir.clone(),
                cfg.timelapse.timelapse_filename.clone(),
                cfg.timelapse.timelapse_fps,
            )
        };
        let Some(frame) = call.image else {
            return Vec::new();
        };
        let mut followups = Vec::new();
        if !self.timelapse.is_open() {
            let stem = path_template::expand(&template, call.ts, None, 0, ctx.template);
            let path = compose_path(&target_dir, &stem, self.timelapse.extension());
            if let Err(e) = create_parent_dirs(&path) {
                error!("timelapse path creation failed: {e}");
                return Vec::new();
            }
            match self.timelapse.open(&path, self.width, self.height, fps.max(2)) {
                Ok(()) => followups.push(FollowUp {
                    kind: EventKind::FileCreate,
                    filename: path.display().to_string(),
                    file_type: FileType::MOVIE_TIMELAPSE,
                }),
                Err(e) => {
                    error!("timelapse open failed: {e}");
                    return Vec::new();
                }
            }
        }
        if let Err(e) = self.timelapse.put(frame) {
            warn!("timelapse frame dropped: {e}");
        }
        followups
    }

    pub(super) fn timelapse_close(&mut self) -> Vec<FollowUp> {
        match self.timelapse.close() {
            Ok(Some(path)) => vec![FollowUp {
                kind: EventKind::FileClose,
                filename: path.display().to_string(),
                file_type: FileType::MOVIE_TIMELAPSE,
            }],
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("timelapse close failed: {e}");
                Vec::new()
            }
        }
    }

    pub(super) fn extpipe_open(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        let (use_extpipe, extpipe_cmd, target_dir, movie_template) = {
            let cfg = self.cfg.read();
            (
                cfg.pipe.use_extpipe,
                cfg.pipe.extpipe.clone(),
                cfg.system.target_dir.clone(),
                cfg.movie.movie_filename.clone(),
            )
        };
        if !use_extpipe || extpipe_cmd.is_empty() {
            return Vec::new();
        }
        let stem = path_template::expand(&movie_template, call.ts, None, 0, ctx.template);
        let filename = format!("{target_dir}/{stem}");
        if let Err(e) = create_parent_dirs(std::path::Path::new(&filename)) {
            error!("extpipe target path creation failed: {e}");
            return Vec::new();
        }
        // The pipe command itself sees the target file through %f.
        let command = path_template::expand(&extpipe_cmd, call.ts, Some(&filename), 0, ctx.template);
        match ExtPipe::open(&command) {
            Ok(pipe) => {
                self.extpipe = Some(pipe);
                self.extpipe_filename = filename.clone();
                vec![FollowUp {
                    kind: EventKind::FileCreate,
                    filename,
                    file_type: FileType::MOVIE,
                }]
            }
            Err(e) => {
                error!("extpipe spawn failed: {e}");
                Vec::new()
            }
        }
    }

    pub(super) fn extpipe_put(&mut self, call: &EventCall, _ctx: &DispatchCtx) -> Vec<FollowUp> {
        if let (Some(pipe), Some(frame)) = (self.extpipe.as_mut(), call.image) {
            if let Err(e) = pipe.put(frame) {
                warn!("extpipe write failed: {e}");
            }
        }
        Vec::new()
    }

    pub(super) fn extpipe_close(&mut self) -> Vec<FollowUp> {
        let Some(pipe) = self.extpipe.take() else {
            return Vec::new();
        };
        if let Err(e) = pipe.close() {
            warn!("extpipe close failed: {e}");
        }
        vec![FollowUp {
            kind: EventKind::FileClose,
            filename: std::mem::take(&mut self.extpipe_filename),
            file_type: FileType::MOVIE,
        }]
    }
}
