//! SQL binder: templated statements on event start, file creation and
//! file close, gated by the per-file-type logging mask.

use crate::event::{EventCall, FileType, FollowUp};

use super::{CameraHandlers, DispatchCtx};

impl CameraHandlers {
    /// Which file types the configuration wants logged.
    fn sql_mask(&self) -> FileType {
        let cfg = self.cfg.read();
        let mut mask = FileType::empty();
        if cfg.db.sql_log_picture {
            mask |= FileType::IMAGE | FileType::IMAGE_MOTION;
        }
        if cfg.db.sql_log_snapshot {
            mask |= FileType::IMAGE_SNAPSHOT;
        }
        if cfg.db.sql_log_movie {
            mask |= FileType::MOVIE | FileType::MOVIE_MOTION;
        }
        if cfg.db.sql_log_timelapse {
            mask |= FileType::MOVIE_TIMELAPSE;
        }
        mask
    }

    pub(super) fn sql_first_motion(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        let query = self.cfg.read().db.sql_query_start.clone();
        if let Some(sql) = self.sql.as_mut() {
            if !query.is_empty() {
                let expanded = path_template::expand(&query, call.ts, None, 0, ctx.template);
                sql.run_start(&expanded);
            }
        }
        Vec::new()
    }

    pub(super) fn sql_new_file(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        self.sql_file_event(call, ctx, |cfg| cfg.db.sql_query.clone())
    }

    pub(super) fn sql_file_close(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        self.sql_file_event(call, ctx, |cfg| cfg.db.sql_query_stop.clone())
    }

    fn sql_file_event(
        &mut self,
        call: &EventCall,
        ctx: &DispatchCtx,
        select: fn(&vigil_config::Config) -> String,
    ) -> Vec<FollowUp> {
        let Some(file_type) = call.file_type else {
            return Vec::new();
        };
        if !self.sql_mask().intersects(file_type) {
            return Vec::new();
        }
        let query = select(&self.cfg.read());
        if query.is_empty() {
            return Vec::new();
        }
        // The template context already carries the dbeventid captured at
        // event start.
        let mut template = ctx.template.clone();
        if let Some(sql) = self.sql.as_ref() {
            template.db_event_id = sql.last_event_id();
        }
        if let Some(sql) = self.sql.as_mut() {
            let expanded = path_template::expand(
                &query,
                call.ts,
                call.filename,
                file_type.code(),
                &template,
            );
            sql.run(&expanded);
        }
        Vec::new()
    }
}
