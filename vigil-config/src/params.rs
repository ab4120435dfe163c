//! The parameter registry: one metadata row per config name plus generated
//! get/set accessors over the typed [`Config`].

use crate::{Category, Config};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Bool,
    List,
}

#[derive(Clone, Copy, Debug)]
pub struct ParamMeta {
    pub name: &'static str,
    pub category: Category,
    pub kind: ParamKind,
    /// Web-UI visibility: 0 always, 1 advanced, 2 restricted, 3 never.
    pub web_level: u8,
    /// Takes effect only after the camera loop recycles.
    pub requires_restart: bool,
}

/// Result of a validated runtime parameter update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// Stored; effective immediately.
    Applied,
    /// Stored; effective after the camera recycles.
    RequiresRestart,
    /// Previous value left intact.
    Rejected(String),
}

trait ParamValue: Sized {
    fn to_param_string(&self) -> String;
    fn from_param_str(s: &str) -> Result<Self, String>;
}

impl ParamValue for String {
    fn to_param_string(&self) -> String {
        self.clone()
    }
    fn from_param_str(s: &str) -> Result<Self, String> {
        Ok(s.to_string())
    }
}

impl ParamValue for u32 {
    fn to_param_string(&self) -> String {
        self.to_string()
    }
    fn from_param_str(s: &str) -> Result<Self, String> {
        s.trim()
            .parse()
            .map_err(|_| format!("{s:?} is not a non-negative integer"))
    }
}

impl ParamValue for bool {
    fn to_param_string(&self) -> String {
        if *self { "on" } else { "off" }.to_string()
    }
    fn from_param_str(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(true),
            "off" | "false" | "no" | "0" => Ok(false),
            other => Err(format!("{other:?} is not a boolean (use on/off)")),
        }
    }
}

macro_rules! define_params {
    ($(($name:literal, $cat:ident, $kind:ident, $level:expr, $restart:expr, $($field:ident).+)),+ $(,)?) => {
        pub static PARAMS: &[ParamMeta] = &[
            $(ParamMeta {
                name: $name,
                category: Category::$cat,
                kind: ParamKind::$kind,
                web_level: $level,
                requires_restart: $restart,
            }),+
        ];

        impl Config {
            /// Current value of a parameter, rendered for the config file
            /// and the web UI.
            pub fn get_param(&self, name: &str) -> Option<String> {
                match name {
                    $($name => Some(ParamValue::to_param_string(&self.$($field).+)),)+
                    _ => None,
                }
            }

            fn set_param(&mut self, name: &str, value: &str) -> Result<(), String> {
                match name {
                    $($name => {
                        self.$($field).+ = ParamValue::from_param_str(value)?;
                        Ok(())
                    })+
                    _ => Err(format!("unknown parameter {name:?}")),
                }
            }
        }
    };
}

define_params![
    // system
    ("daemon", System, Bool, 1, false, system.daemon),
    ("pid_file", System, Str, 2, true, system.pid_file),
    ("log_file", System, Str, 2, true, system.log_file),
    ("log_level", System, Int, 0, false, system.log_level),
    ("quiet", System, Bool, 0, false, system.quiet),
    ("target_dir", System, Str, 0, false, system.target_dir),
    ("camera_id", System, Int, 0, true, system.camera_id),
    ("camera_name", System, Str, 0, false, system.camera_name),
    // source
    ("video_device", Source, Str, 0, true, source.video_device),
    ("netcam_url", Source, Str, 0, true, source.netcam_url),
    ("netcam_userpass", Source, Str, 2, true, source.netcam_userpass),
    ("netcam_keepalive", Source, Bool, 1, true, source.netcam_keepalive),
    ("width", Source, Int, 0, true, source.width),
    ("height", Source, Int, 0, true, source.height),
    ("framerate", Source, Int, 0, false, source.framerate),
    ("rotate", Source, Int, 0, true, source.rotate),
    ("flip_axis", Source, Str, 0, false, source.flip_axis),
    ("device_tmo", Source, Int, 1, false, source.device_tmo),
    ("watchdog_kill", Source, Int, 1, false, source.watchdog_kill),
    ("read_timeout", Source, Int, 1, false, source.read_timeout),
    // image
    ("text_left", Image, Str, 0, false, image.text_left),
    ("text_right", Image, Str, 0, false, image.text_right),
    ("text_changes", Image, Bool, 0, false, image.text_changes),
    ("text_event", Image, Str, 0, false, image.text_event),
    ("text_scale", Image, Int, 0, false, image.text_scale),
    ("privacy_mask", Image, Str, 1, true, image.privacy_mask),
    // picture
    ("picture_output", Picture, Bool, 0, false, picture.picture_output),
    ("picture_output_motion", Picture, Bool, 0, false, picture.picture_output_motion),
    ("picture_type", Picture, Str, 0, false, picture.picture_type),
    ("picture_quality", Picture, Int, 0, false, picture.picture_quality),
    ("picture_filename", Picture, Str, 0, false, picture.picture_filename),
    ("snapshot_interval", Picture, Int, 0, false, picture.snapshot_interval),
    ("snapshot_filename", Picture, Str, 0, false, picture.snapshot_filename),
    // detect
    ("threshold", Detect, Int, 0, false, detect.threshold),
    ("threshold_maximum", Detect, Int, 0, false, detect.threshold_maximum),
    ("noise_level", Detect, Int, 1, false, detect.noise_level),
    ("noise_tune", Detect, Bool, 1, false, detect.noise_tune),
    ("despeckle_filter", Detect, Str, 1, false, detect.despeckle_filter),
    ("lightswitch_percent", Detect, Int, 1, false, detect.lightswitch_percent),
    ("lightswitch_frames", Detect, Int, 1, false, detect.lightswitch_frames),
    ("smart_mask_speed", Detect, Int, 1, false, detect.smart_mask_speed),
    ("mask_file", Detect, Str, 1, true, detect.mask_file),
    ("area_detect", Detect, List, 1, false, detect.area_detect),
    ("minimum_motion_frames", Detect, Int, 0, false, detect.minimum_motion_frames),
    ("event_gap", Detect, Int, 0, false, detect.event_gap),
    ("pre_capture", Detect, Int, 0, true, detect.pre_capture),
    ("post_capture", Detect, Int, 0, false, detect.post_capture),
    ("emulate_motion", Detect, Bool, 0, false, detect.emulate_motion),
    ("threshold_sdevx", Detect, Int, 1, false, detect.threshold_sdevx),
    ("threshold_sdevy", Detect, Int, 1, false, detect.threshold_sdevy),
    ("threshold_sdevxy", Detect, Int, 1, false, detect.threshold_sdevxy),
    ("threshold_ratio", Detect, Int, 1, false, detect.threshold_ratio),
    ("threshold_ratio_change", Detect, Int, 1, false, detect.threshold_ratio_change),
    ("secondary_detect", Detect, Bool, 1, true, detect.secondary_detect),
    ("secondary_interval", Detect, Int, 1, false, detect.secondary_interval),
    // scripts
    ("on_event_start", Scripts, Str, 1, false, scripts.on_event_start),
    ("on_event_end", Scripts, Str, 1, false, scripts.on_event_end),
    ("on_picture_save", Scripts, Str, 1, false, scripts.on_picture_save),
    ("on_motion_detected", Scripts, Str, 1, false, scripts.on_motion_detected),
    ("on_area_detected", Scripts, Str, 1, false, scripts.on_area_detected),
    ("on_movie_start", Scripts, Str, 1, false, scripts.on_movie_start),
    ("on_movie_end", Scripts, Str, 1, false, scripts.on_movie_end),
    ("on_camera_lost", Scripts, Str, 1, false, scripts.on_camera_lost),
    ("on_camera_found", Scripts, Str, 1, false, scripts.on_camera_found),
    // movie
    ("movie_output", Movie, Bool, 0, false, movie.movie_output),
    ("movie_output_motion", Movie, Bool, 0, false, movie.movie_output_motion),
    ("movie_filename", Movie, Str, 0, false, movie.movie_filename),
    ("movie_codec", Movie, Str, 0, false, movie.movie_codec),
    ("movie_max_time", Movie, Int, 0, false, movie.movie_max_time),
    ("movie_passthrough", Movie, Bool, 1, false, movie.movie_passthrough),
    // timelapse
    ("timelapse_interval", Timelapse, Int, 0, false, timelapse.timelapse_interval),
    ("timelapse_mode", Timelapse, Str, 0, false, timelapse.timelapse_mode),
    ("timelapse_codec", Timelapse, Str, 0, false, timelapse.timelapse_codec),
    ("timelapse_filename", Timelapse, Str, 0, false, timelapse.timelapse_filename),
    ("timelapse_fps", Timelapse, Int, 0, false, timelapse.timelapse_fps),
    // pipe
    ("video_pipe", Pipe, Str, 1, true, pipe.video_pipe),
    ("video_pipe_motion", Pipe, Str, 1, true, pipe.video_pipe_motion),
    ("use_extpipe", Pipe, Bool, 1, false, pipe.use_extpipe),
    ("extpipe", Pipe, Str, 1, false, pipe.extpipe),
    // web
    ("webcontrol_port", Web, Int, 2, true, web.webcontrol_port),
    ("stream_maxrate", Web, Int, 0, false, web.stream_maxrate),
    ("stream_quality", Web, Int, 0, false, web.stream_quality),
    // db
    ("database_type", Db, Str, 2, true, db.database_type),
    ("database_dbname", Db, Str, 2, true, db.database_dbname),
    ("sql_log_picture", Db, Bool, 1, false, db.sql_log_picture),
    ("sql_log_snapshot", Db, Bool, 1, false, db.sql_log_snapshot),
    ("sql_log_movie", Db, Bool, 1, false, db.sql_log_movie),
    ("sql_log_timelapse", Db, Bool, 1, false, db.sql_log_timelapse),
    ("sql_query_start", Db, Str, 2, false, db.sql_query_start),
    ("sql_query", Db, Str, 2, false, db.sql_query),
    ("sql_query_stop", Db, Str, 2, false, db.sql_query_stop),
];

pub fn lookup_param(name: &str) -> Option<&'static ParamMeta> {
    PARAMS.iter().find(|m| m.name == name)
}

/// Constraints beyond simple type parsing. Rejected values never reach the
/// config.
fn validate_param(config: &Config, name: &str, value: &str) -> Result<(), String> {
    let as_int = || -> Result<u32, String> {
        value
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("{value:?} is not a non-negative integer"))
    };
    match name {
        "rotate" => {
            let v = as_int()?;
            if ![0, 90, 180, 270].contains(&v) {
                return Err("rotate must be 0, 90, 180 or 270".to_string());
            }
        }
        "flip_axis" => {
            if !["none", "horizontal", "vertical"].contains(&value) {
                return Err("flip_axis must be none, horizontal or vertical".to_string());
            }
        }
        "width" | "height" => {
            let v = as_int()?;
            if v == 0 || v % 8 != 0 {
                return Err(format!("{name} must be a positive multiple of 8"));
            }
        }
        "text_scale" => {
            let v = as_int()?;
            if !(1..=10).contains(&v) {
                return Err("text_scale must be between 1 and 10".to_string());
            }
        }
        "picture_type" => {
            if !["jpg", "webp", "ppm"].contains(&value) {
                return Err("picture_type must be jpg, webp or ppm".to_string());
            }
        }
        "picture_quality" | "stream_quality" => {
            let v = as_int()?;
            if !(1..=100).contains(&v) {
                return Err(format!("{name} must be between 1 and 100"));
            }
        }
        "lightswitch_percent" => {
            let v = as_int()?;
            if v > 100 {
                return Err("lightswitch_percent must be at most 100".to_string());
            }
        }
        "noise_level" => {
            let v = as_int()?;
            if !(1..=255).contains(&v) {
                return Err("noise_level must be between 1 and 255".to_string());
            }
        }
        "smart_mask_speed" => {
            let v = as_int()?;
            if v > 10 {
                return Err("smart_mask_speed must be between 0 and 10".to_string());
            }
        }
        "area_detect" => {
            if value.chars().any(|c| !('1'..='9').contains(&c)) {
                return Err("area_detect accepts only digits 1-9".to_string());
            }
        }
        "webcontrol_port" => {
            let v = as_int()?;
            if v > 65535 {
                return Err("webcontrol_port must fit in 16 bits".to_string());
            }
        }
        "timelapse_mode" => {
            const MODES: [&str; 6] = [
                "hourly",
                "daily",
                "weekly-sunday",
                "weekly-monday",
                "monthly",
                "manual",
            ];
            if !MODES.contains(&value) {
                return Err(format!("timelapse_mode must be one of {MODES:?}"));
            }
        }
        "database_type" => {
            if !value.is_empty() && value != "sqlite3" {
                return Err(format!("unsupported database_type {value:?}"));
            }
        }
        "framerate" => {
            let v = as_int()?;
            if !(2..=100).contains(&v) {
                return Err("framerate must be between 2 and 100".to_string());
            }
        }
        _ => {}
    }
    let _ = config;
    Ok(())
}

impl Config {
    /// The thread-safe setter behind the web control surface. Performs the
    /// same validation as config-file parsing; a rejected value leaves the
    /// previous one intact.
    pub fn edit_set(&mut self, name: &str, value: &str) -> EditOutcome {
        let Some(meta) = lookup_param(name) else {
            return EditOutcome::Rejected(format!("unknown parameter {name:?}"));
        };
        if let Err(reason) = validate_param(self, name, value) {
            return EditOutcome::Rejected(reason);
        }
        if let Err(reason) = self.set_param(name, value) {
            return EditOutcome::Rejected(reason);
        }
        if meta.requires_restart {
            EditOutcome::RequiresRestart
        } else {
            EditOutcome::Applied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_no_duplicates() {
        let mut names: Vec<_> = PARAMS.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PARAMS.len());
    }

    #[test]
    fn test_get_set_round_trip() {
        let mut cfg = Config::default();
        assert_eq!(cfg.edit_set("threshold", "2500"), EditOutcome::Applied);
        assert_eq!(cfg.get_param("threshold").unwrap(), "2500");
        assert_eq!(cfg.detect.threshold, 2500);

        assert_eq!(cfg.edit_set("noise_tune", "off"), EditOutcome::Applied);
        assert!(!cfg.detect.noise_tune);
        assert_eq!(cfg.get_param("noise_tune").unwrap(), "off");
    }

    #[test]
    fn test_restart_flag() {
        let mut cfg = Config::default();
        assert_eq!(cfg.edit_set("width", "800"), EditOutcome::RequiresRestart);
        assert_eq!(cfg.source.width, 800);
    }

    #[test]
    fn test_rejection_keeps_previous_value() {
        let mut cfg = Config::default();
        let before = cfg.source.width;
        assert!(matches!(
            cfg.edit_set("width", "801"),
            EditOutcome::Rejected(_)
        ));
        assert_eq!(cfg.source.width, before);

        assert!(matches!(
            cfg.edit_set("rotate", "45"),
            EditOutcome::Rejected(_)
        ));
        assert!(matches!(
            cfg.edit_set("no_such_param", "1"),
            EditOutcome::Rejected(_)
        ));
        assert!(matches!(
            cfg.edit_set("picture_type", "bmp"),
            EditOutcome::Rejected(_)
        ));
    }

    #[test]
    fn test_bool_spellings() {
        let mut cfg = Config::default();
        for spelling in ["on", "true", "1", "yes"] {
            assert_eq!(cfg.edit_set("emulate_motion", spelling), EditOutcome::Applied);
            assert!(cfg.detect.emulate_motion);
            cfg.detect.emulate_motion = false;
        }
        assert!(matches!(
            cfg.edit_set("emulate_motion", "maybe"),
            EditOutcome::Rejected(_)
        ));
    }
}
