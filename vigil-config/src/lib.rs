//! Daemon configuration: the typed parameter set, the parameter metadata
//! registry, the config-file parser with deprecated-key rewriting, and the
//! validated runtime setter used by the web control surface.

use serde::{Deserialize, Serialize};

mod cli;
mod params;
mod parse;

pub use cli::Args;
pub use params::{lookup_param, EditOutcome, ParamKind, ParamMeta, PARAMS};
pub use parse::{load, parse_lines, LoadedConfig};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("config file {file}, line {line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },
    #[error("lookup error on variable: {source}")]
    ShellExpand {
        #[from]
        source: shellexpand::LookupError<std::env::VarError>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parameter category, mirroring the config-file sections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    System,
    Source,
    Image,
    Detect,
    Scripts,
    Picture,
    Movie,
    Timelapse,
    Pipe,
    Web,
    Db,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub daemon: bool,
    pub pid_file: String,
    pub log_file: String,
    /// 1 (errors only) through 9 (everything).
    pub log_level: u32,
    pub quiet: bool,
    pub target_dir: String,
    pub camera_id: u32,
    pub camera_name: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            daemon: false,
            pid_file: String::new(),
            log_file: String::new(),
            log_level: 6,
            quiet: false,
            target_dir: ".".to_string(),
            camera_id: 0,
            camera_name: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub video_device: String,
    pub netcam_url: String,
    pub netcam_userpass: String,
    pub netcam_keepalive: bool,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// 0, 90, 180 or 270.
    pub rotate: u32,
    /// none, horizontal or vertical.
    pub flip_axis: String,
    /// Seconds without a frame before the camera counts as lost.
    pub device_tmo: u32,
    /// Seconds without pipeline progress before the camera is recycled.
    pub watchdog_kill: u32,
    /// Per-read network timeout, seconds.
    pub read_timeout: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            video_device: "/dev/video0".to_string(),
            netcam_url: String::new(),
            netcam_userpass: String::new(),
            netcam_keepalive: false,
            width: 640,
            height: 480,
            framerate: 15,
            rotate: 0,
            flip_axis: "none".to_string(),
            device_tmo: 30,
            watchdog_kill: 90,
            read_timeout: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub text_left: String,
    pub text_right: String,
    pub text_changes: bool,
    pub text_event: String,
    pub text_scale: u32,
    pub privacy_mask: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            text_left: String::new(),
            text_right: "%Y-%m-%d\\n%T".to_string(),
            text_changes: false,
            text_event: "%Y%m%d%H%M%S".to_string(),
            text_scale: 1,
            privacy_mask: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PictureConfig {
    pub picture_output: bool,
    pub picture_output_motion: bool,
    /// jpg, webp or ppm.
    pub picture_type: String,
    pub picture_quality: u32,
    pub picture_filename: String,
    /// Seconds between unconditional snapshots; 0 disables.
    pub snapshot_interval: u32,
    pub snapshot_filename: String,
}

impl Default for PictureConfig {
    fn default() -> Self {
        Self {
            picture_output: true,
            picture_output_motion: false,
            picture_type: "jpg".to_string(),
            picture_quality: 75,
            picture_filename: "%v-%Y%m%d%H%M%S-%q".to_string(),
            snapshot_interval: 0,
            snapshot_filename: "%v-%Y%m%d%H%M%S-snapshot".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    pub threshold: u32,
    pub threshold_maximum: u32,
    pub noise_level: u32,
    pub noise_tune: bool,
    pub despeckle_filter: String,
    pub lightswitch_percent: u32,
    pub lightswitch_frames: u32,
    pub smart_mask_speed: u32,
    pub mask_file: String,
    /// Digits 1..=9 selecting 3x3 grid cells, e.g. "1289".
    pub area_detect: String,
    pub minimum_motion_frames: u32,
    /// Quiet frames after the last motion frame before the event ends.
    pub event_gap: u32,
    pub pre_capture: u32,
    pub post_capture: u32,
    pub emulate_motion: bool,
    pub threshold_sdevx: u32,
    pub threshold_sdevy: u32,
    pub threshold_sdevxy: u32,
    pub threshold_ratio: u32,
    pub threshold_ratio_change: u32,
    pub secondary_detect: bool,
    /// Frames between secondary-classifier submissions.
    pub secondary_interval: u32,
}

impl Default for DetectConfig {
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
            mask_file: String::new(),
            area_detect: String::new(),
            minimum_motion_frames: 1,
            event_gap: 60,
            pre_capture: 0,
            post_capture: 0,
            emulate_motion: false,
            threshold_sdevx: 0,
            threshold_sdevy: 0,
            threshold_sdevxy: 0,
            threshold_ratio: 0,
            threshold_ratio_change: 0,
            secondary_detect: false,
            secondary_interval: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub on_event_start: String,
    pub on_event_end: String,
    pub on_picture_save: String,
    pub on_motion_detected: String,
    pub on_area_detected: String,
    pub on_movie_start: String,
    pub on_movie_end: String,
    pub on_camera_lost: String,
    pub on_camera_found: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovieConfig {
    pub movie_output: bool,
    pub movie_output_motion: bool,
    pub movie_filename: String,
    pub movie_codec: String,
    /// Seconds after which a long event's movie rolls over; 0 disables.
    pub movie_max_time: u32,
    pub movie_passthrough: bool,
}

impl Default for MovieConfig {
    fn default() -> Self {
        Self {
            movie_output: true,
            movie_output_motion: false,
            movie_filename: "%v-%Y%m%d%H%M%S".to_string(),
            movie_codec: "mpeg4".to_string(),
            movie_max_time: 0,
            movie_passthrough: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelapseConfig {
    /// Seconds between timelapse frames; 0 disables.
    pub timelapse_interval: u32,
    /// hourly, daily, weekly-sunday, weekly-monday, monthly or manual.
    pub timelapse_mode: String,
    pub timelapse_codec: String,
    pub timelapse_filename: String,
    pub timelapse_fps: u32,
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            timelapse_interval: 0,
            timelapse_mode: "daily".to_string(),
            timelapse_codec: "mpg".to_string(),
            timelapse_filename: "%Y%m%d-timelapse".to_string(),
            timelapse_fps: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    pub video_pipe: String,
    pub video_pipe_motion: String,
    pub use_extpipe: bool,
    pub extpipe: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub webcontrol_port: u32,
    /// Stream publishes at most this many frames per second.
    pub stream_maxrate: u32,
    pub stream_quality: u32,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            webcontrol_port: 8080,
            stream_maxrate: 1,
            stream_quality: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Empty disables SQL logging; "sqlite3" is the built-in backend.
    pub database_type: String,
    pub database_dbname: String,
    pub sql_log_picture: bool,
    pub sql_log_snapshot: bool,
    pub sql_log_movie: bool,
    pub sql_log_timelapse: bool,
    pub sql_query_start: String,
    pub sql_query: String,
    pub sql_query_stop: String,
}

/// The full flattened parameter set for one camera. Read-mostly: the
/// camera loop takes snapshots, the web setter mutates under a writer
/// lock.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub system: SystemConfig,
    pub source: SourceConfig,
    pub image: ImageConfig,
    pub picture: PictureConfig,
    pub detect: DetectConfig,
    pub scripts: ScriptConfig,
    pub movie: MovieConfig,
    pub timelapse: TimelapseConfig,
    pub pipe: PipeConfig,
    pub web: WebConfig,
    pub db: DbConfig,
}

impl Config {
    /// The camera is network-sourced when a URL is configured.
    pub fn is_netcam(&self) -> bool {
        !self.source.netcam_url.is_empty()
    }

    /// Parsed `area_detect` cells.
    pub fn area_cells(&self) -> Vec<u8> {
        self.detect
            .area_detect
            .chars()
            .filter_map(|c| c.to_digit(10))
            .filter(|d| (1..=9).contains(d))
            .map(|d| d as u8)
            .collect()
    }

    /// Render the full parameter set back into config-file syntax.
    /// Reparsing the output reproduces this configuration.
    pub fn to_conf_string(&self) -> String {
        let mut out = String::new();
        for meta in PARAMS {
            let value = self
                .get_param(meta.name)
                .expect("registry names are exhaustive");
            if value.contains(char::is_whitespace) || value.is_empty() {
                out.push_str(&format!("{} \"{}\"\n", meta.name, value));
            } else {
                out.push_str(&format!("{} {}\n", meta.name, value));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_cells() {
        let mut cfg = Config::default();
        cfg.detect.area_detect = "1290x5".to_string();
        assert_eq!(cfg.area_cells(), vec![1, 2, 9, 5]);
    }

    #[test]
    fn test_conf_string_round_trip() {
        let mut cfg = Config::default();
        cfg.system.camera_name = "back yard".to_string();
        cfg.detect.threshold = 999;
        cfg.scripts.on_event_start = "notify-send 'motion'".to_string();

        let text = cfg.to_conf_string();
        let mut reparsed = Config::default();
        for (name, value) in parse_lines(&text, "mem").unwrap() {
            assert!(matches!(
                reparsed.edit_set(&name, &value),
                EditOutcome::Applied | EditOutcome::RequiresRestart
            ));
        }
        assert_eq!(cfg, reparsed);
    }
}
