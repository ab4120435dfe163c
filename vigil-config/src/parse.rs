//! Config-file reading: `name value` lines, comments, quoting, deprecated
//! key rewriting and per-camera override files.

use tracing::warn;

use crate::{Config, EditOutcome, Error, Result};

/// Deprecated keys map onto their current spellings; a few also transform
/// the value.
struct DeprecatedParam {
    old: &'static str,
    new: &'static str,
    transform: Option<fn(&str) -> String>,
}

static DEPRECATED: &[DeprecatedParam] = &[
    DeprecatedParam {
        old: "text_double",
        new: "text_scale",
        transform: Some(|v| {
            if matches!(v, "on" | "true" | "1" | "yes") {
                "2".to_string()
            } else {
                "1".to_string()
            }
        }),
    },
    DeprecatedParam {
        old: "output_pictures",
        new: "picture_output",
        transform: None,
    },
    DeprecatedParam {
        old: "output_debug_pictures",
        new: "picture_output_motion",
        transform: None,
    },
    DeprecatedParam {
        old: "ffmpeg_output_movies",
        new: "movie_output",
        transform: None,
    },
    DeprecatedParam {
        old: "ffmpeg_output_debug_movies",
        new: "movie_output_motion",
        transform: None,
    },
    DeprecatedParam {
        old: "ffmpeg_video_codec",
        new: "movie_codec",
        transform: None,
    },
    DeprecatedParam {
        old: "max_movie_time",
        new: "movie_max_time",
        transform: None,
    },
    DeprecatedParam {
        old: "max_mpeg_time",
        new: "movie_max_time",
        transform: None,
    },
    DeprecatedParam {
        old: "jpeg_filename",
        new: "picture_filename",
        transform: None,
    },
    DeprecatedParam {
        old: "quality",
        new: "picture_quality",
        transform: None,
    },
    DeprecatedParam {
        old: "snap_path",
        new: "snapshot_filename",
        transform: None,
    },
    DeprecatedParam {
        old: "webcam_maxrate",
        new: "stream_maxrate",
        transform: None,
    },
    DeprecatedParam {
        old: "webcam_quality",
        new: "stream_quality",
        transform: None,
    },
];

fn rewrite_deprecated(name: &str, value: &str) -> (String, String) {
    for dep in DEPRECATED {
        if dep.old == name {
            let value = match dep.transform {
                Some(f) => f(value),
                None => value.to_string(),
            };
            warn!(
                "config option {:?} is deprecated, use {:?}",
                dep.old, dep.new
            );
            return (dep.new.to_string(), value);
        }
    }
    (name.to_string(), value.to_string())
}

/// Split config text into ordered (name, value) pairs. Lines are
/// `name value` or `name = value`; `#` and `;` start comments; values may
/// be double-quoted.
pub fn parse_lines(content: &str, file: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((n, r)) => (n, r.trim_start()),
            None => (line, ""),
        };
        // Tolerate `name = value`.
        let rest = rest.strip_prefix('=').map(str::trim_start).unwrap_or(rest);
        let value = dequote(rest);
        if name.is_empty() {
            return Err(Error::Parse {
                file: file.to_string(),
                line: idx + 1,
                message: "missing parameter name".to_string(),
            });
        }
        let (name, value) = rewrite_deprecated(name, &value);
        out.push((name, value));
    }
    Ok(out)
}

fn dequote(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw.to_string()
    }
}

/// A parsed main config plus the per-camera configurations derived from
/// it. With no `camera` directives the main config doubles as the only
/// camera.
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub main: Config,
    pub cameras: Vec<Config>,
}

pub fn load(path: &std::path::Path) -> Result<LoadedConfig> {
    let content = std::fs::read_to_string(path)?;
    let pairs = parse_lines(&content, &path.display().to_string())?;

    let mut main = Config::default();
    let mut camera_files = Vec::new();
    apply_pairs(&mut main, pairs, path, &mut camera_files)?;

    let mut cameras = Vec::new();
    for camera_file in camera_files {
        let camera_path = resolve_sibling(path, &camera_file)?;
        let content = std::fs::read_to_string(&camera_path)?;
        let pairs = parse_lines(&content, &camera_path.display().to_string())?;
        let mut cam = main.clone();
        let mut nested = Vec::new();
        apply_pairs(&mut cam, pairs, &camera_path, &mut nested)?;
        if !nested.is_empty() {
            warn!(
                "camera config {} cannot itself declare cameras; ignored",
                camera_path.display()
            );
        }
        cameras.push(cam);
    }

    if cameras.is_empty() {
        cameras.push(main.clone());
    }

    // Cameras without explicit ids are numbered by position.
    for (idx, cam) in cameras.iter_mut().enumerate() {
        if cam.system.camera_id == 0 {
            cam.system.camera_id = idx as u32 + 1;
        }
    }

    Ok(LoadedConfig { main, cameras })
}

fn apply_pairs(
    config: &mut Config,
    pairs: Vec<(String, String)>,
    file: &std::path::Path,
    camera_files: &mut Vec<String>,
) -> Result<()> {
    for (name, value) in pairs {
        if name == "camera" {
            camera_files.push(value);
            continue;
        }
        match config.edit_set(&name, &value) {
            EditOutcome::Applied | EditOutcome::RequiresRestart => {}
            EditOutcome::Rejected(reason) => {
                warn!(
                    "{}: ignoring {:?} = {:?}: {}",
                    file.display(),
                    name,
                    value,
                    reason
                );
            }
        }
    }
    Ok(())
}

/// Camera config paths may be absolute, `~`-relative or relative to the
/// main config file.
fn resolve_sibling(main: &std::path::Path, raw: &str) -> Result<std::path::PathBuf> {
    let expanded = shellexpand::full(raw)?;
    let path = std::path::PathBuf::from(expanded.to_string());
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(main.parent().unwrap_or(std::path::Path::new(".")).join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_lines() {
        let text = "\
# main configuration
threshold 2500
camera_name \"front door\"
noise_tune = off
; another comment
event_gap 30
";
        let pairs = parse_lines(text, "test").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("threshold".to_string(), "2500".to_string()),
                ("camera_name".to_string(), "front door".to_string()),
                ("noise_tune".to_string(), "off".to_string()),
                ("event_gap".to_string(), "30".to_string()),
            ]
        );
    }

    #[test]
    fn test_deprecated_rewrite() {
        let pairs = parse_lines("text_double on\nffmpeg_video_codec mkv\n", "test").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("text_scale".to_string(), "2".to_string()),
                ("movie_codec".to_string(), "mkv".to_string()),
            ]
        );
    }

    #[test]
    fn test_load_with_camera_files() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("vigil.conf");
        let cam1 = dir.path().join("cam1.conf");
        let cam2 = dir.path().join("cam2.conf");
        std::fs::write(
            &main_path,
            "threshold 2000\ntarget_dir /tmp/vigil\ncamera cam1.conf\ncamera cam2.conf\n",
        )
        .unwrap();
        std::fs::write(&cam1, "camera_name one\nnetcam_url http://cam1/stream\n").unwrap();
        std::fs::write(&cam2, "camera_name two\nthreshold 4000\n").unwrap();

        let loaded = load(&main_path).unwrap();
        assert_eq!(loaded.cameras.len(), 2);
        assert_eq!(loaded.cameras[0].system.camera_name, "one");
        assert_eq!(loaded.cameras[0].detect.threshold, 2000);
        assert!(loaded.cameras[0].is_netcam());
        assert_eq!(loaded.cameras[1].detect.threshold, 4000);
        assert_eq!(loaded.cameras[0].system.camera_id, 1);
        assert_eq!(loaded.cameras[1].system.camera_id, 2);
    }

    #[test]
    fn test_load_without_cameras_uses_main() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("vigil.conf");
        std::fs::write(&main_path, "threshold 777\n").unwrap();
        let loaded = load(&main_path).unwrap();
        assert_eq!(loaded.cameras.len(), 1);
        assert_eq!(loaded.cameras[0].detect.threshold, 777);
    }

    #[test]
    fn test_unknown_keys_are_ignored_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("vigil.conf");
        std::fs::write(&main_path, "no_such_thing 1\nthreshold 10\n").unwrap();
        let loaded = load(&main_path).unwrap();
        assert_eq!(loaded.cameras[0].detect.threshold, 10);
    }
}
