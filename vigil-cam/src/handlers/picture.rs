//! Still-image side effects: motion pictures, annotated motion-mask
//! pictures, and periodic snapshots with the stable `lastsnap` link.

use std::path::Path;

use tracing::{error, warn};
use yuv_frame::Frame;

use crate::event::{EventCall, EventKind, FileType, FollowUp};

use super::{compose_path, create_parent_dirs, CameraHandlers, DispatchCtx};

/// File extension for the configured picture type.
pub(crate) fn picture_ext(picture_type: &str) -> &'static str {
    match picture_type {
        "webp" => "webp",
        "ppm" => "ppm",
        _ => "jpg",
    }
}

/// Encode and write one frame. The encoder is chosen by extension.
pub(crate) fn write_picture(
    path: &Path,
    frame: &Frame,
    picture_type: &str,
    quality: u8,
) -> std::io::Result<()> {
    create_parent_dirs(path)?;
    let rgb = pix_ops::yuv420p_to_rgb(frame);
    let img: image::RgbImage =
        image::ImageBuffer::from_raw(frame.width(), frame.height(), rgb)
            .expect("rgb buffer length matches dimensions");

    use image::ImageEncoder;
    let to_io = |e: image::ImageError| std::io::Error::other(e.to_string());
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    match picture_type {
        "webp" => {
            image::codecs::webp::WebPEncoder::new_lossless(writer)
                .write_image(
                    img.as_raw(),
                    img.width(),
                    img.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(to_io)?;
        }
        "ppm" => {
            image::codecs::pnm::PnmEncoder::new(writer)
                .with_subtype(image::codecs::pnm::PnmSubtype::Pixmap(
                    image::codecs::pnm::SampleEncoding::Binary,
                ))
                .write_image(
                    img.as_raw(),
                    img.width(),
                    img.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(to_io)?;
        }
        _ => {
            image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality.clamp(1, 100))
                .write_image(
                    img.as_raw(),
                    img.width(),
                    img.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(to_io)?;
        }
    }
    Ok(())
}

fn log_write_error(path: &Path, e: &std::io::Error) {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            error!("no write access for {}", path.display());
        }
        _ => error!("failed to write {}: {e}", path.display()),
    }
}

impl CameraHandlers {
    pub(super) fn image_writer(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        let (enabled, target_dir, template, picture_type, quality) = {
            let cfg = self.cfg.read();
            (
                cfg.picture.picture_output,
                cfg.system.target_dir.clone(),
                cfg.picture.picture_filename.clone(),
                cfg.picture.picture_type.clone(),
                cfg.picture.picture_quality as u8,
            )
        };
        if !enabled {
            return Vec::new();
        }
        let Some(frame) = call.image else {
            return Vec::new();
        };
        let stem = path_template::expand(&template, call.ts, None, 0, ctx.template);
        let path = compose_path(&target_dir, &stem, picture_ext(&picture_type));
        match write_picture(&path, frame, &picture_type, quality) {
            Ok(()) => vec![FollowUp {
                kind: EventKind::FileCreate,
                filename: path.display().to_string(),
                file_type: FileType::IMAGE,
            }],
            Err(e) => {
                log_write_error(&path, &e);
                Vec::new()
            }
        }
    }

    pub(super) fn motion_image_writer(
        &mut self,
        call: &EventCall,
        ctx: &DispatchCtx,
    ) -> Vec<FollowUp> {
        let (enabled, target_dir, template, picture_type, quality) = {
            let cfg = self.cfg.read();
            (
                cfg.picture.picture_output_motion,
                cfg.system.target_dir.clone(),
                cfg.picture.picture_filename.clone(),
                cfg.picture.picture_type.clone(),
                cfg.picture.picture_quality as u8,
            )
        };
        if !enabled {
            return Vec::new();
        }
        let Some(frame) = call.image.or(ctx.motion_image) else {
            return Vec::new();
        };
        // Motion images get the same name as normal images plus an
        // appended 'm'.
        let stem = path_template::expand(&template, call.ts, None, 0, ctx.template);
        let path = compose_path(&target_dir, &format!("{stem}m"), picture_ext(&picture_type));
        match write_picture(&path, frame, &picture_type, quality) {
            Ok(()) => vec![FollowUp {
                kind: EventKind::FileCreate,
                filename: path.display().to_string(),
                file_type: FileType::IMAGE_MOTION,
            }],
            Err(e) => {
                log_write_error(&path, &e);
                Vec::new()
            }
        }
    }

    pub(super) fn snapshot_writer(&mut self, call: &EventCall, ctx: &DispatchCtx) -> Vec<FollowUp> {
        let (target_dir, template, picture_type, quality) = {
            let cfg = self.cfg.read();
            (
                cfg.system.target_dir.clone(),
                cfg.picture.snapshot_filename.clone(),
                cfg.picture.picture_type.clone(),
                cfg.picture.picture_quality as u8,
            )
        };
        let Some(frame) = call.image else {
            return Vec::new();
        };
        let ext = picture_ext(&picture_type);
        let stem = path_template::expand(&template, call.ts, None, 0, ctx.template);

        let written_path = if let Some(dir_part) = stem.strip_suffix("lastsnap") {
            // Stable-name form: write a timestamped file next to the
            // requested location and re-point the lastsnap symlink at it.
            let real_stem = call.ts.format("%Y%m%d%H%M%S-snapshot").to_string();
            let path = compose_path(&target_dir, &format!("{dir_part}{real_stem}"), ext);
            if let Err(e) = write_picture(&path, frame, &picture_type, quality) {
                log_write_error(&path, &e);
                return Vec::new();
            }
            let link = compose_path(&target_dir, &format!("{dir_part}lastsnap"), ext);
            // Remove then relink; the link only ever points at a complete
            // file.
            let target = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let _ = std::fs::remove_file(&link);
            #[cfg(unix)]
            if let Err(e) = std::os::unix::fs::symlink(&target, &link) {
                warn!("could not create symlink {}: {e}", link.display());
            }
            path
        } else {
            let path = compose_path(&target_dir, &stem, ext);
            let _ = std::fs::remove_file(&path);
            if let Err(e) = write_picture(&path, frame, &picture_type, quality) {
                log_write_error(&path, &e);
                return Vec::new();
            }
            path
        };

        vec![FollowUp {
            kind: EventKind::FileCreate,
            filename: written_path.display().to_string(),
            file_type: FileType::IMAGE_SNAPSHOT,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yuv_frame::FrameStamp;

    #[test]
    fn test_write_picture_formats() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::black(32, 16, FrameStamp::now(0)).unwrap();
        for (ty, ext) in [("jpg", "jpg"), ("webp", "webp"), ("ppm", "ppm")] {
            let path = dir.path().join(format!("shot.{ext}"));
            write_picture(&path, &frame, ty, 80).unwrap();
            assert!(std::fs::metadata(&path).unwrap().len() > 0);
        }
    }

    #[test]
    fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c/shot.jpg");
        let frame = Frame::black(32, 16, FrameStamp::now(0)).unwrap();
        write_picture(&path, &frame, "jpg", 80).unwrap();
        assert!(path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("a"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_picture_ext() {
        assert_eq!(picture_ext("jpg"), "jpg");
        assert_eq!(picture_ext("webp"), "webp");
        assert_eq!(picture_ext("ppm"), "ppm");
        assert_eq!(picture_ext("unknown"), "jpg");
    }
}
