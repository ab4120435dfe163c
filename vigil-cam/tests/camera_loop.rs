//! Whole-thread test: a camera pipeline running against a file-backed
//! source, driven through the shared control flags.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use vigil_cam::camera::spawn_camera;
use vigil_config::Config;

fn write_jpeg(path: &std::path::Path, luma: u8) {
    let rgb = image::RgbImage::from_pixel(32, 16, image::Rgb([luma, luma, luma]));
    let mut jpeg = Vec::new();
    rgb.write_to(
        &mut std::io::Cursor::new(&mut jpeg),
        image::ImageFormat::Jpeg,
    )
    .unwrap();
    std::fs::write(path, jpeg).unwrap();
}

#[test]
fn test_file_source_pipeline_with_snapshot_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let cam_file = dir.path().join("cam.jpg");
    let target = dir.path().join("out");
    std::fs::create_dir(&target).unwrap();
    write_jpeg(&cam_file, 100);

    let mut config = Config::default();
    config.system.camera_id = 1;
    config.system.camera_name = "filecam".to_string();
    config.system.quiet = true;
    config.system.target_dir = target.display().to_string();
    config.source.netcam_url = format!("file://{}", cam_file.display());
    config.source.framerate = 5;
    config.source.device_tmo = 300;
    config.picture.picture_output = false;
    config.picture.snapshot_filename = "snap".to_string();
    config.movie.movie_output = false;

    let cfg = Arc::new(RwLock::new(config));
    let registry = mjpeg_stream::StreamRegistry::new();
    let factory = Arc::new(movie_writer::FfmpegFactory::new("mpeg4"));
    let handle = spawn_camera(cfg, registry.clone(), factory, false);

    // Keep the "camera" alive by rewriting the file.
    let feeder_file = cam_file.clone();
    let feeder = std::thread::spawn(move || {
        for luma in 0..20u8 {
            std::thread::sleep(Duration::from_millis(150));
            write_jpeg(&feeder_file, 100 + luma % 3);
        }
    });

    // The camera registers itself with the stream registry.
    let deadline = Instant::now() + Duration::from_secs(10);
    while registry.get(1).is_none() {
        assert!(Instant::now() < deadline, "camera never registered");
        std::thread::sleep(Duration::from_millis(50));
    }

    // Ask for a snapshot and wait for it to land.
    handle.flags.snapshot_request.store(true, Ordering::SeqCst);
    let snap_path = target.join("snap.jpg");
    let deadline = Instant::now() + Duration::from_secs(10);
    while !snap_path.exists() {
        assert!(Instant::now() < deadline, "snapshot never written");
        std::thread::sleep(Duration::from_millis(50));
    }

    // Graceful shutdown within the grace period.
    handle.request_finish();
    let deadline = Instant::now() + Duration::from_secs(8);
    while !handle.join.is_finished() {
        assert!(Instant::now() < deadline, "camera thread ignored shutdown");
        std::thread::sleep(Duration::from_millis(50));
    }
    handle.join.join().unwrap();
    feeder.join().unwrap();
    assert!(registry.get(1).is_none(), "camera unregistered on stop");
}
