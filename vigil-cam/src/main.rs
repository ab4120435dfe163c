//! Process entry: configuration, logging, the camera fleet, the HTTP
//! control plane, signals and the shutdown barrier.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use eyre::WrapErr;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use movie_writer::FfmpegFactory;
use vigil_config::{Args, Config};

use vigil_cam::camera::{self, CameraHandle};
use vigil_cam::web::{self, CameraControl, ControlState};

/// How long shutdown waits for each camera thread before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(8);

fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let config_path = find_config(&args)?;
    let mut loaded = vigil_config::load(&config_path)
        .wrap_err_with(|| format!("loading {}", config_path.display()))?;
    args.apply_overrides(&mut loaded.main);
    for cam in &mut loaded.cameras {
        args.apply_overrides(cam);
    }

    if loaded.main.system.daemon {
        daemonize()?;
    }

    init_logging(&loaded.main)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        cameras = loaded.cameras.len(),
        "starting"
    );

    let _pid_guard = write_pid_file(&loaded.main)?;

    let runtime = tokio::runtime::Runtime::new().wrap_err("starting the async runtime")?;
    runtime.block_on(run(args, config_path, loaded))
}

async fn run(
    args: Args,
    config_path: std::path::PathBuf,
    loaded: vigil_config::LoadedConfig,
) -> eyre::Result<()> {
    let registry = mjpeg_stream::StreamRegistry::new();

    let mut cameras: Vec<CameraHandle> = Vec::new();
    let mut controls: Vec<Arc<CameraControl>> = Vec::new();
    for cam_cfg in &loaded.cameras {
        let cfg = Arc::new(RwLock::new(cam_cfg.clone()));
        let factory = Arc::new(FfmpegFactory::new(&cam_cfg.movie.movie_codec));
        let handle = camera::spawn_camera(cfg.clone(), registry.clone(), factory, args.pause);
        controls.push(Arc::new(CameraControl {
            camera_id: handle.camera_id,
            cfg,
            flags: handle.flags.clone(),
        }));
        cameras.push(handle);
    }

    let control_state = ControlState {
        cameras: Arc::new(controls),
    };

    // Watchdog: recycle a camera whose pipeline stops advancing.
    let watchdog_cameras: Vec<_> = cameras
        .iter()
        .map(|c| (c.camera_id, c.cfg.clone(), c.flags.clone(), c.last_progress.clone()))
        .collect();
    tokio::spawn(watchdog(watchdog_cameras));

    let app = mjpeg_stream::router(registry.clone()).merge(web::router(control_state.clone()));
    let port = loaded.main.web.webcontrol_port as u16;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .wrap_err_with(|| format!("binding web control port {port}"))?;
    info!(port, "web control listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    wait_for_signals(&control_state, &config_path).await;

    info!("shutting down");
    for cam in &cameras {
        cam.request_finish();
    }
    for cam in cameras {
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while !cam.join.is_finished() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if cam.join.is_finished() {
            let _ = cam.join.join();
        } else {
            // Keep tearing down regardless; log the orphan.
            warn!(camera = cam.camera_id, "camera thread ignored shutdown, abandoning");
        }
    }
    let _ = shutdown_tx.send(());
    let _ = server.await;
    info!("bye");
    Ok(())
}

/// Block until a termination signal. SIGHUP reloads configuration in
/// place; SIGUSR1 dumps state.
async fn wait_for_signals(control: &ControlState, config_path: &std::path::Path) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut hup = signal(SignalKind::hangup()).expect("installing SIGHUP handler");
    let mut usr1 = signal(SignalKind::user_defined1()).expect("installing SIGUSR1 handler");

    loop {
        tokio::select! {
            _ = term.recv() => return,
            _ = int.recv() => return,
            _ = hup.recv() => reload_config(control, config_path),
            _ = usr1.recv() => dump_state(control),
        }
    }
}

fn reload_config(control: &ControlState, config_path: &std::path::Path) {
    info!("SIGHUP: reloading configuration");
    match vigil_config::load(config_path) {
        Ok(reloaded) => {
            if reloaded.cameras.len() != control.cameras.len() {
                warn!("camera count changed; additions and removals need a full restart");
            }
            for (cam, new_cfg) in control.cameras.iter().zip(reloaded.cameras) {
                *cam.cfg.write() = new_cfg;
                cam.flags.recycle.store(true, Ordering::SeqCst);
            }
        }
        Err(e) => error!("reload failed, keeping running configuration: {e}"),
    }
}

fn dump_state(control: &ControlState) {
    for cam in control.cameras.iter() {
        let cfg = cam.cfg.read();
        info!(
            camera = cam.camera_id,
            name = %cfg.system.camera_name,
            paused = cam.flags.pause.load(Ordering::SeqCst),
            "state dump"
        );
    }
}

type WatchdogEntry = (
    u32,
    Arc<RwLock<Config>>,
    Arc<camera::CameraFlags>,
    Arc<parking_lot::Mutex<Instant>>,
);

async fn watchdog(cameras: Vec<WatchdogEntry>) {
    let mut stalled: Vec<bool> = vec![false; cameras.len()];
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        for (idx, (camera_id, cfg, flags, progress)) in cameras.iter().enumerate() {
            let (tmo, kill) = {
                let cfg = cfg.read();
                (cfg.source.device_tmo.max(1), cfg.source.watchdog_kill.max(1))
            };
            let idle = progress.lock().elapsed();
            if idle > Duration::from_secs(kill as u64) {
                error!(camera = camera_id, ?idle, "watchdog: recycling stalled camera");
                flags.recycle.store(true, Ordering::SeqCst);
                *progress.lock() = Instant::now();
                stalled[idx] = false;
            } else if idle > Duration::from_secs(tmo as u64) {
                if !stalled[idx] {
                    warn!(camera = camera_id, ?idle, "watchdog: pipeline stalled");
                    stalled[idx] = true;
                }
            } else {
                stalled[idx] = false;
            }
        }
    }
}

fn find_config(args: &Args) -> eyre::Result<std::path::PathBuf> {
    if let Some(path) = &args.config {
        return Ok(path.clone());
    }
    let candidates = [
        std::path::PathBuf::from("vigil.conf"),
        home_config(),
        std::path::PathBuf::from("/etc/vigil/vigil.conf"),
    ];
    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }
    eyre::bail!(
        "no configuration file found (searched {:?}); use -c",
        candidates
    )
}

fn home_config() -> std::path::PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => std::path::Path::new(&home).join(".vigil/vigil.conf"),
        None => std::path::PathBuf::from(".vigil/vigil.conf"),
    }
}

fn init_logging(cfg: &Config) -> eyre::Result<()> {
    use tracing_subscriber::EnvFilter;
    let default_level = match cfg.system.log_level {
        0..=2 => "error",
        3..=4 => "warn",
        5..=6 => "info",
        7..=8 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if cfg.system.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.system.log_file)
            .wrap_err_with(|| format!("opening log file {}", cfg.system.log_file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Arc::new(file))
            .with_ansi(false)
            .init();
    }
    Ok(())
}

/// Removes the pid file when dropped.
struct PidGuard(Option<std::path::PathBuf>);

impl Drop for PidGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn write_pid_file(cfg: &Config) -> eyre::Result<PidGuard> {
    if cfg.system.pid_file.is_empty() {
        return Ok(PidGuard(None));
    }
    let path = std::path::PathBuf::from(&cfg.system.pid_file);
    std::fs::write(&path, format!("{}\n", std::process::id()))
        .wrap_err_with(|| format!("creating pid file {}", path.display()))?;
    Ok(PidGuard(Some(path)))
}

/// Classic double fork plus setsid; stdio goes to /dev/null.
fn daemonize() -> eyre::Result<()> {
    #[cfg(unix)]
    unsafe {
        match libc::fork() {
            -1 => eyre::bail!("fork failed"),
            0 => {}
            _ => std::process::exit(0),
        }
        if libc::setsid() == -1 {
            eyre::bail!("setsid failed");
        }
        match libc::fork() {
            -1 => eyre::bail!("second fork failed"),
            0 => {}
            _ => std::process::exit(0),
        }
        let devnull = std::ffi::CString::new("/dev/null").expect("static string");
        let fd = libc::open(devnull.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            libc::dup2(fd, 0);
            libc::dup2(fd, 1);
            libc::dup2(fd, 2);
            if fd > 2 {
                libc::close(fd);
            }
        }
    }
    Ok(())
}
