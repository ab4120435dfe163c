//! User shell hooks. Each hook detaches into its own session so a
//! long-running script never stalls the pipeline.

use std::process::{Command, Stdio};

use tracing::{debug, warn};

/// Spawn `command` under `/bin/sh -c`, detached. Returns immediately; a
/// small reaper thread collects the exit status so no zombies accumulate.
pub fn spawn_hook(command: &str) {
    debug!("executing external command {command:?}");
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;
        cmd.pre_exec(|| {
            // Detach from the daemon's session.
            libc::setsid();
            Ok(())
        });
    }

    match cmd.spawn() {
        Ok(mut child) => {
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(e) => {
            warn!("unable to start external command {command:?}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_runs_detached() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        spawn_hook(&format!("touch {}", marker.display()));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !marker.exists() {
            assert!(std::time::Instant::now() < deadline, "hook never ran");
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    }
}
