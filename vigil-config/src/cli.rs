//! Command-line arguments. These override their config-file counterparts.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "vigil", about = "Multi-camera motion detection daemon")]
pub struct Args {
    /// Configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<std::path::PathBuf>,

    /// Run in daemon (background) mode.
    #[arg(short = 'b', long = "background")]
    pub daemon: bool,

    /// Run interactively, overriding `daemon on` in the config.
    #[arg(short = 'n', long = "no-daemon", conflicts_with = "daemon")]
    pub no_daemon: bool,

    /// Log level 1..=9.
    #[arg(short = 'd', long = "log-level")]
    pub log_level: Option<u32>,

    /// Log type filter (all, cor, str, enc, net, dbl, evt, trk, vid).
    #[arg(short = 'k', long = "log-type")]
    pub log_type: Option<String>,

    /// Pid file path.
    #[arg(short = 'p', long = "pid-file")]
    pub pid_file: Option<std::path::PathBuf>,

    /// Log file path.
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<std::path::PathBuf>,

    /// Start with motion detection paused.
    #[arg(short = 'm', long = "pause")]
    pub pause: bool,
}

impl Args {
    /// Fold command-line overrides into a parsed config.
    pub fn apply_overrides(&self, config: &mut crate::Config) {
        if self.daemon {
            config.system.daemon = true;
        }
        if self.no_daemon {
            config.system.daemon = false;
        }
        if let Some(level) = self.log_level {
            config.system.log_level = level.clamp(1, 9);
        }
        if let Some(pid_file) = &self.pid_file {
            config.system.pid_file = pid_file.display().to_string();
        }
        if let Some(log_file) = &self.log_file {
            config.system.log_file = log_file.display().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_flags() {
        let args = Args::parse_from(["vigil", "-c", "/etc/vigil.conf", "-n", "-d", "7", "-m"]);
        assert_eq!(
            args.config.as_deref(),
            Some(std::path::Path::new("/etc/vigil.conf"))
        );
        assert!(args.no_daemon);
        assert!(args.pause);
        assert_eq!(args.log_level, Some(7));
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from(["vigil", "-n", "-d", "12", "-p", "/run/vigil.pid"]);
        let mut cfg = crate::Config::default();
        cfg.system.daemon = true;
        args.apply_overrides(&mut cfg);
        assert!(!cfg.system.daemon);
        assert_eq!(cfg.system.log_level, 9); // clamped
        assert_eq!(cfg.system.pid_file, "/run/vigil.pid");
    }
}
