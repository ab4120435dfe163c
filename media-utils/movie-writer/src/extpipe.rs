//! The user-defined external encoder pipe: a shell command that receives
//! raw YUV420p frames on stdin, equivalent to `popen(cmd, "w")`.

use std::io::Write;
use std::process::{Child, Command, Stdio};

use tracing::{info, warn};
use yuv_frame::Frame;

use crate::{Error, Result};

pub struct ExtPipe {
    child: Child,
    stdin: Option<std::process::ChildStdin>,
    command: String,
}

impl ExtPipe {
    /// Start the already-template-expanded command under `/bin/sh -c`.
    pub fn open(command: &str) -> Result<Self> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child.stdin.take().expect("stdin was piped");
        info!(command, "extpipe started");
        Ok(Self {
            child,
            stdin: Some(stdin),
            command: command.to_string(),
        })
    }

    /// Write one raw frame. The high-resolution plane set goes through
    /// unmodified; the pipe consumer owns all encoding decisions.
    pub fn put(&mut self, frame: &Frame) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(Error::Closed)?;
        stdin.write_all(frame.data()).map_err(Error::from)
    }

    /// Flush, close stdin and reap the child.
    pub fn close(mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.flush();
        }
        let status = self.child.wait()?;
        if !status.success() {
            warn!(command = self.command, %status, "extpipe exited with failure");
        }
        Ok(())
    }
}
