//! Launching server processes.

use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::types::ServerSpec;

/// Boxed readable stream from a launched server.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writable stream to a launched server.
pub type ByteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Control handle for a launched server process.
pub trait ServerProcess: Send {
    /// OS process id.
    fn id(&self) -> u32;

    /// Best-effort kill. Errors mean the process is already gone or beyond
    /// reach; callers treat both the same.
    fn kill(&mut self) -> io::Result<()>;
}

/// A freshly launched server: control handle plus its stdio streams.
pub struct LaunchedServer {
    /// Handle used to identify and kill the process.
    pub process: Box<dyn ServerProcess>,
    /// Server stdin; the channel writes frames here.
    pub stdin: ByteWriter,
    /// Server stdout; carries protocol frames.
    pub stdout: ByteReader,
    /// Server stderr; diagnostic text, never protocol data.
    pub stderr: ByteReader,
}

/// Something that can launch server processes.
///
/// The session manager goes through this seam so tests can substitute
/// scripted servers for real child processes.
pub trait Launcher: Send + Sync {
    /// Launch the server described by `spec` with `working_dir` as its
    /// current directory.
    fn launch(&self, spec: &ServerSpec, working_dir: &Path)
        -> Result<LaunchedServer, SessionError>;
}

/// Launches real OS processes with piped stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        spec: &ServerSpec,
        working_dir: &Path,
    ) -> Result<LaunchedServer, SessionError> {
        let (program, args) = spec.resolve_command()?;
        let cwd = if working_dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            working_dir
        };

        debug!(program = %program, args = ?args, cwd = %cwd.display(), "spawning server");

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Launch(format!("{}: {}", program, e)))?;

        let pid = match child.id() {
            Some(pid) => pid,
            None => return Err(SessionError::Launch("spawned process has no pid".to_string())),
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Launch("could not capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Launch("could not capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SessionError::Launch("could not capture stderr".to_string()))?;

        info!(pid, program = %program, "server process started");

        Ok(LaunchedServer {
            process: Box::new(ChildProcess { pid, child }),
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }
}

/// Real child process behind the [`ServerProcess`] trait.
struct ChildProcess {
    pid: u32,
    child: Child,
}

impl ServerProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}
