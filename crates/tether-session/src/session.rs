//! Session lifecycle management.
//!
//! A [`SessionManager`] owns at most one server process at a time. Callers
//! ask for a live channel through [`SessionManager::ensure_active`]; the
//! manager decides whether the running server still fits the file's context
//! or has to be torn down and relaunched. Calls are serialized, so two
//! concurrent callers can never race a second process into existence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capabilities::Capabilities;
use crate::channel::MessageChannel;
use crate::error::SessionError;
use crate::handshake::Handshake;
use crate::launcher::{ByteReader, LaunchedServer, Launcher, ProcessLauncher, ServerProcess};
use crate::types::{ServerSpec, SessionOptions};

/// Lifecycle state of a managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No server process.
    Idle,
    /// Launch and handshake in flight.
    Starting,
    /// Live channel with a completed handshake.
    Active,
    /// Tearing down the previous server before launching a new one.
    Restarting,
}

/// The live server pairing and the context it was started for.
///
/// Process and channel are set together on a successful start and cleared
/// together on teardown; one without the other never escapes the lock.
struct Session {
    state: SessionState,
    process: Option<Box<dyn ServerProcess>>,
    channel: Option<Arc<MessageChannel>>,
    stderr_task: Option<JoinHandle<()>>,
    last_working_dir: Option<PathBuf>,
    last_root_path: Option<PathBuf>,
    capabilities: Capabilities,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            process: None,
            channel: None,
            stderr_task: None,
            last_working_dir: None,
            last_root_path: None,
            capabilities: Capabilities::empty(),
        }
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            debug!(from = ?self.state, to = ?to, "session state change");
            self.state = to;
        }
    }

    /// The live channel, if the stored context matches and it is still open.
    fn reusable_channel(&self, working_dir: &Path, root_path: &Path) -> Option<Arc<MessageChannel>> {
        let channel = self.channel.as_ref()?;
        if channel.is_closed() {
            return None;
        }
        let same_context = self.last_working_dir.as_deref() == Some(working_dir)
            && self.last_root_path.as_deref() == Some(root_path);
        same_context.then(|| channel.clone())
    }

    /// Kill and dispose whatever is live. Best effort; never fails.
    fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.dispose();
        }
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill() {
                debug!(error = %e, "kill failed, process already gone");
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.last_working_dir = None;
        self.last_root_path = None;
        self.capabilities = Capabilities::empty();
    }
}

/// Manages one logical server connection across context changes.
pub struct SessionManager {
    spec: ServerSpec,
    options: SessionOptions,
    launcher: Arc<dyn Launcher>,
    session: Mutex<Session>,
}

impl SessionManager {
    /// Manager that launches real OS processes.
    pub fn new(spec: ServerSpec, options: SessionOptions) -> Self {
        Self::with_launcher(spec, options, Arc::new(ProcessLauncher))
    }

    /// Manager with a custom launch seam.
    pub fn with_launcher(
        spec: ServerSpec,
        options: SessionOptions,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            spec,
            options,
            launcher,
            session: Mutex::new(Session::new()),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state
    }

    /// Capabilities captured by the most recent handshake. Empty when no
    /// session is active.
    pub async fn capabilities(&self) -> Capabilities {
        self.session.lock().await.capabilities.clone()
    }

    /// Hand back a live channel valid for `file`, starting or restarting the
    /// server as needed.
    ///
    /// The server is reused when the file resolves to the same working
    /// directory and root path the running server was started for. Any
    /// change in either, or a channel that died underneath us, tears the old
    /// server down and launches a fresh one. Concurrent calls are
    /// serialized; a failed start leaves the manager Idle.
    pub async fn ensure_active(&self, file: &Path) -> Result<Arc<MessageChannel>, SessionError> {
        let mut session = self.session.lock().await;

        let working_dir = (self.options.working_dir)(file).await?;
        let root_path = (self.options.root_path)(file).await?;

        if let Some(channel) = session.reusable_channel(&working_dir, &root_path) {
            debug!(working_dir = %working_dir.display(), "context unchanged, reusing server");
            return Ok(channel);
        }

        if session.channel.is_some() || session.process.is_some() {
            session.transition(SessionState::Restarting);
            info!(
                working_dir = %working_dir.display(),
                root_path = %root_path.display(),
                "context changed, restarting server"
            );
            session.teardown();
        }

        session.transition(SessionState::Starting);
        match self.start(&mut session, &working_dir, &root_path).await {
            Ok(channel) => {
                session.transition(SessionState::Active);
                Ok(channel)
            }
            Err(e) => {
                session.transition(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// Launch, wire up, and initialize a new server. On success the session
    /// fields are populated as one unit; on failure everything launched here
    /// is reclaimed and the session is left untouched.
    async fn start(
        &self,
        session: &mut Session,
        working_dir: &Path,
        root_path: &Path,
    ) -> Result<Arc<MessageChannel>, SessionError> {
        let LaunchedServer {
            process,
            stdin,
            stdout,
            stderr,
        } = self.launcher.launch(&self.spec, working_dir)?;
        let pid = process.id();

        let stderr_task = tokio::spawn(forward_stderr(pid, stderr));

        let channel = Arc::new(MessageChannel::new(stdout, stdin));
        channel.listen();

        let handshake = Handshake {
            client_name: self.options.client_name.clone(),
            timeout: self.options.handshake_timeout,
        };
        let capabilities = match handshake.execute(&channel, root_path).await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                channel.dispose();
                let mut process = process;
                if let Err(kill_err) = process.kill() {
                    debug!(error = %kill_err, "kill after failed handshake");
                }
                stderr_task.abort();
                return Err(e);
            }
        };

        session.process = Some(process);
        session.channel = Some(channel.clone());
        session.stderr_task = Some(stderr_task);
        session.last_working_dir = Some(working_dir.to_path_buf());
        session.last_root_path = Some(root_path.to_path_buf());
        session.capabilities = capabilities;
        info!(pid, root_path = %root_path.display(), "session active");
        Ok(channel)
    }

    /// Tear the session down and return to Idle. Idempotent: ending an idle
    /// manager, or one whose server already died, is a no-op.
    pub async fn end(&self) {
        let mut session = self.session.lock().await;
        if session.process.is_none() && session.channel.is_none() {
            debug!("end called while idle");
            session.transition(SessionState::Idle);
            return;
        }
        info!("ending server session");
        session.teardown();
        session.transition(SessionState::Idle);
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("spec", &self.spec)
            .finish()
    }
}

/// Forward server stderr lines to the log. Diagnostic text only; stderr is
/// never parsed as protocol traffic.
async fn forward_stderr(pid: u32, stderr: ByteReader) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(pid, "server stderr: {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(pid, error = %e, "stderr stream ended");
                break;
            }
        }
    }
}
