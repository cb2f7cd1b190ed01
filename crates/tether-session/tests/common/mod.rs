//! Shared test harness: a scripted in-memory server behind the launcher seam.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};

use tether_session::transport::{self, WireMessage};
use tether_session::{
    ByteReader, ByteWriter, LaunchedServer, Launcher, ServerProcess, ServerSpec, SessionError,
};

/// How the scripted server treats the initialize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerScript {
    /// Answer with a capability set and keep serving.
    Initialize,
    /// Answer after a pause; lets tests overlap concurrent callers.
    DelayedInitialize(Duration),
    /// Answer the handshake, then drop the connection.
    InitializeThenExit,
    /// Answer with an error response.
    RejectInitialize,
    /// Never answer anything.
    Silent,
}

/// Everything the fake observed, shared with the test body.
#[derive(Default)]
pub struct FakeRecord {
    /// Number of launches performed.
    pub launches: AtomicUsize,
    /// Number of kill calls received.
    pub kills: AtomicUsize,
    /// Working directory of each launch, in order.
    pub working_dirs: Mutex<Vec<PathBuf>>,
    /// rootPath carried by each initialize request, in order.
    pub init_roots: Mutex<Vec<String>>,
}

/// Launcher that wires the session manager to a scripted in-memory server.
pub struct FakeLauncher {
    pub script: ServerScript,
    pub record: Arc<FakeRecord>,
}

impl FakeLauncher {
    pub fn new(script: ServerScript) -> Self {
        Self {
            script,
            record: Arc::new(FakeRecord::default()),
        }
    }
}

impl Launcher for FakeLauncher {
    fn launch(
        &self,
        spec: &ServerSpec,
        working_dir: &Path,
    ) -> Result<LaunchedServer, SessionError> {
        // Validate the spec the way the real launcher does.
        spec.resolve_command()?;

        let count = self.record.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.record
            .working_dirs
            .lock()
            .unwrap()
            .push(working_dir.to_path_buf());

        let (client_io, server_io) = tokio::io::duplex(4096);
        let (stdout, stdin) = tokio::io::split(client_io);
        tokio::spawn(run_scripted_server(
            server_io,
            self.script,
            self.record.clone(),
        ));

        Ok(LaunchedServer {
            process: Box::new(FakeProcess {
                pid: 4000 + count as u32,
                record: self.record.clone(),
            }),
            stdin: Box::new(stdin) as ByteWriter,
            stdout: Box::new(stdout) as ByteReader,
            stderr: Box::new(tokio::io::empty()) as ByteReader,
        })
    }
}

struct FakeProcess {
    pid: u32,
    record: Arc<FakeRecord>,
}

impl ServerProcess for FakeProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.record.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Frame-by-frame server loop: accumulate bytes, peel off complete frames,
/// answer requests per the script.
async fn run_scripted_server(io: DuplexStream, script: ServerScript, record: Arc<FakeRecord>) {
    let (mut read, mut write) = tokio::io::split(io);
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        loop {
            match transport::decode_frame(&buffer) {
                Ok(Some((message, consumed))) => {
                    buffer.drain(..consumed);
                    if !handle_message(&mut write, message, script, &record).await {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        match read.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Answer one message. Returns false when the server should hang up.
async fn handle_message(
    write: &mut WriteHalf<DuplexStream>,
    message: WireMessage,
    script: ServerScript,
    record: &FakeRecord,
) -> bool {
    let (id, method, params) = match message {
        WireMessage::Request { id, method, params } => (id, method, params),
        _ => return true,
    };

    let body = if method == "initialize" {
        if let Some(root) = params.get("rootPath").and_then(Value::as_str) {
            record.init_roots.lock().unwrap().push(root.to_string());
        }
        match script {
            ServerScript::Initialize | ServerScript::InitializeThenExit => {
                default_initialize_response(id)
            }
            ServerScript::DelayedInitialize(delay) => {
                tokio::time::sleep(delay).await;
                default_initialize_response(id)
            }
            ServerScript::RejectInitialize => {
                transport::encode_error_response(id, -32600, "initialize rejected")
            }
            ServerScript::Silent => return true,
        }
    } else {
        // Echo the method back so tests can talk over the channel.
        transport::encode_response(id, json!({"echo": method}))
    };

    if write
        .write_all(&transport::encode_frame(&body))
        .await
        .is_err()
    {
        return false;
    }
    !matches!(script, ServerScript::InitializeThenExit)
}

fn default_initialize_response(id: i64) -> String {
    transport::encode_response(
        id,
        json!({
            "capabilities": {
                "hoverProvider": true,
                "completionProvider": { "triggerCharacters": ["."] }
            }
        }),
    )
}
