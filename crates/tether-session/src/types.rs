//! Server specs and session options.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::handshake::DEFAULT_HANDSHAKE_TIMEOUT;

/// Runtime used for module-based servers when none is configured.
pub const DEFAULT_SCRIPT_RUNTIME: &str = "node";

/// Client name reported to servers when none is configured.
pub const DEFAULT_CLIENT_NAME: &str = "tether";

/// Markers that identify a project root directory.
pub const DEFAULT_ROOT_MARKERS: &[&str] = &[".git", "Cargo.toml", "package.json"];

/// Description of a launchable server.
///
/// Exactly one of `command` and `module` must be set: a command is executed
/// directly, a module is a script run through `runtime`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Executable to run directly.
    #[serde(default)]
    pub command: Option<String>,
    /// Script to run through the runtime.
    #[serde(default)]
    pub module: Option<PathBuf>,
    /// Arguments appended after the command or module.
    #[serde(default)]
    pub args: Vec<String>,
    /// Runtime for module-based servers; defaults to node.
    #[serde(default)]
    pub runtime: Option<String>,
}

impl ServerSpec {
    /// Spec for a directly executable server.
    pub fn command(program: impl Into<String>) -> Self {
        Self {
            command: Some(program.into()),
            ..Self::default()
        }
    }

    /// Spec for a script run through the default runtime.
    pub fn module(path: impl Into<PathBuf>) -> Self {
        Self {
            module: Some(path.into()),
            ..Self::default()
        }
    }

    /// Append arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override the module runtime.
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    /// Resolve the spec to the program and argument list to spawn.
    ///
    /// Fails with [`SessionError::Launch`] unless exactly one of command and
    /// module is set.
    pub fn resolve_command(&self) -> Result<(String, Vec<String>), SessionError> {
        match (&self.command, &self.module) {
            (Some(command), None) => Ok((command.clone(), self.args.clone())),
            (None, Some(module)) => {
                let runtime = self.runtime.as_deref().unwrap_or(DEFAULT_SCRIPT_RUNTIME);
                let mut args = vec![module.to_string_lossy().into_owned()];
                args.extend(self.args.iter().cloned());
                Ok((runtime.to_string(), args))
            }
            (Some(_), Some(_)) => Err(SessionError::Launch(
                "server spec sets both command and module".to_string(),
            )),
            (None, None) => Err(SessionError::Launch(
                "server spec has neither command nor module".to_string(),
            )),
        }
    }
}

/// Future returned by a path resolver.
pub type ResolverFuture = Pin<Box<dyn Future<Output = io::Result<PathBuf>> + Send>>;

/// Derives a context path (working directory or project root) from a file.
pub type PathResolver = Box<dyn Fn(&Path) -> ResolverFuture + Send + Sync>;

/// Resolver that uses the file's parent directory.
pub fn parent_dir_resolver() -> PathResolver {
    Box::new(|file| {
        let file = file.to_path_buf();
        Box::pin(async move { Ok(parent_or_current(&file)) })
    })
}

/// Resolver that walks up from the file looking for one of `markers`,
/// falling back to the file's own directory when none is found.
pub fn marker_root_resolver(markers: &[&str]) -> PathResolver {
    let markers: Vec<String> = markers.iter().map(|m| m.to_string()).collect();
    Box::new(move |file| {
        let file = file.to_path_buf();
        let markers = markers.clone();
        Box::pin(async move {
            let start = parent_or_current(&file);
            for dir in start.ancestors() {
                if markers.iter().any(|marker| dir.join(marker).exists()) {
                    return Ok(dir.to_path_buf());
                }
            }
            Ok(start)
        })
    })
}

/// Parent directory of `file`, falling back to the process working directory
/// for bare file names.
fn parent_or_current(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Options controlling a session: client identity, context derivation, and
/// handshake patience.
pub struct SessionOptions {
    /// Client name reported during the handshake.
    pub client_name: String,
    /// Derives the directory the server is launched in.
    pub working_dir: PathResolver,
    /// Derives the project root reported during the handshake.
    pub root_path: PathResolver,
    /// Time allowed for the server to answer the handshake.
    pub handshake_timeout: Duration,
}

impl SessionOptions {
    /// Options with the default resolvers: working directory from the file's
    /// parent, root path from project markers.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            working_dir: parent_dir_resolver(),
            root_path: marker_root_resolver(DEFAULT_ROOT_MARKERS),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Replace the working directory resolver.
    pub fn with_working_dir(mut self, resolver: PathResolver) -> Self {
        self.working_dir = resolver;
        self
    }

    /// Replace the root path resolver.
    pub fn with_root_path(mut self, resolver: PathResolver) -> Self {
        self.root_path = resolver;
        self
    }

    /// Replace the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_NAME)
    }
}
