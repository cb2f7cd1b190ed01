//! Session management for external language-analysis servers.
//!
//! This crate launches a server process, frames a JSON-RPC style message
//! channel over its stdio, performs the initialization handshake, and keeps
//! the server alive across requests. When the file under analysis moves to
//! a different working directory or project root, the old server is torn
//! down and a fresh one launched transparently.
//!
//! The entry point is [`SessionManager`]: hand it a [`ServerSpec`] and
//! [`SessionOptions`], then call [`SessionManager::ensure_active`] with the
//! file you are working on to get a live [`MessageChannel`].

pub mod capabilities;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod launcher;
pub mod session;
pub mod transport;
pub mod types;

pub use capabilities::Capabilities;
pub use channel::MessageChannel;
pub use dispatcher::NotificationHandler;
pub use error::SessionError;
pub use handshake::Handshake;
pub use launcher::{ByteReader, ByteWriter, LaunchedServer, Launcher, ProcessLauncher, ServerProcess};
pub use session::{SessionManager, SessionState};
pub use types::{PathResolver, ServerSpec, SessionOptions};
