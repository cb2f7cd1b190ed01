//! Initialization handshake with a freshly launched server.

use std::path::Path;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info};

use crate::capabilities::Capabilities;
use crate::channel::MessageChannel;
use crate::error::SessionError;

/// Method name of the handshake request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Default time allowed for the server to answer the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Performs the one-time initialization exchange on a fresh channel.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Client name reported to the server.
    pub client_name: String,
    /// How long to wait for the initialize response.
    pub timeout: Duration,
}

impl Handshake {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Send the initialize request and capture the declared capabilities.
    ///
    /// Exactly one request goes out per call. A response without a
    /// capabilities field is a successful handshake with an empty set. Every
    /// failure, including timeout and a closed channel, is logged and mapped
    /// to [`SessionError::InitializationFailed`].
    pub async fn execute(
        &self,
        channel: &MessageChannel,
        root_path: &Path,
    ) -> Result<Capabilities, SessionError> {
        let params = serde_json::json!({
            "clientName": self.client_name,
            "rootPath": root_path.to_string_lossy(),
        });

        let result = match timeout(self.timeout, channel.request(INITIALIZE_METHOD, params)).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(error = %e, "initialization request failed");
                return Err(SessionError::InitializationFailed(e.to_string()));
            }
            Err(_) => {
                error!(timeout = ?self.timeout, "initialization timed out");
                return Err(SessionError::InitializationFailed(format!(
                    "no response within {:?}",
                    self.timeout
                )));
            }
        };

        let capabilities = Capabilities::from_initialize_result(&result);
        info!(root_path = %root_path.display(), "server initialized");
        Ok(capabilities)
    }
}
