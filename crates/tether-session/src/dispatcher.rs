//! Routing of incoming messages to waiting requests.
//!
//! The dispatcher pairs responses with the request that carries their id and
//! hands notifications to a registered callback. Each id resolves at most
//! once; closing the dispatcher drops every pending sender, which wakes the
//! corresponding waiters with a channel error.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::transport::{RpcError, WireMessage};

/// Callback invoked for every server notification, with method and params.
pub type NotificationHandler = Box<dyn Fn(String, Value) + Send + Sync>;

/// How a single request concluded.
#[derive(Debug)]
pub enum Resolution {
    /// The server answered with a result.
    Success(Value),
    /// The server answered with an error response.
    Failure(RpcError),
}

/// Tracks in-flight requests and the notification callback.
pub struct Dispatcher {
    pending: HashMap<i64, oneshot::Sender<Resolution>>,
    notification_handler: Option<NotificationHandler>,
    closed: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            notification_handler: None,
            closed: false,
        }
    }

    /// Register a request id and get the receiver its resolution arrives on.
    ///
    /// Returns `None` once the dispatcher is closed.
    pub fn register(&mut self, id: i64) -> Option<oneshot::Receiver<Resolution>> {
        if self.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        Some(rx)
    }

    /// Forget a pending id without resolving it. Used when the request could
    /// not be written after registration.
    pub fn discard(&mut self, id: i64) {
        self.pending.remove(&id);
    }

    /// Set the callback for server notifications, replacing any previous one.
    pub fn set_notification_handler(&mut self, handler: NotificationHandler) {
        self.notification_handler = Some(handler);
    }

    /// Route one incoming message.
    pub fn dispatch(&mut self, message: WireMessage) {
        match message {
            WireMessage::Response { id, result, error } => {
                let resolution = match error {
                    Some(error) => Resolution::Failure(error),
                    None => Resolution::Success(result.unwrap_or(Value::Null)),
                };
                match self.pending.remove(&id) {
                    Some(tx) => {
                        // The waiter may have given up; that is not an error.
                        if tx.send(resolution).is_err() {
                            debug!(id, "response arrived after waiter was dropped");
                        }
                    }
                    None => warn!(id, "response for unknown request id"),
                }
            }
            WireMessage::Notification { method, params } => {
                match &self.notification_handler {
                    Some(handler) => handler(method, params),
                    None => debug!(method = %method, "notification with no handler"),
                }
            }
            WireMessage::Request { id, method, .. } => {
                // Server-to-client requests are outside this channel's scope.
                debug!(id, method = %method, "ignoring server-to-client request");
            }
        }
    }

    /// Close the dispatcher: drop every pending sender and refuse further
    /// registrations. Returns how many requests were still pending.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
