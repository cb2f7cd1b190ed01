//! Framed message channel over a server's stdio.
//!
//! A channel owns two background tasks. The writer task drains a queue of
//! encoded frames into the server's stdin. The read loop, started by
//! [`MessageChannel::listen`], pulls Content-Length frames off stdout and
//! hands each decoded message to the dispatcher. Once the channel closes,
//! whether by EOF, a malformed frame, or [`MessageChannel::dispose`], every
//! pending request fails with [`SessionError::ChannelClosed`] and no further
//! traffic is accepted.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dispatcher::{Dispatcher, NotificationHandler, Resolution};
use crate::error::SessionError;
use crate::transport;

/// Boxed reader consumed by the read loop.
type FrameSource = Box<dyn AsyncRead + Send + Unpin>;

/// Outbound frames queued ahead of the writer task.
const WRITE_QUEUE_DEPTH: usize = 64;

/// Bidirectional message channel with request correlation.
///
/// The dispatcher sits behind a synchronous mutex: every critical section is
/// a short map operation, and the read loop's cleanup guard must be able to
/// close it from a `Drop` impl, which cannot await.
pub struct MessageChannel {
    writer_tx: mpsc::Sender<Vec<u8>>,
    dispatcher: Arc<StdMutex<Dispatcher>>,
    reader: StdMutex<Option<FrameSource>>,
    read_task: StdMutex<Option<JoinHandle<()>>>,
    writer_task: StdMutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    next_id: AtomicI64,
}

impl MessageChannel {
    /// Build a channel over the server's streams and start the writer task.
    ///
    /// Incoming messages are not processed until [`listen`] is called.
    ///
    /// [`listen`]: MessageChannel::listen
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(frame) = writer_rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        Self {
            writer_tx,
            dispatcher: Arc::new(StdMutex::new(Dispatcher::new())),
            reader: StdMutex::new(Some(Box::new(reader))),
            read_task: StdMutex::new(None),
            writer_task: StdMutex::new(Some(writer_task)),
            closed: Arc::new(AtomicBool::new(false)),
            next_id: AtomicI64::new(1),
        }
    }

    /// Start the read loop. Calling this more than once has no effect.
    pub fn listen(&self) {
        let reader = match lock_slot(&self.reader).take() {
            Some(reader) => reader,
            None => {
                debug!("listen called on a channel that is already listening");
                return;
            }
        };
        let dispatcher = self.dispatcher.clone();
        let closed = self.closed.clone();
        let handle = tokio::spawn(read_loop(reader, dispatcher, closed));
        *lock_slot(&self.read_task) = Some(handle);
    }

    /// Send a request and wait for the response that carries its id.
    ///
    /// Ids are unique for the lifetime of the channel. An error response
    /// maps to [`SessionError::Rpc`]; a channel that closes while the
    /// request is in flight fails it with [`SessionError::ChannelClosed`].
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        if self.is_closed() {
            return Err(SessionError::ChannelClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = transport::encode_request(id, method, params);

        let rx = match lock_slot(&self.dispatcher).register(id) {
            Some(rx) => rx,
            None => return Err(SessionError::ChannelClosed),
        };

        if self.writer_tx.send(transport::encode_frame(&body)).await.is_err() {
            lock_slot(&self.dispatcher).discard(id);
            return Err(SessionError::ChannelClosed);
        }
        debug!(id, method = %method, "request sent");

        match rx.await {
            Ok(Resolution::Success(value)) => Ok(value),
            Ok(Resolution::Failure(error)) => Err(SessionError::Rpc {
                code: error.code,
                message: error.message,
            }),
            Err(_) => Err(SessionError::ChannelClosed),
        }
    }

    /// Send a one-way notification.
    pub async fn send(&self, method: &str, params: Value) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::ChannelClosed);
        }
        let body = transport::encode_notification(method, params);
        self.writer_tx
            .send(transport::encode_frame(&body))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        debug!(method = %method, "notification sent");
        Ok(())
    }

    /// Set the callback for server notifications.
    pub fn on_notification(&self, handler: NotificationHandler) {
        lock_slot(&self.dispatcher).set_notification_handler(handler);
    }

    /// Tear the channel down: stop both tasks and fail every pending
    /// request with [`SessionError::ChannelClosed`]. Safe to call any number
    /// of times, on a live or an already-closed channel.
    pub fn dispose(&self) {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if let Some(task) = lock_slot(&self.read_task).take() {
            task.abort();
        }
        if let Some(task) = lock_slot(&self.writer_task).take() {
            task.abort();
        }
        let dropped = lock_slot(&self.dispatcher).close();
        if dropped > 0 {
            debug!(pending = dropped, "disposed channel with requests in flight");
        }
        if first {
            debug!("channel disposed");
        }
    }

    /// Whether the channel has stopped, by disposal or a dead peer.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes the channel when the read loop ends, including when the task
/// panics or is aborted. Without the guard a panicked loop would leave
/// pending requests waiting forever.
struct ReadGuard {
    dispatcher: Arc<StdMutex<Dispatcher>>,
    closed: Arc<AtomicBool>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = lock_slot(&self.dispatcher).close();
        if dropped > 0 {
            debug!(pending = dropped, "read loop ended with requests in flight");
        }
    }
}

/// Pull frames off the server's stdout until EOF or a malformed frame. The
/// guard closes the dispatcher on the way out so pending requests fail
/// instead of hanging.
async fn read_loop(reader: FrameSource, dispatcher: Arc<StdMutex<Dispatcher>>, closed: Arc<AtomicBool>) {
    let _guard = ReadGuard {
        dispatcher: dispatcher.clone(),
        closed,
    };
    let mut reader = BufReader::new(reader);
    loop {
        let mut content_length = None;
        let headers_complete = loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => break false,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "channel read failed");
                    break false;
                }
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break true;
            }
            if let Some(length) = transport::header_content_length(trimmed) {
                content_length = Some(length);
            }
        };
        if !headers_complete {
            break;
        }

        // The announced length is untrusted; it must not reach the
        // allocation below unchecked.
        let length = match content_length {
            Some(length) if length <= transport::MAX_FRAME_LENGTH => length,
            Some(length) => {
                warn!(length, "frame announces an impossible body length, closing channel");
                break;
            }
            None => {
                warn!("frame without Content-Length header, closing channel");
                break;
            }
        };

        let mut body = vec![0u8; length];
        if reader.read_exact(&mut body).await.is_err() {
            break;
        }
        let body = match String::from_utf8(body) {
            Ok(text) => text,
            Err(_) => {
                warn!("frame body is not valid UTF-8, closing channel");
                break;
            }
        };

        match transport::decode_message(&body) {
            Ok(message) => lock_slot(&dispatcher).dispatch(message),
            Err(e) => {
                warn!(error = %e, "undecodable message, closing channel");
                break;
            }
        }
    }
}

/// Lock a slot, recovering the guard if a panicking task poisoned it.
fn lock_slot<T>(slot: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|poison| poison.into_inner())
}
