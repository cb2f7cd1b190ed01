//! Wire format for the message channel.
//!
//! Frames are a Content-Length header block, a blank line, and a JSON body,
//! in the style of the language server protocol. This module is pure codec:
//! no I/O, no ids, no state. The channel owns id allocation.

use serde_json::Value;

use crate::error::SessionError;

/// Largest body a frame may announce. Larger announcements are a protocol
/// error; no real server message comes close.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// An error object carried in a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// A call expecting exactly one response with the same id.
    Request {
        id: i64,
        method: String,
        params: Value,
    },
    /// The answer to a request, carrying a result or an error.
    Response {
        id: i64,
        result: Option<Value>,
        error: Option<RpcError>,
    },
    /// A one-way message; no response follows.
    Notification { method: String, params: Value },
}

/// Wrap a serialized body in a Content-Length frame.
pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 32);
    frame.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    frame.extend_from_slice(body.as_bytes());
    frame
}

/// Serialize a request body.
pub fn encode_request(id: i64, method: &str, params: Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

/// Serialize a notification body.
pub fn encode_notification(method: &str, params: Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
    .to_string()
}

/// Serialize a successful response body.
pub fn encode_response(id: i64, result: Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
    .to_string()
}

/// Serialize an error response body.
pub fn encode_error_response(id: i64, code: i32, message: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
    .to_string()
}

/// Parse one header line, returning the announced body length if the line is
/// the Content-Length header.
pub fn header_content_length(line: &str) -> Option<usize> {
    line.trim()
        .strip_prefix("Content-Length:")
        .and_then(|rest| rest.trim().parse().ok())
}

/// Decode a JSON body into a [`WireMessage`].
///
/// Classification follows the id and method fields: both present is a
/// request, id alone is a response, method alone is a notification. A body
/// with neither is a protocol error, as is a non-integer id.
pub fn decode_message(body: &str) -> Result<WireMessage, SessionError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| SessionError::Serialization(e.to_string()))?;

    let id = value.get("id");
    let method = value.get("method").and_then(Value::as_str);

    match (id, method) {
        (Some(id), Some(method)) => Ok(WireMessage::Request {
            id: integer_id(id)?,
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        }),
        (Some(id), None) => Ok(WireMessage::Response {
            id: integer_id(id)?,
            result: value.get("result").cloned(),
            error: value.get("error").map(rpc_error_from_value),
        }),
        (None, Some(method)) => Ok(WireMessage::Notification {
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        }),
        (None, None) => Err(SessionError::Protocol(
            "message has neither id nor method".to_string(),
        )),
    }
}

/// Decode one frame from the front of `input`.
///
/// Returns the message and the number of bytes consumed, or `Ok(None)` when
/// `input` does not yet hold a complete frame. A frame announcing more than
/// [`MAX_FRAME_LENGTH`] bytes is rejected without waiting for the body.
pub fn decode_frame(input: &[u8]) -> Result<Option<(WireMessage, usize)>, SessionError> {
    let header_end = match find_subslice(input, b"\r\n\r\n") {
        Some(pos) => pos,
        None => return Ok(None),
    };
    let header = std::str::from_utf8(&input[..header_end])
        .map_err(|_| SessionError::Protocol("header block is not valid UTF-8".to_string()))?;

    let mut length = None;
    for line in header.split("\r\n") {
        if let Some(len) = header_content_length(line) {
            length = Some(len);
        }
    }
    let length = length
        .ok_or_else(|| SessionError::Protocol("missing Content-Length header".to_string()))?;
    if length > MAX_FRAME_LENGTH {
        return Err(SessionError::Protocol(format!(
            "announced body of {} bytes exceeds the {} byte limit",
            length, MAX_FRAME_LENGTH
        )));
    }

    let body_start = header_end + 4;
    if input.len() < body_start + length {
        return Ok(None);
    }
    let body = std::str::from_utf8(&input[body_start..body_start + length])
        .map_err(|_| SessionError::Protocol("frame body is not valid UTF-8".to_string()))?;
    let message = decode_message(body)?;
    Ok(Some((message, body_start + length)))
}

fn integer_id(id: &Value) -> Result<i64, SessionError> {
    id.as_i64()
        .ok_or_else(|| SessionError::Protocol(format!("non-integer message id: {}", id)))
}

fn rpc_error_from_value(value: &Value) -> RpcError {
    let code = value.get("code").and_then(Value::as_i64).unwrap_or(0) as i32;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());
    RpcError { code, message }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
