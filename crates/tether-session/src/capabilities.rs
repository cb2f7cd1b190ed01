//! Server capability set captured during the handshake.

use serde_json::Value;

/// The capabilities a server declared in its initialize response.
///
/// Kept as the raw JSON value the server sent: servers differ wildly in
/// shape, and consumers mostly ask "is this feature there at all". A server
/// that declares nothing gets an empty set, which answers no to everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Capabilities {
    raw: Value,
}

impl Capabilities {
    /// The empty capability set.
    pub fn empty() -> Self {
        Self { raw: Value::Null }
    }

    /// Extract the capability set from an initialize result.
    ///
    /// A result without a capabilities field yields the empty set.
    pub fn from_initialize_result(result: &Value) -> Self {
        match result.get("capabilities") {
            Some(caps) => Self { raw: caps.clone() },
            None => Self::empty(),
        }
    }

    /// Whether the server declared nothing.
    pub fn is_empty(&self) -> bool {
        match &self.raw {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Look up a single capability entry by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// Whether the named capability is enabled.
    ///
    /// A boolean entry speaks for itself; an object entry counts as enabled
    /// since servers use option objects for features they support.
    pub fn supports(&self, name: &str) -> bool {
        self.raw
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || self.raw.get(name).is_some_and(Value::is_object)
    }

    /// The raw JSON value as the server sent it.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}
