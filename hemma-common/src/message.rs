//! Schema-less bus message.
//!
//! Every transport carries the same shape: a map of string keys to CBOR
//! values. Only a handful of keys carry meaning for routing:
//!
//! | key       | meaning                                              |
//! |-----------|------------------------------------------------------|
//! | `name`    | present on requests                                  |
//! | `id`      | present on requests and replies                      |
//! | `args`    | request arguments, defaults to `{}` when forwarded   |
//! | `address` | informational only, never used for routing           |
//! | `data`    | broadcast payload, or `[name, time, payload]`        |
//! | `error`   | present on failure replies                           |

use std::collections::BTreeMap;

pub use ciborium::Value;
use serde::{Deserialize, Serialize};

pub const KEY_NAME: &str = "name";
pub const KEY_ID: &str = "id";
pub const KEY_ARGS: &str = "args";
pub const KEY_ADDRESS: &str = "address";
pub const KEY_DATA: &str = "data";
pub const KEY_TIME: &str = "time";
pub const KEY_ERROR: &str = "error";

/// How a message is treated by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has a `name` key.
    Request,
    /// Has an `id` key and no `name` key.
    Reply,
    /// Has a `data` key and is neither a request nor a reply.
    Broadcast,
    /// None of the recognized keys.
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Reply => "reply",
            MessageKind::Broadcast => "broadcast",
            MessageKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message travelling over the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    fields: BTreeMap<String, Value>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Error reply carrying only an `error` field.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::new().with(KEY_ERROR, Value::Text(reason.into()))
    }

    /// Classify this message. Checks are applied in priority order.
    pub fn kind(&self) -> MessageKind {
        if self.contains_key(KEY_NAME) {
            MessageKind::Request
        } else if self.contains_key(KEY_ID) {
            MessageKind::Reply
        } else if self.contains_key(KEY_DATA) {
            MessageKind::Broadcast
        } else {
            MessageKind::Unknown
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// The `name` field, when it is text.
    pub fn name(&self) -> Option<&str> {
        self.get(KEY_NAME).and_then(Value::as_text)
    }

    /// The raw `id` field, whatever its type.
    pub fn id(&self) -> Option<&Value> {
        self.get(KEY_ID)
    }

    /// The `id` field as an unsigned integer.
    pub fn id_u64(&self) -> Option<u64> {
        self.id()
            .and_then(Value::as_integer)
            .and_then(|id| u64::try_from(id).ok())
    }

    /// Replace the `id` field, returning the previous value.
    pub fn replace_id(&mut self, id: impl Into<Value>) -> Option<Value> {
        self.insert(KEY_ID, id)
    }

    /// Insert an empty `args` map unless the message already has `args`.
    pub fn ensure_args(&mut self) {
        self.fields
            .entry(KEY_ARGS.to_string())
            .or_insert_with(|| Value::Map(Vec::new()));
    }

    /// The `address` field, when it is text.
    pub fn address(&self) -> Option<&str> {
        self.get(KEY_ADDRESS).and_then(Value::as_text)
    }

    /// Unpack an event tuple carried in `data`.
    ///
    /// When `data` is a 3-element array `[name, time, payload]`, it is
    /// replaced by `name`, `time` and `data` fields. Returns whether the
    /// message was reshaped.
    pub fn unpack_event(&mut self) -> bool {
        let is_event = matches!(self.get(KEY_DATA), Some(Value::Array(items)) if items.len() == 3);
        if !is_event {
            return false;
        }

        let Some(Value::Array(items)) = self.fields.remove(KEY_DATA) else {
            return false;
        };
        let [name, time, payload]: [Value; 3] = match items.try_into() {
            Ok(parts) => parts,
            Err(_) => return false,
        };

        self.fields.insert(KEY_NAME.to_string(), name);
        self.fields.insert(KEY_TIME.to_string(), time);
        self.fields.insert(KEY_DATA.to_string(), payload);
        true
    }
}

impl From<BTreeMap<String, Value>> for Message {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

impl IntoIterator for Message {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
