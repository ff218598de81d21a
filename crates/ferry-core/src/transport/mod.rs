//! Command transport to and from a tracker.
//!
//! Every interaction with either tracker goes through [`Transport`]: one
//! named command, string parameters and optional uploads in, one JSON
//! [`Response`] out. Error payloads are recognised here once, so callers
//! only ever see successful responses.
//!
//! Implementations:
//! - [`memory::MemoryTransport`]: in-memory destination for dry runs and tests.
//! - [`export::ExportTransport`]: read-only source backed by a JSON export.
//! - the HTTP client in the `ferry` binary.

pub mod export;
pub mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

/// Command parameters, keyed by destination field name.
pub type Params = BTreeMap<String, String>;

/// A file to send with a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Failures talking to a tracker.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The tracker answered with an error payload.
    #[error("{endpoint}: `{command}` rejected: {message}")]
    Remote {
        endpoint: String,
        command: String,
        message: String,
    },

    /// The request never produced a usable answer.
    #[error("{endpoint}: `{command}` failed: {message}")]
    Request {
        endpoint: String,
        command: String,
        message: String,
    },

    #[error("{endpoint}: `{command}` response has no '{field}'")]
    MissingField {
        endpoint: String,
        command: String,
        field: String,
    },

    #[error("{endpoint}: `{command}` is not supported")]
    Unsupported { endpoint: String, command: String },

    #[error("{endpoint}: failed to fetch attachment {url}: {message}")]
    Attachment {
        endpoint: String,
        url: String,
        message: String,
    },

    #[error("export {}: {message}", path.display())]
    Export { path: PathBuf, message: String },
}

/// A tracker endpoint that executes commands.
pub trait Transport {
    /// Label used in logs and errors (`source`, `destination`).
    fn name(&self) -> &str;

    /// Execute `command` and return its successful response.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`]; error payloads surface as
    /// [`TransportError::Remote`].
    fn execute(
        &mut self,
        command: &str,
        params: &Params,
        uploads: &[Upload],
    ) -> Result<Response, TransportError>;

    /// Download an attachment by its (already unescaped) retrieval URL.
    ///
    /// # Errors
    ///
    /// [`TransportError::Attachment`] when the content cannot be read.
    fn fetch_attachment(&mut self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// A successful command response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    endpoint: String,
    command: String,
    body: Value,
}

impl Response {
    /// Wrap a decoded body, rejecting error payloads.
    ///
    /// A body is an error if it has an `error` key or a non-empty `errors`
    /// array.
    ///
    /// # Errors
    ///
    /// [`TransportError::Remote`] carrying the tracker's message.
    pub fn from_body(endpoint: &str, command: &str, body: Value) -> Result<Self, TransportError> {
        if let Some(message) = error_message(&body) {
            return Err(TransportError::Remote {
                endpoint: endpoint.to_string(),
                command: command.to_string(),
                message,
            });
        }
        Ok(Self {
            endpoint: endpoint.to_string(),
            command: command.to_string(),
            body,
        })
    }

    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> Value {
        self.body
    }

    /// Id of the created entity, found under `key` at the top level or one
    /// level down (`{"case": {"ixBug": 12}}`).
    ///
    /// # Errors
    ///
    /// [`TransportError::MissingField`] if no string or number is found.
    pub fn created_id(&self, key: &str) -> Result<String, TransportError> {
        let direct = self.body.get(key);
        let nested = || {
            self.body
                .as_object()
                .into_iter()
                .flat_map(|map| map.values())
                .find_map(|value| value.get(key))
        };
        direct
            .or_else(nested)
            .and_then(scalar_text)
            .ok_or_else(|| self.missing(key))
    }

    /// Items of a listed collection, at the top level or under `data`.
    /// A response without the collection lists nothing.
    #[must_use]
    pub fn list(&self, collection: &str) -> &[Value] {
        self.body
            .get(collection)
            .or_else(|| self.body.get("data").and_then(|data| data.get(collection)))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The logon token of a `logon` response.
    ///
    /// # Errors
    ///
    /// [`TransportError::MissingField`] when absent.
    pub fn token(&self) -> Result<String, TransportError> {
        self.created_id("token")
    }

    fn missing(&self, field: &str) -> TransportError {
        TransportError::MissingField {
            endpoint: self.endpoint.clone(),
            command: self.command.clone(),
            field: field.to_string(),
        }
    }
}

/// Text of a JSON string or number; other shapes have no scalar text.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn error_message(body: &Value) -> Option<String> {
    if let Some(error) = body.get("error") {
        return Some(describe(error));
    }
    let errors = body.get("errors")?.as_array()?;
    if errors.is_empty() {
        return None;
    }
    Some(errors.iter().map(describe).collect::<Vec<_>>().join("; "))
}

fn describe(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), String::from),
        other => other.to_string(),
    }
}
