//! In-memory tracker used as the dry-run destination and in tests.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Value, json};
use tracing::info;

use super::{Params, Response, Transport, TransportError, Upload};

/// One command as the transport received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: String,
    pub params: Params,
    /// File names of the uploads, in order.
    pub uploads: Vec<String>,
}

/// Tracker stand-in that assigns sequential ids and records every call.
///
/// Creation commands answer like the real tracker (`new` →
/// `{"case": {"ixBug": n}}`); list commands answer with canned bodies
/// registered via [`MemoryTransport::with_response`], or an empty list.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    name: String,
    calls: Vec<RecordedCall>,
    next_ids: BTreeMap<&'static str, u64>,
    canned: HashMap<String, Value>,
    failing: Option<String>,
    blobs: HashMap<String, Vec<u8>>,
    fetched: Vec<String>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Vec::new(),
            next_ids: BTreeMap::new(),
            canned: HashMap::new(),
            failing: None,
            blobs: HashMap::new(),
            fetched: Vec::new(),
        }
    }

    /// Answer `command` with `body` instead of the built-in reply.
    #[must_use]
    pub fn with_response(mut self, command: impl Into<String>, body: Value) -> Self {
        self.canned.insert(command.into(), body);
        self
    }

    /// The id the next `new` command returns.
    #[must_use]
    pub fn with_next_case_id(mut self, id: u64) -> Self {
        self.next_ids.insert("case", id);
        self
    }

    /// Reject every `command` with a remote error.
    #[must_use]
    pub fn failing_on(mut self, command: impl Into<String>) -> Self {
        self.failing = Some(command.into());
        self
    }

    /// Serve `content` for attachment `url`.
    #[must_use]
    pub fn with_attachment(mut self, url: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.blobs.insert(url.into(), content.into());
        self
    }

    #[must_use]
    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    /// Commands in the order they were executed.
    #[must_use]
    pub fn commands(&self) -> Vec<&str> {
        self.calls.iter().map(|call| call.command.as_str()).collect()
    }

    /// Attachment URLs requested so far.
    #[must_use]
    pub fn fetched(&self) -> &[String] {
        &self.fetched
    }

    fn next_id(&mut self, kind: &'static str) -> u64 {
        let slot = self.next_ids.entry(kind).or_insert(1);
        let id = *slot;
        *slot += 1;
        id
    }

    fn reply(&mut self, command: &str, params: &Params) -> Option<Value> {
        if let Some(body) = self.canned.get(command) {
            return Some(body.clone());
        }
        let body = match command {
            "logon" => json!({ "token": format!("{}-token", self.name) }),
            "new" => json!({ "case": { "ixBug": self.next_id("case") } }),
            "edit" | "resolve" | "close" | "reactivate" => {
                json!({ "case": { "ixBug": params.get("ixBug") } })
            }
            "newPerson" => json!({ "person": { "ixPerson": self.next_id("person") } }),
            "newProject" => json!({ "project": { "ixProject": self.next_id("project") } }),
            "listPeople" => json!({ "people": [] }),
            "listProjects" => json!({ "projects": [] }),
            "search" => json!({ "cases": [] }),
            _ => return None,
        };
        Some(body)
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &mut self,
        command: &str,
        params: &Params,
        uploads: &[Upload],
    ) -> Result<Response, TransportError> {
        let files: Vec<String> = uploads.iter().map(|u| u.file_name.clone()).collect();
        info!(transport = %self.name, command, ?params, ?files, "dry run");
        self.calls.push(RecordedCall {
            command: command.to_string(),
            params: params.clone(),
            uploads: files,
        });

        if self.failing.as_deref() == Some(command) {
            return Err(TransportError::Remote {
                endpoint: self.name.clone(),
                command: command.to_string(),
                message: "rejected by test transport".into(),
            });
        }

        let Some(body) = self.reply(command, params) else {
            return Err(TransportError::Unsupported {
                endpoint: self.name.clone(),
                command: command.to_string(),
            });
        };
        Response::from_body(&self.name, command, body)
    }

    fn fetch_attachment(&mut self, url: &str) -> Result<Vec<u8>, TransportError> {
        info!(transport = %self.name, url, "fetch attachment");
        self.fetched.push(url.to_string());
        Ok(self.blobs.get(url).cloned().unwrap_or_default())
    }
}
