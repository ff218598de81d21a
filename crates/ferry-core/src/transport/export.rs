//! Read-only source transport backed by a JSON export file.
//!
//! The export mirrors what the tracker API would answer:
//!
//! ```json
//! {
//!   "cases": [ { "ixBug": 1, "sTitle": "...", "events": [ ... ] } ],
//!   "people": [ { "ixPerson": 2, "sFullName": "...", "sEmail": "..." } ],
//!   "projects": [ { "ixProject": 1, "sProject": "...", "ixPersonOwner": 2 } ],
//!   "deleted_projects": [ ... ],
//!   "attachments": { "default.asp?...&ixAttachment=3": "files/3.bin" }
//! }
//! ```
//!
//! Deleted projects are only visible to an `ixProject`-filtered
//! `listProjects`, as on the live tracker. Attachment paths are relative to
//! the export file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{Params, Response, Transport, TransportError, Upload, scalar_text};
use crate::model::unescape_attachment_url;

#[derive(Debug, Clone, Default, Deserialize)]
struct ExportFile {
    #[serde(default)]
    cases: Vec<Value>,
    #[serde(default)]
    people: Vec<Value>,
    #[serde(default)]
    projects: Vec<Value>,
    #[serde(default)]
    deleted_projects: Vec<Value>,
    #[serde(default)]
    attachments: BTreeMap<String, PathBuf>,
}

/// Serves `search`, `listPeople`, `listProjects` and attachments from an
/// export; every write command is rejected.
#[derive(Debug, Clone)]
pub struct ExportTransport {
    name: String,
    path: PathBuf,
    base_dir: PathBuf,
    export: ExportFile,
}

impl ExportTransport {
    /// Load an export file.
    ///
    /// # Errors
    ///
    /// [`TransportError::Export`] if the file cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        let fail = |message: String| TransportError::Export {
            path: path.to_path_buf(),
            message,
        };
        let text = fs::read_to_string(path).map_err(|err| fail(err.to_string()))?;
        let value: Value = serde_json::from_str(&text).map_err(|err| fail(err.to_string()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_value(path, base_dir, value)
    }

    /// Build from an already decoded export; `base_dir` anchors attachment paths.
    ///
    /// # Errors
    ///
    /// [`TransportError::Export`] if `value` is not an export object.
    pub fn from_value(
        path: &Path,
        base_dir: PathBuf,
        value: Value,
    ) -> Result<Self, TransportError> {
        let export: ExportFile =
            serde_json::from_value(value).map_err(|err| TransportError::Export {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        debug!(
            path = %path.display(),
            cases = export.cases.len(),
            people = export.people.len(),
            projects = export.projects.len(),
            "loaded export"
        );
        Ok(Self {
            name: "source".to_string(),
            path: path.to_path_buf(),
            base_dir,
            export,
        })
    }

    /// Path of the export this transport reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn search(&self, query: Option<&str>) -> Value {
        let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
            return json!({ "cases": self.export.cases });
        };

        // Only case-number queries ("12 14,15") can be answered offline.
        let ids: Option<Vec<String>> = query
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| token.parse::<u64>().ok().map(|id| id.to_string()))
            .collect();
        let Some(ids) = ids else {
            warn!(query, "export source cannot evaluate search queries; returning every case");
            return json!({ "cases": self.export.cases });
        };

        let cases: Vec<&Value> = self
            .export
            .cases
            .iter()
            .filter(|case| {
                case.get("ixBug")
                    .and_then(scalar_text)
                    .is_some_and(|id| ids.contains(&id))
            })
            .collect();
        json!({ "cases": cases })
    }

    fn list_projects(&self, id: Option<&str>) -> Value {
        let Some(id) = id else {
            return json!({ "projects": self.export.projects });
        };
        let matching: Vec<&Value> = self
            .export
            .projects
            .iter()
            .chain(&self.export.deleted_projects)
            .filter(|project| {
                project
                    .get("ixProject")
                    .and_then(scalar_text)
                    .is_some_and(|ix| ix == id)
            })
            .collect();
        json!({ "projects": matching })
    }
}

impl Transport for ExportTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &mut self,
        command: &str,
        params: &Params,
        _uploads: &[Upload],
    ) -> Result<Response, TransportError> {
        let body = match command {
            "logon" => json!({ "token": "export" }),
            "search" => self.search(params.get("q").map(String::as_str)),
            "listPeople" => json!({ "people": self.export.people }),
            "listProjects" => self.list_projects(params.get("ixProject").map(String::as_str)),
            _ => {
                return Err(TransportError::Unsupported {
                    endpoint: self.name.clone(),
                    command: command.to_string(),
                });
            }
        };
        Response::from_body(&self.name, command, body)
    }

    fn fetch_attachment(&mut self, url: &str) -> Result<Vec<u8>, TransportError> {
        let relative = self
            .export
            .attachments
            .iter()
            .find(|(key, _)| key.as_str() == url || unescape_attachment_url(key) == url)
            .map(|(_, path)| path)
            .ok_or_else(|| TransportError::Attachment {
                endpoint: self.name.clone(),
                url: url.to_string(),
                message: "not present in export".into(),
            })?;
        let full = self.base_dir.join(relative);
        fs::read(&full).map_err(|err| TransportError::Attachment {
            endpoint: self.name.clone(),
            url: url.to_string(),
            message: format!("{}: {err}", full.display()),
        })
    }
}
