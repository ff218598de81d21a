use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::case::{Attachment, Field};

/// One recorded change to a case.
///
/// Entries describe how the case *arrived* at its next state; the history
/// walk undoes them newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    /// Source id of the acting user.
    pub actor: String,
    /// Assignee recorded with the entry. The source writes `"0"` here in
    /// some later entries even when the case is still assigned.
    pub assignee: Option<String>,
    /// `Opened`, `Edited`, `Closed` and so on.
    pub verb: Option<String>,
    pub message: Option<String>,
    /// Attachments this entry introduced.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Free-text change description, one change per line.
    pub changes: Option<String>,
    #[serde(default)]
    pub deltas: Vec<Delta>,
}

impl JournalEntry {
    /// A bare entry with no changes, message or attachments.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, actor: impl Into<String>) -> Self {
        Self {
            timestamp,
            actor: actor.into(),
            assignee: None,
            verb: None,
            message: None,
            attachments: Vec::new(),
            changes: None,
            deltas: Vec::new(),
        }
    }

    /// Non-blank change lines, trimmed.
    pub fn change_lines(&self) -> impl Iterator<Item = &str> {
        self.changes
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }

    #[must_use]
    pub fn is_close(&self) -> bool {
        self.verb.as_deref() == Some("Closed")
    }
}

/// A structured change carried alongside (or instead of) the free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delta {
    /// A scalar field moved from `old` to `new`.
    Scalar {
        field: Field,
        old: String,
        new: String,
    },
    /// Tags added and removed by the entry.
    Tags {
        #[serde(default)]
        added: BTreeSet<String>,
        #[serde(default)]
        removed: BTreeSet<String>,
    },
}
