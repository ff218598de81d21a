use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::journal::JournalEntry;

/// Source-local numeric case id.
pub type CaseId = u64;

/// A file attached to a case by one journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    /// Retrieval URL exactly as the source delivered it.
    pub url: String,
}

impl Attachment {
    #[must_use]
    pub fn new(file_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            url: url.into(),
        }
    }

    /// URL to fetch the attachment content from.
    #[must_use]
    pub fn retrieval_url(&self) -> String {
        unescape_attachment_url(&self.url)
    }
}

/// Undo the export's double escaping of `&` in attachment URLs.
///
/// The replacement runs once: `&amp;amp;` becomes `&amp;`.
#[must_use]
pub fn unescape_attachment_url(url: &str) -> String {
    url.replace("&amp;", "&")
}

/// Scalar case fields a journal delta can revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Status,
    Priority,
    Category,
    Assignee,
    Project,
    Parent,
}

impl Field {
    pub const ALL: [Self; 7] = [
        Self::Title,
        Self::Status,
        Self::Priority,
        Self::Category,
        Self::Assignee,
        Self::Project,
        Self::Parent,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::Category => "category",
            Self::Assignee => "assignee",
            Self::Project => "project",
            Self::Parent => "parent",
        }
    }

    /// Column name used by the tracker API.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Title => "sTitle",
            Self::Status => "sStatus",
            Self::Priority => "ixPriority",
            Self::Category => "sCategory",
            Self::Assignee => "ixPersonAssignedTo",
            Self::Project => "sProject",
            Self::Parent => "ixBugParent",
        }
    }

    /// Accepts either the API column name or the short name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.wire_name() == name || field.as_str() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parent reference that is neither a case id nor an explicit "no parent".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a case reference")]
pub struct InvalidCaseRef(pub String);

/// Parse a parent reference; `0`, the empty string and `(None)` mean no parent.
///
/// # Errors
///
/// Returns [`InvalidCaseRef`] when the value is not a case number.
pub fn parse_case_ref(raw: &str) -> Result<Option<CaseId>, InvalidCaseRef> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" || trimmed == "(None)" {
        return Ok(None);
    }
    trimmed
        .parse::<CaseId>()
        .map(Some)
        .map_err(|_| InvalidCaseRef(raw.to_string()))
}

/// Full state of one case at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseState {
    pub id: CaseId,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub category: String,
    pub assignee: String,
    pub project: String,
    pub parent: Option<CaseId>,
    pub tags: BTreeSet<String>,
    pub attachments: Vec<Attachment>,
}

impl CaseState {
    /// Current value of a scalar field; a missing parent reads as `None`.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<String> {
        match field {
            Field::Title => Some(self.title.clone()),
            Field::Status => Some(self.status.clone()),
            Field::Priority => Some(self.priority.clone()),
            Field::Category => Some(self.category.clone()),
            Field::Assignee => Some(self.assignee.clone()),
            Field::Project => Some(self.project.clone()),
            Field::Parent => self.parent.map(|parent| parent.to_string()),
        }
    }

    /// Overwrite a scalar field from its textual form.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCaseRef`] if `field` is the parent and `value` is not
    /// a case reference.
    pub fn set(&mut self, field: Field, value: &str) -> Result<(), InvalidCaseRef> {
        let value = value.to_string();
        match field {
            Field::Title => self.title = value,
            Field::Status => self.status = value,
            Field::Priority => self.priority = value,
            Field::Category => self.category = value,
            Field::Assignee => self.assignee = value,
            Field::Project => self.project = value,
            Field::Parent => self.parent = parse_case_ref(&value)?,
        }
        Ok(())
    }

    /// Equal on every field the destination can observe.
    ///
    /// Attachments are excluded: uploads never conflict with field edits.
    #[must_use]
    pub fn same_visible(&self, other: &Self) -> bool {
        self.title == other.title
            && self.status == other.status
            && self.priority == other.priority
            && self.category == other.category
            && self.assignee == other.assignee
            && self.project == other.project
            && self.parent == other.parent
            && self.tags == other.tags
    }

    /// True when every visible field of `self` equals the value in `before`
    /// or the value in `after`, so dropping `self` loses no change that
    /// `after` does not also carry.
    #[must_use]
    pub fn lies_between(&self, before: &Self, after: &Self) -> bool {
        let scalars = Field::ALL.into_iter().all(|field| {
            let value = self.get(field);
            value == before.get(field) || value == after.get(field)
        });
        if !scalars {
            return false;
        }

        self.tags
            .iter()
            .chain(&before.tags)
            .chain(&after.tags)
            .all(|tag| {
                let here = self.tags.contains(tag);
                here == before.tags.contains(tag) || here == after.tags.contains(tag)
            })
    }
}

/// A case as loaded from the source: its current state and its journal,
/// oldest entry first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub current: CaseState,
    pub journal: Vec<JournalEntry>,
}

impl Case {
    #[must_use]
    pub const fn id(&self) -> CaseId {
        self.current.id
    }
}

/// The reconstructed state of a case at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: CaseState,
    pub timestamp: DateTime<Utc>,
    /// Source id of the user whose entry produced this state.
    pub actor: String,
    /// Message posted with the entry, if any.
    pub message: Option<String>,
}

impl Snapshot {
    #[must_use]
    pub const fn case_id(&self) -> CaseId {
        self.state.id
    }

    /// A message or attachments: something to deliver even without a field change.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        self.message.is_some() || !self.state.attachments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CaseState {
        CaseState {
            id: 5,
            title: "Some Title".into(),
            status: "Active".into(),
            priority: "3".into(),
            category: "Bug".into(),
            assignee: "3".into(),
            project: "Some Project".into(),
            parent: None,
            tags: BTreeSet::new(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn unescape_runs_exactly_once() {
        assert_eq!(
            unescape_attachment_url("default.asp?pg=pgDownload&amp;pgType=pgFile&amp;ixAttachment=3"),
            "default.asp?pg=pgDownload&pgType=pgFile&ixAttachment=3"
        );
        assert_eq!(unescape_attachment_url("a&amp;amp;b"), "a&amp;b");
        assert_eq!(unescape_attachment_url("plain&ok"), "plain&ok");
    }

    #[test]
    fn parent_refs_parse() {
        assert_eq!(parse_case_ref("12"), Ok(Some(12)));
        assert_eq!(parse_case_ref("0"), Ok(None));
        assert_eq!(parse_case_ref("(None)"), Ok(None));
        assert!(parse_case_ref("twelve").is_err());
    }

    #[test]
    fn field_names_round_trip_through_wire_names() {
        for field in Field::ALL {
            assert_eq!(Field::from_wire(field.wire_name()), Some(field));
            assert_eq!(Field::from_wire(field.as_str()), Some(field));
        }
        assert_eq!(Field::from_wire("sEmail"), None);
    }

    #[test]
    fn visible_equality_ignores_attachments() {
        let a = state();
        let mut b = state();
        b.attachments.push(Attachment::new("x.txt", "u"));
        assert!(a.same_visible(&b));

        b.tags.insert("urgent".into());
        assert!(!a.same_visible(&b));
    }

    #[test]
    fn lies_between_detects_lost_changes() {
        let before = state();
        let mut after = state();
        after.title = "New".into();
        after.tags.insert("urgent".into());

        let mut middle = state();
        middle.title = "New".into();
        assert!(middle.lies_between(&before, &after));

        middle.priority = "1".into();
        assert!(!middle.lies_between(&before, &after));

        let mut tagged = state();
        tagged.tags.insert("stale".into());
        assert!(!tagged.lies_between(&before, &after));
    }
}
