//! Loading cases and their journals from the source tracker.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::MigrateError;
use crate::model::case::parse_case_ref;
use crate::model::{Attachment, Case, CaseId, CaseState, Delta, JournalEntry};
use crate::transport::{Params, Transport};

/// Case columns requested from `search`, besides `tags` and `events`.
pub const CASE_COLUMNS: [&str; 8] = [
    "sProject",
    "sTitle",
    "ixPriority",
    "ixBugParent",
    "sStatus",
    "sCategory",
    "ixPersonAssignedTo",
    "ixBug",
];

/// Ids and numbers arrive as JSON numbers from the API and as strings from
/// older exports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum WireScalar {
    Number(i64),
    Text(String),
}

impl fmt::Display for WireScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCase {
    ix_bug: WireScalar,
    #[serde(default)]
    s_title: String,
    #[serde(default)]
    s_status: String,
    #[serde(default)]
    ix_priority: Option<WireScalar>,
    #[serde(default)]
    s_category: String,
    #[serde(default)]
    ix_person_assigned_to: Option<WireScalar>,
    #[serde(default)]
    s_project: String,
    #[serde(default)]
    ix_bug_parent: Option<WireScalar>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    dt: DateTime<Utc>,
    ix_person: WireScalar,
    #[serde(default)]
    ix_person_assigned_to: Option<WireScalar>,
    #[serde(default)]
    s_verb: Option<String>,
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    rg_attachments: Vec<WireAttachment>,
    #[serde(default)]
    s_changes: Option<String>,
    #[serde(default)]
    deltas: Vec<Delta>,
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    #[serde(rename = "sFileName")]
    file_name: String,
    #[serde(rename = "sURL")]
    url: String,
}

/// Fetch every case matching `search` (the source's default search when
/// `None`) with its journal.
///
/// # Errors
///
/// Transport failures, and [`MigrateError::InvalidExport`] for malformed
/// cases.
pub fn load_cases(
    source: &mut dyn Transport,
    search: Option<&str>,
) -> Result<Vec<Case>, MigrateError> {
    let mut params = Params::new();
    params.insert(
        "cols".into(),
        CASE_COLUMNS
            .iter()
            .chain(&["tags", "events"])
            .copied()
            .collect::<Vec<_>>()
            .join(","),
    );
    if let Some(query) = search {
        params.insert("q".into(), query.to_string());
    }

    info!(source = source.name(), search, "loading cases");
    let response = source.execute("search", &params, &[])?;
    let cases = response
        .list("cases")
        .iter()
        .map(parse_case)
        .collect::<Result<Vec<_>, _>>()?;
    info!(count = cases.len(), "loaded cases");
    Ok(cases)
}

/// Decode one case of a `search` response.
///
/// Events are ordered oldest first (stable on equal timestamps); the
/// current attachments are every attachment any event introduced.
///
/// # Errors
///
/// [`MigrateError::InvalidExport`] for a malformed case or a case without
/// events.
pub fn parse_case(value: &Value) -> Result<Case, MigrateError> {
    let wire: WireCase = serde_json::from_value(value.clone())
        .map_err(|err| MigrateError::InvalidExport(format!("case {}: {err}", describe(value))))?;

    let id: CaseId = wire
        .ix_bug
        .to_string()
        .parse()
        .map_err(|_| MigrateError::InvalidExport(format!("case id '{}' is not a number", wire.ix_bug)))?;

    if wire.events.is_empty() {
        return Err(MigrateError::InvalidExport(format!(
            "case {id} has no events; export with the events column"
        )));
    }

    let parent = wire
        .ix_bug_parent
        .as_ref()
        .map_or(Ok(None), |raw| parse_case_ref(&raw.to_string()))
        .map_err(|err| MigrateError::InvalidExport(format!("case {id}: {err}")))?;

    let mut events = wire.events;
    events.sort_by_key(|event| event.dt);

    let journal: Vec<JournalEntry> = events.into_iter().map(into_entry).collect();
    let attachments = journal
        .iter()
        .flat_map(|entry| entry.attachments.iter().cloned())
        .collect();

    debug!(case = id, entries = journal.len(), "parsed case");
    Ok(Case {
        current: CaseState {
            id,
            title: wire.s_title,
            status: wire.s_status,
            priority: wire.ix_priority.map(|p| p.to_string()).unwrap_or_default(),
            category: wire.s_category,
            assignee: wire
                .ix_person_assigned_to
                .map(|p| p.to_string())
                .unwrap_or_default(),
            project: wire.s_project,
            parent,
            tags: wire.tags.into_iter().collect::<BTreeSet<_>>(),
            attachments,
        },
        journal,
    })
}

fn into_entry(event: WireEvent) -> JournalEntry {
    JournalEntry {
        timestamp: event.dt,
        actor: event.ix_person.to_string(),
        assignee: event.ix_person_assigned_to.map(|p| p.to_string()),
        verb: event.s_verb,
        message: event.s.filter(|text| !text.is_empty()),
        attachments: event
            .rg_attachments
            .into_iter()
            .map(|a| Attachment::new(a.file_name, a.url))
            .collect(),
        changes: event.s_changes.filter(|text| !text.trim().is_empty()),
        deltas: event.deltas,
    }
}

fn describe(value: &Value) -> String {
    value
        .get("ixBug")
        .map_or_else(|| "<no ixBug>".to_string(), Value::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use serde_json::json;

    fn wire_case() -> Value {
        json!({
            "ixBug": 12,
            "sTitle": "Crash on save",
            "sStatus": "Active",
            "ixPriority": 3,
            "sCategory": "Bug",
            "ixPersonAssignedTo": "7",
            "sProject": "Inbox",
            "ixBugParent": 0,
            "tags": ["urgent"],
            "events": [
                {
                    "dt": "2011-03-02T10:00:00Z",
                    "ixPerson": 2,
                    "ixPersonAssignedTo": 7,
                    "sVerb": "Edited",
                    "s": "",
                    "sChanges": "Added tag 'urgent'.",
                    "rgAttachments": [
                        {"sFileName": "log.txt", "sURL": "default.asp?a=1&amp;b=2"}
                    ]
                },
                {
                    "dt": "2011-03-01T10:00:00Z",
                    "ixPerson": "2",
                    "sVerb": "Opened",
                    "s": "It crashes."
                }
            ]
        })
    }

    #[test]
    fn parses_state_and_orders_events() {
        let case = parse_case(&wire_case()).unwrap();
        assert_eq!(case.id(), 12);
        assert_eq!(case.current.priority, "3");
        assert_eq!(case.current.assignee, "7");
        assert_eq!(case.current.parent, None);
        assert!(case.current.tags.contains("urgent"));
        assert_eq!(case.current.attachments.len(), 1);

        assert_eq!(case.journal[0].verb.as_deref(), Some("Opened"));
        assert_eq!(case.journal[0].message.as_deref(), Some("It crashes."));
        assert_eq!(case.journal[0].assignee, None);
        assert_eq!(case.journal[1].message, None);
        assert_eq!(case.journal[1].assignee.as_deref(), Some("7"));
    }

    #[test]
    fn case_without_events_is_rejected() {
        let mut value = wire_case();
        value["events"] = json!([]);
        assert!(matches!(
            parse_case(&value),
            Err(MigrateError::InvalidExport(_))
        ));
    }

    #[test]
    fn parent_reference_is_parsed() {
        let mut value = wire_case();
        value["ixBugParent"] = json!("5");
        assert_eq!(parse_case(&value).unwrap().current.parent, Some(5));
    }

    #[test]
    fn load_cases_requests_columns_and_query() {
        let mut source = MemoryTransport::new("source")
            .with_response("search", json!({ "cases": [wire_case()] }));
        let cases = load_cases(&mut source, Some("project:Inbox")).unwrap();
        assert_eq!(cases.len(), 1);

        let call = &source.calls()[0];
        assert_eq!(call.command, "search");
        assert_eq!(call.params["q"], "project:Inbox");
        assert!(call.params["cols"].starts_with("sProject,sTitle"));
        assert!(call.params["cols"].ends_with("ixBug,tags,events"));
    }
}
