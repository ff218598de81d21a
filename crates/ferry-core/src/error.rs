use std::fmt;

use chrono::{DateTime, Utc};

use crate::model::CaseId;
use crate::transport::TransportError;

/// Machine-readable error codes for operators re-running a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidExport,
    UnknownName,
    EntityNotFound,
    UnrecoverableEntity,
    UnresolvedParent,
    UnrecognizedChange,
    UnknownStatus,
    InvalidValue,
    DependencyCycle,
    TransportFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`F####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "F1001",
            Self::InvalidExport => "F1002",
            Self::UnknownName => "F2001",
            Self::EntityNotFound => "F2002",
            Self::UnrecoverableEntity => "F2003",
            Self::UnresolvedParent => "F2004",
            Self::UnrecognizedChange => "F3001",
            Self::UnknownStatus => "F3002",
            Self::InvalidValue => "F3003",
            Self::DependencyCycle => "F4001",
            Self::TransportFailed => "F5001",
            Self::InternalUnexpected => "F9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidExport => "Source export is malformed",
            Self::UnknownName => "Mapped name not found",
            Self::EntityNotFound => "Source entity not found",
            Self::UnrecoverableEntity => "Deleted entity could not be recovered",
            Self::UnresolvedParent => "Parent case was not replayed",
            Self::UnrecognizedChange => "Unrecognized journal change",
            Self::UnknownStatus => "Unknown case status",
            Self::InvalidValue => "Invalid field value in journal",
            Self::DependencyCycle => "Parent links form a cycle",
            Self::TransportFailed => "Tracker request failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in ferry.toml and retry."),
            Self::InvalidExport => Some("Re-export the source cases with events included."),
            Self::UnknownName => {
                Some("Correct the --user/--project mapping using one of the listed names.")
            }
            Self::EntityNotFound => {
                Some("The journal references an entity the source no longer lists; map it explicitly.")
            }
            Self::UnrecoverableEntity => Some(
                "Raise [recovery] project_probe_limit or map the deleted project with --project.",
            ),
            Self::UnresolvedParent => {
                Some("Widen --search so parent cases are migrated together with their children.")
            }
            Self::UnrecognizedChange => Some("Report the change line so a handler can be added."),
            Self::UnknownStatus => Some("Only Active, Resolved* and Closed* statuses replay."),
            Self::InvalidValue => None,
            Self::DependencyCycle => Some("Break the parent cycle in the source tracker first."),
            Self::TransportFailed => Some(
                "The destination may hold a partial migration; reconcile it or start from a fresh destination.",
            ),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Fatal migration failures.
///
/// None of these are retried: each one means the replayed history would be
/// wrong or incomplete if the run continued.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// A user-supplied mapping names something neither side knows.
    #[error("failed to find {side} {kind} '{name}'; names are:\n{}", known.join("\n"))]
    UnknownName {
        side: &'static str,
        kind: &'static str,
        name: String,
        known: Vec<String>,
    },

    /// A source id referenced by the journal is absent from the source list.
    #[error("failed to find source {kind} with id {id}; ids are:\n{}", known.join("\n"))]
    EntityNotFound {
        kind: &'static str,
        id: String,
        known: Vec<String>,
    },

    /// The bounded probe for a deleted entity ran out of candidates.
    #[error("unable to find deleted source {kind} '{name}' after probing {probed} ids")]
    UnrecoverableEntity {
        kind: &'static str,
        name: String,
        probed: u32,
    },

    #[error("case {case}: parent case {parent} has not been replayed")]
    UnresolvedParent { case: CaseId, parent: CaseId },

    /// A free-text change line matched no handler.
    #[error("case {case} at {timestamp}: no handler for change '{line}'")]
    UnrecognizedChange {
        case: CaseId,
        timestamp: DateTime<Utc>,
        line: String,
    },

    #[error("case {case} at {timestamp}: unknown status '{status}'")]
    UnknownStatus {
        case: CaseId,
        timestamp: DateTime<Utc>,
        status: String,
    },

    #[error("case {case} at {timestamp}: invalid {field} value '{value}'")]
    InvalidValue {
        case: CaseId,
        timestamp: DateTime<Utc>,
        field: &'static str,
        value: String,
    },

    #[error("cases {cases:?} wait on each other as parents; no replay order exists")]
    DependencyCycle { cases: Vec<CaseId> },

    #[error("invalid export: {0}")]
    InvalidExport(String),

    /// A replayed command was rejected; the destination may hold a partial run.
    #[error("case {case} at {timestamp}: `{verb}` failed: {source}")]
    Dispatch {
        case: CaseId,
        timestamp: DateTime<Utc>,
        verb: &'static str,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MigrateError {
    /// The stable code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownName { .. } => ErrorCode::UnknownName,
            Self::EntityNotFound { .. } => ErrorCode::EntityNotFound,
            Self::UnrecoverableEntity { .. } => ErrorCode::UnrecoverableEntity,
            Self::UnresolvedParent { .. } => ErrorCode::UnresolvedParent,
            Self::UnrecognizedChange { .. } => ErrorCode::UnrecognizedChange,
            Self::UnknownStatus { .. } => ErrorCode::UnknownStatus,
            Self::InvalidValue { .. } => ErrorCode::InvalidValue,
            Self::DependencyCycle { .. } => ErrorCode::DependencyCycle,
            Self::InvalidExport(_) => ErrorCode::InvalidExport,
            Self::Dispatch { .. } | Self::Transport(_) => ErrorCode::TransportFailed,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }
}
