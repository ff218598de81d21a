//! Backward reconstruction of a case's history.
//!
//! The source stores a case as its *current* state plus a journal of the
//! changes that led there. Walking the journal newest first and undoing each
//! entry recovers every intermediate state:
//!
//! 1. Stamp the working state with the entry's timestamp, actor and assignee.
//! 2. Emit a copy: this is the state the entry produced.
//! 3. Undo the entry (structured deltas, implied close status, change lines,
//!    attachments).
//!
//! After the oldest entry the working state is the initial state, emitted
//! last with the oldest entry's timestamp and actor.
//!
//! [`History`] is the lazy newest-first walk; [`Reconstructor::reconstruct`]
//! collects it oldest first.

pub mod changes;
pub mod coalesce;

use std::iter::Rev;
use std::slice;

use chrono::{DateTime, Utc};

use crate::error::MigrateError;
use crate::model::{Case, CaseId, CaseState, Delta, JournalEntry, Snapshot};

use changes::{ChangeParser, ParseChangeError};

pub use coalesce::Coalescer;

/// Status a case had before a `Closed` entry; the source logs no status line
/// for closing.
const PRE_CLOSE_STATUS: &str = "Resolved";

/// Turns a [`Case`] into its sequence of snapshots.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    parser: ChangeParser,
    unassigned_sentinel: String,
}

impl Reconstructor {
    #[must_use]
    pub fn new(parser: ChangeParser, unassigned_sentinel: impl Into<String>) -> Self {
        Self {
            parser,
            unassigned_sentinel: unassigned_sentinel.into(),
        }
    }

    /// Standard change rules with `"0"` as the unassigned sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Internal`] if the built-in rule table fails
    /// to compile.
    pub fn standard() -> Result<Self, MigrateError> {
        let parser = ChangeParser::standard()
            .map_err(|err| MigrateError::Internal(format!("change rules: {err}")))?;
        Ok(Self::new(parser, "0"))
    }

    /// Lazy newest-first walk over `case`'s history.
    #[must_use]
    pub fn walk<'a>(&'a self, case: &'a Case) -> History<'a> {
        History {
            case_id: case.id(),
            working: case.current.clone(),
            entries: case.journal.iter().rev(),
            reconstructor: self,
            oldest: None,
            finished: false,
        }
    }

    /// Every snapshot of `case`, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates the first change line or delta that cannot be undone.
    pub fn reconstruct(&self, case: &Case) -> Result<Vec<Snapshot>, MigrateError> {
        let mut snapshots = self.walk(case).collect::<Result<Vec<_>, _>>()?;
        snapshots.reverse();
        Ok(snapshots)
    }

    fn undo(
        &self,
        case: CaseId,
        state: &mut CaseState,
        entry: &JournalEntry,
    ) -> Result<(), MigrateError> {
        let invalid = |field: &'static str, value: String| MigrateError::InvalidValue {
            case,
            timestamp: entry.timestamp,
            field,
            value,
        };

        for delta in entry.deltas.iter().rev() {
            match delta {
                Delta::Scalar { field, old, .. } => state
                    .set(*field, old)
                    .map_err(|err| invalid(field.as_str(), err.0))?,
                Delta::Tags { added, removed } => {
                    for tag in added {
                        state.tags.remove(tag);
                    }
                    state.tags.extend(removed.iter().cloned());
                }
            }
        }

        if entry.is_close() {
            PRE_CLOSE_STATUS.clone_into(&mut state.status);
        }

        for line in entry.change_lines() {
            self.parser
                .revert(state, line)
                .map_err(|err| match err {
                    ParseChangeError::Unrecognized(line) => MigrateError::UnrecognizedChange {
                        case,
                        timestamp: entry.timestamp,
                        line,
                    },
                    ParseChangeError::InvalidValue { field, source } => {
                        invalid(field.as_str(), source.0)
                    }
                })?;
        }

        state
            .attachments
            .retain(|held| !entry.attachments.iter().any(|added| added.file_name == held.file_name));
        Ok(())
    }
}

/// Newest-first iterator of a case's snapshots.
///
/// Yields one snapshot per journal entry and then the initial state. After
/// an error the iterator is exhausted.
#[derive(Debug)]
pub struct History<'a> {
    case_id: CaseId,
    working: CaseState,
    entries: Rev<slice::Iter<'a, JournalEntry>>,
    reconstructor: &'a Reconstructor,
    oldest: Option<(DateTime<Utc>, &'a str)>,
    finished: bool,
}

impl Iterator for History<'_> {
    type Item = Result<Snapshot, MigrateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let Some(entry) = self.entries.next() else {
            self.finished = true;
            let (timestamp, actor) = self.oldest.take()?;
            return Some(Ok(Snapshot {
                state: self.working.clone(),
                timestamp,
                actor: actor.to_string(),
                message: None,
            }));
        };

        if let Some(assignee) = entry.assignee.as_deref()
            && assignee != self.reconstructor.unassigned_sentinel
        {
            assignee.clone_into(&mut self.working.assignee);
        }

        let snapshot = Snapshot {
            state: self.working.clone(),
            timestamp: entry.timestamp,
            actor: entry.actor.clone(),
            message: entry.message.clone(),
        };

        if let Err(err) = self
            .reconstructor
            .undo(self.case_id, &mut self.working, entry)
        {
            self.finished = true;
            return Some(Err(err));
        }
        self.oldest = Some((entry.timestamp, entry.actor.as_str()));
        Some(Ok(snapshot))
    }
}
