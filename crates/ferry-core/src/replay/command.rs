use chrono::{DateTime, Utc};

use crate::error::MigrateError;
use crate::model::{CaseId, Snapshot, StatusClass, Verb};

/// A snapshot paired with the verb that reproduces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub verb: Verb,
    pub snapshot: Snapshot,
    /// Parent of the case before this command, so a cleared parent can be
    /// sent explicitly.
    pub previous_parent: Option<CaseId>,
}

impl PlannedCommand {
    #[must_use]
    pub const fn case_id(&self) -> CaseId {
        self.snapshot.state.id
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.snapshot.timestamp
    }

    /// Parent this command links to, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<CaseId> {
        self.snapshot.state.parent
    }
}

/// Turn one case's coalesced snapshots (oldest first) into commands.
///
/// The first snapshot creates the case; each later one is an `edit`,
/// `resolve`, `close` or `reactivate` depending on how the status family
/// moved.
///
/// # Errors
///
/// [`MigrateError::UnknownStatus`] for a status outside the Active /
/// Resolved / Closed families.
pub fn plan_case(snapshots: Vec<Snapshot>) -> Result<Vec<PlannedCommand>, MigrateError> {
    let mut planned = Vec::with_capacity(snapshots.len());
    let mut previous: Option<(StatusClass, Option<CaseId>)> = None;

    for snapshot in snapshots {
        let class = StatusClass::classify(&snapshot.state.status).ok_or_else(|| {
            MigrateError::UnknownStatus {
                case: snapshot.state.id,
                timestamp: snapshot.timestamp,
                status: snapshot.state.status.clone(),
            }
        })?;

        let (verb, previous_parent) = match previous {
            None => (Verb::New, None),
            Some((from, parent)) => (Verb::for_transition(from, class), parent),
        };
        previous = Some((class, snapshot.state.parent));
        planned.push(PlannedCommand {
            verb,
            snapshot,
            previous_parent,
        });
    }
    Ok(planned)
}
