//! Collapsing snapshots that carry no independently visible change.
//!
//! Reconstruction yields one snapshot per journal entry, but the destination
//! only sees field values, messages and uploads. Entries that touch nothing
//! the destination stores (estimates, milestones) or that the source wrote
//! in bursts for one logical edit would otherwise replay as empty commands.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::model::Snapshot;

/// Outcome for one snapshot in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Keep,
    Drop,
    /// Fold the payload into the previous kept snapshot.
    Absorb,
}

/// Filters an oldest-first snapshot sequence down to distinct visible states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coalescer {
    tolerance: Duration,
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

impl Coalescer {
    /// Snapshots at most `tolerance` apart count as the same instant.
    #[must_use]
    pub const fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    #[must_use]
    pub const fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Coalesce `snapshots` (oldest first) until nothing else can merge.
    ///
    /// Running the result through again returns it unchanged.
    #[must_use]
    pub fn coalesce(&self, snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
        let mut current = first_introductions(snapshots);
        loop {
            let (next, changed) = self.pass(current);
            if !changed {
                return next;
            }
            current = next;
        }
    }

    fn pass(&self, snapshots: Vec<Snapshot>) -> (Vec<Snapshot>, bool) {
        let mut kept: Vec<Snapshot> = Vec::with_capacity(snapshots.len());
        let mut changed = false;
        let mut iter = snapshots.into_iter().peekable();

        while let Some(snapshot) = iter.next() {
            let decision = kept
                .last()
                .map_or(Decision::Keep, |prev| self.decide(prev, &snapshot, iter.peek()));

            match (decision, kept.last_mut()) {
                (Decision::Drop, _) => changed = true,
                (Decision::Absorb, Some(prev)) => {
                    if prev.message.is_none() {
                        prev.message = snapshot.message;
                    }
                    prev.state.attachments.extend(snapshot.state.attachments);
                    changed = true;
                }
                _ => kept.push(snapshot),
            }
        }
        (kept, changed)
    }

    fn decide(&self, prev: &Snapshot, snapshot: &Snapshot, next: Option<&Snapshot>) -> Decision {
        if snapshot.state.same_visible(&prev.state) {
            if !snapshot.has_payload() {
                return Decision::Drop;
            }
            let both_have_messages = prev.message.is_some() && snapshot.message.is_some();
            if self.within(prev.timestamp, snapshot.timestamp) && !both_have_messages {
                return Decision::Absorb;
            }
            return Decision::Keep;
        }

        let carried_forward = next.is_some_and(|next| {
            self.within(snapshot.timestamp, next.timestamp)
                && snapshot.state.lies_between(&prev.state, &next.state)
        });
        if !snapshot.has_payload() && carried_forward {
            Decision::Drop
        } else {
            Decision::Keep
        }
    }

    fn within(&self, earlier: DateTime<Utc>, later: DateTime<Utc>) -> bool {
        (later - earlier).abs() <= self.tolerance
    }
}

/// Keep each attachment only on the first snapshot that carries it.
///
/// Reconstructed snapshots hold every attachment present at that instant;
/// replay must upload each file once.
fn first_introductions(mut snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
    let mut seen = HashSet::new();
    for snapshot in &mut snapshots {
        snapshot
            .state
            .attachments
            .retain(|attachment| seen.insert(attachment.file_name.clone()));
    }
    snapshots
}
