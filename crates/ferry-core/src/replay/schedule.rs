//! Global replay order across cases.
//!
//! Each case contributes a queue of commands, oldest first. Queues are merged
//! by timestamp, with ties broken by the configured [`OrderPolicy`]. A queue
//! head whose parent case is part of the run but not yet created waits until
//! the parent's `new` has been scheduled, whatever its timestamp says: the
//! destination rejects links to cases it does not have.
//!
//! # Algorithm
//!
//! 1. Offer each queue's head: eligible heads go into a min-heap keyed by
//!    `(timestamp, tie)`; blocked heads wait on their parent's id.
//! 2. Pop the smallest head, emit it, offer the next head of its queue.
//! 3. When a `new` is emitted, offer every head waiting on that case.
//! 4. Queues left over when the heap runs dry wait on each other: a cycle.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::command::PlannedCommand;
use crate::error::MigrateError;
use crate::model::{CaseId, Verb};

/// How commands with equal timestamps are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderPolicy {
    /// Lower source case id first.
    #[default]
    TimestampThenId,
    /// Load order, as returned by the source search.
    Timestamp,
}

impl OrderPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimestampThenId => "timestamp-then-id",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for OrderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timestamp-then-id" => Ok(Self::TimestampThenId),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(format!(
                "unknown order policy '{other}': expected timestamp-then-id or timestamp"
            )),
        }
    }
}

type HeapKey = Reverse<(DateTime<Utc>, u64, usize)>;

struct Merge {
    queues: Vec<VecDeque<PlannedCommand>>,
    in_run: HashSet<CaseId>,
    created: HashSet<CaseId>,
    waiting: HashMap<CaseId, Vec<usize>>,
    heap: BinaryHeap<HeapKey>,
    policy: OrderPolicy,
}

impl Merge {
    fn offer(&mut self, queue: usize) {
        let Some(head) = self.queues[queue].front() else {
            return;
        };
        let case = head.case_id();
        if let Some(parent) = head.parent()
            && parent != case
            && self.in_run.contains(&parent)
            && !self.created.contains(&parent)
        {
            debug!(case, parent, "waiting for parent");
            self.waiting.entry(parent).or_default().push(queue);
            return;
        }

        let tie = match self.policy {
            OrderPolicy::TimestampThenId => case,
            OrderPolicy::Timestamp => queue as u64,
        };
        self.heap.push(Reverse((head.timestamp(), tie, queue)));
    }
}

/// Merge per-case command queues into one dependency-respecting order.
///
/// # Errors
///
/// [`MigrateError::DependencyCycle`] when parent links make some cases wait
/// on each other.
pub fn schedule(
    plans: Vec<Vec<PlannedCommand>>,
    policy: OrderPolicy,
) -> Result<Vec<PlannedCommand>, MigrateError> {
    let queues: Vec<VecDeque<PlannedCommand>> = plans
        .into_iter()
        .filter(|plan| !plan.is_empty())
        .map(VecDeque::from)
        .collect();
    let total = queues.iter().map(VecDeque::len).sum();
    let in_run = queues
        .iter()
        .filter_map(|queue| queue.front().map(PlannedCommand::case_id))
        .collect();

    let mut merge = Merge {
        queues,
        in_run,
        created: HashSet::new(),
        waiting: HashMap::new(),
        heap: BinaryHeap::new(),
        policy,
    };
    for queue in 0..merge.queues.len() {
        merge.offer(queue);
    }

    let mut ordered = Vec::with_capacity(total);
    while let Some(Reverse((_, _, queue))) = merge.heap.pop() {
        let Some(command) = merge.queues[queue].pop_front() else {
            continue;
        };
        if command.verb == Verb::New {
            let case = command.case_id();
            merge.created.insert(case);
            for blocked in merge.waiting.remove(&case).unwrap_or_default() {
                merge.offer(blocked);
            }
        }
        ordered.push(command);
        merge.offer(queue);
    }

    let mut stuck: Vec<CaseId> = merge
        .queues
        .iter()
        .filter_map(|queue| queue.front().map(PlannedCommand::case_id))
        .collect();
    if !stuck.is_empty() {
        stuck.sort_unstable();
        return Err(MigrateError::DependencyCycle { cases: stuck });
    }
    Ok(ordered)
}
