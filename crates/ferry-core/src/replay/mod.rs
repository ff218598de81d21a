//! Replaying scheduled commands against the destination tracker.
//!
//! The [`Replayer`] owns everything a run accumulates: the people and
//! project maps, the source-case → destination-case table filled as `new`
//! commands complete, and the [`ReplayReport`]. Transports are borrowed, so
//! the whole engine runs unchanged against [`MemoryTransport`] in tests.
//!
//! [`MemoryTransport`]: crate::transport::memory::MemoryTransport

pub mod command;
pub mod schedule;

use std::collections::{BTreeMap, HashMap};

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::MigrateError;
use crate::mapping::{ProjectMap, UserMap};
use crate::model::{CaseId, Verb};
use crate::transport::{Params, Transport, TransportError, Upload};

pub use command::{PlannedCommand, plan_case};
pub use schedule::{OrderPolicy, schedule};

/// Identity conventions of the source tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Automated actor id; never remapped or sent as an editor.
    pub system_actor: String,
    /// Internal user the source assigns closed cases to; never sent.
    pub internal_assignee: String,
    /// Assignee value meaning "nobody".
    pub unassigned_sentinel: String,
    /// Fill id gaps with closed placeholder cases so destination ids match.
    pub align_ids: bool,
    /// Highest case id already in the destination; alignment starts above it.
    pub dest_last_case: u64,
    /// Tag → destination project. A case carrying the tag moves to that
    /// project and loses the tag.
    pub tag_projects: BTreeMap<String, String>,
    /// Destination project for cases without one.
    pub default_project: Option<String>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            system_actor: "-1".into(),
            internal_assignee: "1".into(),
            unassigned_sentinel: "0".into(),
            align_ids: false,
            dest_last_case: 0,
            tag_projects: BTreeMap::new(),
            default_project: None,
        }
    }
}

/// Counters for one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub cases_loaded: usize,
    pub snapshots_reconstructed: usize,
    pub snapshots_kept: usize,
    /// Commands the plan produced.
    pub commands_planned: usize,
    /// Commands dispatched to the destination.
    pub commands_total: usize,
    /// Dispatched commands per verb.
    pub commands: BTreeMap<String, usize>,
    pub users_created: usize,
    pub projects_created: usize,
    pub attachments_uploaded: usize,
    pub placeholders_created: usize,
}

/// Dispatches planned commands with identifiers translated.
pub struct Replayer<'a> {
    source: &'a mut dyn Transport,
    dest: &'a mut dyn Transport,
    users: UserMap,
    projects: ProjectMap,
    records: HashMap<CaseId, String>,
    options: ReplayOptions,
    last_dest_case: u64,
    report: ReplayReport,
}

impl<'a> Replayer<'a> {
    #[must_use]
    pub fn new(
        source: &'a mut dyn Transport,
        dest: &'a mut dyn Transport,
        users: UserMap,
        projects: ProjectMap,
        options: ReplayOptions,
    ) -> Self {
        Self {
            source,
            dest,
            users,
            projects,
            records: HashMap::new(),
            last_dest_case: options.dest_last_case,
            options,
            report: ReplayReport::default(),
        }
    }

    /// Start from counters gathered before replay (loading, coalescing).
    #[must_use]
    pub fn with_report(mut self, report: ReplayReport) -> Self {
        self.report = report;
        self
    }

    /// Destination id of a replayed source case.
    #[must_use]
    pub fn dest_case(&self, case: CaseId) -> Option<&str> {
        self.records.get(&case).map(String::as_str)
    }

    /// Dispatch `commands` in order.
    ///
    /// # Errors
    ///
    /// The first failure aborts the run; earlier commands stay applied.
    pub fn replay(&mut self, commands: &[PlannedCommand]) -> Result<(), MigrateError> {
        let total = commands.len();
        for (i, command) in commands.iter().enumerate() {
            info!(
                "Migrating change {} of {} (case {} at {})",
                i + 1,
                total,
                command.case_id(),
                command.timestamp()
            );
            self.dispatch(command)?;
        }
        Ok(())
    }

    /// Send one command and record the destination id of a new case.
    ///
    /// # Errors
    ///
    /// Lookup failures from the maps or the case table, and
    /// [`MigrateError::Dispatch`] if the destination rejects the command.
    pub fn dispatch(&mut self, command: &PlannedCommand) -> Result<(), MigrateError> {
        let case = command.case_id();
        let verb = command.verb;
        let wrap = |source: TransportError| MigrateError::Dispatch {
            case,
            timestamp: command.timestamp(),
            verb: verb.as_str(),
            source,
        };

        if verb == Verb::New && self.options.align_ids {
            self.align(command)?;
        }

        let mut params = self.params(command)?;
        if verb != Verb::New {
            let dest_case = self.records.get(&case).ok_or_else(|| {
                MigrateError::Internal(format!("case {case} replayed before it was created"))
            })?;
            params.insert("ixBug".into(), dest_case.clone());
        }

        let mut uploads = Vec::with_capacity(command.snapshot.state.attachments.len());
        for attachment in &command.snapshot.state.attachments {
            let content = self
                .source
                .fetch_attachment(&attachment.retrieval_url())
                .map_err(wrap)?;
            uploads.push(Upload {
                file_name: attachment.file_name.clone(),
                content,
            });
        }

        let response = self
            .dest
            .execute(verb.as_str(), &params, &uploads)
            .map_err(wrap)?;

        if verb == Verb::New {
            let dest_case = response.created_id("ixBug").map_err(wrap)?;
            if self.options.align_ids && dest_case != case.to_string() {
                warn!(case, dest = %dest_case, "destination id does not match source id");
            }
            debug!(case, dest = %dest_case, "created case");
            if let Ok(id) = dest_case.parse() {
                self.last_dest_case = id;
            }
            self.records.insert(case, dest_case);
        }

        self.report.commands_total += 1;
        *self.report.commands.entry(verb.to_string()).or_default() += 1;
        self.report.attachments_uploaded += uploads.len();
        Ok(())
    }

    /// Build destination parameters for `command`.
    fn params(&mut self, command: &PlannedCommand) -> Result<Params, MigrateError> {
        let snapshot = &command.snapshot;
        let state = &snapshot.state;
        let mut params = Params::new();

        params.insert(
            "dt".into(),
            snapshot.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        params.insert("sTitle".into(), state.title.clone());
        if !state.priority.is_empty() {
            params.insert("ixPriority".into(), state.priority.clone());
        }
        if !state.category.is_empty() {
            params.insert("sCategory".into(), state.category.clone());
        }
        if let Some(message) = &snapshot.message {
            params.insert("sEvent".into(), message.clone());
        }

        // The destination has no person for the system actor.
        if !self.users.is_system_actor(&snapshot.actor) {
            let editor = self.users.get_ixperson(&snapshot.actor, &mut *self.dest)?;
            params.insert("ixPersonEditedBy".into(), editor);
        }
        let assignee = if state.assignee.is_empty()
            || state.assignee == self.options.unassigned_sentinel
        {
            self.users.unassigned().map(str::to_string)
        } else {
            Some(state.assignee.clone())
        };
        if let Some(assignee) = assignee
            && assignee != self.options.internal_assignee
        {
            let assignee = self.users.get_ixperson(&assignee, &mut *self.dest)?;
            params.insert("ixPersonAssignedTo".into(), assignee);
        }

        // The last mapped tag decides the project.
        let tag_project = state
            .tags
            .iter()
            .filter_map(|tag| self.options.tag_projects.get(tag))
            .next_back()
            .cloned();
        let project = if let Some(name) = tag_project {
            debug!(case = state.id, project = %name, "project from tag");
            Some(self.projects.get_dest_project(&name, &mut *self.dest)?)
        } else if !state.project.is_empty() {
            Some(self.projects.get_project(
                &state.project,
                &mut self.users,
                &mut *self.source,
                &mut *self.dest,
            )?)
        } else if let Some(name) = self.options.default_project.clone() {
            Some(self.projects.get_dest_project(&name, &mut *self.dest)?)
        } else {
            None
        };
        if let Some(project) = project {
            params.insert("ixProject".into(), project);
        }

        let tags: Vec<&str> = state
            .tags
            .iter()
            .filter(|tag| !self.options.tag_projects.contains_key(*tag))
            .map(String::as_str)
            .collect();
        params.insert("sTags".into(), tags.join(","));

        match (state.parent, command.previous_parent) {
            (Some(parent), _) => {
                let dest_parent = self.records.get(&parent).ok_or(MigrateError::UnresolvedParent {
                    case: state.id,
                    parent,
                })?;
                debug!(case = state.id, parent, "setting parent");
                params.insert("ixBugParent".into(), dest_parent.clone());
            }
            (None, Some(_)) => {
                params.insert("ixBugParent".into(), "(None)".into());
            }
            (None, None) => {}
        }
        Ok(params)
    }

    /// Create closed placeholders until the destination's next case id is
    /// the source id of `command`'s case.
    fn align(&mut self, command: &PlannedCommand) -> Result<(), MigrateError> {
        let case = command.case_id();
        let mut last = self.last_dest_case;
        if last >= case {
            warn!(case, last_dest = last, "destination ids are ahead; cannot align");
            return Ok(());
        }

        while last + 1 < case {
            let wrap = |source: TransportError| MigrateError::Dispatch {
                case,
                timestamp: command.timestamp(),
                verb: Verb::New.as_str(),
                source,
            };
            let mut params = Params::new();
            params.insert(
                "dt".into(),
                command.timestamp().to_rfc3339_opts(SecondsFormat::Secs, true),
            );
            params.insert("sTitle".into(), format!("Placeholder for case {}", last + 1));

            let response = self
                .dest
                .execute(Verb::New.as_str(), &params, &[])
                .map_err(wrap)?;
            let placeholder = response.created_id("ixBug").map_err(wrap)?;
            params.insert("ixBug".into(), placeholder.clone());
            self.dest
                .execute(Verb::Close.as_str(), &params, &[])
                .map_err(wrap)?;
            self.report.placeholders_created += 1;
            debug!(placeholder = %placeholder, "created placeholder case");

            match placeholder.parse::<u64>() {
                Ok(id) if id > last => last = id,
                _ => {
                    warn!(case, placeholder = %placeholder, "placeholder ids do not advance; giving up alignment");
                    break;
                }
            }
        }
        self.last_dest_case = last;
        Ok(())
    }

    /// Final counters, including entities the maps created.
    #[must_use]
    pub fn finish(self) -> ReplayReport {
        let mut report = self.report;
        report.users_created = self.users.created();
        report.projects_created = self.projects.created();
        report
    }
}
