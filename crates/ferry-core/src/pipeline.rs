//! End-to-end migration: load, reconstruct, coalesce, plan, schedule, replay.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::FerryConfig;
use crate::error::MigrateError;
use crate::history::changes::ChangeParser;
use crate::history::Reconstructor;
use crate::loader::load_cases;
use crate::mapping::{ProjectMap, UserMap};
use crate::model::{Case, CaseId, Snapshot};
use crate::replay::{PlannedCommand, ReplayReport, Replayer, plan_case, schedule};
use crate::transport::Transport;

/// Reconstructed and coalesced history of one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseHistory {
    pub case: CaseId,
    /// Snapshots before coalescing.
    pub reconstructed: usize,
    /// Coalesced snapshots, oldest first.
    pub snapshots: Vec<Snapshot>,
}

/// Commands for a whole run, already in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub commands: Vec<PlannedCommand>,
    pub report: ReplayReport,
}

fn reconstructor(config: &FerryConfig) -> Result<Reconstructor, MigrateError> {
    let parser = ChangeParser::standard()
        .map_err(|err| MigrateError::Internal(format!("change rules: {err}")))?;
    Ok(Reconstructor::new(
        parser,
        config.replay.unassigned_sentinel.clone(),
    ))
}

/// Reconstruct and coalesce every case.
///
/// # Errors
///
/// The first reconstruction failure.
pub fn histories(cases: &[Case], config: &FerryConfig) -> Result<Vec<CaseHistory>, MigrateError> {
    let reconstructor = reconstructor(config)?;
    let coalescer = config.replay.coalescer();

    cases
        .iter()
        .map(|case| {
            let snapshots = reconstructor.reconstruct(case)?;
            let reconstructed = snapshots.len();
            let snapshots = coalescer.coalesce(snapshots);
            debug!(
                case = case.id(),
                reconstructed,
                kept = snapshots.len(),
                "coalesced history"
            );
            Ok(CaseHistory {
                case: case.id(),
                reconstructed,
                snapshots,
            })
        })
        .collect()
}

/// Turn loaded cases into one globally ordered command list.
///
/// # Errors
///
/// Reconstruction, status and dependency-cycle failures.
pub fn plan(cases: &[Case], config: &FerryConfig) -> Result<Plan, MigrateError> {
    let mut report = ReplayReport {
        cases_loaded: cases.len(),
        ..ReplayReport::default()
    };

    let mut per_case = Vec::with_capacity(cases.len());
    for history in histories(cases, config)? {
        report.snapshots_reconstructed += history.reconstructed;
        report.snapshots_kept += history.snapshots.len();
        per_case.push(plan_case(history.snapshots)?);
    }

    let commands = schedule(per_case, config.replay.order)?;
    report.commands_planned = commands.len();
    info!(
        cases = report.cases_loaded,
        reconstructed = report.snapshots_reconstructed,
        kept = report.snapshots_kept,
        commands = report.commands_planned,
        order = %config.replay.order,
        "planned migration"
    );
    Ok(Plan { commands, report })
}

/// Migrate every case matching `search` from `source` to `dest`.
///
/// Name maps are loaded first so a bad mapping fails before anything is
/// written to the destination.
///
/// # Errors
///
/// Any [`MigrateError`]; commands dispatched before a failure stay applied.
pub fn migrate(
    source: &mut dyn Transport,
    dest: &mut dyn Transport,
    config: &FerryConfig,
    search: Option<&str>,
) -> Result<ReplayReport, MigrateError> {
    info!(source = source.name(), dest = dest.name(), "starting migration");
    let mut users = UserMap::load(
        &config.mapping.users,
        config.replay.system_actor.clone(),
        source,
        dest,
    )?;
    if let Some(name) = &config.mapping.unassigned_user {
        users.set_unassigned(name)?;
    }
    let projects = ProjectMap::load(
        &config.mapping.projects,
        config.recovery.project_probe_limit,
        source,
        dest,
    )?;

    let cases = load_cases(source, search)?;
    let Plan { commands, report } = plan(&cases, config)?;

    let mut replayer = Replayer::new(source, dest, users, projects, config.replay_options())
        .with_report(report);
    replayer.replay(&commands)?;
    let report = replayer.finish();
    info!(
        commands = report.commands_total,
        users_created = report.users_created,
        projects_created = report.projects_created,
        "migration finished"
    );
    Ok(report)
}

/// Load and reconstruct cases without replaying them.
///
/// # Errors
///
/// Loading and reconstruction failures.
pub fn case_history(
    source: &mut dyn Transport,
    config: &FerryConfig,
    search: Option<&str>,
) -> Result<Vec<CaseHistory>, MigrateError> {
    let cases = load_cases(source, search)?;
    histories(&cases, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_case;
    use crate::model::Verb;
    use crate::transport::memory::MemoryTransport;
    use serde_json::{Value, json};

    fn wire_case(id: u64, opened: &str, edited: &str) -> Value {
        json!({
            "ixBug": id,
            "sTitle": format!("Case {id}"),
            "sStatus": "Resolved (Fixed)",
            "ixPriority": 3,
            "sCategory": "Bug",
            "ixPersonAssignedTo": 2,
            "sProject": "Inbox",
            "ixBugParent": 0,
            "tags": [],
            "events": [
                {"dt": opened, "ixPerson": 2, "sVerb": "Opened", "s": "new"},
                {"dt": edited, "ixPerson": 2, "sVerb": "Resolved",
                 "sChanges": "Status changed from 'Active' to 'Resolved (Fixed)'."}
            ]
        })
    }

    fn source() -> MemoryTransport {
        MemoryTransport::new("source")
            .with_response(
                "listPeople",
                json!({"people": [{"ixPerson": 2, "sFullName": "Ada"}]}),
            )
            .with_response(
                "listProjects",
                json!({"projects": [{"ixProject": 4, "sProject": "Inbox", "ixPersonOwner": 2}]}),
            )
            .with_response(
                "search",
                json!({"cases": [
                    wire_case(2, "2011-03-01T10:00:00Z", "2011-03-03T10:00:00Z"),
                    wire_case(1, "2011-03-02T10:00:00Z", "2011-03-04T10:00:00Z"),
                ]}),
            )
    }

    #[test]
    fn plan_counts_and_orders_commands() {
        let cases = vec![
            parse_case(&wire_case(2, "2011-03-01T10:00:00Z", "2011-03-03T10:00:00Z")).unwrap(),
            parse_case(&wire_case(1, "2011-03-02T10:00:00Z", "2011-03-04T10:00:00Z")).unwrap(),
        ];
        let plan = plan(&cases, &FerryConfig::default()).unwrap();
        assert_eq!(plan.report.cases_loaded, 2);
        assert_eq!(plan.report.snapshots_reconstructed, 6);
        assert_eq!(plan.report.snapshots_kept, 4);
        assert_eq!(plan.report.commands_planned, 4);
        assert_eq!(plan.report.commands_total, 0);
        let order: Vec<_> = plan
            .commands
            .iter()
            .map(|c| (c.case_id(), c.verb))
            .collect();
        assert_eq!(
            order,
            vec![
                (2, Verb::New),
                (1, Verb::New),
                (2, Verb::Resolve),
                (1, Verb::Resolve)
            ]
        );
    }

    #[test]
    fn migrate_creates_people_and_projects_once() {
        let mut src = source();
        let mut dest = MemoryTransport::new("dry-run");
        let report = migrate(&mut src, &mut dest, &FerryConfig::default(), None).unwrap();

        assert_eq!(report.commands_planned, 4);
        assert_eq!(report.commands_total, 4);
        assert_eq!(report.commands["new"], 2);
        assert_eq!(report.commands["resolve"], 2);
        assert_eq!(report.users_created, 1);
        assert_eq!(report.projects_created, 1);

        let writes: Vec<_> = dest
            .commands()
            .into_iter()
            .filter(|c| !c.starts_with("list"))
            .collect();
        assert_eq!(
            writes,
            vec!["newPerson", "newProject", "new", "new", "resolve", "resolve"]
        );
    }

    #[test]
    fn unknown_unassigned_user_fails_before_writing() {
        let mut src = source();
        let mut dest = MemoryTransport::new("dry-run");
        let mut config = FerryConfig::default();
        config.mapping.unassigned_user = Some("Nobody".into());

        let err = migrate(&mut src, &mut dest, &config, None).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::UnknownName { side: "source", .. }
        ));
        assert!(dest.commands().iter().all(|c| c.starts_with("list")));
    }

    #[test]
    fn default_project_routes_through_migration() {
        let mut src = source();
        let mut dest = MemoryTransport::new("dry-run");
        let mut config = FerryConfig::default();
        config
            .mapping
            .tag_projects
            .insert("never-used".into(), "Elsewhere".into());
        config.mapping.default_project = Some("Imported".into());

        let report = migrate(&mut src, &mut dest, &config, None).unwrap();
        // Both cases name Inbox, so the default project is never created.
        assert_eq!(report.projects_created, 1);
        assert!(
            dest.calls()
                .iter()
                .filter(|c| c.command == "newProject")
                .all(|c| c.params["sProject"] == "Inbox")
        );
    }

    #[test]
    fn case_history_reports_coalescing() {
        let mut src = source();
        let histories = case_history(&mut src, &FerryConfig::default(), Some("1")).unwrap();
        assert_eq!(histories.len(), 2);
        assert!(histories.iter().all(|h| h.reconstructed == 3));
        assert!(histories.iter().all(|h| h.snapshots.len() == 2));
    }
}
