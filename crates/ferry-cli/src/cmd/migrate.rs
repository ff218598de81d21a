use anyhow::{Result, bail};
use clap::Args;
use ferry_core::config::{FerryConfig, apply_mapping_args};
use ferry_core::pipeline;
use ferry_core::replay::{OrderPolicy, ReplayReport};
use ferry_core::transport::Transport;
use ferry_core::transport::export::ExportTransport;
use ferry_core::transport::memory::MemoryTransport;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::remote::{HttpTransport, TrackerUrl};

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Source tracker URL, then destination URL. With `--export` the only
    /// URL is the destination. Without a destination the run is a dry run.
    #[arg(value_name = "URL", num_args = 0..=2)]
    pub urls: Vec<String>,

    /// Read source cases from a JSON export instead of a live tracker.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Source search selecting the cases to migrate.
    #[arg(long, value_name = "QUERY")]
    pub search: Option<String>,

    /// Map a source person to an existing destination person.
    #[arg(long = "user", value_name = "SOURCE:DEST")]
    pub users: Vec<String>,

    /// Map a source project to an existing destination project.
    #[arg(long = "project", value_name = "SOURCE:DEST")]
    pub projects: Vec<String>,

    /// Move cases carrying a tag into a destination project; the tag is dropped.
    #[arg(long = "tag-project", value_name = "TAG:PROJECT")]
    pub tag_projects: Vec<String>,

    /// Destination project for cases without one; created if missing.
    #[arg(long, value_name = "NAME")]
    pub default_project: Option<String>,

    /// Source person who takes cases nobody is assigned to.
    #[arg(long, value_name = "NAME")]
    pub unassigned_user: Option<String>,

    /// Tie-break for commands at the same instant.
    #[arg(long, value_name = "POLICY")]
    pub order: Option<OrderPolicy>,

    /// Snapshots this close together are coalesced as one instant.
    #[arg(long, value_name = "MS")]
    pub tolerance_ms: Option<u64>,

    /// Create closed placeholder cases so destination ids match source ids.
    #[arg(long)]
    pub align_ids: bool,

    /// Highest case id already in the destination; alignment starts above it.
    #[arg(long, value_name = "ID")]
    pub dest_last_case: Option<u64>,
}

/// Where the run reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoints {
    Export { path: PathBuf, dest: Option<String> },
    Remote { source: String, dest: Option<String> },
}

impl MigrateArgs {
    /// Split the positional URLs between source and destination.
    ///
    /// # Errors
    ///
    /// Returns an error when no source is given or too many URLs are.
    pub fn endpoints(&self) -> Result<Endpoints> {
        match (&self.export, self.urls.as_slice()) {
            (Some(path), [] | [_]) => Ok(Endpoints::Export {
                path: path.clone(),
                dest: self.urls.first().cloned(),
            }),
            (Some(_), _) => bail!("with --export, give at most one (destination) URL"),
            (None, [source, rest @ ..]) => Ok(Endpoints::Remote {
                source: source.clone(),
                dest: rest.first().cloned(),
            }),
            (None, []) => bail!("give a source tracker URL or --export <PATH>"),
        }
    }

    /// Layer the command-line overrides onto the file configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed `SOURCE:DEST` mapping.
    pub fn apply(&self, config: &mut FerryConfig) -> Result<()> {
        apply_mapping_args(&mut config.mapping.users, &self.users)?;
        apply_mapping_args(&mut config.mapping.projects, &self.projects)?;
        apply_mapping_args(&mut config.mapping.tag_projects, &self.tag_projects)?;
        if let Some(name) = &self.default_project {
            config.mapping.default_project = Some(name.clone());
        }
        if let Some(name) = &self.unassigned_user {
            config.mapping.unassigned_user = Some(name.clone());
        }
        if let Some(order) = self.order {
            config.replay.order = order;
        }
        if let Some(tolerance) = self.tolerance_ms {
            config.replay.coalesce_tolerance_ms = tolerance;
        }
        if self.align_ids {
            config.replay.align_ids = true;
        }
        if let Some(id) = self.dest_last_case {
            config.replay.dest_last_case = id;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MigrateSummary<'a> {
    source: String,
    destination: String,
    dry_run: bool,
    #[serde(flatten)]
    report: &'a ReplayReport,
}

fn open_source(endpoints: &Endpoints) -> Result<(Box<dyn Transport>, String)> {
    match endpoints {
        Endpoints::Export { path, .. } => {
            let transport: Box<dyn Transport> = Box::new(ExportTransport::open(path)?);
            Ok((transport, path.display().to_string()))
        }
        Endpoints::Remote { source, .. } => {
            let url = TrackerUrl::parse(source)?.with_env_credentials("source");
            let label = url.base.clone();
            let transport: Box<dyn Transport> = Box::new(HttpTransport::new("source", url));
            Ok((transport, label))
        }
    }
}

fn open_dest(endpoints: &Endpoints) -> Result<(Box<dyn Transport>, Option<String>)> {
    let (Endpoints::Export { dest, .. } | Endpoints::Remote { dest, .. }) = endpoints;
    let Some(raw) = dest else {
        let transport: Box<dyn Transport> = Box::new(MemoryTransport::new("dry-run"));
        return Ok((transport, None));
    };
    let url = TrackerUrl::parse(raw)?.with_env_credentials("dest");
    let label = url.base.clone();
    let transport: Box<dyn Transport> = Box::new(HttpTransport::new("dest", url));
    Ok((transport, Some(label)))
}

/// Run a migration and print its report.
///
/// # Errors
///
/// Argument, transport and migration failures; migration failures keep
/// their [`ferry_core::MigrateError`] for error-code rendering.
pub fn run_migrate(
    args: &MigrateArgs,
    mut config: FerryConfig,
    output: OutputMode,
    quiet: bool,
) -> Result<()> {
    args.apply(&mut config)?;
    let endpoints = args.endpoints()?;
    let (mut source, source_label) = open_source(&endpoints)?;
    let (mut dest, dest_label) = open_dest(&endpoints)?;
    if dest_label.is_none() {
        info!("no destination given; dry run against an in-memory tracker");
    }

    let report = pipeline::migrate(
        source.as_mut(),
        dest.as_mut(),
        &config,
        args.search.as_deref(),
    )?;

    if quiet && !output.is_json() {
        return Ok(());
    }
    let summary = MigrateSummary {
        source: source_label,
        dry_run: dest_label.is_none(),
        destination: dest_label.unwrap_or_else(|| "dry run".to_string()),
        report: &report,
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    render_mode(&mut out, output, &summary, print_text, print_pretty)
}

fn print_text(summary: &MigrateSummary<'_>, w: &mut dyn Write) -> std::io::Result<()> {
    let report = summary.report;
    writeln!(w, "source {}", summary.source)?;
    writeln!(w, "destination {}", summary.destination)?;
    writeln!(w, "cases_loaded {}", report.cases_loaded)?;
    writeln!(w, "snapshots_reconstructed {}", report.snapshots_reconstructed)?;
    writeln!(w, "snapshots_kept {}", report.snapshots_kept)?;
    writeln!(w, "commands_planned {}", report.commands_planned)?;
    writeln!(w, "commands_total {}", report.commands_total)?;
    for (verb, count) in &report.commands {
        writeln!(w, "commands.{verb} {count}")?;
    }
    writeln!(w, "users_created {}", report.users_created)?;
    writeln!(w, "projects_created {}", report.projects_created)?;
    writeln!(w, "attachments_uploaded {}", report.attachments_uploaded)?;
    writeln!(w, "placeholders_created {}", report.placeholders_created)
}

fn print_pretty(summary: &MigrateSummary<'_>, w: &mut dyn Write) -> std::io::Result<()> {
    let report = summary.report;
    let heading = if summary.dry_run {
        "ferry migrate (dry run)"
    } else {
        "ferry migrate"
    };
    pretty_section(w, heading)?;
    pretty_kv(w, "source", &summary.source)?;
    pretty_kv(w, "destination", &summary.destination)?;
    pretty_kv(w, "cases loaded", report.cases_loaded.to_string())?;
    pretty_kv(
        w,
        "snapshots",
        format!(
            "{} reconstructed, {} kept",
            report.snapshots_reconstructed, report.snapshots_kept
        ),
    )?;
    let verbs = report
        .commands
        .iter()
        .map(|(verb, count)| format!("{verb} {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    pretty_kv(
        w,
        "commands",
        format!("{} ({verbs})", report.commands_total),
    )?;
    pretty_kv(w, "users created", report.users_created.to_string())?;
    pretty_kv(w, "projects created", report.projects_created.to_string())?;
    pretty_kv(
        w,
        "attachments uploaded",
        report.attachments_uploaded.to_string(),
    )?;
    pretty_kv(
        w,
        "placeholders created",
        report.placeholders_created.to_string(),
    )
}
