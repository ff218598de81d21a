use anyhow::Result;
use chrono::SecondsFormat;
use clap::Args;
use ferry_core::config::FerryConfig;
use ferry_core::model::Snapshot;
use ferry_core::pipeline::{self, CaseHistory};
use ferry_core::transport::export::ExportTransport;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::output::{OutputMode, Renderable, pretty_kv, pretty_rule, render_list};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// JSON export to read cases from.
    #[arg(long, value_name = "PATH")]
    pub export: PathBuf,

    /// Show only this source case.
    #[arg(long, value_name = "N", conflicts_with = "search")]
    pub case: Option<u64>,

    /// Source search selecting the cases to show.
    #[arg(long, value_name = "QUERY")]
    pub search: Option<String>,

    /// Coalescing tolerance override.
    #[arg(long, value_name = "MS")]
    pub tolerance_ms: Option<u64>,
}

/// One replayable state of a case, flattened for output.
#[derive(Debug, Serialize)]
struct SnapshotRow {
    case: u64,
    step: usize,
    timestamp: String,
    actor: String,
    title: String,
    status: String,
    priority: String,
    category: String,
    assignee: String,
    project: String,
    parent: Option<u64>,
    tags: Vec<String>,
    attachments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl SnapshotRow {
    fn new(step: usize, snapshot: &Snapshot) -> Self {
        let state = &snapshot.state;
        Self {
            case: state.id,
            step,
            timestamp: snapshot.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            actor: snapshot.actor.clone(),
            title: state.title.clone(),
            status: state.status.clone(),
            priority: state.priority.clone(),
            category: state.category.clone(),
            assignee: state.assignee.clone(),
            project: state.project.clone(),
            parent: state.parent,
            tags: state.tags.iter().cloned().collect(),
            attachments: state
                .attachments
                .iter()
                .map(|a| a.file_name.clone())
                .collect(),
            message: snapshot.message.clone(),
        }
    }
}

impl Renderable for SnapshotRow {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "case {} #{}  {}  by {}",
            self.case, self.step, self.timestamp, self.actor
        )?;
        pretty_rule(w)?;
        pretty_kv(w, "title", &self.title)?;
        pretty_kv(w, "status", &self.status)?;
        pretty_kv(
            w,
            "priority/category",
            format!("{} / {}", self.priority, self.category),
        )?;
        pretty_kv(w, "assignee", &self.assignee)?;
        pretty_kv(w, "project", &self.project)?;
        if let Some(parent) = self.parent {
            pretty_kv(w, "parent", parent.to_string())?;
        }
        if !self.tags.is_empty() {
            pretty_kv(w, "tags", self.tags.join(", "))?;
        }
        if !self.attachments.is_empty() {
            pretty_kv(w, "attachments", self.attachments.join(", "))?;
        }
        if let Some(message) = &self.message {
            pretty_kv(w, "message", message)?;
        }
        writeln!(w)
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(&mut *w, self)?;
        writeln!(w)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}  {}  {}  {}  {}  {}  {}",
            self.case,
            self.step,
            self.timestamp,
            self.actor,
            self.status,
            self.assignee,
            self.title
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["CASE", "STEP", "TIMESTAMP", "ACTOR", "STATUS", "ASSIGNEE", "TITLE"]
    }
}

fn rows(histories: &[CaseHistory]) -> Vec<SnapshotRow> {
    histories
        .iter()
        .flat_map(|history| {
            history
                .snapshots
                .iter()
                .enumerate()
                .map(|(i, snapshot)| SnapshotRow::new(i + 1, snapshot))
        })
        .collect()
}

/// Print the coalesced history of the selected cases.
///
/// # Errors
///
/// Export and reconstruction failures.
pub fn run_history(args: &HistoryArgs, mut config: FerryConfig, output: OutputMode) -> Result<()> {
    if let Some(tolerance) = args.tolerance_ms {
        config.replay.coalesce_tolerance_ms = tolerance;
    }
    let mut source = ExportTransport::open(&args.export)?;
    let search = args
        .case
        .map(|case| case.to_string())
        .or_else(|| args.search.clone());
    let histories = pipeline::case_history(&mut source, &config, search.as_deref())?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    render_list(&mut out, &rows(&histories), output)?;
    Ok(())
}
