use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::history::Coalescer;
use crate::replay::{OrderPolicy, ReplayOptions};

/// File name looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "ferry.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FerryConfig {
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub order: OrderPolicy,
    /// Maximum gap between snapshots merged by the coalescer.
    #[serde(default)]
    pub coalesce_tolerance_ms: u64,
    #[serde(default = "default_system_actor")]
    pub system_actor: String,
    #[serde(default = "default_internal_assignee")]
    pub internal_assignee: String,
    #[serde(default = "default_unassigned_sentinel")]
    pub unassigned_sentinel: String,
    #[serde(default)]
    pub align_ids: bool,
    /// Highest case id already present in the destination.
    #[serde(default)]
    pub dest_last_case: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            order: OrderPolicy::default(),
            coalesce_tolerance_ms: 0,
            system_actor: default_system_actor(),
            internal_assignee: default_internal_assignee(),
            unassigned_sentinel: default_unassigned_sentinel(),
            align_ids: false,
            dest_last_case: 0,
        }
    }
}

impl ReplayConfig {
    #[must_use]
    pub fn options(&self) -> ReplayOptions {
        ReplayOptions {
            system_actor: self.system_actor.clone(),
            internal_assignee: self.internal_assignee.clone(),
            unassigned_sentinel: self.unassigned_sentinel.clone(),
            align_ids: self.align_ids,
            dest_last_case: self.dest_last_case,
            ..ReplayOptions::default()
        }
    }

    #[must_use]
    pub fn coalescer(&self) -> Coalescer {
        let millis = i64::try_from(self.coalesce_tolerance_ms).unwrap_or(i64::MAX);
        Coalescer::new(chrono::Duration::milliseconds(millis))
    }
}

impl FerryConfig {
    /// Replay settings plus the project routing from `[mapping]`.
    #[must_use]
    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            tag_projects: self.mapping.tag_projects.clone(),
            default_project: self.mapping.default_project.clone(),
            ..self.replay.options()
        }
    }
}

/// Source name → destination name overrides for people and projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    #[serde(default)]
    pub projects: BTreeMap<String, String>,
    /// Tag → destination project; the tag is dropped from moved cases.
    #[serde(default)]
    pub tag_projects: BTreeMap<String, String>,
    /// Destination project for cases that name none. Created if missing.
    #[serde(default)]
    pub default_project: Option<String>,
    /// Source person who takes cases nobody is assigned to.
    #[serde(default)]
    pub unassigned_user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_probe_limit")]
    pub project_probe_limit: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            project_probe_limit: default_probe_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub config: FerryConfig,
    /// Files merged into `config`, lowest precedence first.
    pub sources: Vec<PathBuf>,
    pub resolved_output: String,
}

pub fn load_config_file(path: &Path) -> Result<FerryConfig> {
    parse_table(read_layer(path)?).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_project_config(project_root: &Path) -> Result<Option<FerryConfig>> {
    let path = project_root.join(PROJECT_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ferry/config.toml"))
}

/// Read one layer and check it deserializes on its own, so a bad key is
/// reported against the file that holds it.
fn read_layer(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let table: toml::Table =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    parse_table(table.clone()).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(table)
}

fn parse_table(table: toml::Table) -> Result<FerryConfig> {
    Ok(toml::Value::Table(table).try_into::<FerryConfig>()?)
}

/// Overlay `overlay` on `base`. Tables merge key by key; anything else
/// replaces the lower layer's value.
fn merge_layer(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(table) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_layer(existing, table);
                } else {
                    base.insert(key, toml::Value::Table(table));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Merge the user layer and the project layer, project last.
///
/// # Errors
///
/// Returns an error naming the file if a layer cannot be read or parsed.
pub fn resolve_layers(
    user: Option<&Path>,
    project: Option<&Path>,
) -> Result<(FerryConfig, Vec<PathBuf>)> {
    let mut merged = toml::Table::new();
    let mut sources = Vec::new();
    for path in [user, project].into_iter().flatten() {
        merge_layer(&mut merged, read_layer(path)?);
        sources.push(path.to_path_buf());
    }
    let config = parse_table(merged).context("Failed to merge configuration layers")?;
    Ok((config, sources))
}

/// Settings for a run: defaults, overlaid by the user config, overlaid by
/// the project layer. The project layer is the explicit `--config` file,
/// else `ferry.toml` in `project_root`.
pub fn resolve_config(
    explicit: Option<&Path>,
    project_root: &Path,
    cli_json: bool,
) -> Result<EffectiveConfig> {
    let user = user_config_path().filter(|path| path.exists());
    let project = explicit.map(Path::to_path_buf).or_else(|| {
        let path = project_root.join(PROJECT_CONFIG_FILE);
        path.exists().then_some(path)
    });
    let (config, sources) = resolve_layers(user.as_deref(), project.as_deref())?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, config.output.format.clone(), env_format);

    Ok(EffectiveConfig {
        config,
        sources,
        resolved_output,
    })
}

/// Split a `SOURCE:DEST` mapping argument.
///
/// The last colon separates the names, so a source name may contain colons.
pub fn parse_mapping_arg(raw: &str) -> Result<(String, String)> {
    let Some((from, to)) = raw.rsplit_once(':') else {
        bail!("mapping '{raw}' must look like SOURCE:DEST");
    };
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        bail!("mapping '{raw}' has an empty side");
    }
    Ok((from.to_string(), to.to_string()))
}

/// Merge CLI `SOURCE:DEST` pairs over file mappings.
pub fn apply_mapping_args(target: &mut BTreeMap<String, String>, args: &[String]) -> Result<()> {
    for raw in args {
        let (from, to) = parse_mapping_arg(raw)?;
        target.insert(from, to);
    }
    Ok(())
}

fn resolve_output(
    cli_json: bool,
    file_output: Option<String>,
    env_format: Option<String>,
) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "plain" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = file_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

fn default_system_actor() -> String {
    "-1".to_string()
}

fn default_internal_assignee() -> String {
    "1".to_string()
}

fn default_unassigned_sentinel() -> String {
    "0".to_string()
}

const fn default_probe_limit() -> u32 {
    100
}
