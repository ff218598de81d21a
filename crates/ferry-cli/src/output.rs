//! Shared output layer for pretty/text/JSON parity across CLI commands.
//!
//! The mode comes from the resolved configuration (`--json` flag, then the
//! `FORMAT` env var, then `[output] format`, then pretty on a TTY and text
//! when piped).

use ferry_core::MigrateError;
use serde::Serialize;
use std::io::{self, Write};

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

/// Write a horizontal separator used by pretty human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<22} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-optimized output (sections, visual framing).
    Pretty,
    /// Plain `key value` lines for scripts and pipes.
    Text,
    Json,
}

impl OutputMode {
    /// Map a resolved mode name; anything unrecognised is text.
    #[must_use]
    pub fn from_resolved(raw: &str) -> Self {
        match raw {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Text,
        }
    }

    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Values that render in all three modes.
pub trait Renderable {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()>;

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()>;

    /// One text row, fields in [`Renderable::table_headers`] order.
    fn render_table(&self, w: &mut dyn Write) -> io::Result<()>;

    fn table_headers() -> &'static [&'static str]
    where
        Self: Sized,
    {
        &[]
    }
}

/// Render a list of [`Renderable`] items to `out`.
///
/// - In JSON mode, wraps items in a JSON array.
/// - In text mode, prints the headers once, then one row per item.
pub fn render_list<R: Renderable>(
    out: &mut dyn Write,
    items: &[R],
    mode: OutputMode,
) -> io::Result<()> {
    match mode {
        OutputMode::Pretty => {
            for item in items {
                item.render_human(out)?;
            }
        }
        OutputMode::Text => {
            let headers = if items.is_empty() {
                &[] as &[&str]
            } else {
                R::table_headers()
            };
            if !headers.is_empty() {
                writeln!(out, "{}", headers.join("  "))?;
            }
            for item in items {
                item.render_table(out)?;
            }
        }
        OutputMode::Json => {
            write!(out, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(out, ",")?;
                }
                writeln!(out)?;
                let mut buf = Vec::new();
                item.render_json(&mut buf)?;
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                out.write_all(&buf)?;
            }
            writeln!(out, "\n]")?;
        }
    }
    Ok(())
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    out: &mut dyn Write,
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, out)?,
        OutputMode::Pretty => pretty_fn(value, out)?,
    }
    Ok(())
}

/// A structured error with optional hint and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Stable code, e.g. `F2001`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: None,
            error_code: None,
        }
    }

    #[cfg(test)]
    pub fn with_details(
        message: impl Into<String>,
        hint: impl Into<String>,
        error_code: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            hint: Some(hint.into()),
            error_code: Some(error_code.into()),
        }
    }
}

impl From<&MigrateError> for CliError {
    fn from(err: &MigrateError) -> Self {
        let code = err.code();
        Self {
            message: err.to_string(),
            hint: code.hint().map(String::from),
            error_code: Some(code.code().to_string()),
        }
    }
}

/// Render an error in the requested format.
pub fn render_error(out: &mut dyn Write, mode: OutputMode, error: &CliError) -> io::Result<()> {
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut *out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(hint) = &error.hint {
                writeln!(out, "  hint: {hint}")?;
            }
        }
    }
    Ok(())
}
