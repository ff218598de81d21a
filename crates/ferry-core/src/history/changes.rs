//! Free-text change lines and how to undo them.
//!
//! The source journals field changes as English sentences
//! (`Title changed from 'a' to 'b'.`). [`ChangeParser`] holds an ordered
//! table of anchored patterns; the first pattern that matches a line decides
//! what reverting it means. A line that matches nothing is an error: silently
//! skipping it would replay a history that never happened.

use regex::{Captures, Regex};

use crate::model::case::InvalidCaseRef;
use crate::model::{CaseState, Field};

/// What undoing a matched line does to the working state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revert {
    /// The line lists tags that were added (`true`) or removed (`false`).
    Tags { added: bool },
    /// Restore the field to the `old` capture.
    Restore(Field),
    /// The case had no parent before this line.
    ClearParent,
    /// Tracked by the source but not replayed.
    Ignore,
}

/// Errors from undoing a single change line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseChangeError {
    #[error("no rule matches change line '{0}'")]
    Unrecognized(String),

    #[error("invalid {field} value in change line: {source}")]
    InvalidValue {
        field: Field,
        #[source]
        source: InvalidCaseRef,
    },
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    revert: Revert,
}

/// Ordered rule table; first match wins.
#[derive(Debug, Clone)]
pub struct ChangeParser {
    rules: Vec<Rule>,
}

impl ChangeParser {
    /// Build a table from `(pattern, revert)` pairs, tried in order.
    ///
    /// Patterns capture the value to restore as group `old`; tag rules
    /// capture the quoted list as group `tags`.
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile.
    pub fn new<'a>(
        rules: impl IntoIterator<Item = (&'a str, Revert)>,
    ) -> Result<Self, regex::Error> {
        let rules = rules
            .into_iter()
            .map(|(pattern, revert)| {
                Ok(Rule {
                    pattern: Regex::new(pattern)?,
                    revert,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// The rule table for the tracker's journal wording.
    ///
    /// # Errors
    ///
    /// Fails only if a built-in pattern does not compile.
    pub fn standard() -> Result<Self, regex::Error> {
        Self::new([
            (r"^Added tags? (?P<tags>.*)\.", Revert::Tags { added: true }),
            (r"^Removed tags? (?P<tags>.*)\.", Revert::Tags { added: false }),
            (
                r"^Title changed from '(?P<old>.*)' to '(?P<new>.*)'\.",
                Revert::Restore(Field::Title),
            ),
            (
                r"^Priority changed from '(?P<old>\d*).*' to '(?P<new>\d*).*'",
                Revert::Restore(Field::Priority),
            ),
            (
                r"^Project changed from '(?P<old>.*)' to '(?P<new>.*)'",
                Revert::Restore(Field::Project),
            ),
            (
                r"^Status changed from '(?P<old>.*)' to '(?P<new>.*)'",
                Revert::Restore(Field::Status),
            ),
            (
                r"^Category changed from '(?P<old>.*)' to '(?P<new>.*)'",
                Revert::Restore(Field::Category),
            ),
            (
                r"^Parent changed from Case (?P<old>.*) to Case (?P<new>.*)\.",
                Revert::Restore(Field::Parent),
            ),
            (
                r"^Parent changed from Case (?P<old>.*) to \(None\)\.",
                Revert::Restore(Field::Parent),
            ),
            (
                r"^Parent changed from \(None\) to Case (?P<new>.*)\.",
                Revert::ClearParent,
            ),
            (r"^Estimate ", Revert::Ignore),
            (r"^Milestone ", Revert::Ignore),
            (r"^Correspondent ", Revert::Ignore),
            (r"^Date due ", Revert::Ignore),
            (r"^Computer set to", Revert::Ignore),
            // Parent links alone carry the hierarchy.
            (r"^Added subcase", Revert::Ignore),
            (r"^Removed subcase", Revert::Ignore),
            (r"^Created subcase", Revert::Ignore),
        ])
    }

    /// Undo one change line against `state`, returning the rule that fired.
    ///
    /// # Errors
    ///
    /// [`ParseChangeError::Unrecognized`] if no rule matches, or
    /// [`ParseChangeError::InvalidValue`] if a parent line names something
    /// that is not a case number.
    pub fn revert(&self, state: &mut CaseState, line: &str) -> Result<Revert, ParseChangeError> {
        let line = line.trim();
        let Some((rule, caps)) = self
            .rules
            .iter()
            .find_map(|rule| rule.pattern.captures(line).map(|caps| (rule, caps)))
        else {
            return Err(ParseChangeError::Unrecognized(line.to_string()));
        };

        match rule.revert {
            Revert::Tags { added } => {
                for tag in quoted_list(&caps) {
                    if added {
                        state.tags.remove(tag);
                    } else {
                        state.tags.insert(tag.to_string());
                    }
                }
            }
            Revert::Restore(field) => {
                let old = caps.name("old").map_or("", |m| m.as_str());
                state
                    .set(field, old)
                    .map_err(|source| ParseChangeError::InvalidValue { field, source })?;
            }
            Revert::ClearParent => state.parent = None,
            Revert::Ignore => {}
        }
        Ok(rule.revert)
    }
}

/// `'a', 'b'` → `a`, `b`. Each item loses exactly one quote at each end.
fn quoted_list<'h>(caps: &Captures<'h>) -> impl Iterator<Item = &'h str> {
    caps.name("tags")
        .map_or("", |m| m.as_str())
        .split(", ")
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.strip_prefix('\'')
                .and_then(|inner| inner.strip_suffix('\''))
                .unwrap_or(item)
        })
}
