use std::fmt;

use serde::{Deserialize, Serialize};

/// Destination-visible status families.
///
/// The tracker's statuses are free strings (`Resolved (Fixed)`,
/// `Closed (Duplicate)`, ...); replay only cares which family a string
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Active,
    Resolved,
    Closed,
}

impl StatusClass {
    /// Classify a status string; `None` for anything outside the three families.
    #[must_use]
    pub fn classify(status: &str) -> Option<Self> {
        if status == "Active" {
            Some(Self::Active)
        } else if status.starts_with("Resolved") {
            Some(Self::Resolved)
        } else if status.starts_with("Closed") {
            Some(Self::Closed)
        } else {
            None
        }
    }
}

/// Command verbs understood by the destination tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    New,
    Edit,
    Resolve,
    Close,
    Reactivate,
}

impl Verb {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Edit => "edit",
            Self::Resolve => "resolve",
            Self::Close => "close",
            Self::Reactivate => "reactivate",
        }
    }

    /// Verb that moves a case from `from` to `to`.
    #[must_use]
    pub const fn for_transition(from: StatusClass, to: StatusClass) -> Self {
        match (from, to) {
            (StatusClass::Active, StatusClass::Active)
            | (StatusClass::Resolved, StatusClass::Resolved)
            | (StatusClass::Closed, StatusClass::Closed) => Self::Edit,
            (_, StatusClass::Resolved) => Self::Resolve,
            (_, StatusClass::Closed) => Self::Close,
            (_, StatusClass::Active) => Self::Reactivate,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_statuses() {
        assert_eq!(StatusClass::classify("Active"), Some(StatusClass::Active));
        assert_eq!(
            StatusClass::classify("Resolved (Fixed)"),
            Some(StatusClass::Resolved)
        );
        assert_eq!(
            StatusClass::classify("Closed (Won't Fix)"),
            Some(StatusClass::Closed)
        );
        assert_eq!(StatusClass::classify("Active (Blocked)"), None);
        assert_eq!(StatusClass::classify("Pending"), None);
    }

    #[test]
    fn transitions() {
        use StatusClass::{Active, Closed, Resolved};
        assert_eq!(Verb::for_transition(Active, Active), Verb::Edit);
        assert_eq!(Verb::for_transition(Resolved, Resolved), Verb::Edit);
        assert_eq!(Verb::for_transition(Active, Resolved), Verb::Resolve);
        assert_eq!(Verb::for_transition(Resolved, Closed), Verb::Close);
        assert_eq!(Verb::for_transition(Active, Closed), Verb::Close);
        assert_eq!(Verb::for_transition(Resolved, Active), Verb::Reactivate);
        assert_eq!(Verb::for_transition(Closed, Active), Verb::Reactivate);
        assert_eq!(Verb::for_transition(Closed, Resolved), Verb::Resolve);
    }
}
