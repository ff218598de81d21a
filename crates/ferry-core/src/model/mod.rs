//! Case, journal and snapshot types shared by every stage of a migration.

pub mod case;
pub mod journal;
pub mod status;

pub use case::{Attachment, Case, CaseId, CaseState, Field, Snapshot, unescape_attachment_url};
pub use journal::{Delta, JournalEntry};
pub use status::{StatusClass, Verb};
