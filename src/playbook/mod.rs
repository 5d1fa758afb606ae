//! Playbook Store: accumulated routing lessons with Bayesian confidence and
//! source-weighted authority.

pub mod lesson;
pub mod store;

pub use lesson::{LessonCategory, LessonRecord, PlaybookConfig};
pub use store::{PlaybookStore, SqlitePlaybookMirror, StoreOutcome};
