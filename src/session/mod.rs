//! Multi-turn session state and its durable store

mod ledger;
mod migrations;
mod model;
mod store;

pub use ledger::{apply_pending, AppliedEdit, CommitOutcome, EditLedger, PendingEdit};
pub use model::{validate_session_id, Session, SessionInfo, MAX_SESSION_ID_LEN};
pub use store::{spawn_cleanup_task, SessionHandle, SessionStore};
