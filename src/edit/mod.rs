//! Staging mutations to remote configuration.
//!
//! Changes are never made to the remote side directly. An [`Editor`]
//! appends [`ActionRecord`]s to an [`ActionLog`], and the log is then
//! drained and handed to the authority as one all-or-nothing transaction.

mod record;
pub use self::record::{ActionRecord, Operation};

mod action_log;
pub use self::action_log::ActionLog;

mod editor;
pub use self::editor::{Editor, Transaction};
