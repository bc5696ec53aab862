//! Named, process-shared state with optimistic-concurrency transactions.
//!
//! A [`State`] publishes or observes a named shared-memory region; a
//! [`Transaction`] opens a private snapshot of a subscribed state, edits it,
//! and commits (subject to an optimistic-concurrency check against the
//! region's contents at start) or aborts.

pub use kstate_base::{
    clear_sink as clear_diag_sink, diag_info, diag_warning, set_sink as set_diag_sink, DiagLevel,
    Error, Result,
};
pub use kstate_core::{max_name_len, unique_name, validate_name, Permissions};
pub use kstate_state::State;
pub use kstate_txn::Transaction;
