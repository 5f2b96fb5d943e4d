//! Read-only SQL guard.
//!
//! Splits a raw SQL batch into statements, tags each with a [`StatementKind`],
//! and accepts the batch only when every statement is a plain `SELECT`.
//! Anything the parser cannot understand is rejected.

pub mod classify;
pub mod guard;

pub use classify::{classify_batch, StatementBatch, StatementKind};
pub use guard::{check_read_only, GuardError, REJECTION_MESSAGE};
