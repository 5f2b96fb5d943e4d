//! JSON-RPC 2.0 envelope for the `run_redshift_query` endpoint.
//!
//! - **types**: response wire types and error codes
//! - **error**: [`RpcError`], every caller-visible failure
//! - **validate**: [`RequestValidator`], raw body to [`ValidatedCall`]

pub mod error;
pub mod types;
pub mod validate;

pub use error::RpcError;
pub use types::*;
pub use validate::{Rejected, RequestValidator, ValidatedCall};
