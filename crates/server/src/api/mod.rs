//! HTTP endpoint handlers.
//!
//! Each sub-module owns a single responsibility area.

mod health;
mod mcp;

pub use health::healthz;
pub use mcp::mcp;
