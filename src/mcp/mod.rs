//! MCP tool surface over the execution core.
//!
//! - `types`: Serializable response types for MCP tools
//! - `schema`: JSON Schema helpers for those types
//! - `commands`: MCP tool implementations

pub mod commands;
pub(crate) mod schema;
pub mod types;

pub use commands::ConductorTools;
