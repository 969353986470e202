//! Validated, audited, rate-limited command execution over pooled SSH
//! sessions.
//!
//! The crate is organized bottom-up:
//!
//! - `error`: Error taxonomy and retry classification
//! - `config`: Configuration resolution with environment variable support
//! - `target`: Named targets loaded from configuration
//! - `auth`: SSH authentication strategies
//! - `session`, `client`: Session traits, local and russh-backed sessions
//! - `pool`: One reusable session per target
//! - `security`: Command and path validators, rate limiter, audit log
//! - `executor`: Validation, retry, timeout and audit around one command
//! - `conductor`: Composition root owning every component
//! - `mcp`: MCP tool surface

pub mod auth;
pub mod client;
pub mod conductor;
pub mod config;
pub mod error;
pub mod executor;
pub mod mcp;
pub mod pool;
pub mod security;
pub mod session;
pub mod target;

#[cfg(test)]
pub(crate) mod testing;

pub use conductor::Conductor;
pub use error::{ConductorError, Result};
