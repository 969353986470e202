//! Security gates in front of remote execution.
//!
//! - [`CommandValidator`] and [`PathValidator`] accept or reject input.
//! - [`RateLimiter`] throttles callers before any work starts.
//! - [`AuditLogger`] records executions and every rejection.

pub mod audit;
pub mod command;
pub mod path;
pub mod rate_limit;

pub use audit::{AuditEntry, AuditEntryBuilder, AuditLogger, SecurityEvent};
pub use command::{CommandValidator, ValidationVerdict};
pub use path::{PathValidator, normalize_path};
pub use rate_limit::RateLimiter;
