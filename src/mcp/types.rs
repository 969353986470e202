//! Serializable response types for the MCP tools.
//!
//! All types implement `Serialize`, `Deserialize`, and `JsonSchema`. Unsigned
//! fields use [`uint`](super::schema::uint) so schemas carry no Rust-specific
//! integer formats.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::executor::{ExecutionResult, ScriptResult};
use crate::pool::SessionInfo;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandResponse {
    pub target: String,
    pub command: String,
    /// True iff the exit code is 0
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// RFC3339 start time
    pub started_at: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub duration_ms: u64,
}

impl From<ExecutionResult> for CommandResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            target: result.target,
            command: result.command,
            succeeded: result.succeeded,
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            started_at: result.started_at.to_rfc3339(),
            duration_ms: result.duration_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ScriptResponse {
    pub target: String,
    pub succeeded: bool,
    /// Stdout of every line that ran
    pub stdout: String,
    pub steps: Vec<CommandResponse>,
    /// Line that exited nonzero, if the script stopped early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
}

impl ScriptResponse {
    pub fn new(target: &str, result: ScriptResult) -> Self {
        Self {
            target: target.to_string(),
            succeeded: result.succeeded,
            stdout: result.stdout,
            steps: result.steps.into_iter().map(CommandResponse::from).collect(),
            failed_at: result.failed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CommandValidationResponse {
    pub command: String,
    pub allowed: bool,
    pub reason: String,
    /// Advisory cleanup of the command; still subject to validation
    pub sanitized: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PathValidationResponse {
    pub path: String,
    pub normalized: String,
    pub allowed: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionSummary {
    pub target: String,
    /// `ssh` or `local`
    pub kind: String,
    /// RFC3339 creation time
    pub created_at: String,
    pub alive: bool,
    /// A command is currently running on this session
    pub in_use: bool,
}

impl From<SessionInfo> for SessionSummary {
    fn from(info: SessionInfo) -> Self {
        Self {
            target: info.target,
            kind: info.kind.to_string(),
            created_at: info.created_at.to_rfc3339(),
            alive: info.alive,
            in_use: info.in_use,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SessionListResponse {
    /// Pooled sessions, one per target at most
    pub sessions: Vec<SessionSummary>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
    /// Target names from configuration
    pub configured_targets: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RateLimitStatusResponse {
    pub caller_id: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub available_tokens: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub capacity: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub refill_tokens: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub refill_interval_secs: u64,
    /// Milliseconds until the next refill
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub reset_after_ms: u64,
}
