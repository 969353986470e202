//! MCP tool implementations.
//!
//! - `execute_command`: validate, run and audit one command on a target
//! - `execute_script`: run a multi-line script line by line
//! - `validate_command`: dry-run the command validator
//! - `validate_path`: check a path against the path policy
//! - `list_sessions`: inspect the session pool
//! - `rate_limit_status`: inspect the caller's token bucket
//!
//! Every tool spends one rate-limit token for its caller before doing
//! anything else. Errors are returned as plain messages.

use std::sync::Arc;

use poem_mcpserver::{Tools, tool::StructuredContent};
use tracing::info;

use super::types::{
    CommandResponse, CommandValidationResponse, PathValidationResponse, RateLimitStatusResponse,
    ScriptResponse, SessionListResponse, SessionSummary,
};
use crate::conductor::Conductor;
use crate::security::SecurityEvent;
use crate::security::audit::AuditEntry;

/// Caller identity used when a tool call does not name one.
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// Target used for file-operation audit entries without an explicit target.
const DEFAULT_FILE_TARGET: &str = "localhost";

pub struct ConductorTools {
    conductor: Arc<Conductor>,
}

impl ConductorTools {
    pub fn new(conductor: Arc<Conductor>) -> Self {
        Self { conductor }
    }

    /// Spend one token for the caller; a trip is audited.
    fn admit(&self, caller_id: Option<String>) -> Result<String, String> {
        let caller = caller_id
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_CALLER.to_string());

        match self.conductor.rate_limiter().check(&caller, 1) {
            Ok(()) => Ok(caller),
            Err(e) => {
                self.conductor.audit().record(
                    AuditEntry::builder(SecurityEvent::RateLimitExceeded.event_name())
                        .actor(caller.as_str())
                        .field("details", e.to_string())
                        .build(),
                );
                Err(e.to_string())
            }
        }
    }

    fn check_path(
        &self,
        path: &str,
        target: Option<&str>,
        operation: Option<&str>,
    ) -> PathValidationResponse {
        let validator = self.conductor.path_validator();
        let verdict = validator.verdict(path);
        let target = target.unwrap_or(DEFAULT_FILE_TARGET);

        if !verdict.allowed {
            self.conductor.audit().log_security_event(
                SecurityEvent::PathBlocked,
                Some(target),
                &format!("{} ({})", path, verdict.reason),
            );
        } else if let Some(operation) = operation {
            self.conductor
                .audit()
                .log_file_operation(target, operation, &validator.normalize_path(path));
        }

        PathValidationResponse {
            path: path.to_string(),
            normalized: validator.normalize_path(path),
            allowed: verdict.allowed,
            reason: verdict.reason,
        }
    }

    fn rate_status(&self, caller: &str) -> RateLimitStatusResponse {
        let limiter = self.conductor.rate_limiter();
        let config = limiter.config();
        RateLimitStatusResponse {
            caller_id: caller.to_string(),
            available_tokens: limiter.available_tokens(caller),
            capacity: config.capacity,
            refill_tokens: config.refill_tokens,
            refill_interval_secs: config.refill_interval.as_secs(),
            reset_after_ms: limiter.reset_after(caller).as_millis() as u64,
        }
    }

    fn session_list(&self) -> SessionListResponse {
        let pool = self.conductor.pool();
        let sessions: Vec<SessionSummary> =
            pool.sessions().into_iter().map(SessionSummary::from).collect();
        SessionListResponse {
            count: sessions.len(),
            sessions,
            configured_targets: pool.registry().names(),
        }
    }
}

#[Tools]
impl ConductorTools {
    /// Execute a single command on a configured target.
    ///
    /// The command is validated first: chaining with `;` or `&&`, command
    /// substitution and destructive commands are rejected. A nonzero exit
    /// code is reported with `succeeded=false`, not as an error.
    async fn execute_command(
        &self,
        /// The command to run (e.g., "ls -la /var/log", "systemctl status nginx")
        command: String,
        /// Target name from configuration, or "localhost" for local execution
        target: String,
        /// Run the command through sudo (default: false)
        elevate: Option<bool>,
        /// Identity used for rate limiting and audit (default: "anonymous")
        caller_id: Option<String>,
    ) -> Result<StructuredContent<CommandResponse>, String> {
        let caller = self.admit(caller_id)?;
        info!("execute_command on {} for {}", target, caller);

        let result = self
            .conductor
            .executor()
            .execute(&target, &command, elevate.unwrap_or(false))
            .await
            .map_err(|e| e.to_string())?;

        Ok(StructuredContent(result.into()))
    }

    /// Execute a multi-line script, one line at a time.
    ///
    /// Blank lines are skipped. Each line is validated and audited on its
    /// own; execution stops at the first line that fails.
    async fn execute_script(
        &self,
        /// Script with one command per line (e.g., "cd /var/www\nls -la")
        script: String,
        /// Target name from configuration, or "localhost" for local execution
        target: String,
        /// Run every line through sudo (default: false)
        elevate: Option<bool>,
        /// Identity used for rate limiting and audit (default: "anonymous")
        caller_id: Option<String>,
    ) -> Result<StructuredContent<ScriptResponse>, String> {
        let caller = self.admit(caller_id)?;
        info!("execute_script on {} for {}", target, caller);

        let result = self
            .conductor
            .executor()
            .execute_script(&target, &script, elevate.unwrap_or(false))
            .await
            .map_err(|e| e.to_string())?;

        Ok(StructuredContent(ScriptResponse::new(&target, result)))
    }

    /// Check whether a command would be accepted, without running it.
    async fn validate_command(
        &self,
        /// The command to check
        command: String,
        /// Identity used for rate limiting (default: "anonymous")
        caller_id: Option<String>,
    ) -> Result<StructuredContent<CommandValidationResponse>, String> {
        self.admit(caller_id)?;

        let validator = self.conductor.command_validator();
        let verdict = validator.verdict(&command);
        Ok(StructuredContent(CommandValidationResponse {
            sanitized: validator.sanitize(&command),
            command,
            allowed: verdict.allowed,
            reason: verdict.reason,
        }))
    }

    /// Check a file path against the allowed and restricted directories.
    ///
    /// Rejections are audited. When `operation` is given and the path is
    /// allowed, the file operation is audited too.
    async fn validate_path(
        &self,
        /// Absolute path to check (e.g., "/var/www/index.html")
        path: String,
        /// Target the path belongs to (default: "localhost")
        target: Option<String>,
        /// File operation about to be performed (e.g., "read", "write")
        operation: Option<String>,
        /// Identity used for rate limiting (default: "anonymous")
        caller_id: Option<String>,
    ) -> Result<StructuredContent<PathValidationResponse>, String> {
        self.admit(caller_id)?;
        Ok(StructuredContent(self.check_path(
            &path,
            target.as_deref(),
            operation.as_deref(),
        )))
    }

    /// List pooled sessions and configured targets.
    async fn list_sessions(
        &self,
        /// Identity used for rate limiting (default: "anonymous")
        caller_id: Option<String>,
    ) -> Result<StructuredContent<SessionListResponse>, String> {
        self.admit(caller_id)?;
        Ok(StructuredContent(self.session_list()))
    }

    /// Show the caller's remaining rate-limit tokens.
    async fn rate_limit_status(
        &self,
        /// Identity to inspect (default: "anonymous")
        caller_id: Option<String>,
    ) -> Result<StructuredContent<RateLimitStatusResponse>, String> {
        let caller = self.admit(caller_id)?;
        Ok(StructuredContent(self.rate_status(&caller)))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::ConductorConfig;
    use crate::testing::{FakeConnector, read_audit_entries, temp_audit_path};

    fn tools(capacity: u64) -> (ConductorTools, PathBuf) {
        let path = temp_audit_path();
        let raw = format!(
            r#"{{
                "rate_limit": {{ "capacity": {}, "refill_tokens": {}, "refill_secs": 60 }},
                "audit": {{ "file": {:?} }}
            }}"#,
            capacity,
            capacity,
            path.display().to_string()
        );
        let config = ConductorConfig::from_json(&raw).unwrap();
        let conductor =
            Conductor::with_connector(&config, Arc::new(FakeConnector::new())).unwrap();
        (ConductorTools::new(Arc::new(conductor)), path)
    }

    mod admission {
        use super::*;

        #[tokio::test]
        async fn test_anonymous_default() {
            let (tools, path) = tools(5);
            assert_eq!(tools.admit(None).unwrap(), ANONYMOUS_CALLER);
            assert_eq!(tools.admit(Some("  ".to_string())).unwrap(), ANONYMOUS_CALLER);
            assert_eq!(tools.admit(Some("agent-7".to_string())).unwrap(), "agent-7");
            let _ = std::fs::remove_file(&path);
        }

        #[tokio::test]
        async fn test_trip_is_audited() {
            let (tools, path) = tools(1);
            assert!(tools.admit(Some("agent".to_string())).is_ok());

            let err = tools.admit(Some("agent".to_string())).unwrap_err();
            assert!(err.contains("rate limit exceeded"));

            tools.conductor.audit().flush().await;
            let entries = read_audit_entries(&path);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].event, "SECURITY_RATE_LIMIT_EXCEEDED");
            assert_eq!(entries[0].actor, "agent");
            let _ = std::fs::remove_file(&path);
        }

        #[tokio::test]
        async fn test_status_reflects_spent_tokens() {
            let (tools, path) = tools(5);
            let caller = tools.admit(Some("agent".to_string())).unwrap();
            let status = tools.rate_status(&caller);
            assert_eq!(status.available_tokens, 4);
            assert_eq!(status.capacity, 5);
            assert_eq!(status.refill_interval_secs, 60);
            let _ = std::fs::remove_file(&path);
        }
    }

    mod paths {
        use super::*;

        #[tokio::test]
        async fn test_blocked_path_is_audited() {
            let (tools, path) = tools(5);

            let response = tools.check_path("/var/../etc/shadow", Some("web"), Some("read"));
            assert!(!response.allowed);
            assert_eq!(response.normalized, "/etc/shadow");

            tools.conductor.audit().flush().await;
            let entries = read_audit_entries(&path);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].event, "SECURITY_PATH_BLOCKED");
            assert_eq!(entries[0].target.as_deref(), Some("web"));
            let _ = std::fs::remove_file(&path);
        }

        #[tokio::test]
        async fn test_allowed_operation_is_audited() {
            let (tools, path) = tools(5);

            assert!(tools.check_path("/var/app/./data.txt", None, Some("write")).allowed);
            assert!(tools.check_path("/tmp/scratch", None, None).allowed);

            tools.conductor.audit().flush().await;
            let entries = read_audit_entries(&path);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].event, "FILE_OPERATION");
            assert_eq!(entries[0].fields["path"], "/var/app/data.txt");
            assert_eq!(entries[0].target.as_deref(), Some("localhost"));
            let _ = std::fs::remove_file(&path);
        }
    }

    #[tokio::test]
    async fn test_session_list_includes_configured_targets() {
        let (tools, path) = tools(5);
        tools
            .conductor
            .executor()
            .execute("localhost", "uptime", false)
            .await
            .unwrap();

        let list = tools.session_list();
        assert_eq!(list.count, 1);
        assert_eq!(list.sessions[0].target, "localhost");
        assert!(list.configured_targets.is_empty());
        let _ = std::fs::remove_file(&path);
    }
}
