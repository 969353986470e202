//! Error taxonomy for remote command execution.
//!
//! Every failure surfaced by the execution core is one variant of
//! [`ConductorError`]. Callers pattern-match on the variant instead of
//! inspecting message text:
//!
//! | Variant | Retried | Meaning |
//! |---------|---------|---------|
//! | `Configuration` | never | Unknown target or unusable target definition |
//! | `Connection` | always | Session could not be established |
//! | `ValidationRejected` | never | Command or path blocked by a validator |
//! | `CommandExecution` | never | The run itself failed (or a checked nonzero exit) |
//! | `Timeout` | never | The command did not complete within the wall-clock limit |
//! | `RateLimitExceeded` | never | Caller exhausted its token bucket |
//!
//! # Retry classification
//!
//! Only `Connection` errors are ever retried. Rejected credentials count as
//! connection errors and are retried like network faults unless
//! `retry_auth_failures` is switched off, in which case
//! [`ConductorError::is_transient`] decides. Authentication keywords take
//! precedence over connection keywords there: a message mentioning both is
//! never retried, so bad credentials cannot lock out an account through
//! repeated attempts.

use std::time::Duration;

use thiserror::Error;

/// Exit code reported when no process exit status was ever produced.
pub const NO_EXIT_CODE: i32 = -1;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ConductorError>;

/// What a validation rejection was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedSubject {
    Command,
    Path,
}

impl std::fmt::Display for RejectedSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectedSubject::Command => write!(f, "command"),
            RejectedSubject::Path => write!(f, "path"),
        }
    }
}

/// Failure of one execution request.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Unknown target, or a target definition that cannot be used.
    #[error("configuration error for target '{target}': {message}")]
    Configuration { target: String, message: String },

    /// Network or authentication failure while establishing a session.
    #[error("connection to '{target}' failed: {message}")]
    Connection { target: String, message: String },

    /// Command or path blocked by a validator. Never retried.
    #[error("{subject} rejected: {reason} ({value})")]
    ValidationRejected {
        subject: RejectedSubject,
        value: String,
        reason: String,
    },

    /// The run itself failed, or a nonzero exit was checked.
    ///
    /// `exit_code` is [`NO_EXIT_CODE`] when the process never reported one.
    #[error("command '{command}' failed on '{target}' with exit code {exit_code}: {message}")]
    CommandExecution {
        command: String,
        target: String,
        exit_code: i32,
        stderr: String,
        message: String,
    },

    /// The command did not finish within the wall-clock limit.
    #[error("command '{command}' on '{target}' timed out after {timeout:?}")]
    Timeout {
        command: String,
        target: String,
        timeout: Duration,
    },

    /// Caller exhausted its token bucket; `reset_after` is the time until
    /// the next refill.
    #[error("rate limit exceeded for '{caller_id}', retry after {reset_after:?}")]
    RateLimitExceeded {
        caller_id: String,
        reset_after: Duration,
    },
}

impl ConductorError {
    /// Create a configuration error for a target.
    pub(crate) fn configuration(target: impl Into<String>, message: impl Into<String>) -> Self {
        ConductorError::Configuration {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a connection error for a target.
    pub(crate) fn connection(target: impl Into<String>, message: impl Into<String>) -> Self {
        ConductorError::Connection {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a validation rejection for a command.
    pub(crate) fn command_rejected(command: &str, reason: impl Into<String>) -> Self {
        ConductorError::ValidationRejected {
            subject: RejectedSubject::Command,
            value: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a validation rejection for a path.
    pub(crate) fn path_rejected(path: &str, reason: impl Into<String>) -> Self {
        ConductorError::ValidationRejected {
            subject: RejectedSubject::Path,
            value: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether session setup failed and may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConductorError::Connection { .. })
    }

    /// Like [`is_retryable`](Self::is_retryable), but only for failures whose
    /// message looks transient. Authentication failures are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ConductorError::Connection { message, .. } => is_retryable_error(message),
            _ => false,
        }
    }

    /// Exit code carried by the error, or [`NO_EXIT_CODE`].
    pub fn exit_code(&self) -> i32 {
        match self {
            ConductorError::CommandExecution { exit_code, .. } => *exit_code,
            _ => NO_EXIT_CODE,
        }
    }

    /// Short machine-readable tag, used as the audit `status` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ConductorError::Configuration { .. } => "configuration_error",
            ConductorError::Connection { .. } => "connection_error",
            ConductorError::ValidationRejected { .. } => "validation_rejected",
            ConductorError::CommandExecution { .. } => "execution_error",
            ConductorError::Timeout { .. } => "timeout",
            ConductorError::RateLimitExceeded { .. } => "rate_limited",
        }
    }
}

/// Authentication error patterns that indicate permanent failures.
///
/// Retrying these cannot succeed and may lock out the account.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "authentication rejected",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
    "failed to load private key",
];

/// Connection error patterns that indicate transient failures.
///
/// These may resolve on retry once the network or server recovers.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "timed out",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
];

/// Classify a connection error message as transient (`true`) or permanent.
///
/// # Classification Rules
///
/// 1. **Authentication failures are permanent**: patterns like
///    "authentication failed", "permission denied" or "publickey" are checked
///    first and win over every other keyword.
/// 2. **Network failures are transient**: "connection refused", "timeout",
///    "network is unreachable" and similar.
/// 3. **Unknown messages**: transient, unless they mention "ssh" without
///    also mentioning "timeout" or "connect".
pub(crate) fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return false;
    }

    if RETRYABLE_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return true;
    }

    !error_lower.contains("ssh")
        || error_lower.contains("timeout")
        || error_lower.contains("connect")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod classification {
        use super::*;

        #[test]
        fn test_auth_failures_are_permanent() {
            assert!(!is_retryable_error("Authentication failed"));
            assert!(!is_retryable_error("Permission denied (publickey)"));
            assert!(!is_retryable_error("key authentication rejected"));
            assert!(!is_retryable_error(
                "Failed to load private key from \"/keys/id\": bad passphrase"
            ));
        }

        #[test]
        fn test_network_failures_are_transient() {
            assert!(is_retryable_error("Connection refused"));
            assert!(is_retryable_error("connection reset by peer"));
            assert!(is_retryable_error("Network is unreachable"));
            assert!(is_retryable_error("Connection timed out after 10s"));
            assert!(is_retryable_error("SSH handshake failed"));
        }

        #[test]
        fn test_auth_takes_precedence() {
            assert!(!is_retryable_error(
                "Connection timeout during authentication failed"
            ));
        }

        #[test]
        fn test_unknown_errors() {
            assert!(is_retryable_error("Something went wrong"));
            assert!(!is_retryable_error("SSH protocol error"));
            assert!(is_retryable_error("SSH failed to connect"));
        }
    }

    mod variants {
        use super::*;

        #[test]
        fn test_every_connection_error_retries() {
            assert!(ConductorError::connection("web", "connection refused").is_retryable());
            assert!(ConductorError::connection("web", "permission denied").is_retryable());
            assert!(ConductorError::connection("web", "SSH protocol error").is_retryable());
        }

        #[test]
        fn test_only_transient_connection_errors_are_transient() {
            assert!(ConductorError::connection("web", "connection refused").is_transient());
            assert!(!ConductorError::connection("web", "permission denied").is_transient());
            assert!(!ConductorError::configuration("web", "unknown target").is_transient());
        }

        #[test]
        fn test_other_variants_never_retry() {
            assert!(!ConductorError::configuration("web", "unknown target").is_retryable());
            assert!(!ConductorError::command_rejected("ls; rm x", "chaining").is_retryable());
            assert!(
                !ConductorError::Timeout {
                    command: "sleep 100".to_string(),
                    target: "web".to_string(),
                    timeout: Duration::from_secs(1),
                }
                .is_retryable()
            );
        }

        #[test]
        fn test_sentinel_exit_code() {
            let err = ConductorError::connection("web", "connection refused");
            assert_eq!(err.exit_code(), NO_EXIT_CODE);

            let err = ConductorError::CommandExecution {
                command: "false".to_string(),
                target: "web".to_string(),
                exit_code: 1,
                stderr: String::new(),
                message: "nonzero exit".to_string(),
            };
            assert_eq!(err.exit_code(), 1);
        }

        #[test]
        fn test_display_includes_context() {
            let err = ConductorError::path_rejected("/etc/shadow", "restricted path");
            let msg = err.to_string();
            assert!(msg.starts_with("path rejected"));
            assert!(msg.contains("/etc/shadow"));

            let err = ConductorError::RateLimitExceeded {
                caller_id: "agent-7".to_string(),
                reset_after: Duration::from_secs(12),
            };
            assert!(err.to_string().contains("agent-7"));
            assert_eq!(err.kind(), "rate_limited");
        }
    }
}
