//! Configuration resolution.
//!
//! Scalar settings use a three-tier priority system:
//!
//! 1. **File** - Value present in the JSON config file (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! The target registry only comes from the file named by `CONDUCTOR_CONFIG`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CONDUCTOR_CONFIG` | unset | Path of the JSON config file |
//! | `SSH_CONNECT_TIMEOUT` | 10s | Connection timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 30s | Command execution timeout in seconds |
//! | `SSH_MAX_ATTEMPTS` | 3 | Total connection attempts per request |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `SSH_RETRY_AUTH_FAILURES` | true | Retry connection errors that look like rejected credentials |
//! | `SECURITY_STRICT_MODE` | true | Enforce the command allow-list |
//! | `SECURITY_ALLOWED_COMMANDS` | empty | Comma separated executable names |
//! | `SECURITY_ALLOWED_PATHS` | see [`DEFAULT_ALLOWED_PATHS`] | Comma separated base directories |
//! | `SECURITY_BLOCKED_PATHS` | empty | Extra denied path prefixes |
//! | `RATE_LIMIT_CAPACITY` | 100 | Bucket capacity per caller |
//! | `RATE_LIMIT_REFILL_TOKENS` | 100 | Tokens added per refill interval |
//! | `RATE_LIMIT_REFILL_SECS` | 60 | Refill interval in seconds |
//! | `AUDIT_LOG_FILE` | audit.log | Append-only audit sink |
//! | `AUDIT_LOG_ENABLED` | true | Disable to drop audit entries |

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConductorError, Result};

pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub(crate) const DEFAULT_RATE_LIMIT_CAPACITY: u64 = 100;
pub(crate) const DEFAULT_RATE_LIMIT_REFILL_TOKENS: u64 = 100;
pub(crate) const DEFAULT_RATE_LIMIT_REFILL_SECS: u64 = 60;
pub(crate) const DEFAULT_AUDIT_LOG_FILE: &str = "audit.log";

/// Maximum retry delay cap
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Base directories accepted by the path validator when none are configured.
pub const DEFAULT_ALLOWED_PATHS: &[&str] = &["/home", "/var", "/opt", "/tmp", "/usr/local"];

pub(crate) const CONFIG_FILE_ENV_VAR: &str = "CONDUCTOR_CONFIG";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const MAX_ATTEMPTS_ENV_VAR: &str = "SSH_MAX_ATTEMPTS";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const RETRY_AUTH_FAILURES_ENV_VAR: &str = "SSH_RETRY_AUTH_FAILURES";
pub(crate) const STRICT_MODE_ENV_VAR: &str = "SECURITY_STRICT_MODE";
pub(crate) const ALLOWED_COMMANDS_ENV_VAR: &str = "SECURITY_ALLOWED_COMMANDS";
pub(crate) const ALLOWED_PATHS_ENV_VAR: &str = "SECURITY_ALLOWED_PATHS";
pub(crate) const BLOCKED_PATHS_ENV_VAR: &str = "SECURITY_BLOCKED_PATHS";
pub(crate) const RATE_LIMIT_CAPACITY_ENV_VAR: &str = "RATE_LIMIT_CAPACITY";
pub(crate) const RATE_LIMIT_REFILL_TOKENS_ENV_VAR: &str = "RATE_LIMIT_REFILL_TOKENS";
pub(crate) const RATE_LIMIT_REFILL_SECS_ENV_VAR: &str = "RATE_LIMIT_REFILL_SECS";
pub(crate) const AUDIT_LOG_FILE_ENV_VAR: &str = "AUDIT_LOG_FILE";
pub(crate) const AUDIT_LOG_ENABLED_ENV_VAR: &str = "AUDIT_LOG_ENABLED";

fn default_port() -> u16 {
    22
}

/// One entry of the `targets` map in the config file.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub private_key_passphrase: Option<String>,
    pub sudo_password: Option<String>,
    /// Execute through the local shell instead of SSH.
    pub local: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: None,
            private_key_path: None,
            private_key_passphrase: None,
            sudo_password: None,
            local: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub connect_timeout_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub compression: Option<bool>,
    pub retry_auth_failures: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub strict_mode: Option<bool>,
    pub allowed_commands: Option<Vec<String>>,
    pub allowed_paths: Option<Vec<String>>,
    pub blocked_paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub capacity: Option<u64>,
    pub refill_tokens: Option<u64>,
    pub refill_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub file: Option<PathBuf>,
    pub enabled: Option<bool>,
    pub actor: Option<String>,
}

/// Raw configuration as read from disk.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub targets: HashMap<String, TargetConfig>,
    pub ssh: SshSection,
    pub security: SecuritySection,
    pub rate_limit: RateLimitSection,
    pub audit: AuditSection,
}

/// Resolved connection and execution settings.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Total connection attempts, including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub compress: bool,
    /// When false, only transient connection errors are retried and
    /// rejected credentials fail on the first attempt.
    pub retry_auth_failures: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            compress: true,
            retry_auth_failures: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    pub strict_mode: bool,
    pub allowed_commands: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            strict_mode: true,
            allowed_commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathPolicy {
    pub allowed_paths: Vec<String>,
    pub blocked_paths: Vec<String>,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self {
            allowed_paths: DEFAULT_ALLOWED_PATHS.iter().map(|s| s.to_string()).collect(),
            blocked_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub capacity: u64,
    pub refill_tokens: u64,
    pub refill_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RATE_LIMIT_CAPACITY,
            refill_tokens: DEFAULT_RATE_LIMIT_REFILL_TOKENS,
            refill_interval: Duration::from_secs(DEFAULT_RATE_LIMIT_REFILL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub file: PathBuf,
    pub enabled: bool,
    /// Actor recorded when a caller does not supply one.
    pub actor: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_AUDIT_LOG_FILE),
            enabled: true,
            actor: default_actor(),
        }
    }
}

/// The OS user running the process.
fn default_actor() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

impl ConductorConfig {
    /// Load the file named by `CONDUCTOR_CONFIG`, or an empty config.
    pub fn load() -> Result<Self> {
        match env::var(CONFIG_FILE_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::configuration(
                "<config>",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            ConductorError::configuration("<config>", format!("invalid config file: {}", e))
        })
    }

    pub fn execution(&self) -> ExecutionSettings {
        ExecutionSettings {
            connect_timeout: Duration::from_secs(resolve_connect_timeout(
                self.ssh.connect_timeout_secs,
            )),
            command_timeout: Duration::from_secs(resolve_command_timeout(
                self.ssh.command_timeout_secs,
            )),
            max_attempts: resolve_max_attempts(self.ssh.max_attempts),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms(self.ssh.retry_delay_ms)),
            compress: resolve_bool(self.ssh.compression, COMPRESSION_ENV_VAR, true),
            retry_auth_failures: resolve_bool(
                self.ssh.retry_auth_failures,
                RETRY_AUTH_FAILURES_ENV_VAR,
                true,
            ),
        }
    }

    pub fn command_policy(&self) -> CommandPolicy {
        CommandPolicy {
            strict_mode: resolve_bool(self.security.strict_mode, STRICT_MODE_ENV_VAR, true),
            allowed_commands: resolve_list(
                self.security.allowed_commands.clone(),
                ALLOWED_COMMANDS_ENV_VAR,
                &[],
            ),
        }
    }

    pub fn path_policy(&self) -> PathPolicy {
        PathPolicy {
            allowed_paths: resolve_list(
                self.security.allowed_paths.clone(),
                ALLOWED_PATHS_ENV_VAR,
                DEFAULT_ALLOWED_PATHS,
            ),
            blocked_paths: resolve_list(
                self.security.blocked_paths.clone(),
                BLOCKED_PATHS_ENV_VAR,
                &[],
            ),
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: resolve_parsed(
                self.rate_limit.capacity,
                RATE_LIMIT_CAPACITY_ENV_VAR,
                DEFAULT_RATE_LIMIT_CAPACITY,
            ),
            refill_tokens: resolve_parsed(
                self.rate_limit.refill_tokens,
                RATE_LIMIT_REFILL_TOKENS_ENV_VAR,
                DEFAULT_RATE_LIMIT_REFILL_TOKENS,
            ),
            refill_interval: Duration::from_secs(resolve_parsed(
                self.rate_limit.refill_secs,
                RATE_LIMIT_REFILL_SECS_ENV_VAR,
                DEFAULT_RATE_LIMIT_REFILL_SECS,
            )),
        }
    }

    pub fn audit(&self) -> AuditConfig {
        let file = self
            .audit
            .file
            .clone()
            .or_else(|| {
                env::var(AUDIT_LOG_FILE_ENV_VAR)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_LOG_FILE));

        AuditConfig {
            file,
            enabled: resolve_bool(self.audit.enabled, AUDIT_LOG_ENABLED_ENV_VAR, true),
            actor: self.audit.actor.clone().unwrap_or_else(default_actor),
        }
    }
}

/// Resolve a parseable value with priority: file -> env var -> default.
fn resolve_parsed<T: FromStr>(param: Option<T>, env_var: &str, default: T) -> T {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.trim().parse::<T>()
    {
        return value;
    }

    default
}

/// Booleans accept `true` (any case) or `1`; anything else is false.
fn resolve_bool(param: Option<bool>, env_var: &str, default: bool) -> bool {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var) {
        return raw.eq_ignore_ascii_case("true") || raw == "1";
    }

    default
}

/// Comma separated lists; blank entries are dropped.
fn resolve_list(param: Option<Vec<String>>, env_var: &str, default: &[&str]) -> Vec<String> {
    if let Some(values) = param {
        return values;
    }

    if let Ok(raw) = env::var(env_var) {
        return raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    default.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_parsed(
        timeout_param,
        CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    )
}

pub(crate) fn resolve_command_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_parsed(
        timeout_param,
        COMMAND_TIMEOUT_ENV_VAR,
        DEFAULT_COMMAND_TIMEOUT_SECS,
    )
}

/// At least one attempt is always made.
pub(crate) fn resolve_max_attempts(attempts_param: Option<u32>) -> u32 {
    resolve_parsed(attempts_param, MAX_ATTEMPTS_ENV_VAR, DEFAULT_MAX_ATTEMPTS).max(1)
}

pub(crate) fn resolve_retry_delay_ms(delay_param: Option<u64>) -> u64 {
    resolve_parsed(delay_param, RETRY_DELAY_MS_ENV_VAR, DEFAULT_RETRY_DELAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // SAFETY: Tests are serialized via ENV_TEST_MUTEX to prevent data races
    static ENV_TEST_MUTEX: once_cell::sync::Lazy<StdMutex<()>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(()));

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn set_env(key: &str, value: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::set_var(key, value) };
    }

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn remove_env(key: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::remove_var(key) };
    }

    mod scalar_resolution {
        use super::*;

        #[test]
        fn test_file_value_wins_over_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { set_env(COMMAND_TIMEOUT_ENV_VAR, "300") };
            let result = resolve_command_timeout(Some(45));
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { remove_env(COMMAND_TIMEOUT_ENV_VAR) };
            assert_eq!(result, 45);
        }

        #[test]
        fn test_env_used_when_file_silent() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { set_env(CONNECT_TIMEOUT_ENV_VAR, "90") };
            let result = resolve_connect_timeout(None);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { remove_env(CONNECT_TIMEOUT_ENV_VAR) };
            assert_eq!(result, 90);
        }

        #[test]
        fn test_invalid_env_falls_back_to_default() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { set_env(RETRY_DELAY_MS_ENV_VAR, "soon") };
            let result = resolve_retry_delay_ms(None);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { remove_env(RETRY_DELAY_MS_ENV_VAR) };
            assert_eq!(result, DEFAULT_RETRY_DELAY_MS);
        }

        #[test]
        fn test_zero_attempts_clamped_to_one() {
            assert_eq!(resolve_max_attempts(Some(0)), 1);
            assert_eq!(resolve_max_attempts(Some(5)), 5);
        }

        #[test]
        fn test_bool_parsing() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            for (raw, expected) in [("TRUE", true), ("1", true), ("yes", false), ("0", false)] {
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe { set_env(COMPRESSION_ENV_VAR, raw) };
                assert_eq!(resolve_bool(None, COMPRESSION_ENV_VAR, true), expected);
            }
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { remove_env(COMPRESSION_ENV_VAR) };
            assert!(resolve_bool(None, COMPRESSION_ENV_VAR, true));
        }

        #[test]
        fn test_list_parsing_drops_blanks() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { set_env(ALLOWED_COMMANDS_ENV_VAR, "ls, pwd,,cat ") };
            let result = resolve_list(None, ALLOWED_COMMANDS_ENV_VAR, &[]);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { remove_env(ALLOWED_COMMANDS_ENV_VAR) };
            assert_eq!(result, vec!["ls", "pwd", "cat"]);
        }
    }

    mod file_loading {
        use super::*;

        #[test]
        fn test_parses_full_document() {
            let raw = r#"{
                "targets": {
                    "prod": {
                        "host": "10.0.0.5",
                        "port": 2222,
                        "username": "deploy",
                        "private_key_path": "/keys/prod",
                        "sudo_password": "s3cret"
                    },
                    "box": { "local": true }
                },
                "ssh": { "command_timeout_secs": 5, "max_attempts": 4, "retry_auth_failures": false },
                "security": { "strict_mode": false, "allowed_commands": ["ls"] },
                "rate_limit": { "capacity": 10, "refill_tokens": 5, "refill_secs": 1 },
                "audit": { "file": "/var/log/conductor/audit.log", "actor": "ops" }
            }"#;

            let config = ConductorConfig::from_json(raw).unwrap();
            assert_eq!(config.targets.len(), 2);
            assert_eq!(config.targets["prod"].port, 2222);
            assert!(config.targets["box"].local);

            let exec = config.execution();
            assert_eq!(exec.command_timeout, Duration::from_secs(5));
            assert_eq!(exec.max_attempts, 4);
            assert!(!exec.retry_auth_failures);

            let policy = config.command_policy();
            assert!(!policy.strict_mode);
            assert_eq!(policy.allowed_commands, vec!["ls"]);

            let rl = config.rate_limit();
            assert_eq!(rl.capacity, 10);
            assert_eq!(rl.refill_tokens, 5);
            assert_eq!(rl.refill_interval, Duration::from_secs(1));

            let audit = config.audit();
            assert_eq!(audit.file, PathBuf::from("/var/log/conductor/audit.log"));
            assert_eq!(audit.actor, "ops");
        }

        #[test]
        fn test_auth_failures_retried_by_default() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { remove_env(RETRY_AUTH_FAILURES_ENV_VAR) };
            let config = ConductorConfig::from_json("{}").unwrap();
            assert!(config.execution().retry_auth_failures);
            assert!(ExecutionSettings::default().retry_auth_failures);
        }

        #[test]
        fn test_port_defaults_to_22() {
            let raw = r#"{ "targets": { "db": { "host": "db1", "username": "pg" } } }"#;
            let config = ConductorConfig::from_json(raw).unwrap();
            assert_eq!(config.targets["db"].port, 22);
        }

        #[test]
        fn test_invalid_json_is_configuration_error() {
            let err = ConductorConfig::from_json("{ not json").err().unwrap();
            assert!(matches!(err, ConductorError::Configuration { .. }));
        }

        #[test]
        fn test_file_allow_list_overrides_default_paths() {
            let raw = r#"{ "security": { "allowed_paths": ["/srv"] } }"#;
            let config = ConductorConfig::from_json(raw).unwrap();
            assert_eq!(config.path_policy().allowed_paths, vec!["/srv"]);
        }

        #[test]
        fn test_missing_file_is_configuration_error() {
            let err = ConductorConfig::from_file(Path::new("/nonexistent/conductor.json"))
                .err()
                .unwrap();
            assert!(err.to_string().contains("failed to read"));
        }
    }
}
