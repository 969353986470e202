//! Command execution service.
//!
//! Each request moves through
//! `Validating -> AcquiringSession -> Executing -> Completed`, or stops at
//! `Failed` as soon as a gate rejects it. Only session acquisition is
//! retried, and only for connection errors; a nonzero exit code is a result,
//! not a fault.
//!
//! Every call to [`CommandExecutor::execute`] produces exactly one audit
//! entry: `SECURITY_COMMAND_BLOCKED` for a rejected command, otherwise
//! `COMMAND_EXECUTION` with a `status` of `success`, `failed`, `timeout` or
//! `error`.
//!
//! A timed-out command is abandoned, not killed: the remote process may keep
//! running. The session it ran on is discarded since its state is unknown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ExecutionSettings, MAX_RETRY_DELAY};
use crate::error::{ConductorError, NO_EXIT_CODE, Result};
use crate::pool::{SessionLease, SessionPool};
use crate::security::{AuditLogger, CommandValidator, SecurityEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Validating,
    AcquiringSession,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub target: String,
    pub command: String,
    /// True iff `exit_code == 0`.
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Turn a nonzero exit into `CommandExecution`.
    pub fn into_checked(self) -> Result<Self> {
        if self.succeeded {
            return Ok(self);
        }
        Err(ConductorError::CommandExecution {
            message: format!("exited with status {}", self.exit_code),
            command: self.command,
            target: self.target,
            exit_code: self.exit_code,
            stderr: self.stderr,
        })
    }
}

/// Outcome of a multi-line script.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptResult {
    pub succeeded: bool,
    /// Stdout of every line that ran, in order.
    pub stdout: String,
    pub steps: Vec<ExecutionResult>,
    /// The line that exited nonzero, if any.
    pub failed_at: Option<String>,
}

pub struct CommandExecutor {
    pool: Arc<SessionPool>,
    validator: CommandValidator,
    audit: AuditLogger,
    settings: ExecutionSettings,
}

impl CommandExecutor {
    pub fn new(
        pool: Arc<SessionPool>,
        validator: CommandValidator,
        audit: AuditLogger,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            pool,
            validator,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Validate, run and audit one command.
    #[instrument(skip(self, command))]
    pub async fn execute(
        &self,
        target_name: &str,
        command: &str,
        elevate: bool,
    ) -> Result<ExecutionResult> {
        let command = command.trim();
        let outcome = self.run(target_name, command, elevate).await;

        match &outcome {
            Ok(result) => {
                let status = if result.succeeded { "success" } else { "failed" };
                self.audit.log_command_execution(
                    target_name,
                    command,
                    elevate,
                    status,
                    result.exit_code,
                );
            }
            Err(ConductorError::ValidationRejected { reason, .. }) => {
                self.audit.log_security_event(
                    SecurityEvent::CommandBlocked,
                    Some(target_name),
                    &format!("{} ({})", command, reason),
                );
            }
            Err(e) => {
                let status = match e {
                    ConductorError::Timeout { .. } => "timeout",
                    _ => "error",
                };
                self.audit.log_command_execution(
                    target_name,
                    command,
                    elevate,
                    status,
                    e.exit_code(),
                );
            }
        }

        outcome
    }

    /// Run each non-blank line in order, stopping at the first line that
    /// fails. Every line is validated and audited on its own.
    pub async fn execute_script(
        &self,
        target_name: &str,
        script: &str,
        elevate: bool,
    ) -> Result<ScriptResult> {
        let lines: Vec<&str> = script
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        if lines.is_empty() {
            self.audit.log_security_event(
                SecurityEvent::CommandBlocked,
                Some(target_name),
                "empty script",
            );
            return Err(ConductorError::command_rejected(script, "empty script"));
        }

        info!("Executing {}-line script on {}", lines.len(), target_name);

        let mut stdout = String::new();
        let mut steps = Vec::with_capacity(lines.len());

        for line in lines {
            let result = self.execute(target_name, line, elevate).await?;
            stdout.push_str(&result.stdout);
            if !result.stdout.ends_with('\n') {
                stdout.push('\n');
            }

            let succeeded = result.succeeded;
            steps.push(result);

            if !succeeded {
                warn!("Script on {} failed at: {}", target_name, line);
                return Ok(ScriptResult {
                    succeeded: false,
                    stdout,
                    steps,
                    failed_at: Some(line.to_string()),
                });
            }
        }

        Ok(ScriptResult {
            succeeded: true,
            stdout,
            steps,
            failed_at: None,
        })
    }

    async fn run(&self, target_name: &str, command: &str, elevate: bool) -> Result<ExecutionResult> {
        let mut phase = ExecutionPhase::Validating;
        debug!(?phase);

        let verdict = self.validator.verdict(command);
        if !verdict.allowed {
            debug!(phase = ?ExecutionPhase::Failed, "command rejected");
            return Err(ConductorError::command_rejected(command, verdict.reason));
        }

        let target = self.pool.registry().resolve(target_name)?;
        let wire_command = if elevate {
            wrap_elevated(command, target.elevation_secret.as_deref())
        } else {
            command.to_string()
        };

        phase = ExecutionPhase::AcquiringSession;
        debug!(?phase);
        let lease = self.acquire_with_retry(target_name).await?;

        phase = ExecutionPhase::Executing;
        debug!(?phase);
        let started_at = Utc::now();
        let clock = Instant::now();

        let run = tokio::time::timeout(
            self.settings.command_timeout,
            lease.session().exec(&wire_command),
        )
        .await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        match run {
            Ok(Ok(raw)) => {
                lease.release();
                phase = ExecutionPhase::Completed;
                debug!(?phase, exit_code = raw.exit_code, duration_ms);

                Ok(ExecutionResult {
                    target: target_name.to_string(),
                    command: command.to_string(),
                    succeeded: raw.exit_code == 0,
                    stdout: raw.stdout,
                    stderr: raw.stderr,
                    exit_code: raw.exit_code,
                    started_at,
                    duration_ms,
                })
            }
            Ok(Err(message)) => {
                lease.discard().await;
                error!("Command on {} failed during {:?}: {}", target_name, phase, message);
                Err(ConductorError::CommandExecution {
                    command: command.to_string(),
                    target: target_name.to_string(),
                    exit_code: NO_EXIT_CODE,
                    stderr: String::new(),
                    message,
                })
            }
            Err(_) => {
                lease.discard().await;
                warn!(
                    "Command on {} timed out after {:?}",
                    target_name, self.settings.command_timeout
                );
                Err(ConductorError::Timeout {
                    command: command.to_string(),
                    target: target_name.to_string(),
                    timeout: self.settings.command_timeout,
                })
            }
        }
    }

    /// `max_attempts` counts every attempt, so the backoff allows one fewer
    /// retry.
    async fn acquire_with_retry(&self, target_name: &str) -> Result<SessionLease> {
        let attempt_counter = AtomicU32::new(0);
        let retries = self.settings.max_attempts.saturating_sub(1);

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.settings.retry_delay)
            .with_max_delay(MAX_RETRY_DELAY)
            .with_max_times(retries as usize)
            .with_jitter();

        let result = (|| async {
            let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);
            if current_attempt > 0 {
                warn!("Session retry attempt {} for {}", current_attempt, target_name);
            }
            self.pool.acquire(target_name).await
        })
        .retry(backoff)
        .when(|e: &ConductorError| {
            let retryable = if self.settings.retry_auth_failures {
                e.is_retryable()
            } else {
                e.is_transient()
            };
            if !retryable {
                debug!("Not retrying {}: {}", target_name, e);
            }
            retryable
        })
        .notify(|err: &ConductorError, dur: Duration| {
            warn!("Session acquire failed: {}. Retrying in {:?}", err, dur);
        })
        .await;

        let total_attempts = attempt_counter.load(Ordering::SeqCst);
        match result {
            Ok(lease) => {
                if total_attempts > 1 {
                    info!(
                        "Session for {} acquired after {} attempt(s)",
                        target_name, total_attempts
                    );
                }
                Ok(lease)
            }
            Err(ConductorError::Connection { target, message }) => {
                error!(
                    "Session for {} failed after {} attempt(s): {}",
                    target, total_attempts, message
                );
                Err(ConductorError::Connection {
                    target,
                    message: format!("{} (after {} attempt(s))", message, total_attempts),
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Prefix `sudo`, feeding the secret on stdin when one is configured.
fn wrap_elevated(command: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) => format!("echo {} | sudo -S {}", shell_quote(secret), command),
        None => format!("sudo {}", command),
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
