//! Composition root.
//!
//! [`Conductor`] owns one instance of every component for the life of the
//! process: the session pool, both validators, the rate limiter, the audit
//! logger and the executor built on top of them. Tool surfaces share it
//! through an `Arc`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::DefaultConnector;
use crate::config::ConductorConfig;
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::pool::SessionPool;
use crate::security::{AuditLogger, CommandValidator, PathValidator, RateLimiter};
use crate::session::Connector;
use crate::target::TargetRegistry;

pub struct Conductor {
    pool: Arc<SessionPool>,
    executor: CommandExecutor,
    commands: CommandValidator,
    paths: PathValidator,
    limiter: RateLimiter,
    audit: AuditLogger,
    audit_task: Mutex<Option<JoinHandle<()>>>,
}

impl Conductor {
    /// Build every component from `config`, connecting over SSH.
    ///
    /// Must be called inside a Tokio runtime (the audit writer is spawned).
    pub fn from_config(config: &ConductorConfig) -> Result<Self> {
        let settings = config.execution();
        let connector = Arc::new(DefaultConnector::new(
            settings.connect_timeout,
            settings.compress,
        ));
        Self::with_connector(config, connector)
    }

    /// Like [`from_config`](Self::from_config) with a custom session factory.
    pub fn with_connector(config: &ConductorConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let registry = TargetRegistry::from_config(&config.targets)?;
        info!("Loaded {} target(s): {:?}", registry.len(), registry.names());

        let settings = config.execution();
        let commands = CommandValidator::new(config.command_policy());
        let paths = PathValidator::new(config.path_policy());
        let limiter = RateLimiter::new(config.rate_limit());
        let (audit, audit_task) = AuditLogger::new(config.audit());

        let pool = Arc::new(SessionPool::new(registry, connector));
        let executor = CommandExecutor::new(pool.clone(), commands.clone(), audit.clone(), settings);

        Ok(Self {
            pool,
            executor,
            commands,
            paths,
            limiter,
            audit,
            audit_task: Mutex::new(audit_task),
        })
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn command_validator(&self) -> &CommandValidator {
        &self.commands
    }

    pub fn path_validator(&self) -> &PathValidator {
        &self.paths
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Close every session and drain the audit queue.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.pool.close_all().await;
        self.audit.flush().await;

        if let Some(task) = self.audit_task.lock().await.take() {
            // The writer only exits once every logger clone is gone
            if !task.is_finished() {
                task.abort();
            }
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!("Audit writer ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConductorError;
    use crate::security::SecurityEvent;
    use crate::testing::{FakeConnector, read_audit_entries, temp_audit_path};

    fn config_with_audit(path: &std::path::Path) -> ConductorConfig {
        let raw = format!(
            r#"{{
                "targets": {{ "box": {{ "local": true }} }},
                "security": {{ "strict_mode": true, "allowed_commands": ["ls", "uptime"] }},
                "rate_limit": {{ "capacity": 2, "refill_tokens": 2, "refill_secs": 60 }},
                "audit": {{ "file": {:?}, "actor": "ops" }}
            }}"#,
            path.display().to_string()
        );
        ConductorConfig::from_json(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_components_follow_config() {
        let path = temp_audit_path();
        let conductor =
            Conductor::with_connector(&config_with_audit(&path), Arc::new(FakeConnector::new()))
                .unwrap();

        assert!(conductor.command_validator().is_valid("ls -la"));
        assert!(!conductor.command_validator().is_valid("wget http://x"));
        assert!(conductor.path_validator().is_valid_path("/tmp/x"));
        assert_eq!(conductor.rate_limiter().available_tokens("agent"), 2);
        assert_eq!(conductor.pool().registry().names(), vec!["box".to_string()]);

        conductor.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_execute_through_root_and_shutdown() {
        let path = temp_audit_path();
        let connector = FakeConnector::new();
        let conductor =
            Conductor::with_connector(&config_with_audit(&path), Arc::new(connector.clone()))
                .unwrap();

        let result = conductor.executor().execute("box", "uptime", false).await.unwrap();
        assert!(result.succeeded);
        conductor
            .audit()
            .log_security_event(SecurityEvent::PathBlocked, Some("box"), "/etc/shadow");

        conductor.shutdown().await;
        assert_eq!(connector.state().closes(), 1);

        let entries = read_audit_entries(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].actor, "ops");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_invalid_target_definition_fails_startup() {
        let config = ConductorConfig::from_json(
            r#"{ "targets": { "web": { "host": "", "username": "deploy" } } }"#,
        )
        .unwrap();
        let err = Conductor::with_connector(&config, Arc::new(FakeConnector::new()))
            .err()
            .unwrap();
        assert!(matches!(err, ConductorError::Configuration { .. }));
    }
}
