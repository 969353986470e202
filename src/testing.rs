//! In-memory sessions for exercising the pool and executor without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConductorError, Result};
use crate::session::{Connector, RawOutput, RemoteSession};
use crate::target::RemoteTarget;

type Responder = dyn Fn(&str) -> RawOutput + Send + Sync;

/// Counters shared by a connector and every session it created.
#[derive(Default)]
pub(crate) struct FakeState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub alive: AtomicBool,
    pub commands: Mutex<Vec<String>>,
}

impl FakeState {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

struct Behavior {
    connect_error: Option<String>,
    connect_delay: Option<Duration>,
    exec_error: Option<String>,
    exec_delay: Option<Duration>,
    responder: Box<Responder>,
}

#[derive(Clone)]
pub(crate) struct FakeConnector {
    state: Arc<FakeState>,
    behavior: Arc<Behavior>,
}

impl FakeConnector {
    /// Every command exits 0 and prints `ok`.
    pub fn new() -> Self {
        Self::responding(|_| RawOutput {
            stdout: "ok\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    pub fn responding(responder: impl Fn(&str) -> RawOutput + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(FakeState::default()),
            behavior: Arc::new(Behavior {
                connect_error: None,
                connect_delay: None,
                exec_error: None,
                exec_delay: None,
                responder: Box::new(responder),
            }),
        }
    }

    pub fn failing_connect(self, message: &str) -> Self {
        self.map_behavior(|b| b.connect_error = Some(message.to_string()))
    }

    pub fn failing_exec(self, message: &str) -> Self {
        self.map_behavior(|b| b.exec_error = Some(message.to_string()))
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.map_behavior(|b| b.connect_delay = Some(delay))
    }

    pub fn with_exec_delay(self, delay: Duration) -> Self {
        self.map_behavior(|b| b.exec_delay = Some(delay))
    }

    pub fn state(&self) -> Arc<FakeState> {
        self.state.clone()
    }

    fn map_behavior(self, f: impl FnOnce(&mut Behavior)) -> Self {
        let mut behavior = Arc::try_unwrap(self.behavior)
            .unwrap_or_else(|_| panic!("configure the fake before cloning it"));
        f(&mut behavior);
        Self {
            state: self.state,
            behavior: Arc::new(behavior),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.behavior.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref message) = self.behavior.connect_error {
            return Err(ConductorError::connection(&target.name, message.clone()));
        }
        self.state.alive.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            behavior: self.behavior.clone(),
        }))
    }
}

struct FakeSession {
    state: Arc<FakeState>,
    behavior: Arc<Behavior>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &str) -> std::result::Result<RawOutput, String> {
        self.state.commands.lock().unwrap().push(command.to_string());
        if let Some(delay) = self.behavior.exec_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref message) = self.behavior.exec_error {
            return Err(message.clone());
        }
        Ok((self.behavior.responder)(command))
    }

    fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
    }

    fn kind(&self) -> &'static str {
        "fake"
    }
}

/// Parse every line of an audit log written by the audit writer.
pub(crate) fn read_audit_entries(path: &std::path::Path) -> Vec<crate::security::AuditEntry> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Unique audit log path under the system temp dir.
pub(crate) fn temp_audit_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("conductor-audit-{}.log", uuid::Uuid::new_v4()))
}
