//! Session pool.
//!
//! Holds at most one session per target name. Each target has its own slot
//! behind an async mutex; a [`SessionLease`] keeps that mutex locked for the
//! lifetime of one command, so concurrent commands against the same target
//! run one after another while different targets proceed in parallel.
//!
//! Sessions are created lazily on first use. A cached session that fails
//! the liveness check at acquire time is closed and replaced before it is
//! handed out.
//!
//! A second map mirrors the slot contents outside the slot locks, so
//! introspection never waits on a running command.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::session::{Connector, RemoteSession};
use crate::target::TargetRegistry;

#[derive(Clone)]
struct PooledSession {
    session: Arc<dyn RemoteSession>,
    created_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<Option<PooledSession>>>;

/// Sessions currently held by a slot, keyed by target name. Only written
/// while the matching slot lock is held.
type Registered = Arc<DashMap<String, PooledSession>>;

/// Introspection record for one pooled session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub target: String,
    pub kind: &'static str,
    pub created_at: DateTime<Utc>,
    pub alive: bool,
    /// A command currently holds the session.
    pub in_use: bool,
}

pub struct SessionPool {
    registry: TargetRegistry,
    connector: Arc<dyn Connector>,
    slots: DashMap<String, Slot>,
    registered: Registered,
}

impl SessionPool {
    pub fn new(registry: TargetRegistry, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            slots: DashMap::new(),
            registered: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Borrow the session for `target_name`, connecting if needed.
    ///
    /// Waits while another command holds the same target. Unknown non-local
    /// names fail with `Configuration`; connect failures with `Connection`.
    pub async fn acquire(&self, target_name: &str) -> Result<SessionLease> {
        let target = self.registry.resolve(target_name)?;

        let slot = self
            .slots
            .entry(target_name.to_string())
            .or_default()
            .clone();
        let mut guard = slot.lock_owned().await;

        let reusable = guard
            .as_ref()
            .filter(|pooled| pooled.session.is_alive())
            .map(|pooled| pooled.session.clone());
        if let Some(session) = reusable {
            debug!("Reusing pooled session for {}", target_name);
            return Ok(self.lease(target_name, session, guard));
        }

        if let Some(dead) = guard.take() {
            warn!("Pooled session for {} is dead, replacing", target_name);
            self.registered.remove(target_name);
            dead.session.close().await;
        }

        let session: Arc<dyn RemoteSession> = Arc::from(self.connector.connect(&target).await?);
        info!("Opened {} session for {}", session.kind(), target_name);

        let pooled = PooledSession {
            session: session.clone(),
            created_at: Utc::now(),
        };
        self.registered.insert(target_name.to_string(), pooled.clone());
        *guard = Some(pooled);

        Ok(self.lease(target_name, session, guard))
    }

    fn lease(
        &self,
        target_name: &str,
        session: Arc<dyn RemoteSession>,
        guard: OwnedMutexGuard<Option<PooledSession>>,
    ) -> SessionLease {
        SessionLease {
            target: target_name.to_string(),
            session,
            guard,
            registered: self.registered.clone(),
        }
    }

    /// Return a session for reuse. Equivalent to dropping the lease.
    pub fn release(&self, lease: SessionLease) {
        lease.release();
    }

    /// Snapshot of every pooled session, sorted by target name.
    ///
    /// Slots still waiting on their first connect are not listed.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .registered
            .iter()
            .map(|entry| {
                let in_use = self
                    .slots
                    .get(entry.key())
                    .is_some_and(|slot| slot.try_lock().is_err());
                let pooled = entry.value();
                SessionInfo {
                    target: entry.key().clone(),
                    kind: pooled.session.kind(),
                    created_at: pooled.created_at,
                    alive: pooled.session.is_alive(),
                    in_use,
                }
            })
            .collect();

        infos.sort_by(|a, b| a.target.cmp(&b.target));
        infos
    }

    /// Disconnect every cached session and clear the cache.
    ///
    /// Waits for in-flight commands to finish with their sessions first.
    /// Slots stay registered, so a session opened while shutdown is draining
    /// is still reachable by the pool.
    pub async fn close_all(&self) {
        let slots: Vec<(String, Slot)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut closed = 0usize;
        for (target, slot) in slots {
            let mut guard = slot.lock().await;
            if let Some(pooled) = guard.take() {
                self.registered.remove(&target);
                debug!("Closing session for {}", target);
                pooled.session.close().await;
                closed += 1;
            }
        }

        info!("Session pool closed ({} sessions)", closed);
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive borrow of one pooled session.
///
/// Dropping the lease returns the session to its slot.
pub struct SessionLease {
    target: String,
    session: Arc<dyn RemoteSession>,
    guard: OwnedMutexGuard<Option<PooledSession>>,
    registered: Registered,
}

impl SessionLease {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn session(&self) -> &dyn RemoteSession {
        self.session.as_ref()
    }

    pub fn release(self) {
        debug!("Released session for {}", self.target);
    }

    /// Close the session and remove it from the pool.
    ///
    /// Used after a timeout or a broken run, when the session state is
    /// unknown.
    pub async fn discard(mut self) {
        if let Some(pooled) = self.guard.take() {
            self.registered.remove(&self.target);
            pooled.session.close().await;
        }
        debug!("Discarded session for {}", self.target);
    }
}
