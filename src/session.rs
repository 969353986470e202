//! Session abstractions.
//!
//! A [`RemoteSession`] is one authenticated connection bound to one target.
//! It is either usable or dead; dead sessions are discarded by the pool and
//! never handed out. [`Connector`] creates sessions for a target and is the
//! seam the pool is tested through.
//!
//! # Thread Safety
//!
//! Sessions are shared as `Arc<dyn RemoteSession>` between the pool slot and
//! the lease currently running a command, so both traits require
//! `Send + Sync`.

use async_trait::async_trait;
use russh::{client, keys};
use tokio::process::Command;

use crate::error::{NO_EXIT_CODE, Result};
use crate::target::RemoteTarget;

/// Client handler for russh that accepts all host keys.
///
/// Equivalent to `StrictHostKeyChecking=no`. Known-hosts verification is not
/// implemented.
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Captured output of one finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    /// `NO_EXIT_CODE` when the remote side never reported a status.
    pub exit_code: i32,
}

#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run one command to completion. Errors mean the run itself failed,
    /// not that the command exited nonzero.
    async fn exec(&self, command: &str) -> std::result::Result<RawOutput, String>;

    /// Cheap liveness check used by the pool before reuse.
    fn is_alive(&self) -> bool;

    /// Disconnect. Idempotent.
    async fn close(&self);

    fn kind(&self) -> &'static str;
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish and authenticate a new session for `target`.
    ///
    /// Failures are `ConductorError::Connection`.
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

/// Session for the implicit local target; runs `sh -c` per command.
#[derive(Debug, Default)]
pub struct LocalSession;

#[async_trait]
impl RemoteSession for LocalSession {
    async fn exec(&self, command: &str) -> std::result::Result<RawOutput, String> {
        // kill_on_drop: an abandoned (timed out) run takes the child with it
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Failed to spawn local shell: {}", e))?;

        Ok(RawOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(NO_EXIT_CODE),
        })
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn close(&self) {}

    fn kind(&self) -> &'static str {
        "local"
    }
}
