//! SSH connection establishment and command execution.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: russh config with inactivity timeout,
//!    keepalive and compression preference.
//! 2. **Connection Establishment**: TCP + SSH handshake, bounded by the
//!    connect timeout.
//! 3. **Authentication**: the target's [`AuthChain`] (key, then password,
//!    then agent when neither is configured).
//! 4. **Command Execution**: one exec channel per command; stdout, stderr and
//!    the exit status are collected until the channel closes.
//!
//! Retrying is not done here; the execution service owns the retry policy so
//! that it can count attempts across the pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client};
use tracing::{info, warn};

use crate::auth::{AuthChain, AuthStrategy};
use crate::error::{ConductorError, NO_EXIT_CODE, Result};
use crate::session::{Connector, LocalSession, RawOutput, RemoteSession, SshClientHandler};
use crate::target::{Endpoint, RemoteTarget, SshEndpoint};

/// Keepalive interval for pooled sessions.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Build russh client configuration.
///
/// Pooled sessions sit idle between commands, so the inactivity timeout is
/// disabled and keepalives detect dead peers instead.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Establish and authenticate one SSH connection.
pub(crate) async fn connect_to_ssh(
    endpoint: &SshEndpoint,
    timeout: Duration,
    compress: bool,
) -> std::result::Result<client::Handle<SshClientHandler>, String> {
    let config = build_client_config(compress);

    let connect_future = client::connect(
        config,
        (endpoint.host.as_str(), endpoint.port),
        SshClientHandler,
    );

    let mut handle = tokio::time::timeout(timeout, connect_future)
        .await
        .map_err(|_| format!("Connection timed out after {:?}", timeout))?
        .map_err(|e| format!("Failed to connect: {}", e))?;

    let auth_chain = AuthChain::for_credentials(&endpoint.credentials);
    let success = auth_chain
        .authenticate(&mut handle, &endpoint.username)
        .await?;

    if !success {
        return Err("Authentication failed: no authentication methods succeeded".to_string());
    }

    Ok(handle)
}

/// Run one command over a fresh exec channel and collect its output.
pub(crate) async fn execute_over_channel(
    handle: &client::Handle<SshClientHandler>,
    command: &str,
) -> std::result::Result<RawOutput, String> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| format!("Failed to open channel: {}", e))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| format!("Failed to execute command: {}", e))?;

    let mut stdout = Vec::with_capacity(4096);
    let mut stderr = Vec::with_capacity(1024);
    let mut exit_code: Option<u32> = None;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // ext == 1 is stderr in SSH protocol
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
            }
            Some(ChannelMsg::Eof) => {
                // The exit status may still be in flight
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    let _ = channel.close().await;

    Ok(RawOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: exit_code.map(|c| c as i32).unwrap_or(NO_EXIT_CODE),
    })
}

/// An authenticated russh connection.
pub struct SshSession {
    handle: client::Handle<SshClientHandler>,
    address: String,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str) -> std::result::Result<RawOutput, String> {
        execute_over_channel(&self.handle, command).await
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            warn!("Error while disconnecting {}: {}", self.address, e);
        }
    }

    fn kind(&self) -> &'static str {
        "ssh"
    }
}

/// Connector used in production: russh for SSH targets, `sh -c` for local.
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    connect_timeout: Duration,
    compress: bool,
}

impl DefaultConnector {
    pub fn new(connect_timeout: Duration, compress: bool) -> Self {
        Self {
            connect_timeout,
            compress,
        }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        match &target.endpoint {
            Endpoint::Local => Ok(Box::new(LocalSession)),
            Endpoint::Ssh(endpoint) => {
                let address = endpoint.display_address();
                let handle = connect_to_ssh(endpoint, self.connect_timeout, self.compress)
                    .await
                    .map_err(|e| ConductorError::connection(&target.name, e))?;

                info!("SSH connection established to {}", address);
                Ok(Box::new(SshSession { handle, address }))
            }
        }
    }
}
