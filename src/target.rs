//! Named execution targets.
//!
//! A [`TargetRegistry`] is built once from configuration and never mutated.
//! Every target name a caller uses resolves to exactly one [`RemoteTarget`],
//! or to the implicit local target when the name is `localhost`/`local` and
//! nothing else was configured under that name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::TargetConfig;
use crate::error::{ConductorError, Result};

/// Names that map to the implicit local target when not configured.
pub const LOCAL_TARGET_NAMES: &[&str] = &["localhost", "local"];

/// Authentication material for an SSH target.
#[derive(Clone, Default)]
pub struct Credentials {
    pub private_key_path: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn has_key(&self) -> bool {
        self.private_key_path.is_some()
    }

    pub fn has_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key_path", &self.private_key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
}

impl SshEndpoint {
    /// `user@host:port`, for logs and audit entries.
    pub fn display_address(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Run through the local shell, no network hop.
    Local,
    Ssh(SshEndpoint),
}

#[derive(Clone)]
pub struct RemoteTarget {
    pub name: String,
    pub endpoint: Endpoint,
    /// Secret fed to `sudo -S` when elevation is requested.
    pub elevation_secret: Option<String>,
}

impl RemoteTarget {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: Endpoint::Local,
            elevation_secret: None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.endpoint, Endpoint::Local)
    }
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field(
                "elevation_secret",
                &self.elevation_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Immutable name → target map.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, Arc<RemoteTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry, rejecting SSH targets without a host or username.
    pub fn from_config(targets: &HashMap<String, TargetConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, cfg) in targets {
            registry = registry.with_target(build_target(name, cfg)?);
        }
        Ok(registry)
    }

    pub fn with_target(mut self, target: RemoteTarget) -> Self {
        self.targets.insert(target.name.clone(), Arc::new(target));
        self
    }

    /// Resolve a target name.
    ///
    /// Unknown names fail with `Configuration`, except the local aliases which
    /// fall back to the implicit local target.
    pub fn resolve(&self, name: &str) -> Result<Arc<RemoteTarget>> {
        if let Some(target) = self.targets.get(name) {
            return Ok(target.clone());
        }
        if LOCAL_TARGET_NAMES.contains(&name) {
            return Ok(Arc::new(RemoteTarget::local(name)));
        }
        Err(ConductorError::configuration(
            name,
            "no target with this name is configured",
        ))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn build_target(name: &str, cfg: &TargetConfig) -> Result<RemoteTarget> {
    let elevation_secret = cfg.sudo_password.clone().filter(|s| !s.is_empty());

    if cfg.local {
        return Ok(RemoteTarget {
            name: name.to_string(),
            endpoint: Endpoint::Local,
            elevation_secret,
        });
    }

    if cfg.host.trim().is_empty() {
        return Err(ConductorError::configuration(name, "missing host"));
    }
    if cfg.username.trim().is_empty() {
        return Err(ConductorError::configuration(name, "missing username"));
    }

    Ok(RemoteTarget {
        name: name.to_string(),
        endpoint: Endpoint::Ssh(SshEndpoint {
            host: cfg.host.clone(),
            port: cfg.port,
            username: cfg.username.clone(),
            credentials: Credentials {
                private_key_path: cfg
                    .private_key_path
                    .clone()
                    .filter(|p| !p.as_os_str().is_empty()),
                passphrase: cfg.private_key_passphrase.clone(),
                password: cfg.password.clone(),
            },
        }),
        elevation_secret,
    })
}
