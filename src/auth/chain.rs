//! Authentication chain for trying multiple strategies.

use std::path::PathBuf;

use async_trait::async_trait;
use russh::client;
use tracing::debug;

use crate::session::SshClientHandler;
use crate::target::Credentials;

use super::traits::AuthStrategy;
use super::{AgentAuth, KeyAuth, PasswordAuth};

/// Tries strategies in insertion order; the first success wins.
///
/// ```ignore
/// let chain = AuthChain::new()
///     .with_key("/keys/prod", None::<String>)
///     .with_password("secret");
///
/// chain.authenticate(&mut handle, "deploy").await?;
/// ```
#[derive(Default)]
pub struct AuthChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthChain {
    /// Create a new empty authentication chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain for a target's credentials.
    ///
    /// Key before password; the agent is only consulted when the target has
    /// neither.
    pub fn for_credentials(credentials: &Credentials) -> Self {
        let mut chain = Self::new();

        if let Some(ref key_path) = credentials.private_key_path {
            chain = chain.with_key(key_path.clone(), credentials.passphrase.clone());
        }

        if credentials.has_password()
            && let Some(ref password) = credentials.password
        {
            chain = chain.with_password(password.clone());
        }

        if chain.is_empty() {
            chain = chain.with_agent();
        }

        chain
    }

    /// Add password authentication to the chain.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.strategies.push(Box::new(PasswordAuth::new(password)));
        self
    }

    /// Add key-based authentication to the chain.
    pub fn with_key(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: Option<impl Into<String>>,
    ) -> Self {
        self.strategies
            .push(Box::new(KeyAuth::new(key_path).with_passphrase(passphrase)));
        self
    }

    /// Add SSH agent authentication to the chain.
    pub fn with_agent(mut self) -> Self {
        self.strategies.push(Box::new(AgentAuth::new()));
        self
    }

    /// Check if the chain has any authentication strategies.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Strategy names in the order they will be tried.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl AuthStrategy for AuthChain {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String> {
        if self.strategies.is_empty() {
            return Err("No authentication strategies configured".to_string());
        }

        let mut last_error = None;

        for strategy in &self.strategies {
            debug!("Trying authentication strategy: {}", strategy.name());

            match strategy.authenticate(handle, username).await {
                Ok(true) => {
                    debug!(
                        "Authentication succeeded with strategy: {}",
                        strategy.name()
                    );
                    return Ok(true);
                }
                Ok(false) => {
                    last_error = Some(format!("{} authentication rejected", strategy.name()));
                }
                Err(e) => {
                    debug!(
                        "Authentication error with strategy {}: {}",
                        strategy.name(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| "All authentication methods failed".to_string()))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
