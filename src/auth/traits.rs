//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::session::SshClientHandler;

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) so a chain can be
/// built on one task and driven on another.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected by the server
    /// * `Err(message)` - Error during the attempt (unreadable key, agent missing, ...)
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}
