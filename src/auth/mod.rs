//! Authentication strategies for SSH sessions.
//!
//! Each strategy implements [`AuthStrategy`]; [`AuthChain`] tries them in
//! order and stops at the first success. The chain for a configured target
//! prefers its private key over its password, and falls back to the SSH
//! agent only when the target carries neither.
//!
//! # Available Strategies
//!
//! - [`KeyAuth`]: Private key file authentication (optional passphrase)
//! - [`PasswordAuth`]: Password-based authentication
//! - [`AgentAuth`]: SSH agent authentication

mod agent;
mod chain;
mod key;
mod password;
mod traits;

pub use agent::AgentAuth;
pub use chain::AuthChain;
pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;
