//! Gateway configuration.

use thiserror::Error;

/// Default bound on dispatch recursion depth.
pub const DEFAULT_MAX_DEPTH: u32 = 10;

/// Default `user-agent` stamped onto outbound requests.
pub const DEFAULT_USER_AGENT: &str = "gateway";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The paging-token salt is required; without one, tokens minted by the
    /// gateway could not be verified across restarts.
    #[error("paging-token salt must not be empty")]
    InvalidSalt,
}

/// Static configuration a gateway is built from.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Secret used to sign paging tokens.
    pub salt: String,
    /// Maximum dispatch recursion depth before a request chain is aborted.
    pub max_depth: u32,
    /// `user-agent` header value for outbound requests.
    pub user_agent: String,
}

impl GatewayConfig {
    /// Build a configuration with the given paging-token salt.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSalt`] when the salt is empty. A missing salt
    /// is a deployment mistake and must fail construction, not dispatch.
    pub fn new(salt: impl Into<String>) -> Result<Self, ConfigError> {
        let salt = salt.into();
        if salt.is_empty() {
            return Err(ConfigError::InvalidSalt);
        }
        Ok(Self {
            salt,
            max_depth: DEFAULT_MAX_DEPTH,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
