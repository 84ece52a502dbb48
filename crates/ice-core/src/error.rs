//! Error types for ICE candidate and server handling

use thiserror::Error;

/// Result type for ICE operations
pub type Result<T> = std::result::Result<T, IceError>;

/// Errors produced while parsing candidates or validating ICE configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IceError {
    /// A candidate line could not be parsed
    #[error("Invalid ICE candidate '{line}': {reason}")]
    InvalidCandidate { line: String, reason: String },

    /// An ICE server URL is malformed or uses an unsupported scheme
    #[error("Invalid ICE server URL '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },

    /// A TURN server was configured without credentials
    #[error("TURN server '{url}' requires a username and credential")]
    MissingCredentials { url: String },

    /// The ICE configuration as a whole is unusable
    #[error("Invalid ICE configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl IceError {
    /// Create an invalid candidate error
    pub fn invalid_candidate(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCandidate {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid server URL error
    pub fn invalid_server_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidServerUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
