//! Error types for negotiation
//!
//! Errors fall into four groups that the call layer treats differently:
//!
//! - **Configuration** errors reject `launch`/`start` before the transport is
//!   touched and are never retried.
//! - **Transport** errors during description creation reject `launch`.
//! - **Connection** failures (timeout, `Failed`, transport gone) are fatal for
//!   the round; a full renegotiation is the call layer's decision.
//! - **Protocol** defects (a second SDP-ready report, a duplicate remote
//!   description) are programming errors surfaced instead of ignored.
//!
//! ICE gathering timeouts are advisory and never produce an error.

use std::time::Duration;

use rtcpeer_ice_core::IceError;
use thiserror::Error;

use crate::session::{ConnectionState, SessionId};

/// Result type for negotiation operations
pub type Result<T> = std::result::Result<T, NegotiationError>;

/// Errors that can occur while negotiating a peer connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// Invalid negotiation configuration
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// The answering role needs the remote offer up front
    #[error("Answerer role requires the remote offer SDP")]
    MissingRemoteSdp,

    /// ICE configuration rejected
    #[error("ICE configuration error: {0}")]
    Ice(#[from] IceError),

    /// A transport operation failed
    #[error("Transport operation '{operation}' failed: {reason}")]
    Transport { operation: String, reason: String },

    /// The operation is not valid in the session's current state
    #[error("Invalid state for session {session_id}: {reason}")]
    InvalidState { session_id: SessionId, reason: String },

    /// A remote description was already applied this round
    #[error("Remote description already applied for session {session_id}")]
    DuplicateRemoteDescription { session_id: SessionId },

    /// The local SDP was already reported this round
    #[error("Local SDP already reported for session {session_id} in round {round}")]
    DuplicateSdpReady { session_id: SessionId, round: u32 },

    /// The connection did not reach `Connected` in time
    #[error("Connection not established within {timeout:?}")]
    ConnectionTimeout { timeout: Duration },

    /// The transport reported a terminal connection state
    #[error("Connection entered {state} state")]
    ConnectionFailed { state: ConnectionState },

    /// The transport stopped delivering events
    #[error("Transport event stream closed")]
    TransportClosed,

    /// The round was stopped or superseded by a renegotiation
    #[error("Negotiation cancelled")]
    Cancelled,

    /// No session with this ID is registered
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    /// A session with this ID is already registered
    #[error("Session already registered: {session_id}")]
    SessionAlreadyRegistered { session_id: SessionId },
}

impl NegotiationError {
    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(session_id: &SessionId, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            session_id: session_id.clone(),
            reason: reason.into(),
        }
    }

    /// Whether the error ends the negotiation round
    ///
    /// Cancellation is a requested stop, and registry lookups never touch a
    /// running round.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::SessionNotFound { .. } | Self::SessionAlreadyRegistered { .. }
        )
    }

    /// Whether the error indicates a caller bug rather than a runtime failure
    pub fn is_protocol_defect(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRemoteDescription { .. }
                | Self::DuplicateSdpReady { .. }
                | Self::InvalidState { .. }
        )
    }

    /// Whether a fresh negotiation round could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionFailed { .. }
                | Self::TransportClosed
                | Self::Transport { .. }
        )
    }

    /// Short category name for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration { .. } | Self::MissingRemoteSdp | Self::Ice(_) => {
                "configuration"
            }
            Self::Transport { .. } | Self::TransportClosed => "transport",
            Self::ConnectionTimeout { .. } | Self::ConnectionFailed { .. } => "connection",
            Self::InvalidState { .. }
            | Self::DuplicateRemoteDescription { .. }
            | Self::DuplicateSdpReady { .. } => "protocol",
            Self::Cancelled => "cancelled",
            Self::SessionNotFound { .. } | Self::SessionAlreadyRegistered { .. } => "registry",
        }
    }
}
