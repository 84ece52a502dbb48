//! The peer-connection capability driven by the negotiation core
//!
//! [`PeerTransport`] is the seam to the WebRTC engine: description creation
//! and application, plus an event stream of gathered candidates and
//! connection-state changes. The core sequences calls against it; it never
//! interprets SDP or runs ICE itself.
//!
//! A transport may outlive a negotiation round (renegotiation on the same
//! connection), so every round takes its own [`subscribe`](PeerTransport::subscribe)
//! receiver and drops it when the round ends.

pub mod mock;

use async_trait::async_trait;
use rtcpeer_ice_core::{IceCandidate, IceConfig};
use tokio::sync::mpsc;

use crate::config::{MediaDirection, MediaKind};
use crate::description::SessionDescription;
use crate::error::Result;
use crate::session::ConnectionState;

pub use mock::{MockOperation, MockTransport, MockTransportBuilder};

/// Events emitted by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A local candidate was gathered
    CandidateDiscovered(IceCandidate),
    /// End of candidates
    GatheringComplete,
    /// The peer connection changed state
    ConnectionStateChanged(ConnectionState),
}

/// A WebRTC peer connection, as seen by the negotiation core
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Apply ICE servers and policy before any description is created
    async fn configure(&self, ice: &IceConfig) -> Result<()>;

    /// Create the transceiver for `kind`, or update its direction if one exists
    async fn set_transceiver(&self, kind: MediaKind, direction: MediaDirection) -> Result<()>;

    /// Create a local offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create a local answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description; gathering starts once this resolves
    async fn set_local_description(&self, description: &SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    /// Subscribe to transport events; dropping the receiver unsubscribes
    fn subscribe(&self) -> mpsc::Receiver<TransportEvent>;

    /// Release all resources. Must be idempotent.
    async fn close(&self) -> Result<()>;
}
