//! The capability the negotiation core calls back into
//!
//! The call/session layer owns the negotiation session and implements
//! [`CallContract`]; the core receives it as an `Arc<dyn CallContract>` at
//! construction and only ever calls these methods. It never holds a reference
//! to the call object's internals.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use rtcpeer_core::{CallContract, LocalSdpReady};
//! use tokio::sync::mpsc;
//!
//! /// Forwards the local SDP to a signaling task
//! struct SignalingBridge {
//!     outbound: mpsc::UnboundedSender<String>,
//! }
//!
//! #[async_trait]
//! impl CallContract for SignalingBridge {
//!     async fn on_local_sdp_ready(&self, ready: LocalSdpReady) {
//!         let _ = self.outbound.send(ready.description.sdp);
//!     }
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rtcpeer_ice_core::{CandidateSnapshot, IceCandidate};

use crate::description::SessionDescription;
use crate::error::NegotiationError;
use crate::session::{ConnectionState, NegotiationRole, SessionId};

/// What the call receives when the local SDP is ready
#[derive(Debug, Clone)]
pub struct LocalSdpReady {
    /// Session the SDP belongs to
    pub session_id: SessionId,
    /// Role of the session
    pub role: NegotiationRole,
    /// Negotiation round (1 for the initial exchange)
    pub round: u32,
    /// The applied local offer or answer
    pub description: SessionDescription,
    /// Candidates known when the report was made
    pub candidates: CandidateSnapshot,
    /// When the report was made
    pub reported_at: DateTime<Utc>,
}

impl LocalSdpReady {
    /// Candidate lines for signaling layers that send them alongside the SDP
    pub fn candidate_lines(&self) -> Vec<String> {
        self.candidates
            .candidates()
            .iter()
            .map(IceCandidate::to_sdp_string)
            .collect()
    }
}

/// Callbacks from the negotiation core to the owning call
///
/// Callbacks run on the session's driver task. They may await, but must not
/// wait for [`NegotiationCore::on_remote_sdp`](crate::NegotiationCore::on_remote_sdp)
/// on the same session: the driver only serves that request once the callback
/// has returned.
#[async_trait]
pub trait CallContract: Send + Sync {
    /// The local description is ready to be sent over signaling.
    ///
    /// Invoked at most once per negotiation round.
    async fn on_local_sdp_ready(&self, ready: LocalSdpReady);

    /// The round failed after the local SDP was reported (connection timeout,
    /// transport failure). Failures before that point reject `launch` instead.
    async fn on_negotiation_failed(&self, _session_id: &SessionId, _error: &NegotiationError) {}

    /// The transport's connection state changed.
    async fn on_connection_state_changed(&self, _session_id: &SessionId, _state: ConnectionState) {}
}
