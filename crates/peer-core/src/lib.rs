//! WebRTC offer/answer negotiation with early-invite SDP reporting.
//!
//! `rtcpeer-core` sequences one peer connection through offer/answer rounds.
//! For each round it reports the local SDP to the owning call exactly once,
//! as soon as the local description is applied and before ICE gathering has
//! finished, then keeps collecting candidates in the background for trickle
//! delivery.
//!
//! The pieces:
//!
//! - [`NegotiationSession`]: per-call-leg state (description states, gathering
//!   state, connection state, candidates and the report-time snapshot).
//! - [`NegotiationCore`]: drives rounds for sessions on a [`PeerTransport`].
//! - [`CallContract`]: the capability the call layer injects to receive the
//!   local SDP and failure notifications.
//! - [`NegotiationRegistry`]: an explicit, owned registry of running sessions.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use rtcpeer_core::prelude::*;
//!
//! struct Call;
//!
//! #[async_trait]
//! impl CallContract for Call {
//!     async fn on_local_sdp_ready(&self, ready: LocalSdpReady) {
//!         println!("send {} over signaling", ready.description.sdp_type);
//!     }
//! }
//!
//! # async fn run() -> rtcpeer_core::Result<()> {
//! let transport = MockTransport::builder()
//!     .with_host_candidate("192.168.1.20", 50000)
//!     .connect_after(Duration::from_millis(50))
//!     .build();
//! let core = NegotiationCore::new(transport, Arc::new(Call));
//! let session = NegotiationSession::offerer();
//!
//! let completion = core.launch(&session, NegotiationConfig::new()).await?;
//! core.on_remote_sdp(&session, SessionDescription::answer("v=0\r\n")).await?;
//! completion.wait().await?;
//! core.stop(&session).await;
//! # Ok(())
//! # }
//! ```

// Error handling
pub mod error;

// Configuration
pub mod config;

// Session state
pub mod session;

// Descriptions
pub mod description;

// Call-facing capability
pub mod contract;

// Observer events
pub mod events;

// Transport capability
pub mod transport;

// Negotiation driver
pub mod negotiation;

// Session registry
pub mod registry;

// Public exports
pub use config::{
    MediaConfig, MediaDirection, MediaKind, NegotiationConfig, SdpReportPolicy,
    DEFAULT_CONNECTION_STATE_TIMEOUT, DEFAULT_ICE_GATHERING_TIMEOUT,
};
pub use contract::{CallContract, LocalSdpReady};
pub use description::{SdpType, SessionDescription};
pub use error::{NegotiationError, Result};
pub use events::{NegotiationEvent, EVENT_CHANNEL_CAPACITY};
pub use negotiation::{NegotiationCompletion, NegotiationCore};
pub use registry::{NegotiationRegistry, RegisteredSession, RegistryStats};
pub use session::{
    ConnectionState, LocalDescriptionState, NegotiationRole, NegotiationSession,
    RemoteDescriptionState, SessionId, SessionInfo,
};
pub use transport::{MockOperation, MockTransport, MockTransportBuilder, PeerTransport, TransportEvent};

pub use rtcpeer_ice_core as ice;

/// Re-export of common types
pub mod prelude {
    pub use super::{
        CallContract, ConnectionState, LocalSdpReady, MediaConfig, MediaDirection, MediaKind,
        MockTransport, NegotiationCompletion, NegotiationConfig, NegotiationCore, NegotiationError,
        NegotiationEvent, NegotiationRegistry, NegotiationRole, NegotiationSession, PeerTransport,
        SdpReportPolicy, SessionDescription, SessionId, TransportEvent,
    };
    pub use rtcpeer_ice_core::{CandidateType, GatheringState, IceCandidate, IceConfig, IceServerConfig};
}
