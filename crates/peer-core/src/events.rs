//! Negotiation events for observers
//!
//! Besides the [`CallContract`](crate::CallContract) callbacks, every
//! [`NegotiationCore`](crate::NegotiationCore) publishes what happens to its
//! sessions on a broadcast channel. This is how a call layer that supports
//! trickle ICE observes candidates gathered after the local SDP was reported:
//! it subscribes and forwards `CandidateGathered { trickle: true, .. }`.
//! Dropping the receiver unsubscribes.

use rtcpeer_ice_core::{GatheringState, IceCandidate};
use tokio::sync::broadcast;
use tracing::trace;

use crate::description::SdpType;
use crate::error::NegotiationError;
use crate::session::{ConnectionState, NegotiationRole, SessionId};

/// Capacity of the observer channel; slow observers lag rather than block
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened during negotiation
#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    /// The local SDP was reported to the call
    LocalSdpReady {
        session_id: SessionId,
        round: u32,
        role: NegotiationRole,
        candidate_count: usize,
    },

    /// A local candidate was gathered
    CandidateGathered {
        session_id: SessionId,
        round: u32,
        candidate: IceCandidate,
        /// Gathered after the local SDP was reported
        trickle: bool,
    },

    /// Gathering state changed
    GatheringStateChanged {
        session_id: SessionId,
        round: u32,
        state: GatheringState,
    },

    /// Gathering did not complete in time; negotiation continues
    GatheringTimedOut {
        session_id: SessionId,
        round: u32,
        candidate_count: usize,
    },

    /// A remote description was applied
    RemoteDescriptionApplied {
        session_id: SessionId,
        round: u32,
        sdp_type: SdpType,
    },

    /// Connection state changed
    ConnectionStateChanged {
        session_id: SessionId,
        round: u32,
        previous: ConnectionState,
        state: ConnectionState,
    },

    /// The round failed fatally
    NegotiationFailed {
        session_id: SessionId,
        round: u32,
        error: NegotiationError,
    },

    /// The session was stopped
    Stopped { session_id: SessionId },
}

impl NegotiationEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::LocalSdpReady { session_id, .. }
            | Self::CandidateGathered { session_id, .. }
            | Self::GatheringStateChanged { session_id, .. }
            | Self::GatheringTimedOut { session_id, .. }
            | Self::RemoteDescriptionApplied { session_id, .. }
            | Self::ConnectionStateChanged { session_id, .. }
            | Self::NegotiationFailed { session_id, .. }
            | Self::Stopped { session_id } => session_id,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalSdpReady { .. } => "local_sdp_ready",
            Self::CandidateGathered { .. } => "candidate_gathered",
            Self::GatheringStateChanged { .. } => "gathering_state_changed",
            Self::GatheringTimedOut { .. } => "gathering_timed_out",
            Self::RemoteDescriptionApplied { .. } => "remote_description_applied",
            Self::ConnectionStateChanged { .. } => "connection_state_changed",
            Self::NegotiationFailed { .. } => "negotiation_failed",
            Self::Stopped { .. } => "stopped",
        }
    }
}

/// Broadcast sender shared by a core and its drivers
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    tx: broadcast::Sender<NegotiationEvent>,
}

impl EventEmitter {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<NegotiationEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn emit(&self, event: NegotiationEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            trace!(event = name, "No negotiation event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();
        let id = SessionId::new();

        emitter.emit(NegotiationEvent::GatheringStateChanged {
            session_id: id.clone(),
            round: 1,
            state: GatheringState::Gathering,
        });
        emitter.emit(NegotiationEvent::Stopped { session_id: id.clone() });

        assert_eq!(rx.recv().await.unwrap().name(), "gathering_state_changed");
        let stopped = rx.recv().await.unwrap();
        assert_eq!(stopped.session_id(), &id);
        assert_eq!(stopped.name(), "stopped");
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        let emitter = EventEmitter::new();
        emitter.emit(NegotiationEvent::Stopped {
            session_id: SessionId::new(),
        });
    }
}
