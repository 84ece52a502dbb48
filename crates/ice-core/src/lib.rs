//! ICE (Interactive Connectivity Establishment) building blocks for rtcpeer.
//!
//! This crate holds the pieces of ICE that a negotiation layer needs to reason
//! about without running an ICE agent itself: candidate records as they appear
//! in SDP, STUN/TURN server configuration, the gathering state, and an
//! append-only candidate collector that can be snapshotted at the moment a
//! local description is reported to signaling.

// Error handling
pub mod error;

// ICE candidates
pub mod candidate;

// Configuration
pub mod config;

// Candidate gathering
pub mod gathering;

// Public exports
pub use candidate::{CandidateType, IceCandidate, TcpType, TransportType};
pub use config::{IceConfig, IceServerConfig, IceTransportPolicy, IceUrlScheme};
pub use error::{IceError, Result};
pub use gathering::{CandidateCollector, CandidateSnapshot, GatheringState};

/// Re-export of common types
pub mod prelude {
    pub use super::{
        CandidateCollector, CandidateSnapshot, CandidateType, GatheringState, IceCandidate,
        IceConfig, IceError, IceServerConfig, IceTransportPolicy, Result, TransportType,
    };
}

/// ICE protocol constants
pub mod constants {
    /// Default port for STUN and TURN servers
    pub const DEFAULT_STUN_PORT: u16 = 3478;

    /// Default port for STUNS and TURNS servers
    pub const DEFAULT_TURNS_PORT: u16 = 5349;

    /// Component ID used for RTP (and for bundled media)
    pub const RTP_COMPONENT: u16 = 1;

    /// Component ID used for RTCP when it is not multiplexed
    pub const RTCP_COMPONENT: u16 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_candidate() {
        let sdp = "candidate:0 1 UDP 2130706431 192.168.1.1 8000 typ host";
        let candidate = IceCandidate::from_sdp_string(sdp).expect("Failed to parse candidate");

        assert_eq!(candidate.candidate_type, CandidateType::Host);
        assert_eq!(candidate.component, constants::RTP_COMPONENT);
        assert_eq!(candidate.transport, TransportType::Udp);
        assert_eq!(candidate.port, 8000);
    }

    #[test]
    fn snapshot_through_prelude() {
        use crate::prelude::*;

        let mut collector = CandidateCollector::new();
        collector.push(IceCandidate::host("1", "10.0.0.1", 5000));
        let snapshot = collector.snapshot();
        collector.push(IceCandidate::host("2", "10.0.0.2", 5002));

        assert!(snapshot.is_prefix_of(collector.candidates()));
        assert_eq!(collector.since(&snapshot).len(), 1);
    }
}
