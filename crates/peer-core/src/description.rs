//! Session descriptions exchanged over signaling
//!
//! SDP bodies are produced and consumed by the transport; the negotiation
//! core only sequences them, so the body stays an opaque string here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// An SDP payload with its type, shaped like `RTCSessionDescriptionInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, sdp)
    }

    /// Number of `m=` sections in the body
    pub fn media_section_count(&self) -> usize {
        self.sdp.lines().filter(|line| line.starts_with("m=")).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_like_rtc_session_description() {
        let offer = SessionDescription::offer("v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n");
        let json = serde_json::to_string(&offer).unwrap();
        assert!(json.contains(r#""type":"offer""#));
        assert_eq!(offer.media_section_count(), 1);
    }
}
