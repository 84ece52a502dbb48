//! Negotiation configuration
//!
//! A [`NegotiationConfig`] is what the call layer hands to
//! [`NegotiationCore::launch`](crate::NegotiationCore::launch): which media
//! kinds to negotiate and in which direction, the ICE servers, the two
//! timeouts, and for the answering role the remote offer.
//!
//! ```text
//! NegotiationConfig
//!   ├── MediaConfig           audio / video direction policy
//!   ├── IceConfig             shared STUN/TURN list + transport policy
//!   ├── timeouts              ICE gathering (advisory), connection (fatal)
//!   ├── remote_sdp            Answerer only
//!   └── report_policy         when the local SDP is reported
//! ```
//!
//! # Examples
//!
//! ```rust
//! use rtcpeer_core::{MediaConfig, MediaDirection, NegotiationConfig, NegotiationRole};
//! use rtcpeer_ice_core::{IceConfig, IceServerConfig};
//! use std::time::Duration;
//!
//! let config = NegotiationConfig::new()
//!     .with_media(MediaConfig::audio_only().with_video(MediaDirection::RecvOnly))
//!     .with_ice(IceConfig::new().with_servers(vec![
//!         IceServerConfig::stun("stun:stun.example.com:3478"),
//!     ]))
//!     .with_connection_timeout(Duration::from_secs(5));
//!
//! assert!(config.validate(NegotiationRole::Offerer).is_ok());
//! assert!(config.validate(NegotiationRole::Answerer).is_err());
//! ```

use std::fmt;
use std::time::Duration;

use rtcpeer_ice_core::IceConfig;
use serde::{Deserialize, Serialize};

use crate::error::{NegotiationError, Result};
use crate::session::NegotiationRole;

/// Default ICE gathering timeout
pub const DEFAULT_ICE_GATHERING_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default connection establishment timeout
pub const DEFAULT_CONNECTION_STATE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Media kind carried by a transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Direction policy for one media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDirection {
    /// Send and receive
    #[serde(rename = "sendrecv")]
    SendRecv,

    /// Send only
    #[serde(rename = "sendonly")]
    SendOnly,

    /// Receive only
    #[serde(rename = "recvonly")]
    RecvOnly,

    /// Negotiated but not flowing
    Inactive,

    /// Not negotiated at all: no transceiver is created
    #[default]
    None,
}

impl MediaDirection {
    /// Whether a transceiver must be created for this direction
    pub fn creates_transceiver(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether local media is sent
    pub fn sends(&self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }

    /// Whether remote media is received
    pub fn receives(&self) -> bool {
        matches!(self, Self::SendRecv | Self::RecvOnly)
    }

    /// SDP direction attribute, if any
    pub fn as_sdp_attribute(&self) -> Option<&'static str> {
        match self {
            Self::SendRecv => Some("sendrecv"),
            Self::SendOnly => Some("sendonly"),
            Self::RecvOnly => Some("recvonly"),
            Self::Inactive => Some("inactive"),
            Self::None => None,
        }
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sdp_attribute().unwrap_or("none"))
    }
}

/// Per-kind direction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Audio direction
    #[serde(default)]
    pub audio: MediaDirection,

    /// Video direction
    #[serde(default)]
    pub video: MediaDirection,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self::audio_only()
    }
}

impl MediaConfig {
    /// Two-way audio, no video
    pub fn audio_only() -> Self {
        Self {
            audio: MediaDirection::SendRecv,
            video: MediaDirection::None,
        }
    }

    /// Two-way video, no audio
    pub fn video_only() -> Self {
        Self {
            audio: MediaDirection::None,
            video: MediaDirection::SendRecv,
        }
    }

    /// Two-way audio and video
    pub fn audio_video() -> Self {
        Self {
            audio: MediaDirection::SendRecv,
            video: MediaDirection::SendRecv,
        }
    }

    /// Set the audio direction
    pub fn with_audio(mut self, direction: MediaDirection) -> Self {
        self.audio = direction;
        self
    }

    /// Set the video direction
    pub fn with_video(mut self, direction: MediaDirection) -> Self {
        self.video = direction;
        self
    }

    /// Direction for a given kind
    pub fn direction(&self, kind: MediaKind) -> MediaDirection {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }

    /// Kinds that need a transceiver, audio first
    pub fn transceivers(&self) -> Vec<(MediaKind, MediaDirection)> {
        [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .map(|kind| (kind, self.direction(kind)))
            .filter(|(_, direction)| direction.creates_transceiver())
            .collect()
    }
}

/// When the local description is reported to the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpReportPolicy {
    /// As soon as the local description is applied, without waiting for ICE
    #[default]
    EarlyInvite,

    /// Once gathering completes or the gathering timeout elapses
    AwaitGathering,
}

/// Configuration for one negotiation round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Media kinds and directions
    #[serde(default)]
    pub media: MediaConfig,

    /// ICE servers and policy
    #[serde(default)]
    pub ice: IceConfig,

    /// Advisory limit on ICE gathering
    #[serde(
        rename = "max_ice_gathering_timeout_ms",
        with = "duration_millis",
        default = "default_gathering_timeout"
    )]
    pub max_ice_gathering_timeout: Duration,

    /// Fatal limit on reaching `Connected` after the remote description is applied
    #[serde(
        rename = "max_connection_state_timeout_ms",
        with = "duration_millis",
        default = "default_connection_timeout"
    )]
    pub max_connection_state_timeout: Duration,

    /// Remote offer, required for the answering role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_sdp: Option<String>,

    /// Reporting policy for the local SDP
    #[serde(default)]
    pub report_policy: SdpReportPolicy,
}

fn default_gathering_timeout() -> Duration {
    DEFAULT_ICE_GATHERING_TIMEOUT
}

fn default_connection_timeout() -> Duration {
    DEFAULT_CONNECTION_STATE_TIMEOUT
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            ice: IceConfig::default(),
            max_ice_gathering_timeout: DEFAULT_ICE_GATHERING_TIMEOUT,
            max_connection_state_timeout: DEFAULT_CONNECTION_STATE_TIMEOUT,
            remote_sdp: None,
            report_policy: SdpReportPolicy::EarlyInvite,
        }
    }
}

impl NegotiationConfig {
    /// Create a configuration with defaults (audio only, no ICE servers)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| NegotiationError::invalid_config("json", e.to_string()))
    }

    /// Set the media policy
    pub fn with_media(mut self, media: MediaConfig) -> Self {
        self.media = media;
        self
    }

    /// Set the ICE configuration
    pub fn with_ice(mut self, ice: IceConfig) -> Self {
        self.ice = ice;
        self
    }

    /// Set the ICE gathering timeout
    pub fn with_gathering_timeout(mut self, timeout: Duration) -> Self {
        self.max_ice_gathering_timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.max_connection_state_timeout = timeout;
        self
    }

    /// Provide the remote offer (answering role)
    pub fn with_remote_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.remote_sdp = Some(sdp.into());
        self
    }

    /// Set the report policy
    pub fn with_report_policy(mut self, policy: SdpReportPolicy) -> Self {
        self.report_policy = policy;
        self
    }

    /// Validate the configuration for a role
    pub fn validate(&self, role: NegotiationRole) -> Result<()> {
        if self.media.transceivers().is_empty() {
            return Err(NegotiationError::invalid_config(
                "media",
                "at least one of audio or video must be negotiated",
            ));
        }

        if self.max_ice_gathering_timeout.is_zero() {
            return Err(NegotiationError::invalid_config(
                "max_ice_gathering_timeout",
                "must be greater than zero",
            ));
        }

        if self.max_connection_state_timeout.is_zero() {
            return Err(NegotiationError::invalid_config(
                "max_connection_state_timeout",
                "must be greater than zero",
            ));
        }

        match (role, self.remote_sdp.as_deref()) {
            (NegotiationRole::Answerer, None) => return Err(NegotiationError::MissingRemoteSdp),
            (NegotiationRole::Answerer, Some(sdp)) if sdp.trim().is_empty() => {
                return Err(NegotiationError::MissingRemoteSdp)
            }
            (NegotiationRole::Offerer, Some(_)) => {
                return Err(NegotiationError::invalid_config(
                    "remote_sdp",
                    "only the answering role starts from a remote offer",
                ))
            }
            _ => {}
        }

        self.ice.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rtcpeer_ice_core::{IceServerConfig, IceTransportPolicy};

    #[test]
    fn transceivers_skip_none_but_keep_inactive() {
        let media = MediaConfig::audio_only().with_video(MediaDirection::Inactive);
        assert_eq!(
            media.transceivers(),
            vec![
                (MediaKind::Audio, MediaDirection::SendRecv),
                (MediaKind::Video, MediaDirection::Inactive),
            ]
        );

        let video = MediaConfig::video_only();
        assert_eq!(video.transceivers(), vec![(MediaKind::Video, MediaDirection::SendRecv)]);
    }

    #[test]
    fn rejects_empty_media() {
        let config = NegotiationConfig::new().with_media(MediaConfig {
            audio: MediaDirection::None,
            video: MediaDirection::None,
        });
        assert!(matches!(
            config.validate(NegotiationRole::Offerer),
            Err(NegotiationError::InvalidConfiguration { ref field, .. }) if field == "media"
        ));
    }

    #[test]
    fn remote_sdp_must_match_role() {
        let offerer = NegotiationConfig::new();
        assert!(offerer.validate(NegotiationRole::Offerer).is_ok());
        assert_eq!(
            offerer.validate(NegotiationRole::Answerer),
            Err(NegotiationError::MissingRemoteSdp)
        );

        let blank = NegotiationConfig::new().with_remote_sdp("  ");
        assert_eq!(
            blank.validate(NegotiationRole::Answerer),
            Err(NegotiationError::MissingRemoteSdp)
        );

        let answerer = NegotiationConfig::new().with_remote_sdp("v=0\r\n");
        assert!(answerer.validate(NegotiationRole::Answerer).is_ok());
        assert!(answerer.validate(NegotiationRole::Offerer).is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let config = NegotiationConfig::new().with_connection_timeout(Duration::ZERO);
        assert!(config.validate(NegotiationRole::Offerer).is_err());

        let config = NegotiationConfig::new().with_gathering_timeout(Duration::ZERO);
        assert!(config.validate(NegotiationRole::Offerer).is_err());
    }

    #[test]
    fn surfaces_ice_errors() {
        let config = NegotiationConfig::new().with_ice(
            IceConfig::new().with_servers(vec![IceServerConfig::stun("turn:turn.example.com")]),
        );
        assert!(matches!(
            config.validate(NegotiationRole::Offerer),
            Err(NegotiationError::Ice(_))
        ));
    }

    #[test]
    fn loads_from_json() {
        let json = r#"{
            "media": { "audio": "sendrecv", "video": "recvonly" },
            "ice": {
                "servers": [{ "urls": ["turn:turn.example.com"], "username": "u", "credential": "c" }],
                "transport_policy": "relay"
            },
            "max_ice_gathering_timeout_ms": 1500,
            "report_policy": "await_gathering"
        }"#;
        let config = NegotiationConfig::from_json(json).unwrap();

        assert_eq!(config.media.video, MediaDirection::RecvOnly);
        assert_eq!(config.ice.transport_policy, IceTransportPolicy::Relay);
        assert_eq!(config.max_ice_gathering_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_connection_state_timeout, DEFAULT_CONNECTION_STATE_TIMEOUT);
        assert_eq!(config.report_policy, SdpReportPolicy::AwaitGathering);
        assert!(config.validate(NegotiationRole::Offerer).is_ok());

        assert!(NegotiationConfig::from_json("{ not json").is_err());
    }
}
