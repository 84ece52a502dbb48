//! ICE candidate records
//!
//! An [`IceCandidate`] is the immutable description of one network path a peer
//! advertises, in the shape it takes on an SDP `a=candidate:` line
//! (RFC 8839 Section 5.1). Parsing and formatting are symmetric for every field
//! this crate models; unknown extension attributes (`generation`, `ufrag`,
//! `network-id`, ...) are accepted and dropped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::RTP_COMPONENT;
use crate::error::{IceError, Result};

/// Kind of ICE candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    /// Address of a local interface
    Host,

    /// Public address learned from a STUN server
    #[serde(rename = "srflx")]
    ServerReflexive,

    /// Address learned from a connectivity check
    #[serde(rename = "prflx")]
    PeerReflexive,

    /// Address allocated on a TURN server
    Relay,
}

impl CandidateType {
    /// Token used after `typ` on an SDP candidate line
    pub fn as_sdp_token(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::PeerReflexive => "prflx",
            Self::Relay => "relay",
        }
    }

    /// Type preference from RFC 8445 Section 5.1.2.2
    pub fn type_preference(&self) -> u32 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay => 0,
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sdp_token())
    }
}

impl FromStr for CandidateType {
    type Err = IceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "host" => Ok(Self::Host),
            "srflx" => Ok(Self::ServerReflexive),
            "prflx" => Ok(Self::PeerReflexive),
            "relay" => Ok(Self::Relay),
            other => Err(IceError::invalid_candidate(
                s,
                format!("unknown candidate type '{}'", other),
            )),
        }
    }
}

/// Transport protocol of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// UDP
    Udp,

    /// TCP (RFC 6544)
    Tcp,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "UDP"),
            Self::Tcp => write!(f, "TCP"),
        }
    }
}

impl FromStr for TransportType {
    type Err = IceError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else {
            Err(IceError::invalid_candidate(
                s,
                format!("unknown transport '{}'", s),
            ))
        }
    }
}

/// TCP candidate role (RFC 6544 Section 4.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpType {
    Active,
    Passive,
    So,
}

impl fmt::Display for TcpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Passive => write!(f, "passive"),
            Self::So => write!(f, "so"),
        }
    }
}

impl FromStr for TcpType {
    type Err = IceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "passive" => Ok(Self::Passive),
            "so" => Ok(Self::So),
            other => Err(IceError::invalid_candidate(
                s,
                format!("unknown tcptype '{}'", other),
            )),
        }
    }
}

/// A gathered ICE candidate
///
/// Candidates are values: once gathered they are never modified, only cloned
/// into collections and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Foundation identifier
    pub foundation: String,

    /// Component ID (1 = RTP, 2 = RTCP)
    pub component: u16,

    /// Transport protocol
    pub transport: TransportType,

    /// Candidate priority
    pub priority: u32,

    /// Connection address (IP literal or mDNS hostname)
    pub address: String,

    /// Connection port
    pub port: u16,

    /// Candidate type
    pub candidate_type: CandidateType,

    /// Related address for reflexive and relay candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_address: Option<String>,

    /// Related port for reflexive and relay candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_port: Option<u16>,

    /// TCP role, only meaningful for TCP candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<TcpType>,
}

impl IceCandidate {
    /// Compute a candidate priority (RFC 8445 Section 5.1.2.1)
    ///
    /// priority = 2^24 * type_pref + 2^8 * local_pref + (256 - component)
    pub fn compute_priority(candidate_type: CandidateType, local_preference: u16, component: u16) -> u32 {
        (candidate_type.type_preference() << 24)
            + ((local_preference as u32) << 8)
            + (256 - component.min(256) as u32)
    }

    fn new_udp(
        foundation: impl Into<String>,
        candidate_type: CandidateType,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            foundation: foundation.into(),
            component: RTP_COMPONENT,
            transport: TransportType::Udp,
            priority: Self::compute_priority(candidate_type, u16::MAX, RTP_COMPONENT),
            address: address.into(),
            port,
            candidate_type,
            related_address: None,
            related_port: None,
            tcp_type: None,
        }
    }

    /// Create a UDP host candidate for the RTP component
    pub fn host(foundation: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self::new_udp(foundation, CandidateType::Host, address, port)
    }

    /// Create a UDP server-reflexive candidate for the RTP component
    pub fn server_reflexive(
        foundation: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        base_address: impl Into<String>,
        base_port: u16,
    ) -> Self {
        Self::new_udp(foundation, CandidateType::ServerReflexive, address, port)
            .with_related(base_address, base_port)
    }

    /// Create a UDP relay candidate for the RTP component
    pub fn relay(
        foundation: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        mapped_address: impl Into<String>,
        mapped_port: u16,
    ) -> Self {
        Self::new_udp(foundation, CandidateType::Relay, address, port)
            .with_related(mapped_address, mapped_port)
    }

    /// Set the related address and port
    pub fn with_related(mut self, address: impl Into<String>, port: u16) -> Self {
        self.related_address = Some(address.into());
        self.related_port = Some(port);
        self
    }

    /// Parse a candidate from its SDP representation
    ///
    /// Accepts `a=candidate:...`, `candidate:...` or the bare attribute value.
    pub fn from_sdp_string(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        let value = trimmed.strip_prefix("a=").unwrap_or(trimmed);
        let value = value.strip_prefix("candidate:").unwrap_or(value);

        let mut tokens = value.split_whitespace();
        let mut next = |field: &str| {
            tokens
                .next()
                .ok_or_else(|| IceError::invalid_candidate(line, format!("missing {}", field)))
        };

        let foundation = next("foundation")?.to_string();
        let component = parse_number::<u16>(line, "component", next("component")?)?;
        let transport = next("transport")?
            .parse::<TransportType>()
            .map_err(|e| rebind(line, e))?;
        let priority = parse_number::<u32>(line, "priority", next("priority")?)?;
        let address = next("address")?.to_string();
        let port = parse_number::<u16>(line, "port", next("port")?)?;

        if next("typ")? != "typ" {
            return Err(IceError::invalid_candidate(line, "expected 'typ' keyword"));
        }
        let candidate_type = next("candidate type")?
            .parse::<CandidateType>()
            .map_err(|e| rebind(line, e))?;

        let mut candidate = Self {
            foundation,
            component,
            transport,
            priority,
            address,
            port,
            candidate_type,
            related_address: None,
            related_port: None,
            tcp_type: None,
        };

        // Remaining tokens are key/value extension pairs
        let rest: Vec<&str> = tokens.collect();
        for pair in rest.chunks(2) {
            let (key, value) = match pair {
                [key, value] => (*key, *value),
                [key] => {
                    return Err(IceError::invalid_candidate(
                        line,
                        format!("extension '{}' has no value", key),
                    ))
                }
                _ => continue,
            };

            match key {
                "raddr" => candidate.related_address = Some(value.to_string()),
                "rport" => candidate.related_port = Some(parse_number::<u16>(line, "rport", value)?),
                "tcptype" => {
                    candidate.tcp_type = Some(value.parse::<TcpType>().map_err(|e| rebind(line, e))?)
                }
                _ => {}
            }
        }

        Ok(candidate)
    }

    /// Format this candidate as an SDP attribute value (without `a=`)
    pub fn to_sdp_string(&self) -> String {
        let mut out = format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.candidate_type
        );
        if let Some(raddr) = &self.related_address {
            out.push_str(&format!(" raddr {}", raddr));
        }
        if let Some(rport) = self.related_port {
            out.push_str(&format!(" rport {}", rport));
        }
        if let Some(tcp_type) = self.tcp_type {
            out.push_str(&format!(" tcptype {}", tcp_type));
        }
        out
    }

    /// Whether this candidate needs a STUN or TURN server to exist
    pub fn is_server_derived(&self) -> bool {
        matches!(
            self.candidate_type,
            CandidateType::ServerReflexive | CandidateType::Relay
        )
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sdp_string())
    }
}

impl FromStr for IceCandidate {
    type Err = IceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_sdp_string(s)
    }
}

fn parse_number<T: FromStr>(line: &str, field: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| IceError::invalid_candidate(line, format!("invalid {} '{}'", field, value)))
}

// Token-level errors carry only the token; report the whole line instead.
fn rebind(line: &str, err: IceError) -> IceError {
    match err {
        IceError::InvalidCandidate { reason, .. } => IceError::invalid_candidate(line, reason),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_browser_srflx_line() {
        let line = "a=candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 192.168.1.20 rport 46154 generation 0 ufrag EsAw network-cost 999";
        let candidate = IceCandidate::from_sdp_string(line).unwrap();

        assert_eq!(candidate.foundation, "842163049");
        assert_eq!(candidate.transport, TransportType::Udp);
        assert_eq!(candidate.priority, 1677729535);
        assert_eq!(candidate.address, "203.0.113.7");
        assert_eq!(candidate.candidate_type, CandidateType::ServerReflexive);
        assert_eq!(candidate.related_address.as_deref(), Some("192.168.1.20"));
        assert_eq!(candidate.related_port, Some(46154));
    }

    #[test]
    fn parses_tcp_host_with_mdns_address() {
        let line = "candidate:1 1 TCP 1518280447 4f2a1c3e-9d4b.local 9 typ host tcptype active";
        let candidate: IceCandidate = line.parse().unwrap();

        assert_eq!(candidate.transport, TransportType::Tcp);
        assert_eq!(candidate.address, "4f2a1c3e-9d4b.local");
        assert_eq!(candidate.tcp_type, Some(TcpType::Active));
    }

    #[test]
    fn formatting_matches_parsed_input() {
        let line = "candidate:3 1 UDP 41885439 198.51.100.4 61002 typ relay raddr 203.0.113.7 rport 46154";
        let candidate = IceCandidate::from_sdp_string(line).unwrap();
        assert_eq!(candidate.to_sdp_string(), line);
    }

    #[test]
    fn rejects_malformed_lines() {
        let cases = [
            "candidate:1 1 UDP 2130706431 10.0.0.1",
            "candidate:1 one UDP 2130706431 10.0.0.1 5000 typ host",
            "candidate:1 1 SCTP 2130706431 10.0.0.1 5000 typ host",
            "candidate:1 1 UDP 2130706431 10.0.0.1 5000 type host",
            "candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ bogus",
            "candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ srflx raddr",
        ];
        for line in cases {
            let err = IceCandidate::from_sdp_string(line).unwrap_err();
            match err {
                IceError::InvalidCandidate { line: reported, .. } => assert_eq!(reported, line),
                other => panic!("unexpected error for {}: {:?}", line, other),
            }
        }
    }

    #[test]
    fn priority_orders_host_above_relay() {
        let host = IceCandidate::host("1", "10.0.0.1", 5000);
        let srflx = IceCandidate::server_reflexive("2", "203.0.113.7", 5000, "10.0.0.1", 5000);
        let relay = IceCandidate::relay("3", "198.51.100.4", 6000, "203.0.113.7", 5000);

        assert_eq!(host.priority, 2130706431);
        assert!(host.priority > srflx.priority);
        assert!(srflx.priority > relay.priority);
        assert!(relay.is_server_derived());
        assert!(!host.is_server_derived());
    }
}
