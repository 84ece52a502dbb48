//! ICE server and transport policy configuration
//!
//! The server list is read-only once built and is shared by every negotiation
//! that uses it, so [`IceConfig`] keeps it behind an `Arc`. Cloning an
//! `IceConfig` never copies credentials.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{DEFAULT_STUN_PORT, DEFAULT_TURNS_PORT};
use crate::error::{IceError, Result};

/// URL scheme of an ICE server (RFC 7064 / RFC 7065)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceUrlScheme {
    Stun,
    Stuns,
    Turn,
    Turns,
}

impl IceUrlScheme {
    /// Whether this scheme names a TURN relay
    pub fn is_turn(&self) -> bool {
        matches!(self, Self::Turn | Self::Turns)
    }

    /// Port used when the URL omits one
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Stun | Self::Turn => DEFAULT_STUN_PORT,
            Self::Stuns | Self::Turns => DEFAULT_TURNS_PORT,
        }
    }

    /// Split a server URL into scheme, host and port
    pub fn parse_url(url: &str) -> Result<(Self, String, u16)> {
        let (scheme, rest) = url
            .split_once(':')
            .ok_or_else(|| IceError::invalid_server_url(url, "missing scheme"))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "stun" => Self::Stun,
            "stuns" => Self::Stuns,
            "turn" => Self::Turn,
            "turns" => Self::Turns,
            other => {
                return Err(IceError::invalid_server_url(
                    url,
                    format!("unsupported scheme '{}'", other),
                ))
            }
        };

        // Drop `?transport=udp` style query parameters
        let authority = rest.split('?').next().unwrap_or_default();
        if authority.is_empty() || authority.starts_with("//") {
            return Err(IceError::invalid_server_url(url, "missing host"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| IceError::invalid_server_url(url, "unterminated IPv6 literal"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(url, port)?,
                None if tail.is_empty() => scheme.default_port(),
                None => return Err(IceError::invalid_server_url(url, "garbage after IPv6 literal")),
            };
            (host.to_string(), port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), parse_port(url, port)?),
                None => (authority.to_string(), scheme.default_port()),
            }
        };

        if host.is_empty() {
            return Err(IceError::invalid_server_url(url, "missing host"));
        }

        Ok((scheme, host, port))
    }
}

fn parse_port(url: &str, port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(IceError::invalid_server_url(url, format!("invalid port '{}'", port))),
        Ok(port) => Ok(port),
    }
}

/// A STUN or TURN server entry, shaped like `RTCIceServer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs, e.g. `stun:stun.example.com:3478` or `turns:turn.example.com`
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// A STUN server entry
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// A TURN server entry with long-term credentials
    pub fn turn(url: impl Into<String>, username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Add another URL served by the same credentials
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Whether any URL of this entry is a TURN relay
    pub fn has_turn(&self) -> bool {
        self.urls
            .iter()
            .filter_map(|url| IceUrlScheme::parse_url(url).ok())
            .any(|(scheme, _, _)| scheme.is_turn())
    }

    /// Validate URLs and credentials
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(IceError::invalid_config("ICE server entry has no URLs"));
        }

        for url in &self.urls {
            let (scheme, _, _) = IceUrlScheme::parse_url(url)?;
            if scheme.is_turn() {
                let has_username = self.username.as_deref().is_some_and(|u| !u.is_empty());
                let has_credential = self.credential.as_deref().is_some_and(|c| !c.is_empty());
                if !has_username || !has_credential {
                    return Err(IceError::MissingCredentials { url: url.clone() });
                }
            }
        }

        Ok(())
    }
}

/// Which candidates the transport may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    /// Any candidate type
    #[default]
    All,

    /// Relay candidates only
    Relay,
}

/// ICE configuration handed to a peer transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN/TURN servers, shared read-only between sessions
    #[serde(default = "empty_servers")]
    pub servers: Arc<[IceServerConfig]>,

    /// Candidate filtering policy
    #[serde(default)]
    pub transport_policy: IceTransportPolicy,

    /// Number of candidates to pre-gather before a description is requested
    #[serde(default)]
    pub candidate_pool_size: u8,
}

fn empty_servers() -> Arc<[IceServerConfig]> {
    Arc::from(Vec::new())
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: empty_servers(),
            transport_policy: IceTransportPolicy::All,
            candidate_pool_size: 0,
        }
    }
}

impl IceConfig {
    /// Create a configuration with no servers (host candidates only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the server list
    pub fn with_servers(mut self, servers: Vec<IceServerConfig>) -> Self {
        self.servers = Arc::from(servers);
        self
    }

    /// Share an existing server list
    pub fn with_shared_servers(mut self, servers: Arc<[IceServerConfig]>) -> Self {
        self.servers = servers;
        self
    }

    /// Set the transport policy
    pub fn with_transport_policy(mut self, policy: IceTransportPolicy) -> Self {
        self.transport_policy = policy;
        self
    }

    /// Set the candidate pool size
    pub fn with_candidate_pool_size(mut self, size: u8) -> Self {
        self.candidate_pool_size = size;
        self
    }

    /// Validate all servers against the transport policy
    pub fn validate(&self) -> Result<()> {
        for server in self.servers.iter() {
            server.validate()?;
        }

        if self.transport_policy == IceTransportPolicy::Relay
            && !self.servers.iter().any(IceServerConfig::has_turn)
        {
            return Err(IceError::invalid_config(
                "relay transport policy requires at least one TURN server",
            ));
        }

        debug!(
            servers = self.servers.len(),
            policy = ?self.transport_policy,
            "ICE configuration validated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_urls() {
        assert_eq!(
            IceUrlScheme::parse_url("stun:stun.example.com").unwrap(),
            (IceUrlScheme::Stun, "stun.example.com".to_string(), 3478)
        );
        assert_eq!(
            IceUrlScheme::parse_url("turns:turn.example.com:443?transport=tcp").unwrap(),
            (IceUrlScheme::Turns, "turn.example.com".to_string(), 443)
        );
        assert_eq!(
            IceUrlScheme::parse_url("TURN:[2001:db8::1]").unwrap(),
            (IceUrlScheme::Turn, "2001:db8::1".to_string(), 3478)
        );

        assert!(IceUrlScheme::parse_url("http://example.com").is_err());
        assert!(IceUrlScheme::parse_url("stun:").is_err());
        assert!(IceUrlScheme::parse_url("stun:host:0").is_err());
        assert!(IceUrlScheme::parse_url("stun.example.com").is_err());
    }

    #[test]
    fn turn_requires_credentials() {
        let bare = IceServerConfig::stun("turn:turn.example.com");
        assert_eq!(
            bare.validate(),
            Err(IceError::MissingCredentials {
                url: "turn:turn.example.com".to_string()
            })
        );

        let ok = IceServerConfig::turn("turn:turn.example.com", "user", "secret")
            .with_url("turns:turn.example.com:443");
        assert!(ok.validate().is_ok());
        assert!(ok.has_turn());
    }

    #[test]
    fn relay_policy_needs_turn_server() {
        let stun_only = IceConfig::new()
            .with_servers(vec![IceServerConfig::stun("stun:stun.example.com")])
            .with_transport_policy(IceTransportPolicy::Relay);
        assert!(matches!(stun_only.validate(), Err(IceError::InvalidConfig { .. })));

        let with_turn = stun_only.with_servers(vec![IceServerConfig::turn(
            "turn:turn.example.com",
            "user",
            "secret",
        )]);
        assert!(with_turn.validate().is_ok());
    }

    #[test]
    fn server_list_is_shared_between_clones() {
        let config = IceConfig::new().with_servers(vec![IceServerConfig::stun("stun:stun.example.com")]);
        let copy = config.clone();
        assert!(Arc::ptr_eq(&config.servers, &copy.servers));
    }

    #[test]
    fn deserializes_rtc_configuration_shape() {
        let json = r#"{
            "servers": [
                { "urls": ["stun:stun.example.com:19302"] },
                { "urls": ["turn:turn.example.com"], "username": "u", "credential": "c" }
            ],
            "transport_policy": "relay"
        }"#;
        let config: IceConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.transport_policy, IceTransportPolicy::Relay);
        assert_eq!(config.candidate_pool_size, 0);
        assert!(config.validate().is_ok());
    }
}
