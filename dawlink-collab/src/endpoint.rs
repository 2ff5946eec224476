//! Shareable endpoint tokens.
//!
//! A token is base64 over bincode of the host's connectable address, a
//! string a user can paste into a chat. How the host obtained a
//! reachable address (port forward, relay, NAT traversal) is outside
//! this crate; the token only carries the result.

use std::net::{IpAddr, SocketAddr};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A connectable host endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub ip: IpAddr,
    pub port: u16,
}

impl EndpointDescriptor {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for EndpointDescriptor {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

/// Token errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenError {
    Malformed(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Malformed(e) => write!(f, "malformed endpoint token: {e}"),
        }
    }
}

impl std::error::Error for TokenError {}

pub fn encode_token(endpoint: &EndpointDescriptor) -> Result<String, TokenError> {
    let bytes = bincode::serde::encode_to_vec(endpoint, bincode::config::standard())
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

pub fn decode_token(token: &str) -> Result<EndpointDescriptor, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    let (endpoint, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let endpoint = EndpointDescriptor {
            ip: "203.0.113.7".parse().unwrap(),
            port: 43210,
        };
        let token = encode_token(&endpoint).unwrap();
        assert_eq!(decode_token(&token).unwrap(), endpoint);
    }

    #[test]
    fn test_token_roundtrip_ipv6() {
        let endpoint = EndpointDescriptor {
            ip: "2001:db8::1".parse().unwrap(),
            port: 9,
        };
        let token = encode_token(&endpoint).unwrap();
        assert_eq!(decode_token(&token).unwrap(), endpoint);
    }

    #[test]
    fn test_token_tolerates_whitespace() {
        let endpoint = EndpointDescriptor {
            ip: "127.0.0.1".parse().unwrap(),
            port: 7000,
        };
        let token = format!("  {}\n", encode_token(&endpoint).unwrap());
        assert_eq!(decode_token(&token).unwrap(), endpoint);
    }

    #[test]
    fn test_malformed_token_rejected() {
        assert!(decode_token("not base64 !!!").is_err());
        assert!(decode_token("aGVsbG8").is_err()); // valid base64, wrong body
    }
}
