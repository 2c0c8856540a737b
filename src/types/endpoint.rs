// ABOUTME: Host and port value object used for SSH targets and tunnel ends.
// ABOUTME: Parses "host:port" and "[v6]:port", formats back the same way.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint cannot be empty")]
    Empty,

    #[error("endpoint is missing a port: {0}")]
    MissingPort(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("endpoint host cannot be empty")]
    EmptyHost,

    #[error("unterminated IPv6 literal: {0}")]
    UnterminatedBracket(String),
}

/// A `host:port` pair.
///
/// Port 0 asks the OS for an ephemeral port and only makes sense for a
/// listener (the local end of a tunnel).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback endpoint on the given port.
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    /// Parse `host[:port]`, falling back to `default_port` when no port is given.
    pub fn parse_with_default(s: &str, default_port: u16) -> Result<Self, EndpointError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }
        if has_port(s) {
            s.parse()
        } else {
            let host = s.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(EndpointError::EmptyHost);
            }
            Ok(Self::new(host, default_port))
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.port == 0
    }

    /// Same host with a different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.host.clone(), port)
    }
}

fn has_port(s: &str) -> bool {
    if let Some(rest) = s.strip_prefix('[') {
        return rest.contains("]:");
    }
    // A bare IPv6 literal has several colons and no port.
    s.matches(':').count() == 1
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (host, port_str) = if let Some(rest) = s.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| EndpointError::UnterminatedBracket(s.to_string()))?;
            let port_str = rest[close + 1..]
                .strip_prefix(':')
                .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
            (&rest[..close], port_str)
        } else {
            let colon = s
                .rfind(':')
                .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
            (&s[..colon], &s[colon + 1..])
        };

        if host.is_empty() {
            return Err(EndpointError::EmptyHost);
        }

        let port = port_str
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(port_str.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
