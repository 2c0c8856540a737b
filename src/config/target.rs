// ABOUTME: SSH target configuration.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@host:[::1]:port".

use crate::types::Endpoint;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
}

fn default_port() -> u16 {
    22
}

impl TargetConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("target address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user, rest) = match s.rsplit_once('@') {
            Some((user, rest)) => {
                if user.is_empty() {
                    return Err("username cannot be empty".to_string());
                }
                (Some(user), rest)
            }
            None => (None, s),
        };

        let endpoint = Endpoint::parse_with_default(rest, default_port()).map_err(|e| e.to_string())?;

        Ok(TargetConfig {
            host: endpoint.host,
            port: endpoint.port,
            user: user.map(str::to_string),
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetEntry {
    Simple(String),
    Detailed(TargetConfig),
}

/// Accept either `user@host:port` or a `{host, port, user}` map.
pub(super) fn deserialize_target<'de, D>(deserializer: D) -> Result<TargetConfig, D::Error>
where
    D: Deserializer<'de>,
{
    match TargetEntry::deserialize(deserializer)? {
        TargetEntry::Simple(s) => TargetConfig::parse(&s).map_err(serde::de::Error::custom),
        TargetEntry::Detailed(target) => Ok(target),
    }
}

/// `host[:port]` with port 22 when omitted.
pub(super) fn deserialize_ssh_endpoint<'de, D>(deserializer: D) -> Result<Option<Endpoint>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    value
        .map(|s| Endpoint::parse_with_default(&s, default_port()).map_err(serde::de::Error::custom))
        .transpose()
}
