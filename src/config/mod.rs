// ABOUTME: Configuration types and parsing for sshlink.yml.
// ABOUTME: Handles YAML parsing, env var references, and conversion to a client config.

mod auth;
mod secret;
mod target;

pub use auth::CredentialsConfig;
pub use secret::Secret;
pub use target::TargetConfig;

use crate::error::{Error, Result};
use crate::proxy::DEFAULT_DIAL_TIMEOUT;
use crate::ssh::{ClientConfig, DEFAULT_CHUNK_SIZE, HostKeyMode, HostKeyPolicy, TunnelSpec, expand_home};
use crate::types::Endpoint;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "sshlink.yml";
pub const CONFIG_FILENAME_ALT: &str = "sshlink.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".sshlink/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "target::deserialize_target")]
    pub target: TargetConfig,

    #[serde(default)]
    pub auth: Option<CredentialsConfig>,

    #[serde(default, deserialize_with = "target::deserialize_ssh_endpoint")]
    pub jump: Option<Endpoint>,

    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub pty: bool,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,

    #[serde(default, with = "humantime_serde")]
    pub command_timeout: Option<Duration>,

    #[serde(default)]
    pub host_keys: HostKeyMode,

    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    #[serde(default)]
    pub tunnel: Option<TunnelSpec>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_dial_timeout() -> Duration {
    DEFAULT_DIAL_TIMEOUT
}

impl Config {
    /// Config with only a target; everything else at its default.
    pub fn new(target: TargetConfig) -> Self {
        Config {
            target,
            auth: None,
            jump: None,
            proxy: None,
            pty: false,
            chunk_size: default_chunk_size(),
            dial_timeout: default_dial_timeout(),
            command_timeout: None,
            host_keys: HostKeyMode::default(),
            known_hosts: None,
            tunnel: None,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Build the client configuration, resolving env references.
    ///
    /// A target without a user falls back to `$USER`.
    pub fn client_config(&self) -> Result<ClientConfig> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".to_string()));
        }

        let user = match &self.target.user {
            Some(user) => user.clone(),
            None => std::env::var("USER").map_err(|_| {
                Error::InvalidConfig("target has no user and $USER is not set".to_string())
            })?,
        };

        let known_hosts = self.known_hosts.as_deref().map(expand_home);
        let mut config = ClientConfig::new(&self.target.host, user)
            .port(self.target.port)
            .pty(self.pty)
            .chunk_size(self.chunk_size)
            .dial_timeout(self.dial_timeout)
            .host_keys(HostKeyPolicy::from_mode(self.host_keys, known_hosts));

        if let Some(auth) = &self.auth {
            config = config.credentials(auth.credentials()?);
        }
        if let Some(jump) = &self.jump {
            config = config.jump_host(jump.clone());
        }
        if let Some(proxy) = &self.proxy {
            config = config.proxy(proxy);
        }
        if let Some(timeout) = self.command_timeout {
            config = config.command_timeout(timeout);
        }
        if let Some(tunnel) = &self.tunnel {
            config = config.tunnel(tunnel.clone());
        }

        Ok(config)
    }
}
