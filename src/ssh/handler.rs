// ABOUTME: russh client handler and host key verification policy.
// ABOUTME: Supports accept-any, trust-on-first-use and strict known_hosts checking.

use russh::client;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use serde::Deserialize;
use std::path::PathBuf;

/// How server host keys are verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key without checking. Insecure.
    #[default]
    AcceptAny,
    /// Accept and record unknown hosts; reject changed keys.
    TrustOnFirstUse { known_hosts: Option<PathBuf> },
    /// Only accept hosts already present in known_hosts.
    Strict { known_hosts: Option<PathBuf> },
}

/// Policy name as written in config files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyMode {
    #[default]
    AcceptAny,
    #[serde(alias = "trust-on-first-use")]
    Tofu,
    Strict,
}

impl HostKeyPolicy {
    pub fn from_mode(mode: HostKeyMode, known_hosts: Option<PathBuf>) -> Self {
        match mode {
            HostKeyMode::AcceptAny => HostKeyPolicy::AcceptAny,
            HostKeyMode::Tofu => HostKeyPolicy::TrustOnFirstUse { known_hosts },
            HostKeyMode::Strict => HostKeyPolicy::Strict { known_hosts },
        }
    }
}

/// SSH client handler for russh.
pub(crate) struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub(crate) fn new(host: String, port: u16, policy: HostKeyPolicy) -> Self {
        Self { host, port, policy }
    }

    fn check_known(
        &self,
        key: &ssh_key::PublicKey,
        path: Option<&PathBuf>,
    ) -> Result<bool, russh::keys::Error> {
        match path {
            Some(path) => check_known_hosts_path(&self.host, self.port, key, path),
            None => check_known_hosts(&self.host, self.port, key),
        }
    }

    fn learn(&self, key: &ssh_key::PublicKey, path: Option<&PathBuf>) {
        let learned = match path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        };
        if let Err(e) = learned {
            tracing::warn!("Failed to save host key to known_hosts: {}", e);
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                tracing::debug!(
                    host = %self.host,
                    port = self.port,
                    fingerprint = %server_public_key.fingerprint(ssh_key::HashAlg::Sha256),
                    "accepting host key without verification"
                );
                Ok(true)
            }
            HostKeyPolicy::TrustOnFirstUse { known_hosts } => {
                match self.check_known(server_public_key, known_hosts.as_ref()) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        tracing::warn!(
                            "Trust-On-First-Use: accepting unknown host key for {}:{}",
                            self.host,
                            self.port
                        );
                        self.learn(server_public_key, known_hosts.as_ref());
                        Ok(true)
                    }
                    Err(russh::keys::Error::KeyChanged { line }) => {
                        tracing::error!(
                            host = %self.host,
                            port = self.port,
                            line,
                            "host key changed"
                        );
                        Ok(false)
                    }
                    // Unreadable known_hosts: treat as unknown host
                    Err(_) => Ok(true),
                }
            }
            HostKeyPolicy::Strict { known_hosts } => Ok(matches!(
                self.check_known(server_public_key, known_hosts.as_ref()),
                Ok(true)
            )),
        }
    }
}
