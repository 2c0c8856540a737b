// ABOUTME: Authentication section of the config file.
// ABOUTME: Exactly one of password, key_file or inline key, with env references.

use super::Secret;
use crate::error::{Error, Result};
use crate::ssh::Credentials;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub password: Option<Secret>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Inline PEM/OpenSSH private key.
    #[serde(default)]
    pub key: Option<Secret>,
}

impl CredentialsConfig {
    pub fn password(value: Secret) -> Self {
        Self {
            password: Some(value),
            ..Default::default()
        }
    }

    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Self {
            key_file: Some(path.into()),
            ..Default::default()
        }
    }

    /// Read the configured secret and build credentials.
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.password, &self.key_file, &self.key) {
            (Some(password), None, None) => Ok(Credentials::Password(password.reveal()?)),
            (None, Some(path), None) => Ok(Credentials::KeyFile(path.clone())),
            (None, None, Some(key)) => Ok(Credentials::KeyBytes(key.reveal()?.into_bytes())),
            (None, None, None) => Err(Error::InvalidConfig(
                "auth requires one of password, key_file or key".to_string(),
            )),
            _ => Err(Error::InvalidConfig(
                "auth accepts only one of password, key_file or key".to_string(),
            )),
        }
    }
}
