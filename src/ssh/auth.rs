// ABOUTME: Credential sources and their resolution into an SSH auth method.
// ABOUTME: Password, in-memory PEM key material, or a key file on disk.

use super::error::{Error, Result};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key, ssh_key};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::handler::ClientHandler;
use russh::client::Handle;

/// Where the credentials for a session come from.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    /// PEM/OpenSSH encoded private key.
    KeyBytes(Vec<u8>),
    /// Path to a private key file. A leading `~/` is expanded.
    KeyFile(PathBuf),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::KeyBytes(_) => f.write_str("KeyBytes(<redacted>)"),
            Credentials::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// Credentials resolved into something russh can authenticate with.
#[derive(Clone)]
pub(crate) enum AuthMethod {
    Password(String),
    PublicKey(Arc<ssh_key::PrivateKey>),
}

impl AuthMethod {
    fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey(_) => "publickey",
        }
    }
}

impl Credentials {
    /// Load key material (reading the key file if needed) and decode it.
    pub(crate) async fn resolve(&self) -> Result<AuthMethod> {
        match self {
            Credentials::Password(password) => Ok(AuthMethod::Password(password.clone())),
            Credentials::KeyBytes(pem) => {
                let text = std::str::from_utf8(pem)
                    .map_err(|_| Error::InvalidKey("key material is not valid UTF-8".to_string()))?;
                let key = decode_secret_key(text, None)
                    .map_err(|e| Error::InvalidKey(e.to_string()))?;
                Ok(AuthMethod::PublicKey(Arc::new(key)))
            }
            Credentials::KeyFile(path) => {
                let path = expand_home(path);
                let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    Error::KeyLoadFailed {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let key = decode_secret_key(&text, None).map_err(|e| Error::KeyLoadFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                Ok(AuthMethod::PublicKey(Arc::new(key)))
            }
        }
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}

/// Authenticate the session. Returns whether the server accepted.
pub(crate) async fn authenticate(
    session: &mut Handle<ClientHandler>,
    user: &str,
    method: &AuthMethod,
) -> Result<bool> {
    tracing::debug!(user, method = method.name(), "authenticating");
    match method {
        AuthMethod::PublicKey(key) => {
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .map_err(Error::Protocol)?
                .flatten();

            let result = session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg))
                .await
                .map_err(Error::Protocol)?;

            Ok(result.success())
        }
        AuthMethod::Password(password) => {
            let result = session
                .authenticate_password(user, password)
                .await
                .map_err(Error::Protocol)?;

            Ok(result.success())
        }
    }
}
