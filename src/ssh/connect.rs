// ABOUTME: Upgrades a raw byte stream into an authenticated russh session.
// ABOUTME: Shared by the main client, the jump host hop, and tunnel forwards.

use super::auth::{AuthMethod, Credentials, authenticate};
use super::error::{Error, Result};
use super::handler::{ClientHandler, HostKeyPolicy};
use crate::types::Endpoint;
use russh::Disconnect;
use russh::client::{self, Config, Handle};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Interval between keepalive requests on idle sessions.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Who to authenticate as and how to check the server.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub user: String,
    pub credentials: Option<Credentials>,
    pub host_keys: HostKeyPolicy,
    /// Bound on the SSH handshake plus authentication.
    pub handshake_timeout: Duration,
}

impl AuthConfig {
    pub fn new(user: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            user: user.into(),
            credentials: Some(credentials),
            host_keys: HostKeyPolicy::default(),
            handshake_timeout: crate::proxy::DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn host_keys(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Resolve the configured credentials.
    pub(crate) async fn resolve(&self) -> Result<AuthMethod> {
        match &self.credentials {
            Some(credentials) => credentials.resolve().await,
            None => Err(Error::MissingCredentials),
        }
    }
}

fn russh_config() -> Arc<Config> {
    Arc::new(Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        ..Default::default()
    })
}

/// Run the SSH handshake over `stream` and authenticate.
///
/// The stream is consumed; on any failure the half-built session is
/// disconnected and the stream dropped.
pub(crate) async fn establish<S>(
    auth: &AuthConfig,
    method: &AuthMethod,
    cancel: &CancellationToken,
    stream: S,
    addr: &Endpoint,
) -> Result<Handle<ClientHandler>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let attempt = async {
        let handler = ClientHandler::new(addr.host.clone(), addr.port, auth.host_keys.clone());
        let mut handle = client::connect_stream(russh_config(), stream, handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => Error::HostKeyRejected {
                    addr: addr.to_string(),
                },
                other => Error::Handshake {
                    addr: addr.to_string(),
                    reason: other.to_string(),
                },
            })?;

        match authenticate(&mut handle, &auth.user, method).await {
            Ok(true) => Ok(handle),
            Ok(false) => {
                disconnect(&handle).await;
                Err(Error::AuthenticationFailed {
                    user: auth.user.clone(),
                    addr: addr.to_string(),
                })
            }
            Err(e) => {
                disconnect(&handle).await;
                Err(e)
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(auth.handshake_timeout, attempt) => {
            result.map_err(|_| Error::ConnectTimeout(auth.handshake_timeout))?
        }
    }
}

/// Best-effort disconnect; errors only matter for logging.
pub(crate) async fn disconnect(handle: &Handle<ClientHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!("disconnect failed: {}", e);
    }
}
