// ABOUTME: SSH client lifecycle using russh: configuration, lazy connect, close.
// ABOUTME: Dials through the proxy dialer, optionally hopping through a jump host.

use super::auth::{AuthMethod, Credentials};
use super::connect::{AuthConfig, disconnect, establish};
use super::error::{Error, Result};
use super::handler::{ClientHandler, HostKeyPolicy};
use super::tunnel::{Tunnel, TunnelSpec};
use crate::proxy::{DEFAULT_DIAL_TIMEOUT, ProxyDialer};
use crate::types::Endpoint;
use russh::Disconnect;
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default file transfer chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// How long `close` waits for an attached tunnel's accept loop to exit.
const TUNNEL_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for an SSH client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22). 0 means "the attached tunnel's bound port".
    pub port: u16,
    /// Username for authentication, also used on the jump host.
    pub user: String,
    /// Credentials; required by the time the client connects.
    pub credentials: Option<Credentials>,
    /// Optional intermediate host reached first.
    pub jump: Option<Endpoint>,
    /// Optional proxy URL (socks5, socks5h, socks, http, https).
    pub proxy: Option<String>,
    /// Request a pseudo-terminal for commands.
    pub pty: bool,
    /// File transfer chunk size in bytes (default: 8192).
    pub chunk_size: usize,
    /// Timeout for dialing and for the SSH handshake (default: 15 seconds).
    pub dial_timeout: Duration,
    /// Optional upper bound for command execution.
    pub command_timeout: Option<Duration>,
    /// Host key verification policy (default: accept any).
    pub host_keys: HostKeyPolicy,
    /// Tunnel started before connecting.
    pub tunnel: Option<TunnelSpec>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            credentials: None,
            jump: None,
            proxy: None,
            pty: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            command_timeout: None,
            host_keys: HostKeyPolicy::default(),
            tunnel: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn password(self, password: impl Into<String>) -> Self {
        self.credentials(Credentials::Password(password.into()))
    }

    pub fn private_key(self, pem: impl Into<Vec<u8>>) -> Self {
        self.credentials(Credentials::KeyBytes(pem.into()))
    }

    pub fn key_path(self, path: impl Into<PathBuf>) -> Self {
        self.credentials(Credentials::KeyFile(path.into()))
    }

    pub fn jump_host(mut self, jump: Endpoint) -> Self {
        self.jump = Some(jump);
        self
    }

    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    pub fn pty(mut self, enable: bool) -> Self {
        self.pty = enable;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn host_keys(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    pub fn tunnel(mut self, spec: TunnelSpec) -> Self {
        self.tunnel = Some(spec);
        self
    }

    /// Target address as configured (port may still be 0).
    pub fn target(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Authentication settings shared by the target, jump host and tunnel.
    pub fn auth(&self) -> AuthConfig {
        AuthConfig {
            user: self.user.clone(),
            credentials: self.credentials.clone(),
            host_keys: self.host_keys.clone(),
            handshake_timeout: self.dial_timeout,
        }
    }
}

struct RunningTunnel {
    tunnel: Arc<Tunnel>,
    task: JoinHandle<Result<()>>,
}

impl RunningTunnel {
    async fn stop(self) {
        self.tunnel.stop();
        match tokio::time::timeout(TUNNEL_STOP_TIMEOUT, self.task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::debug!("tunnel ended with error: {}", e),
            Ok(Err(e)) => tracing::warn!("tunnel task failed: {}", e),
            Err(_) => tracing::warn!("tunnel did not stop within {:?}", TUNNEL_STOP_TIMEOUT),
        }
    }
}

/// Live transports owned by a connected client.
pub(super) struct Connection {
    pub(super) handle: Arc<Handle<ClientHandler>>,
    /// Kept alive for as long as the target session rides on it.
    jump: Option<Handle<ClientHandler>>,
    pub(super) sftp: Option<Arc<SftpSession>>,
    tunnel: Option<RunningTunnel>,
}

impl Connection {
    async fn shutdown(self) -> Result<()> {
        if let Some(sftp) = self.sftp
            && let Err(e) = sftp.close().await
        {
            tracing::debug!("SFTP close failed: {}", e);
        }

        let result = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol);

        if let Some(jump) = &self.jump {
            disconnect(jump).await;
        }
        if let Some(tunnel) = self.tunnel {
            tunnel.stop().await;
        }
        result
    }
}

pub(super) enum State {
    Unconnected,
    Connected(Connection),
    Closed,
}

/// SSH client that connects on first use.
///
/// One client owns at most one live target transport. After [`Client::close`]
/// every operation fails with [`Error::Closed`].
pub struct Client {
    pub(super) config: ClientConfig,
    dialer: ProxyDialer,
    pub(super) state: Mutex<State>,
    pub(super) span: tracing::Span,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let span = tracing::info_span!("ssh", target = %config.target());
        let dialer = ProxyDialer::new(config.proxy.clone(), config.dial_timeout);
        Self {
            config,
            dialer,
            state: Mutex::new(State::Unconnected),
            span,
        }
    }

    /// Log under `span` instead of the default per-target span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect if not already connected.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        self.handle(cancel).await.map(|_| ())
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, State::Connected(_))
    }

    pub async fn is_closed(&self) -> bool {
        matches!(*self.state.lock().await, State::Closed)
    }

    /// Local endpoint of the attached tunnel once it is listening.
    pub async fn tunnel_endpoint(&self) -> Option<Endpoint> {
        match &*self.state.lock().await {
            State::Connected(Connection {
                tunnel: Some(running),
                ..
            }) => running.tunnel.bound_endpoint().cloned(),
            _ => None,
        }
    }

    /// Session handle, connecting first if needed.
    pub(super) async fn handle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<Handle<ClientHandler>>> {
        let mut state = self.state.lock().await;
        match &*state {
            State::Closed => return Err(Error::Closed),
            State::Connected(conn) => return Ok(Arc::clone(&conn.handle)),
            State::Unconnected => {}
        }

        let conn = self.establish_connection(cancel).await?;
        let handle = Arc::clone(&conn.handle);
        *state = State::Connected(conn);
        Ok(handle)
    }

    #[tracing::instrument(name = "connect", parent = &self.span, skip_all)]
    async fn establish_connection(&self, cancel: &CancellationToken) -> Result<Connection> {
        let auth = self.config.auth();
        let method = auth.resolve().await?;

        let mut target = self.config.target();
        let mut tunnel = None;
        if let Some(spec) = &self.config.tunnel {
            let running = self.start_tunnel(spec.clone(), &auth).await?;
            if target.port == 0 {
                target.port = running.tunnel.local_endpoint().port;
            }
            tunnel = Some(running);
        }

        let connected = match &self.config.jump {
            Some(jump) => self.connect_via_jump(&auth, &method, cancel, jump, &target).await,
            None => self
                .connect_direct(&auth, &method, cancel, &target)
                .await
                .map(|handle| (handle, None)),
        };

        match connected {
            Ok((handle, jump)) => {
                tracing::info!(%target, "connected");
                Ok(Connection {
                    handle: Arc::new(handle),
                    jump,
                    sftp: None,
                    tunnel,
                })
            }
            Err(e) => {
                if let Some(running) = tunnel {
                    running.stop().await;
                }
                Err(e)
            }
        }
    }

    async fn start_tunnel(&self, spec: TunnelSpec, auth: &AuthConfig) -> Result<RunningTunnel> {
        let tunnel = Arc::new(
            Tunnel::new(spec, auth.clone())
                .with_dialer(ProxyDialer::direct(self.config.dial_timeout))
                .with_span(self.span.clone()),
        );
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn({
            let tunnel = Arc::clone(&tunnel);
            async move { tunnel.start(ready_tx).await }
        });

        match ready_rx.await {
            Ok(bound) => {
                tracing::debug!(%bound, "tunnel ready");
                Ok(RunningTunnel { tunnel, task })
            }
            // The sender is only dropped unsent when start failed.
            Err(_) => match task.await {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(Error::Io(std::io::Error::other(
                    "tunnel stopped before it was ready",
                ))),
                Err(e) => Err(Error::Io(std::io::Error::other(e))),
            },
        }
    }

    async fn connect_direct(
        &self,
        auth: &AuthConfig,
        method: &AuthMethod,
        cancel: &CancellationToken,
        target: &Endpoint,
    ) -> Result<Handle<ClientHandler>> {
        let stream = self.dialer.dial(cancel, target).await?;
        establish(auth, method, cancel, stream, target).await
    }

    async fn connect_via_jump(
        &self,
        auth: &AuthConfig,
        method: &AuthMethod,
        cancel: &CancellationToken,
        jump: &Endpoint,
        target: &Endpoint,
    ) -> Result<(Handle<ClientHandler>, Option<Handle<ClientHandler>>)> {
        tracing::info!(%jump, %target, "connecting via jump host");

        let raw = self.dialer.dial(cancel, jump).await?;
        let jump_handle = establish(auth, method, cancel, raw, jump).await?;

        let channel = match jump_handle
            .channel_open_direct_tcpip(target.host.clone(), u32::from(target.port), "127.0.0.1", 0)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                disconnect(&jump_handle).await;
                return Err(Error::JumpFailed {
                    jump: jump.to_string(),
                    target: target.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        match establish(auth, method, cancel, channel.into_stream(), target).await {
            Ok(handle) => Ok((handle, Some(jump_handle))),
            Err(e) => {
                disconnect(&jump_handle).await;
                Err(e)
            }
        }
    }

    /// Close the session, the jump host, the SFTP sub-client and any tunnel.
    ///
    /// Idempotent. The client is unusable afterwards.
    pub async fn close(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, State::Closed)
        };
        match previous {
            State::Connected(conn) => conn.shutdown().await,
            State::Unconnected | State::Closed => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new("example.com", "deploy");
        assert_eq!(config.port, 22);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert!(config.credentials.is_none());
        assert_eq!(config.host_keys, HostKeyPolicy::AcceptAny);
    }

    #[test]
    fn last_credential_wins() {
        let config = ClientConfig::new("h", "u")
            .password("pw")
            .key_path("/tmp/key");
        assert_eq!(
            config.credentials,
            Some(Credentials::KeyFile(PathBuf::from("/tmp/key")))
        );
    }

    #[tokio::test]
    async fn connect_without_credentials_is_configuration_error() {
        let client = Client::new(ClientConfig::new("127.0.0.1", "u").port(1));
        let err = client.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials), "got {err:?}");
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn closed_client_rejects_connect() {
        let client = Client::new(ClientConfig::new("127.0.0.1", "u").password("pw"));
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed().await);

        let err = client.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Closed), "got {err:?}");
    }
}
