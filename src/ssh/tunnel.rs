// ABOUTME: Local TCP port forwarding through an SSH relay host.
// ABOUTME: Each accepted connection gets its own relay session and direct-tcpip channel.

use super::auth::AuthMethod;
use super::connect::{AuthConfig, disconnect, establish};
use super::error::{Error, Result};
use crate::proxy::ProxyDialer;
use crate::types::Endpoint;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Where a tunnel listens, which host relays, and what it reaches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TunnelSpec {
    /// Local listen address. Port 0 picks an ephemeral port.
    pub local: Endpoint,
    /// SSH server each forwarded connection authenticates to.
    pub relay: Endpoint,
    /// Address the relay connects to on our behalf.
    pub remote: Endpoint,
}

/// Local port-forwarding tunnel.
///
/// `start` runs the accept loop until `stop` is called; forwarded
/// connections run independently and a failing one never affects the
/// listener or other connections.
pub struct Tunnel {
    spec: TunnelSpec,
    auth: AuthConfig,
    dialer: ProxyDialer,
    bound: OnceLock<Endpoint>,
    started: AtomicBool,
    shutdown: CancellationToken,
    abandon: CancellationToken,
    relays: TaskTracker,
    span: tracing::Span,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("spec", &self.spec)
            .field("bound", &self.bound.get())
            .field("active", &self.relays.len())
            .finish()
    }
}

/// Everything a forwarded connection needs, cloned into its task.
#[derive(Clone)]
struct Forwarder {
    dialer: ProxyDialer,
    auth: AuthConfig,
    method: Arc<AuthMethod>,
    relay: Endpoint,
    remote: Endpoint,
    abandon: CancellationToken,
}

impl Tunnel {
    pub fn new(spec: TunnelSpec, auth: AuthConfig) -> Self {
        let span = tracing::info_span!("tunnel", local = %spec.local, remote = %spec.remote);
        Self {
            dialer: ProxyDialer::direct(auth.handshake_timeout),
            spec,
            auth,
            bound: OnceLock::new(),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            abandon: CancellationToken::new(),
            relays: TaskTracker::new(),
            span,
        }
    }

    /// Dialer used to reach the relay host (direct by default).
    pub fn with_dialer(mut self, dialer: ProxyDialer) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn spec(&self) -> &TunnelSpec {
        &self.spec
    }

    /// Listen address, with the real port once the listener is bound.
    pub fn local_endpoint(&self) -> Endpoint {
        self.bound
            .get()
            .cloned()
            .unwrap_or_else(|| self.spec.local.clone())
    }

    /// Bound listen address, `None` until the listener is up.
    pub fn bound_endpoint(&self) -> Option<&Endpoint> {
        self.bound.get()
    }

    /// Number of forwarded connections still relaying.
    pub fn active_forwards(&self) -> usize {
        self.relays.len()
    }

    /// Bind, send the bound endpoint on `ready`, then accept until stopped.
    ///
    /// Credentials are resolved before binding so a bad key fails here
    /// rather than on the first forwarded connection. A failure before the
    /// listener is up leaves the tunnel startable again. Returns `Ok` once
    /// stopped, or the listener's error.
    #[tracing::instrument(name = "listen", parent = &self.span, skip_all)]
    pub async fn start(&self, ready: oneshot::Sender<Endpoint>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::TunnelAlreadyStarted);
        }

        let (method, listener, bound) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        tracing::info!(local = %bound, relay = %self.spec.relay, remote = %self.spec.remote, "tunnel listening");
        if ready.send(bound).is_err() {
            tracing::debug!("readiness receiver dropped");
        }

        let forwarder = Forwarder {
            dialer: self.dialer.clone(),
            auth: self.auth.clone(),
            method,
            relay: self.spec.relay.clone(),
            remote: self.spec.remote.clone(),
            abandon: self.abandon.clone(),
        };

        let result = loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let forwarder = forwarder.clone();
                    let span = tracing::debug_span!(parent: &self.span, "forward", %peer);
                    self.relays.spawn(
                        async move {
                            if let Err(e) = forwarder.forward(stream, peer).await {
                                tracing::warn!("forward dropped: {}", e);
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    tracing::warn!("accept failed on tunnel listener: {}", e);
                    break Err(Error::Io(e));
                }
            }
        };

        drop(listener);
        self.relays.close();
        tracing::debug!(active = self.relays.len(), "tunnel listener closed");
        result
    }

    async fn prepare(&self) -> Result<(Arc<AuthMethod>, TcpListener, Endpoint)> {
        let method = Arc::new(self.auth.resolve().await?);

        let local = &self.spec.local;
        let listener = TcpListener::bind((local.host.as_str(), local.port))
            .await
            .map_err(|e| Error::TunnelBind {
                addr: local.to_string(),
                source: e,
            })?;
        let addr = listener.local_addr().map_err(|e| Error::TunnelBind {
            addr: local.to_string(),
            source: e,
        })?;
        let bound = self.bound.get_or_init(|| local.with_port(addr.port())).clone();
        Ok((method, listener, bound))
    }

    /// Stop accepting. Idempotent; safe before `start`.
    ///
    /// Connections already relaying keep going until their peers close.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop, then wait up to `grace` for active forwards to finish.
    ///
    /// Forwards still running after `grace` are torn down. Returns whether
    /// everything drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        self.relays.close();
        if tokio::time::timeout(grace, self.relays.wait()).await.is_ok() {
            return true;
        }
        tracing::warn!(
            parent: &self.span,
            active = self.relays.len(),
            "abandoning forwards after {:?}",
            grace
        );
        self.abandon.cancel();
        false
    }
}

impl Forwarder {
    async fn forward(&self, mut local: TcpStream, peer: SocketAddr) -> Result<()> {
        let raw = self.dialer.dial(&self.abandon, &self.relay).await?;
        let session = establish(&self.auth, &self.method, &self.abandon, raw, &self.relay).await?;

        let channel = match session
            .channel_open_direct_tcpip(
                self.remote.host.clone(),
                u32::from(self.remote.port),
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                disconnect(&session).await;
                return Err(Error::Forward {
                    remote: self.remote.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        tracing::debug!(remote = %self.remote, "forwarding");
        let mut remote = channel.into_stream();
        let relayed = tokio::select! {
            biased;
            _ = self.abandon.cancelled() => Ok((0, 0)),
            relayed = tokio::io::copy_bidirectional(&mut local, &mut remote) => relayed,
        };
        drop(remote);
        disconnect(&session).await;

        match relayed {
            Ok((sent, received)) => {
                tracing::debug!(sent, received, "forward finished");
                Ok(())
            }
            Err(e) => Err(Error::Forward {
                remote: self.remote.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
