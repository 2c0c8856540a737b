// ABOUTME: Tunnel command implementation.
// ABOUTME: Runs a local port forward until interrupted, then drains active connections.

use sshlink::config::Config;
use sshlink::error::{Error, Result};
use sshlink::output::Output;
use sshlink::proxy::ProxyDialer;
use sshlink::ssh::{self, Tunnel, TunnelSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// How long active forwards get to finish after Ctrl-C.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

pub async fn tunnel(
    config: &Config,
    spec: Option<TunnelSpec>,
    cancel: &CancellationToken,
    output: Output,
) -> Result<()> {
    let spec = spec.or_else(|| config.tunnel.clone()).ok_or_else(|| {
        Error::InvalidConfig(
            "no tunnel configured: set `tunnel` in the config or pass --local, --relay and --remote"
                .to_string(),
        )
    })?;
    let client_config = config.client_config()?;

    let tunnel = Arc::new(
        Tunnel::new(spec, client_config.auth())
            .with_dialer(ProxyDialer::direct(client_config.dial_timeout)),
    );
    let (ready_tx, ready_rx) = oneshot::channel();
    let mut task = tokio::spawn({
        let tunnel = Arc::clone(&tunnel);
        async move { tunnel.start(ready_tx).await }
    });

    let bound = match ready_rx.await {
        Ok(bound) => bound,
        Err(_) => return Err(join_error(task.await)),
    };
    let spec = tunnel.spec();
    output.success(&format!(
        "Forwarding {} → {} via {}",
        bound, spec.remote, spec.relay
    ));

    tokio::select! {
        _ = cancel.cancelled() => {}
        finished = &mut task => return finished_early(finished),
    }

    output.progress("→ Stopping tunnel...");
    if !tunnel.shutdown(DRAIN_GRACE).await {
        output.warning(&format!(
            "closed forwards still active after {:?}",
            DRAIN_GRACE
        ));
    }
    match task.await {
        Ok(result) => result.map_err(Error::from),
        Err(e) => Err(Error::Io(std::io::Error::other(e))),
    }
}

fn finished_early(
    finished: std::result::Result<ssh::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match finished {
        Ok(result) => result.map_err(Error::from),
        Err(e) => Err(Error::Io(std::io::Error::other(e))),
    }
}

fn join_error(joined: std::result::Result<ssh::Result<()>, tokio::task::JoinError>) -> Error {
    match joined {
        Ok(Err(e)) => Error::from(e),
        Ok(Ok(())) => Error::Io(std::io::Error::other("tunnel stopped before it was ready")),
        Err(e) => Error::Io(std::io::Error::other(e)),
    }
}
