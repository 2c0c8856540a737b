// ABOUTME: In-process fake servers for proxy and tunnel tests.
// ABOUTME: A greeting echo server, a SOCKS5 proxy and an HTTP CONNECT proxy.

use parking_lot::Mutex;
use sshlink::types::Endpoint;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Sent by the echo server as soon as a client connects.
pub const GREETING: &[u8] = b"SSH-2.0-fake_echo\r\n";

async fn bind() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Endpoint::localhost(port))
}

/// Writes [`GREETING`], then echoes everything back until EOF.
pub async fn echo_server() -> Endpoint {
    let (listener, endpoint) = bind().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if stream.write_all(GREETING).await.is_err() {
                    return;
                }
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    endpoint
}

/// A port nothing listens on.
pub async fn closed_port() -> Endpoint {
    let (listener, endpoint) = bind().await;
    drop(listener);
    endpoint
}

/// What a fake proxy saw.
#[derive(Debug, Default, Clone)]
pub struct ProxyLog {
    /// `host:port` targets requested, in order.
    pub targets: Vec<String>,
    /// SOCKS5 username/password pairs.
    pub credentials: Vec<(String, String)>,
    /// Raw HTTP request heads.
    pub requests: Vec<String>,
    /// Rejected HTTP connections the client closed afterwards.
    pub closed_after_reject: usize,
}

pub struct FakeProxy {
    pub endpoint: Endpoint,
    pub log: Arc<Mutex<ProxyLog>>,
}

/// SOCKS5 proxy. Requires username/password auth when `require_auth` is set.
pub async fn socks5_proxy(require_auth: bool) -> FakeProxy {
    let (listener, endpoint) = bind().await;
    let log = Arc::new(Mutex::new(ProxyLog::default()));
    let shared = Arc::clone(&log);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = Arc::clone(&shared);
            tokio::spawn(async move {
                let _ = serve_socks5(stream, require_auth, log).await;
            });
        }
    });
    FakeProxy { endpoint, log }
}

async fn serve_socks5(
    mut client: TcpStream,
    require_auth: bool,
    log: Arc<Mutex<ProxyLog>>,
) -> std::io::Result<()> {
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    client.read_exact(&mut methods).await?;

    if require_auth {
        if !methods.contains(&2) {
            client.write_all(&[5, 0xff]).await?;
            return Ok(());
        }
        client.write_all(&[5, 2]).await?;
        let mut version_and_len = [0u8; 2];
        client.read_exact(&mut version_and_len).await?;
        let mut user = vec![0u8; version_and_len[1] as usize];
        client.read_exact(&mut user).await?;
        let mut pass_len = [0u8; 1];
        client.read_exact(&mut pass_len).await?;
        let mut pass = vec![0u8; pass_len[0] as usize];
        client.read_exact(&mut pass).await?;
        log.lock().credentials.push((
            String::from_utf8_lossy(&user).into_owned(),
            String::from_utf8_lossy(&pass).into_owned(),
        ));
        client.write_all(&[1, 0]).await?;
    } else {
        client.write_all(&[5, 0]).await?;
    }

    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    let host = match request[3] {
        1 => {
            let mut ip = [0u8; 4];
            client.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        3 => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            client.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        4 => {
            let mut ip = [0u8; 16];
            client.read_exact(&mut ip).await?;
            std::net::Ipv6Addr::from(ip).to_string()
        }
        _ => return Ok(()),
    };
    let port = client.read_u16().await?;
    log.lock().targets.push(Endpoint::new(host.clone(), port).to_string());

    match TcpStream::connect((host.as_str(), port)).await {
        Ok(mut upstream) => {
            client.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
            tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        }
        Err(_) => {
            // connection refused
            client.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
        }
    }
    Ok(())
}

/// HTTP CONNECT proxy answering every request with `status`.
///
/// Only a 200 is followed by a connection to the requested target.
pub async fn http_proxy(status: u16) -> FakeProxy {
    let (listener, endpoint) = bind().await;
    let log = Arc::new(Mutex::new(ProxyLog::default()));
    let shared = Arc::clone(&log);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = Arc::clone(&shared);
            tokio::spawn(async move {
                let _ = serve_http_connect(stream, status, log).await;
            });
        }
    });
    FakeProxy { endpoint, log }
}

async fn serve_http_connect(
    mut client: TcpStream,
    status: u16,
    log: Arc<Mutex<ProxyLog>>,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if client.read(&mut byte).await? == 0 {
            return Ok(());
        }
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let target = head
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    {
        let mut log = log.lock();
        log.targets.push(target.clone());
        log.requests.push(head);
    }

    if status != 200 {
        client
            .write_all(format!("HTTP/1.1 {} Nope\r\nContent-Length: 0\r\n\r\n", status).as_bytes())
            .await?;
        // Keep the socket open so only the client can close it.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await?;
        log.lock().closed_after_reject += 1;
        return Ok(());
    }

    let endpoint: Endpoint = target
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut upstream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    client
        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
        .await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}
