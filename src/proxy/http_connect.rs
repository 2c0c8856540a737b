// ABOUTME: HTTP CONNECT handshake over an already-open proxy connection.
// ABOUTME: Reads the response byte-wise so no tunneled bytes are swallowed.

use super::ProxyAuth;
use crate::types::Endpoint;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the proxy's response header block, status line included.
const MAX_RESPONSE_HEADER: usize = 8 * 1024;

/// Outcome of a CONNECT request that the proxy answered.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConnectReply {
    Established,
    Refused {
        status: Option<u16>,
        status_line: String,
    },
}

pub(crate) fn build_request(target: &Endpoint, auth: Option<&ProxyAuth>) -> String {
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(auth) = auth {
        let credentials = format!("{}:{}", auth.username, auth.password);
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            STANDARD.encode(credentials)
        ));
    }
    request.push_str("\r\n");
    request
}

/// Send CONNECT and read the proxy's answer.
///
/// A non-200 status line is answered as soon as it arrives, even if the
/// proxy hangs up before the header block ends. On `Established` the
/// stream is positioned right after the response header, so whatever the
/// target sends next is read by the caller.
pub(crate) async fn handshake<S>(
    stream: &mut S,
    target: &Endpoint,
    auth: Option<&ProxyAuth>,
) -> io::Result<ConnectReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(build_request(target, auth).as_bytes())
        .await?;
    stream.flush().await?;

    let mut budget = MAX_RESPONSE_HEADER;
    let status_line = read_header_line(stream, &mut budget).await?;
    let status = parse_status(&status_line);
    if status != Some(200) {
        return Ok(ConnectReply::Refused {
            status,
            status_line,
        });
    }

    while !read_header_line(stream, &mut budget).await?.is_empty() {}
    Ok(ConnectReply::Established)
}

/// Read one CRLF-terminated header line, without the terminator.
async fn read_header_line<S>(stream: &mut S, budget: &mut usize) -> io::Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];

    while !line.ends_with(b"\r\n") {
        if *budget == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy response header too large",
            ));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed the connection during CONNECT",
            ));
        }
        *budget -= 1;
        line.push(byte[0]);
    }

    line.truncate(line.len() - 2);
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn parse_status(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
