// ABOUTME: Proxy dialing error types.
// ABOUTME: Separates configuration mistakes from unreachable proxies and refusals.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid proxy URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy {proxy} failed to reach {target}: {reason}")]
    Proxy {
        proxy: String,
        target: String,
        reason: String,
    },

    #[error("proxy {proxy} refused CONNECT to {target}: {status_line}")]
    Rejected {
        proxy: String,
        target: String,
        status: Option<u16>,
        status_line: String,
    },

    #[error("dial to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("dial cancelled")]
    Cancelled,
}

impl Error {
    /// True for errors caused by the proxy configuration rather than the network.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::InvalidUrl { .. } | Error::UnsupportedScheme(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
