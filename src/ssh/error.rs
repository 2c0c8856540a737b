// ABOUTME: SSH-specific error types.
// ABOUTME: Covers configuration, dialing, authentication, channel and transfer failures.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Broad failure class, for callers that decide on retries or exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing settings; retrying will not help.
    Configuration,
    /// Proxy, jump host or target unreachable.
    Dial,
    /// Credentials or host key rejected.
    Authentication,
    /// The server refused a channel, PTY or subsystem, or broke the protocol.
    Protocol,
    /// A file transfer failed mid-way.
    Transfer,
    /// The caller's cancellation token fired.
    Cancelled,
    /// An operation ran out of time.
    Timeout,
    /// The client was closed.
    Closed,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no credentials configured: set a password, private key or key file")]
    MissingCredentials,

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("dial failed: {0}")]
    Dial(#[from] crate::proxy::Error),

    #[error("SSH handshake with {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },

    #[error("host key for {addr} rejected")]
    HostKeyRejected { addr: String },

    #[error("authentication failed for {user}@{addr}")]
    AuthenticationFailed { user: String, addr: String },

    #[error("jump host {jump} could not reach {target}: {reason}")]
    JumpFailed {
        jump: String,
        target: String,
        reason: String,
    },

    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    #[error("PTY allocation refused: {0}")]
    PtyRefused(String),

    #[error("command execution failed: {0}")]
    CommandFailed(String),

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("SFTP error: {0}")]
    Sftp(String),

    #[error("transfer of {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind tunnel listener on {addr}: {source}")]
    TunnelBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tunnel already started")]
    TunnelAlreadyStarted,

    #[error("tunnel forward to {remote} failed: {reason}")]
    Forward { remote: String, reason: String },

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("client closed")]
    Closed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingCredentials | Error::KeyLoadFailed { .. } | Error::InvalidKey(_) => {
                ErrorKind::Configuration
            }
            Error::Dial(e) if e.is_configuration() => ErrorKind::Configuration,
            Error::Dial(crate::proxy::Error::Cancelled) => ErrorKind::Cancelled,
            Error::Dial(crate::proxy::Error::Timeout { .. }) => ErrorKind::Timeout,
            Error::Dial(_)
            | Error::Handshake { .. }
            | Error::JumpFailed { .. }
            | Error::TunnelBind { .. }
            | Error::Forward { .. } => ErrorKind::Dial,
            Error::AuthenticationFailed { .. } | Error::HostKeyRejected { .. } => {
                ErrorKind::Authentication
            }
            Error::ChannelOpen(_)
            | Error::PtyRefused(_)
            | Error::CommandFailed(_)
            | Error::ChannelClosed
            | Error::Sftp(_)
            | Error::TunnelAlreadyStarted
            | Error::Protocol(_)
            | Error::Io(_) => ErrorKind::Protocol,
            Error::Transfer { .. } => ErrorKind::Transfer,
            Error::CommandTimeout(_) | Error::ConnectTimeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Closed => ErrorKind::Closed,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
