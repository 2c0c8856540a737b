// ABOUTME: SSH client module: sessions, commands, SFTP transfers and local tunnels.
// ABOUTME: Sessions can be reached directly, through a jump host, or through a proxy.

mod auth;
mod client;
mod connect;
mod error;
mod exec;
mod handler;
mod transfer;
mod tunnel;

pub use auth::{Credentials, expand_home};
pub use client::{Client, ClientConfig, DEFAULT_CHUNK_SIZE};
pub use connect::AuthConfig;
pub use error::{Error, ErrorKind, Result};
pub use exec::CommandResult;
pub use handler::{HostKeyMode, HostKeyPolicy};
pub use transfer::{Progress, ProgressWriter, percent, remote_parent_dirs};
pub use tunnel::{Tunnel, TunnelSpec};
