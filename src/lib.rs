// ABOUTME: Library root for sshlink - SSH commands, SFTP transfers and local tunnels.
// ABOUTME: The CLI binary is in main.rs.

pub mod config;
pub mod error;
pub mod output;
pub mod proxy;
pub mod ssh;
pub mod types;
