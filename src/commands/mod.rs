// ABOUTME: Command module aggregator for the sshlink CLI.
// ABOUTME: Re-exports exec, transfer, tunnel and check command handlers.

mod check;
mod exec;
mod transfer;
mod tunnel;

pub use check::check;
pub use exec::exec_command;
pub use transfer::{download, upload};
pub use tunnel::tunnel;

use sshlink::output::Output;
use sshlink::ssh::Client;

/// Close the client; a failed disconnect is only worth a warning.
async fn close(client: &Client, output: &Output) {
    if let Err(e) = client.close().await {
        output.warning(&format!("SSH disconnect failed: {}", e));
    }
}
