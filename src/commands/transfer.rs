// ABOUTME: Upload and download command implementations.
// ABOUTME: Copies one file over SFTP with percentage progress on a terminal.

use sshlink::config::Config;
use sshlink::error::Result;
use sshlink::output::Output;
use sshlink::ssh::Client;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn upload(
    config: &Config,
    local: &Path,
    remote: &str,
    cancel: &CancellationToken,
    mut output: Output,
) -> Result<()> {
    let client = Client::new(config.client_config()?);
    output.progress(&format!("→ Uploading {} to {}", local.display(), remote));
    output.start_timer();

    let mut report = |done: u64, total: Option<u64>| output.transfer_progress(done, total);
    let result = client.upload(cancel, local, remote, Some(&mut report)).await;
    super::close(&client, &output).await;

    let bytes = result?;
    output.success(&format!("✓ Uploaded {} bytes to {}", bytes, remote));
    Ok(())
}

pub async fn download(
    config: &Config,
    remote: &str,
    local: &Path,
    cancel: &CancellationToken,
    mut output: Output,
) -> Result<()> {
    let client = Client::new(config.client_config()?);
    output.progress(&format!("→ Downloading {} to {}", remote, local.display()));
    output.start_timer();

    let mut report = |done: u64, total: Option<u64>| output.transfer_progress(done, total);
    let result = client.download(cancel, remote, local, Some(&mut report)).await;
    super::close(&client, &output).await;

    let bytes = result?;
    output.success(&format!("✓ Downloaded {} bytes to {}", bytes, local.display()));
    Ok(())
}
