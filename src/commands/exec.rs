// ABOUTME: Exec command implementation.
// ABOUTME: Streams a remote command's output and returns its exit code.

use sshlink::config::Config;
use sshlink::error::Result;
use sshlink::output::Output;
use sshlink::ssh::{Client, CommandResult};
use tokio_util::sync::CancellationToken;

/// Exit code reported when the remote process died without one, as ssh(1) does.
const SIGNALLED_EXIT_CODE: i32 = 255;

/// Run `command` on the configured target, streaming its output.
pub async fn exec_command(
    config: &Config,
    command: &[String],
    pty: bool,
    cancel: &CancellationToken,
    output: Output,
) -> Result<i32> {
    let client = Client::new(config.client_config()?.pty(pty || config.pty));

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let result = client
        .run_streaming(cancel, &command.join(" "), &mut stdout, &mut stderr)
        .await;

    super::close(&client, &output).await;

    let code = result?;
    if code == CommandResult::NO_EXIT_STATUS {
        output.warning("remote process ended without an exit status");
        return Ok(SIGNALLED_EXIT_CODE);
    }
    Ok(code)
}
