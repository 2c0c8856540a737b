// ABOUTME: Remote command execution over session channels.
// ABOUTME: Buffered and streaming output, optional PTY, kill on cancel or timeout.

use super::client::Client;
use super::error::{Error, Result};
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty, Sig};
use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PTY_TERM: &str = "xterm";
const PTY_COLS: u32 = 80;
const PTY_ROWS: u32 = 40;
const PTY_BAUD: u32 = 14400;
const PTY_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, PTY_BAUD),
    (Pty::TTY_OP_OSPEED, PTY_BAUD),
];

/// Chunks buffered per output stream before the channel reader waits on the sink.
const OUTPUT_QUEUE: usize = 64;

/// Result of a completed remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Remote exit code, or [`CommandResult::NO_EXIT_STATUS`] if the process
    /// was killed by a signal.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Signal name (e.g. `KILL`) if the process ended by signal.
    pub signal: Option<String>,
}

impl CommandResult {
    pub const NO_EXIT_STATUS: i32 = -1;

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

struct Exit {
    code: i32,
    signal: Option<String>,
}

enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

impl Client {
    /// Run a command and collect its output.
    ///
    /// A non-zero exit code is a successful `Ok` result; only transport,
    /// protocol, timeout and cancellation failures are errors.
    pub async fn run(&self, cancel: &CancellationToken, command: &str) -> Result<CommandResult> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = self.execute(cancel, command, &mut stdout, &mut stderr).await?;
        Ok(CommandResult {
            exit_code: exit.code,
            stdout,
            stderr,
            signal: exit.signal,
        })
    }

    /// Run a command, copying stdout and stderr into the sinks as it runs.
    ///
    /// Both sinks are fully written and flushed before this returns the
    /// remote exit code.
    pub async fn run_streaming<O, E>(
        &self,
        cancel: &CancellationToken,
        command: &str,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<i32>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let exit = self.execute(cancel, command, stdout, stderr).await?;
        Ok(exit.code)
    }

    #[tracing::instrument(name = "exec", parent = &self.span, skip_all)]
    async fn execute<O, E>(
        &self,
        cancel: &CancellationToken,
        command: &str,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<Exit>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let handle = self.handle(cancel).await?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;

        tracing::debug!(command, pty = self.config.pty, "executing");

        let pty = self.config.pty;
        let work = async {
            if pty {
                request_pty(&mut channel).await?;
            }
            channel
                .exec(true, command)
                .await
                .map_err(|e| Error::CommandFailed(format!("failed to exec command: {}", e)))?;
            collect(&mut channel, stdout, stderr).await
        };

        let limit = self.config.command_timeout;
        let deadline = async move {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let interrupt = tokio::select! {
            biased;
            _ = cancel.cancelled() => Interrupt::Cancelled,
            limit = deadline => Interrupt::TimedOut(limit),
            result = work => return result,
        };

        // Best effort: the channel is closed whether or not the kill lands.
        if let Err(e) = channel.signal(Sig::KILL).await {
            tracing::debug!("failed to signal remote process: {}", e);
        }
        if let Err(e) = channel.close().await {
            tracing::debug!("failed to close channel: {}", e);
        }

        match interrupt {
            Interrupt::Cancelled => Err(Error::Cancelled),
            Interrupt::TimedOut(limit) => Err(Error::CommandTimeout(limit)),
        }
    }
}

async fn request_pty(channel: &mut Channel<Msg>) -> Result<()> {
    channel
        .request_pty(true, PTY_TERM, PTY_COLS, PTY_ROWS, 0, 0, PTY_MODES)
        .await
        .map_err(|e| Error::PtyRefused(e.to_string()))?;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(Error::PtyRefused("server refused the request".to_string()));
            }
            Some(_) => {}
            None => return Err(Error::ChannelClosed),
        }
    }
}

/// Read the channel to completion while both sinks drain concurrently.
async fn collect<O, E>(channel: &mut Channel<Msg>, stdout: &mut O, stderr: &mut E) -> Result<Exit>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    let (out_tx, out_rx) = mpsc::channel(OUTPUT_QUEUE);
    let (err_tx, err_rx) = mpsc::channel(OUTPUT_QUEUE);

    let (exit, out, err) = tokio::join!(
        read_channel(channel, out_tx, err_tx),
        drain(out_rx, stdout),
        drain(err_rx, stderr),
    );

    let exit = exit?;
    out?;
    err?;
    Ok(exit)
}

async fn read_channel(
    channel: &mut Channel<Msg>,
    stdout: mpsc::Sender<Vec<u8>>,
    stderr: mpsc::Sender<Vec<u8>>,
) -> Result<Exit> {
    let mut exit_code = None;
    let mut signal = None;
    let mut got_eof = false;

    loop {
        match channel.wait().await {
            // A failed send means that sink already errored; the error is
            // reported once the channel is drained.
            Some(ChannelMsg::Data { data }) => {
                let _ = stdout.send(data.to_vec()).await;
            }
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                let _ = stderr.send(data.to_vec()).await;
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(i32::try_from(exit_status).unwrap_or(i32::MAX));
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                signal = Some(signal_label(&signal_name));
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::Eof) => {
                got_eof = true;
                if exit_code.is_some() || signal.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    match (exit_code, signal) {
        (Some(code), signal) => Ok(Exit { code, signal }),
        (None, Some(signal)) => Ok(Exit {
            code: CommandResult::NO_EXIT_STATUS,
            signal: Some(signal),
        }),
        (None, None) => Err(Error::ChannelClosed),
    }
}

async fn drain<W>(mut chunks: mpsc::Receiver<Vec<u8>>, sink: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(chunk) = chunks.recv().await {
        sink.write_all(&chunk).await?;
    }
    sink.flush().await?;
    Ok(())
}

fn signal_label(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}
