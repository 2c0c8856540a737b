// ABOUTME: SFTP file upload and download with chunked copy and progress reporting.
// ABOUTME: One lazily opened SFTP sub-client is shared by all transfers on a client.

use super::client::{Client, State};
use super::error::{Error, Result};
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::handler::ClientHandler;

/// Receives `(transferred, total)` after every chunk.
pub trait Progress: Send {
    fn report(&mut self, transferred: u64, total: Option<u64>);
}

impl<F> Progress for F
where
    F: FnMut(u64, Option<u64>) + Send,
{
    fn report(&mut self, transferred: u64, total: Option<u64>) {
        self(transferred, total)
    }
}

/// Writes one `transferred/total` line per report.
#[derive(Debug)]
pub struct ProgressWriter<W> {
    inner: W,
}

impl<W: Write + Send> ProgressWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> Progress for ProgressWriter<W> {
    fn report(&mut self, transferred: u64, total: Option<u64>) {
        let written = match total {
            Some(total) => writeln!(self.inner, "{}/{}", transferred, total),
            None => writeln!(self.inner, "{}/?", transferred),
        };
        if let Err(e) = written {
            tracing::debug!("failed to write progress: {}", e);
        }
    }
}

/// Percentage of `total` transferred. An empty file is always complete.
pub fn percent(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    transferred as f64 * 100.0 / total as f64
}

/// Ancestor directories of a remote file path, shallowest first.
///
/// `/srv/app/bin/tool` yields `/srv`, `/srv/app`, `/srv/app/bin`.
pub fn remote_parent_dirs(remote: &str) -> Vec<String> {
    let Some((parent, _)) = remote.rsplit_once('/') else {
        return Vec::new();
    };
    parent
        .match_indices('/')
        .map(|(i, _)| &parent[..i])
        .chain(std::iter::once(parent))
        .filter(|dir| !dir.is_empty() && !dir.ends_with('/'))
        .map(str::to_string)
        .collect()
}

/// Copy `reader` into `writer` in `chunk_size` pieces.
///
/// Every chunk except the last is full, so a source of `S` bytes produces
/// exactly `ceil(S / chunk_size)` progress reports. The writer is flushed
/// and shut down at the end.
pub(crate) async fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    total: Option<u64>,
    mut progress: Option<&mut dyn Progress>,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut transferred = 0u64;

    loop {
        let filled = fill(reader, &mut buf).await?;
        if filled == 0 {
            break;
        }
        writer.write_all(&buf[..filled]).await?;
        transferred += filled as u64;
        if let Some(progress) = progress.as_mut() {
            progress.report(transferred, total);
        }
        if filled < buf.len() {
            break;
        }
    }

    writer.flush().await?;
    writer.shutdown().await?;
    Ok(transferred)
}

/// Read until `buf` is full or the reader hits EOF.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn open_sftp(handle: &Handle<ClientHandler>) -> Result<SftpSession> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| Error::ChannelOpen(e.to_string()))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| Error::Sftp(format!("subsystem request failed: {}", e)))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| Error::Sftp(e.to_string()))
}

impl Client {
    /// SFTP sub-client, opened on first use and reused afterwards.
    pub(super) async fn sftp(&self, cancel: &CancellationToken) -> Result<Arc<SftpSession>> {
        let handle = self.handle(cancel).await?;

        let mut state = self.state.lock().await;
        let State::Connected(conn) = &mut *state else {
            return Err(Error::Closed);
        };
        if let Some(sftp) = &conn.sftp {
            return Ok(Arc::clone(sftp));
        }

        let sftp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sftp = open_sftp(&handle) => Arc::new(sftp?),
        };
        tracing::debug!("SFTP session opened");
        conn.sftp = Some(Arc::clone(&sftp));
        Ok(sftp)
    }

    /// Upload a local file, creating missing remote parent directories.
    ///
    /// Returns the number of bytes written. The remote file is overwritten
    /// in place; an aborted upload leaves a partial file behind.
    #[tracing::instrument(name = "upload", parent = &self.span, skip_all, fields(remote = %remote))]
    pub async fn upload(
        &self,
        cancel: &CancellationToken,
        local: impl AsRef<Path>,
        remote: &str,
        progress: Option<&mut dyn Progress>,
    ) -> Result<u64> {
        let local = local.as_ref();
        let sftp = self.sftp(cancel).await?;

        let mut source = tokio::fs::File::open(local)
            .await
            .map_err(|e| Error::Transfer {
                path: local.display().to_string(),
                source: e,
            })?;
        let total = source.metadata().await.ok().map(|m| m.len());

        for dir in remote_parent_dirs(remote) {
            if matches!(sftp.try_exists(dir.as_str()).await, Ok(true)) {
                continue;
            }
            // A real failure surfaces from create() below.
            if let Err(e) = sftp.create_dir(dir.as_str()).await {
                tracing::debug!(dir = %dir, "create_dir failed: {}", e);
            }
        }

        let mut target = sftp
            .create(remote)
            .await
            .map_err(|e| Error::Sftp(format!("failed to create {}: {}", remote, e)))?;

        let copied = self
            .copy_cancellable(cancel, &mut source, &mut target, total, progress)
            .await
            .map_err(|e| with_path(e, remote))?;

        tracing::debug!(bytes = copied, "upload complete");
        Ok(copied)
    }

    /// Download a remote file, creating missing local parent directories.
    ///
    /// Returns the number of bytes written.
    #[tracing::instrument(name = "download", parent = &self.span, skip_all, fields(remote = %remote))]
    pub async fn download(
        &self,
        cancel: &CancellationToken,
        remote: &str,
        local: impl AsRef<Path>,
        progress: Option<&mut dyn Progress>,
    ) -> Result<u64> {
        let local = local.as_ref();
        let sftp = self.sftp(cancel).await?;

        let total = match sftp.metadata(remote).await {
            Ok(metadata) => metadata.size,
            Err(e) => {
                tracing::debug!("stat failed, size unknown: {}", e);
                None
            }
        };
        let mut source = sftp
            .open(remote)
            .await
            .map_err(|e| Error::Sftp(format!("failed to open {}: {}", remote, e)))?;

        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Transfer {
                    path: parent.display().to_string(),
                    source: e,
                })?;
        }
        let mut target = tokio::fs::File::create(local)
            .await
            .map_err(|e| Error::Transfer {
                path: local.display().to_string(),
                source: e,
            })?;

        let copied = self
            .copy_cancellable(cancel, &mut source, &mut target, total, progress)
            .await
            .map_err(|e| with_path(e, &local.display().to_string()))?;

        tracing::debug!(bytes = copied, "download complete");
        Ok(copied)
    }

    async fn copy_cancellable<R, W>(
        &self,
        cancel: &CancellationToken,
        reader: &mut R,
        writer: &mut W,
        total: Option<u64>,
        progress: Option<&mut dyn Progress>,
    ) -> std::result::Result<u64, CopyError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CopyError::Cancelled),
            copied = copy_chunked(reader, writer, self.config.chunk_size, total, progress) => {
                copied.map_err(CopyError::Io)
            }
        }
    }
}

enum CopyError {
    Cancelled,
    Io(std::io::Error),
}

fn with_path(err: CopyError, path: &str) -> Error {
    match err {
        CopyError::Cancelled => Error::Cancelled,
        CopyError::Io(source) => Error::Transfer {
            path: path.to_string(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dirs_of_absolute_path() {
        assert_eq!(
            remote_parent_dirs("/srv/app/bin/tool"),
            vec!["/srv", "/srv/app", "/srv/app/bin"]
        );
    }

    #[test]
    fn parent_dirs_of_relative_and_bare_paths() {
        assert_eq!(remote_parent_dirs("uploads/today/a.txt"), vec!["uploads", "uploads/today"]);
        assert!(remote_parent_dirs("a.txt").is_empty());
        assert!(remote_parent_dirs("/a.txt").is_empty());
    }

    #[test]
    fn percent_handles_empty_total() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(50, 200), 25.0);
    }

    #[test]
    fn progress_writer_formats_lines() {
        let mut writer = ProgressWriter::new(Vec::new());
        writer.report(8192, Some(10000));
        writer.report(10000, Some(10000));
        writer.report(3, None);
        assert_eq!(
            String::from_utf8(writer.into_inner()).unwrap(),
            "8192/10000\n10000/10000\n3/?\n"
        );
    }

    #[tokio::test]
    async fn copy_reports_once_per_full_chunk() {
        let data = vec![7u8; 20_000];
        let mut reports = Vec::new();
        let mut record = |done: u64, total: Option<u64>| reports.push((done, total));
        let mut out = Vec::new();

        let copied = copy_chunked(&mut data.as_slice(), &mut out, 8192, Some(20_000), Some(&mut record))
            .await
            .unwrap();

        assert_eq!(copied, 20_000);
        assert_eq!(out, data);
        assert_eq!(
            reports,
            vec![(8192, Some(20_000)), (16384, Some(20_000)), (20_000, Some(20_000))]
        );
    }

    #[tokio::test]
    async fn copy_fills_chunks_from_short_reads() {
        // duplex with a tiny buffer forces many short reads
        let (mut tx, mut rx) = tokio::io::duplex(3);
        let writer = tokio::spawn(async move {
            tx.write_all(&[1u8; 100]).await.unwrap();
        });

        let mut count = 0;
        let mut record = |_: u64, _: Option<u64>| count += 1;
        let mut out = Vec::new();
        let copied = copy_chunked(&mut rx, &mut out, 40, None, Some(&mut record))
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(copied, 100);
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn copy_of_empty_source_reports_nothing() {
        let mut count = 0;
        let mut record = |_: u64, _: Option<u64>| count += 1;
        let mut out = Vec::new();
        let copied = copy_chunked(&mut &b""[..], &mut out, 1, Some(0), Some(&mut record))
            .await
            .unwrap();
        assert_eq!(copied, 0);
        assert_eq!(count, 0);
    }
}
