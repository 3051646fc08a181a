//! The long-lived transfer session.
//!
//! [`TransferSession`] owns at most one connection. Every operation
//! reconnects first if no connection is held, and a session-level failure
//! drops the connection so the next operation starts fresh. Operations take
//! `&mut self`, so uploads and remote commands on one session never overlap.

use std::io;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use ac_core::TransferConfig;

use crate::error::{ConnectionError, TransferError};
use crate::report::{CommandOutput, TransferReport};
use crate::scp::{AckReader, FileMeta, remote_file_name, sink_command};
use crate::transport::{ChannelMessage, Connection, Connector, RemoteChannel};

/// One authenticated connection to the remote host, re-established on demand.
pub struct TransferSession<C: Connector> {
    connector: C,
    connection: Option<C::Connection>,
    chunk_size: usize,
}

impl<C: Connector> std::fmt::Debug for TransferSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("destination", &self.connector.describe())
            .field("connected", &self.connection.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl<C: Connector> TransferSession<C> {
    /// Creates a disconnected session.
    pub fn new(connector: C, config: &TransferConfig) -> Self {
        Self {
            connector,
            connection: None,
            chunk_size: config.chunk_size.max(1),
        }
    }

    /// `true` while a connection is held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Where this session connects to, for logs.
    #[must_use]
    pub fn destination(&self) -> String {
        self.connector.describe()
    }

    /// Establishes the connection. Does nothing if already connected.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&mut self) -> Result<&mut C::Connection, ConnectionError> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let destination = self.connector.describe();
                tracing::debug!(destination = %destination, "Connecting");
                let connection = self.connector.connect().await?;
                tracing::info!(destination = %destination, "Session established");
                connection
            }
        };
        Ok(self.connection.insert(connection))
    }

    /// Uploads `local` to `remote_path`, overwriting any existing file.
    ///
    /// The local file is checked before the session is touched, so a file
    /// deleted after its event was queued fails with
    /// [`TransferError::LocalFile`] without opening a channel.
    pub async fn send(&mut self, local: &Utf8Path, remote_path: &str) -> Result<TransferReport, TransferError> {
        let mut file = File::open(local)
            .await
            .map_err(|error| TransferError::local_file(local, error))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|error| TransferError::local_file(local, error))?;
        if !metadata.is_file() {
            return Err(TransferError::local_file(
                local,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let meta = FileMeta::from_metadata(&metadata);
        let chunk_size = self.chunk_size;

        let result = match self.connection().await {
            Ok(connection) => upload(connection, &mut file, local, remote_path, meta, chunk_size).await,
            Err(error) => Err(error.into()),
        };
        self.forget_if_lost(result.as_ref().err());
        let elapsed = result?;

        let report = TransferReport {
            local_path: local.to_owned(),
            remote_path: remote_path.to_owned(),
            bytes: meta.size,
            elapsed: elapsed.max(Duration::from_nanos(1)),
        };
        tracing::info!(
            local = %report.local_path,
            remote = %report.remote_path,
            bytes = report.bytes,
            elapsed_ms = report.elapsed.as_millis(),
            "Finished writing at {:.3} MiB/s",
            report.mib_per_second()
        );
        Ok(report)
    }

    /// Runs `command` on the remote host and collects its output.
    pub async fn run_remote_command(&mut self, command: &str) -> Result<CommandOutput, TransferError> {
        self.run_remote_command_with(command, |chunk| {
            tracing::info!(command = command, "{}", chunk.trim_end());
        })
        .await
    }

    /// Runs `command`, handing each stdout chunk to `on_stdout` as it arrives.
    pub async fn run_remote_command_with<F>(
        &mut self,
        command: &str,
        mut on_stdout: F,
    ) -> Result<CommandOutput, TransferError>
    where
        F: FnMut(&str) + Send,
    {
        let result = match self.connection().await {
            Ok(connection) => execute(connection, command, &mut on_stdout).await,
            Err(error) => Err(error.into()),
        };
        self.forget_if_lost(result.as_ref().err());
        let output = result?;
        tracing::debug!(
            command = command,
            exit_status = ?output.exit_status,
            exit_signal = ?output.exit_signal,
            "Remote command finished"
        );
        Ok(output)
    }

    /// Closes the connection. Safe to call repeatedly or when never connected.
    pub async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            match connection.disconnect().await {
                Ok(()) => tracing::info!(destination = %self.connector.describe(), "Disconnected"),
                Err(error) => tracing::warn!(error = %error, "Disconnect failed"),
            }
        }
    }

    fn forget_if_lost(&mut self, error: Option<&TransferError>) {
        let Some(error) = error else { return };
        if error.is_session_lost() && self.connection.take().is_some() {
            tracing::warn!(error = %error, "Session lost, will reconnect on next transfer");
        }
    }
}

async fn upload<K: Connection>(
    connection: &mut K,
    file: &mut File,
    local: &Utf8Path,
    remote_path: &str,
    meta: FileMeta,
    chunk_size: usize,
) -> Result<Duration, TransferError> {
    let started = Instant::now();
    let mut channel = connection.exec(&sink_command(remote_path)).await?;
    let result = stream_file(&mut channel, file, local, remote_path, meta, chunk_size).await;
    let elapsed = started.elapsed();
    if let Err(error) = channel.close().await {
        tracing::trace!(error = %error, "Closing sink channel");
    }
    result.map(|()| elapsed)
}

async fn stream_file<Ch: RemoteChannel>(
    channel: &mut Ch,
    file: &mut File,
    local: &Utf8Path,
    remote_path: &str,
    meta: FileMeta,
    chunk_size: usize,
) -> Result<(), TransferError> {
    let mut acks = AckReader::new(remote_path);
    acks.expect_ack(channel).await?;

    channel.write(meta.times_line().as_bytes()).await?;
    acks.expect_ack(channel).await?;
    channel.write(meta.file_line(remote_file_name(remote_path)).as_bytes()).await?;
    acks.expect_ack(channel).await?;

    let mut buf = vec![0u8; chunk_size];
    let mut remaining = meta.size;
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let read = file
            .read(&mut buf[..want])
            .await
            .map_err(|error| TransferError::local_file(local, error))?;
        if read == 0 {
            return Err(TransferError::local_file(
                local,
                io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank during upload"),
            ));
        }
        channel.write(&buf[..read]).await?;
        remaining -= read as u64;
    }

    channel.write(&[0]).await?;
    acks.expect_ack(channel).await?;
    channel.send_eof().await?;
    acks.finish(channel).await
}

async fn execute<K: Connection, F: FnMut(&str) + Send>(
    connection: &mut K,
    command: &str,
    on_stdout: &mut F,
) -> Result<CommandOutput, TransferError> {
    let mut channel = connection.exec(command).await?;
    channel.send_eof().await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut output = CommandOutput::default();
    while let Some(message) = channel.next_message().await {
        match message {
            ChannelMessage::Stdout(data) => {
                on_stdout(&String::from_utf8_lossy(&data));
                stdout.extend_from_slice(&data);
            }
            ChannelMessage::Stderr(data) => stderr.extend_from_slice(&data),
            ChannelMessage::ExitStatus(code) => output.exit_status = Some(code),
            ChannelMessage::ExitSignal { name, error_message } => {
                output.exit_signal = Some(if error_message.is_empty() {
                    name
                } else {
                    format!("{name}: {error_message}")
                });
            }
            ChannelMessage::Eof => {}
            ChannelMessage::Refused => {
                return Err(TransferError::channel("exec", format!("server refused to run `{command}`")));
            }
        }
    }
    if let Err(error) = channel.close().await {
        tracing::trace!(error = %error, "Closing command channel");
    }

    output.stdout = String::from_utf8_lossy(&stdout).into_owned();
    output.stderr = String::from_utf8_lossy(&stderr).into_owned();
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeRemote;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn session(remote: &FakeRemote, chunk_size: usize) -> TransferSession<crate::fake::FakeConnector> {
        let config = TransferConfig {
            chunk_size,
            ..TransferConfig::default()
        };
        TransferSession::new(remote.connector(), &config)
    }

    #[tokio::test]
    async fn test_send_writes_remote_file() {
        let dir = TempDir::new().unwrap();
        let contents = b"import ev3dev\nprint('hello')\n";
        let local = write_file(&dir, "a.py", contents);
        let remote = FakeRemote::new();
        let mut session = session(&remote, 8);

        let report = session.send(&local, "/home/robot/proj/a.py").await.unwrap();

        assert_eq!(report.bytes, contents.len() as u64);
        assert!(report.elapsed > Duration::ZERO);
        assert!(report.bytes_per_second() > 0.0);
        let file = remote.file("/home/robot/proj/a.py").unwrap();
        assert_eq!(file.contents, contents);
        assert!(file.mtime > 0);
        assert_eq!(
            remote.commands(),
            vec!["scp -t '/home/robot/proj/a.py'".to_owned()]
        );
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_send_elapsed_excludes_connect_time() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.py", b"print('hi')\n");
        let remote = FakeRemote::new();
        remote.set_connect_delay(Duration::from_millis(300));
        let mut session = session(&remote, 1024);

        let report = session.send(&local, "/r/a.py").await.unwrap();

        assert_eq!(remote.connect_count(), 1);
        assert!(report.elapsed < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_send_empty_file() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "empty.py", b"");
        let remote = FakeRemote::new();
        let mut session = session(&remote, 32 * 1024);

        let report = session.send(&local, "/r/empty.py").await.unwrap();

        assert_eq!(report.bytes, 0);
        assert_eq!(remote.file("/r/empty.py").unwrap().contents, b"");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "run.py", b"#!/usr/bin/env python3\n");
        std::fs::set_permissions(&local, std::fs::Permissions::from_mode(0o755)).unwrap();
        let remote = FakeRemote::new();

        session(&remote, 1024).send(&local, "/r/run.py").await.unwrap();

        assert_eq!(remote.file("/r/run.py").unwrap().mode, 0o755);
    }

    #[tokio::test]
    async fn test_missing_local_file_skips_session() {
        let dir = TempDir::new().unwrap();
        let local = Utf8PathBuf::from_path_buf(dir.path().join("gone.py")).unwrap();
        let remote = FakeRemote::new();
        let mut session = session(&remote, 1024);

        let err = session.send(&local, "/r/gone.py").await.unwrap_err();

        assert!(err.is_local());
        assert_eq!(remote.connect_count(), 0);
        assert!(remote.commands().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_upload_keeps_session() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.py", b"x = 1\n");
        let remote = FakeRemote::new();
        remote.reject_path("/ro/a.py");
        let mut session = session(&remote, 1024);

        let err = session.send(&local, "/ro/a.py").await.unwrap_err();
        match &err {
            TransferError::Rejected { remote_path, message } => {
                assert_eq!(remote_path, "/ro/a.py");
                assert!(message.contains("Permission denied"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert!(session.is_connected());

        session.send(&local, "/rw/a.py").await.unwrap();
        assert_eq!(remote.connect_count(), 1);
        assert_eq!(remote.uploads(), vec!["/rw/a.py".to_owned()]);
    }

    #[tokio::test]
    async fn test_lost_session_reconnects_on_next_send() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.py", b"x = 1\n");
        let remote = FakeRemote::new();
        let mut session = session(&remote, 1024);
        session.connect().await.unwrap();

        remote.lose_session();
        let err = session.send(&local, "/r/a.py").await.unwrap_err();
        assert!(err.is_session_lost());
        assert!(!session.is_connected());

        session.send(&local, "/r/a.py").await.unwrap();
        assert_eq!(remote.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_reported() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.py", b"x = 1\n");
        let remote = FakeRemote::new();
        remote.fail_next_connects(1);
        let mut session = session(&remote, 1024);

        let err = session.send(&local, "/r/a.py").await.unwrap_err();
        assert!(matches!(err, TransferError::Connection(ConnectionError::Handshake { .. })));

        session.send(&local, "/r/a.py").await.unwrap();
    }

    #[tokio::test]
    async fn test_run_remote_command_collects_output() {
        let remote = FakeRemote::new();
        remote.respond_to("python3 /home/robot/proj/main.py", "motor ok\n", 0);
        let mut session = session(&remote, 1024);

        let mut chunks = Vec::new();
        let output = session
            .run_remote_command_with("python3 /home/robot/proj/main.py", |chunk| {
                chunks.push(chunk.to_owned());
            })
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "motor ok\n");
        assert_eq!(chunks, vec!["motor ok\n".to_owned()]);
    }

    #[tokio::test]
    async fn test_run_remote_command_failure_status() {
        let remote = FakeRemote::new();
        let mut session = session(&remote, 1024);

        let output = session.run_remote_command("missing-tool").await.unwrap();

        assert_eq!(output.exit_status, Some(127));
        assert!(output.stderr.contains("not found"));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let remote = FakeRemote::new();
        let mut session = session(&remote, 1024);

        session.disconnect().await;
        assert_eq!(remote.disconnect_count(), 0);

        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(remote.connect_count(), 1);

        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(remote.disconnect_count(), 1);
        assert!(!session.is_connected());
    }
}
