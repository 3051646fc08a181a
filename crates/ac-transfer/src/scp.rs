//! SCP sink protocol.
//!
//! An upload runs `scp -t <path>` on the remote host and speaks the classic
//! line protocol over its stdin/stdout:
//!
//! ```text
//! client                          sink (scp -t)
//!   ◄──────────────────────────── \0            ready
//!   T<mtime> 0 <atime> 0\n ─────►
//!   ◄──────────────────────────── \0
//!   C0<mode> <size> <name>\n ───►
//!   ◄──────────────────────────── \0
//!   <size bytes of content> ────►
//!   \0 ─────────────────────────►
//!   ◄──────────────────────────── \0            written
//!   EOF ────────────────────────►
//!   ◄──────────────────────────── exit status
//! ```
//!
//! A sink reports failure with `\x01` (warning) or `\x02` (fatal) followed
//! by a message line instead of `\0`.

use std::collections::VecDeque;
use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::TransferError;
use crate::transport::{ChannelMessage, RemoteChannel};

/// Per-file attributes transmitted ahead of the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    /// Permission bits (`& 0o777`).
    pub mode: u32,
    /// Content length in bytes.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u64,
    /// Access time, seconds since the Unix epoch.
    pub atime: u64,
}

impl FileMeta {
    /// Extracts the transmitted attributes from local metadata.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata.modified().map(unix_seconds).unwrap_or(0);
        let atime = metadata.accessed().map(unix_seconds).unwrap_or(mtime);
        Self {
            mode: permission_bits(metadata),
            size: metadata.len(),
            mtime,
            atime,
        }
    }

    /// The `T` line carrying timestamps.
    #[must_use]
    pub fn times_line(&self) -> String {
        format!("T{} 0 {} 0\n", self.mtime, self.atime)
    }

    /// The `C` line announcing a file of `self.size` bytes named `name`.
    #[must_use]
    pub fn file_line(&self, name: &str) -> String {
        format!("C{:04o} {} {}\n", self.mode & 0o777, self.size, name)
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// The command that starts a sink writing to `remote_path`.
#[must_use]
pub fn sink_command(remote_path: &str) -> String {
    format!("scp -t {}", shell_quote(remote_path))
}

/// Final component of a remote path, as sent on the `C` line.
#[must_use]
pub fn remote_file_name(remote_path: &str) -> &str {
    remote_path
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(remote_path)
}

/// Quotes `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Reads sink acknowledgements from a channel.
///
/// Output may arrive in arbitrary chunks, so unread bytes are kept between
/// calls. Anything the sink writes to stderr is kept for error messages.
#[derive(Debug)]
pub struct AckReader {
    remote_path: String,
    pending: VecDeque<u8>,
    stderr: Vec<u8>,
}

impl AckReader {
    /// Creates a reader for an upload to `remote_path`.
    #[must_use]
    pub fn new(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            pending: VecDeque::new(),
            stderr: Vec::new(),
        }
    }

    /// Waits for one acknowledgement.
    ///
    /// # Errors
    ///
    /// [`TransferError::Rejected`] if the sink reports an error or exits,
    /// [`TransferError::Protocol`] for an unknown response byte, and
    /// [`TransferError::Channel`] if the channel closes first.
    pub async fn expect_ack<C: RemoteChannel + ?Sized>(&mut self, channel: &mut C) -> Result<(), TransferError> {
        match self.next_byte(channel).await? {
            0 => Ok(()),
            1 | 2 => {
                let message = self.read_line(channel).await?;
                Err(self.rejected(message))
            }
            other => Err(TransferError::Protocol(format!(
                "unexpected acknowledgement byte {other:#04x} from sink for {}",
                self.remote_path
            ))),
        }
    }

    /// Drains the channel after end of input and checks the exit status.
    ///
    /// # Errors
    ///
    /// [`TransferError::Rejected`] if the sink exits non-zero or by signal.
    pub async fn finish<C: RemoteChannel + ?Sized>(&mut self, channel: &mut C) -> Result<(), TransferError> {
        while let Some(message) = channel.next_message().await {
            match message {
                ChannelMessage::ExitStatus(0) | ChannelMessage::Eof | ChannelMessage::Stdout(_) => {}
                ChannelMessage::ExitStatus(code) => {
                    return Err(self.rejected(format!("sink exited with status {code}")));
                }
                ChannelMessage::ExitSignal { name, error_message } => {
                    return Err(self.rejected(format!("sink killed by {name} {error_message}")));
                }
                ChannelMessage::Stderr(data) => self.stderr.extend_from_slice(&data),
                ChannelMessage::Refused => {
                    return Err(TransferError::Protocol("sink refused after upload".to_owned()));
                }
            }
        }
        Ok(())
    }

    async fn next_byte<C: RemoteChannel + ?Sized>(&mut self, channel: &mut C) -> Result<u8, TransferError> {
        loop {
            if let Some(byte) = self.pending.pop_front() {
                return Ok(byte);
            }
            match channel.next_message().await {
                Some(ChannelMessage::Stdout(data)) => self.pending.extend(data),
                Some(ChannelMessage::Stderr(data)) => self.stderr.extend_from_slice(&data),
                Some(ChannelMessage::ExitStatus(code)) => {
                    return Err(self.rejected(format!("sink exited with status {code}")));
                }
                Some(ChannelMessage::ExitSignal { name, error_message }) => {
                    return Err(self.rejected(format!("sink killed by {name} {error_message}")));
                }
                Some(ChannelMessage::Refused) => {
                    return Err(TransferError::channel("start sink", "server refused to run scp"));
                }
                // The exit status usually follows end of output.
                Some(ChannelMessage::Eof) => {}
                None => {
                    return Err(TransferError::channel(
                        "read acknowledgement",
                        "channel closed before the sink answered",
                    ));
                }
            }
        }
    }

    async fn read_line<C: RemoteChannel + ?Sized>(&mut self, channel: &mut C) -> Result<String, TransferError> {
        let mut line = Vec::new();
        loop {
            match self.next_byte(channel).await {
                Ok(b'\n') => break,
                Ok(byte) => line.push(byte),
                // A truncated message is still worth reporting.
                Err(_) if !line.is_empty() => break,
                Err(error) => return Err(error),
            }
        }
        Ok(String::from_utf8_lossy(&line).trim().to_owned())
    }

    fn rejected(&self, message: String) -> TransferError {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            message
        } else {
            format!("{message} ({stderr})")
        };
        TransferError::Rejected {
            remote_path: self.remote_path.clone(),
            message,
        }
    }
}
