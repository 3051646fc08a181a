//! Transport seams.
//!
//! [`TransferSession`](crate::TransferSession) talks to the remote host only
//! through these traits. The production implementation lives in
//! [`ssh`](crate::ssh); tests plug in an in-memory fake.
//!
//! ```text
//! Connector ──connect()──► Connection ──exec(cmd)──► RemoteChannel
//!                                                    write / send_eof
//!                                                    next_message
//! ```

use async_trait::async_trait;

use crate::error::{ConnectionError, TransferError};

/// Something read from a remote command's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Bytes written to the command's standard output.
    Stdout(Vec<u8>),
    /// Bytes written to the command's standard error.
    Stderr(Vec<u8>),
    /// The command exited with this status.
    ExitStatus(u32),
    /// The command was terminated by a signal.
    ExitSignal {
        /// Signal name as reported by the server.
        name: String,
        /// Optional message accompanying the signal.
        error_message: String,
    },
    /// The remote side will send no more data.
    Eof,
    /// The server refused to run the command.
    Refused,
}

/// Opens authenticated connections to one remote host.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connection type produced.
    type Connection: Connection;

    /// Establishes and authenticates a new connection.
    async fn connect(&self) -> Result<Self::Connection, ConnectionError>;

    /// Human-readable destination for logs, such as `robot@ev3dev:22`.
    fn describe(&self) -> String;
}

/// One authenticated connection able to run commands.
#[async_trait]
pub trait Connection: Send {
    /// The channel type produced by [`Connection::exec`].
    type Channel: RemoteChannel;

    /// Starts `command` on the remote host.
    async fn exec(&mut self, command: &str) -> Result<Self::Channel, TransferError>;

    /// Closes the connection.
    async fn disconnect(&mut self) -> Result<(), TransferError>;
}

/// The stdin/stdout/stderr of one remote command.
#[async_trait]
pub trait RemoteChannel: Send {
    /// Writes bytes to the command's standard input.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransferError>;

    /// Signals end of input.
    async fn send_eof(&mut self) -> Result<(), TransferError>;

    /// Waits for the next message. `None` once the channel is closed.
    async fn next_message(&mut self) -> Option<ChannelMessage>;

    /// Closes the channel.
    async fn close(&mut self) -> Result<(), TransferError>;
}
