//! Error types for the ac-transfer crate.
//!
//! [`ConnectionError`] covers establishing and authenticating the session.
//! [`TransferError`] covers a single upload or remote command.
//!
//! # Error Recovery Strategy
//!
//! - **Connection errors**: fatal at startup; during a watch session the
//!   connection is dropped and the next transfer reconnects
//! - **Local file errors** ([`TransferError::LocalFile`]): log, skip the file, keep watching
//! - **Sink rejections** ([`TransferError::Rejected`]): log, keep watching, session stays up
//! - **Channel errors** ([`TransferError::Channel`]): session is considered lost and dropped
//! - **Protocol errors** ([`TransferError::Protocol`]): session is considered lost and dropped

use std::time::Duration;

use camino::Utf8PathBuf;

/// Failure to establish an authenticated session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The host could not be reached or the SSH handshake failed.
    #[error("cannot connect to {address}: {message}")]
    Handshake {
        /// `host:port` that was dialed.
        address: String,
        /// Description of the failure.
        message: String,
    },

    /// The connection attempt did not complete in time.
    #[error("timed out after {after:?} connecting to {address}")]
    Timeout {
        /// `host:port` that was dialed.
        address: String,
        /// The configured timeout.
        after: Duration,
    },

    /// The server's host key did not match the expected fingerprint.
    #[error("host key for {address} was rejected")]
    HostKeyRejected {
        /// `host:port` that was dialed.
        address: String,
    },

    /// The server refused every offered credential.
    #[error("authentication rejected for {user}@{address}")]
    AuthenticationRejected {
        /// The user name offered.
        user: String,
        /// `host:port` that was dialed.
        address: String,
    },

    /// Credentials could not be loaded or none were configured.
    #[error("unusable credentials: {0}")]
    Credentials(String),
}

/// Failure of a single transfer or remote command.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// No session could be established for this operation.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The local file could not be opened or read.
    #[error("cannot read local file {path}: {source}")]
    LocalFile {
        /// The local path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The remote side refused the write.
    ///
    /// A partially written remote file may be left behind.
    #[error("remote rejected {remote_path}: {message}")]
    Rejected {
        /// The remote destination.
        remote_path: String,
        /// The message reported by the remote side.
        message: String,
    },

    /// The channel or session failed during `operation`.
    #[error("session failure during {operation}: {message}")]
    Channel {
        /// What was being done.
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The remote side sent something the SCP protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl TransferError {
    /// Creates a [`TransferError::LocalFile`] error.
    pub fn local_file(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::LocalFile {
            path: path.into(),
            source,
        }
    }

    /// Creates a [`TransferError::Channel`] error.
    pub fn channel(operation: &'static str, message: impl ToString) -> Self {
        Self::Channel {
            operation,
            message: message.to_string(),
        }
    }

    /// Returns `true` if the session can no longer be trusted and should be
    /// re-established before the next operation.
    #[must_use]
    pub const fn is_session_lost(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Channel { .. } | Self::Protocol(_)
        )
    }

    /// Returns `true` if the failure is on the local filesystem side.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::LocalFile { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_local_file_error() {
        let err = TransferError::local_file(
            "/w/proj/a.py",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_local());
        assert!(!err.is_session_lost());
        assert!(err.to_string().contains("/w/proj/a.py"));
    }

    #[test]
    fn test_rejected_keeps_session() {
        let err = TransferError::Rejected {
            remote_path: "/ro/a.py".to_owned(),
            message: "Permission denied".to_owned(),
        };
        assert!(!err.is_session_lost());
        assert_eq!(err.to_string(), "remote rejected /ro/a.py: Permission denied");
    }

    #[test]
    fn test_channel_and_connection_errors_lose_session() {
        assert!(TransferError::channel("write", "broken pipe").is_session_lost());
        assert!(TransferError::Protocol("bad ack".to_owned()).is_session_lost());

        let err = TransferError::from(ConnectionError::AuthenticationRejected {
            user: "robot".to_owned(),
            address: "ev3dev:22".to_owned(),
        });
        assert!(err.is_session_lost());
        assert_eq!(err.to_string(), "authentication rejected for robot@ev3dev:22");
    }

    #[test]
    fn test_timeout_display() {
        let err = ConnectionError::Timeout {
            address: "ev3dev:22".to_owned(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "timed out after 30s connecting to ev3dev:22");
    }
}
