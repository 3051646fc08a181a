//! Remote transfer session for autocopy.
//!
//! This crate keeps one authenticated SSH session to the deployment target
//! and uses it for two things:
//!
//! - **Uploads**: [`TransferSession::send`] streams a local file to a remote
//!   path with the SCP sink protocol ([`scp`])
//! - **Remote commands**: [`TransferSession::run_remote_command`] runs a
//!   shell command over the same session and collects its output
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐
//! │ TransferSession<C>        │  connect / send / run_remote_command / disconnect
//! └─────────────┬─────────────┘
//!               │ Connector / Connection / RemoteChannel
//!       ┌───────┴────────┐
//!       ▼                ▼
//! ┌───────────┐    ┌───────────┐
//! │ ssh       │    │ fake      │  (tests, `test-util` feature)
//! │ (russh)   │    │ in-memory │
//! └───────────┘    └───────────┘
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod report;
pub mod scp;
pub mod session;
pub mod ssh;
pub mod transport;

pub use error::{ConnectionError, TransferError};
pub use report::{CommandOutput, TransferReport};
pub use session::TransferSession;
pub use ssh::{SshConnection, SshConnector};
pub use transport::{ChannelMessage, Connection, Connector, RemoteChannel};
