//! Watch-to-deploy coordination for autocopy.
//!
//! [`WatchCoordinator`] is the piece between the watcher and the remote
//! session: it receives [`RawEvent`](ac_watcher::RawEvent)s, decides which
//! ones are committed changes, and uploads those files under the remote root
//! with the same relative layout.
//!
//! # Example
//!
//! ```no_run
//! use ac_core::{Config, RemoteRoot, WatchRoot};
//! use ac_sync::WatchCoordinator;
//! use ac_transfer::{SshConnector, TransferSession};
//! use ac_watcher::{FileWatcher, PatternFilter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let root = WatchRoot::resolve("proj")?;
//! let session = TransferSession::new(SshConnector::new(config.remote.clone()), &config.transfer);
//! let coordinator = WatchCoordinator::new(
//!     root.clone(),
//!     RemoteRoot::new("/home/robot/proj")?,
//!     session,
//!     &config.watch,
//!     &config.transfer,
//! );
//!
//! let filter = PatternFilter::from_config(&config.watch)?;
//! let mut watcher = FileWatcher::new(root.absolute_path(), &config.watch, filter).await?;
//! coordinator.run(watcher.events(), CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod coordinator;

pub use coordinator::{Outcome, SyncStats, WatchCoordinator};
