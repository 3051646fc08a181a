//! Raw file events, duplicate-write suppression, and async event streaming.
//!
//! This crate is the change-detection half of autocopy. It turns `notify`
//! notifications into [`RawEvent`]s, filters them by glob pattern, streams
//! them into a tokio channel, and provides the pure pieces the coordinator
//! applies to each event:
//!
//! - [`DebounceFilter`] decides whether a Modified event is a committed change
//! - [`classify_rename`] separates editor temp-file shuffles from real renames
//! - [`relative_path`] maps an absolute event path below the watch root
//!
//! # Architecture
//!
//! ```text
//! notify ──► NotifyTranslator ──► PatternFilter ──► mpsc ──► coordinator
//!                                                              │
//!                                       DebounceFilter ◄───────┤
//!                                       relative_path  ◄───────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! ac-cli ──► ac-sync ──► ac-watcher ──► ac-core
//!                   └──► ac-transfer ──► ac-core
//! ```
//!
//! # Example
//!
//! ```
//! use ac_watcher::{relative_path, DebounceFilter, Decision};
//! use camino::Utf8Path;
//! use std::time::{Duration, SystemTime};
//!
//! let mut filter = DebounceFilter::new(Duration::from_millis(500));
//! let path = Utf8Path::new("/home/u/proj/sub/a.py");
//! let now = SystemTime::now();
//!
//! if filter.on_modified(path, now) == Decision::Accept {
//!     assert_eq!(relative_path(path.as_str(), "proj"), "sub/a.py");
//! }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod debounce;
pub mod error;
pub mod events;
pub mod filter;
pub mod path;
pub mod watcher;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use events::{NotifyTranslator, RawEvent};

// Re-export decision logic
pub use debounce::{classify_rename, ChangeRecord, DebounceFilter, Decision, RenameKind};
pub use path::relative_path;

// Re-export filter types
pub use filter::{AcceptAllFilter, FileFilter, PatternFilter};

// Re-export watcher types
pub use watcher::FileWatcher;
