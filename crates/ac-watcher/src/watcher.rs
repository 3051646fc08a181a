//! File watcher with async event streaming.
//!
//! This module provides the [`FileWatcher`] type that bridges the synchronous
//! `notify` file watching crate to the async tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Blocking Thread (spawn_blocking)             │
//! │  ┌──────────────────┐    ┌────────────────┐    ┌────────────┐   │
//! │  │RecommendedWatcher│ -> │NotifyTranslator│ -> │ FileFilter │   │
//! │  │ (notify)         │    │ (RawEvent)     │    │ (globs)    │   │
//! │  └──────────────────┘    └────────────────┘    └─────┬──────┘   │
//! └──────────────────────────────────────────────────────│──────────┘
//!                                                        │
//!                                          blocking_send │
//!                                                        ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Async Runtime (tokio)                        │
//! │  ┌──────────────────┐    ┌────────────────┐                     │
//! │  │ FileWatcher      │    │ mpsc::Receiver │ -> WatchCoordinator │
//! │  │ (shutdown ctrl)  │    │ (RawEvent)     │                     │
//! │  └──────────────────┘    └────────────────┘                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The channel is bounded and fed with `blocking_send`: when the consumer is
//! busy (for example during an upload) the notify thread waits instead of
//! dropping events.
//!
//! # Usage
//!
//! ```no_run
//! use ac_watcher::{FileWatcher, PatternFilter};
//! use ac_core::WatchConfig;
//! use camino::Utf8Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WatchConfig::default();
//!     let filter = PatternFilter::from_config(&config)?;
//!     let mut watcher = FileWatcher::new(Utf8Path::new("/path/to/proj"), &config, filter).await?;
//!
//!     while let Some(event) = watcher.recv().await {
//!         println!("{}: {}", event.kind_label(), event.source_path());
//!     }
//!
//!     Ok(())
//! }
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use notify::{RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use ac_core::WatchConfig;

use crate::error::WatchError;
use crate::events::{NotifyTranslator, RawEvent};
use crate::filter::FileFilter;

/// A file watcher that streams [`RawEvent`]s to an async context.
///
/// # Lifecycle
///
/// 1. **Creation**: `FileWatcher::new()` validates the path, creates channels,
///    and spawns a blocking task with the notify watcher.
///
/// 2. **Event Reception**: Use `recv()` or `events()` to receive events.
///    Events are already filtered according to the provided filter.
///
/// 3. **Shutdown**: Call `shutdown()` for graceful shutdown, or simply drop
///    the watcher. Dropping sends a shutdown signal without waiting.
pub struct FileWatcher {
    /// Shutdown signal sender. `None` after shutdown is initiated.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Handle to the blocking watcher task.
    task_handle: Option<JoinHandle<Result<(), WatchError>>>,

    /// Event receiver for async consumption.
    event_rx: mpsc::Receiver<RawEvent>,

    /// The path being watched.
    watch_path: Utf8PathBuf,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("watch_path", &self.watch_path)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Creates a new file watcher for the specified path.
    ///
    /// The channel capacity and recursion mode come from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if the path doesn't exist, or
    /// [`WatchError::Io`] if it cannot be canonicalized.
    #[allow(clippy::unused_async)] // Async for API consistency with shutdown()
    pub async fn new<F: FileFilter>(
        path: &Utf8Path,
        config: &WatchConfig,
        filter: F,
    ) -> Result<Self, WatchError> {
        if !path.exists() {
            return Err(WatchError::path_not_found(path));
        }

        let watch_path = path.canonicalize_utf8()?;

        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task_path = watch_path.clone();
        let recursive = config.recursive;

        let task_handle = tokio::task::spawn_blocking(move || {
            run_watcher_loop(task_path, recursive, event_tx, shutdown_rx, filter)
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
            event_rx,
            watch_path,
        })
    }

    /// Receives the next event asynchronously.
    ///
    /// Returns `None` when the watcher has been shut down.
    pub async fn recv(&mut self) -> Option<RawEvent> {
        self.event_rx.recv().await
    }

    /// Returns a mutable reference to the event receiver.
    ///
    /// Hand this to the coordinator or use it with `tokio::select!`.
    pub fn events(&mut self) -> &mut mpsc::Receiver<RawEvent> {
        &mut self.event_rx
    }

    /// Returns the path being watched.
    #[must_use]
    pub fn watch_path(&self) -> &Utf8Path {
        &self.watch_path
    }

    /// Returns `true` if the watcher is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some() && self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Gracefully shuts down the watcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher thread panicked or failed to start.
    pub async fn shutdown(mut self) -> Result<(), WatchError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // Ignore error if receiver is already dropped
            let _ = tx.send(());
        }

        if let Some(handle) = self.task_handle.take() {
            match handle.await {
                Ok(result) => result?,
                Err(_join_error) => return Err(WatchError::ChannelClosed),
            }
        }

        Ok(())
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Runs the notify watcher in a blocking context until shutdown.
#[allow(clippy::needless_pass_by_value)] // Path must be owned for the blocking task lifetime
fn run_watcher_loop<F: FileFilter>(
    path: Utf8PathBuf,
    recursive: bool,
    event_tx: mpsc::Sender<RawEvent>,
    shutdown_rx: oneshot::Receiver<()>,
    filter: F,
) -> Result<(), WatchError> {
    let mut translator = NotifyTranslator::new();
    let tx = event_tx;

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(error = %error, "Watcher error");
                return;
            }
        };

        let raw = match translator.translate(event) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(error = %error, "Skipping file event");
                return;
            }
        };

        if !filter.should_process_event(&raw) {
            tracing::trace!(path = %raw.source_path(), "Filtered out file event");
            return;
        }
        if matches!(&raw, RawEvent::Modified { path, .. } if path.is_dir()) {
            tracing::trace!(path = %raw.source_path(), "Ignoring directory modification");
            return;
        }

        if tx.blocking_send(raw).is_err() {
            tracing::debug!("Event channel closed, dropping file event");
        }
    })?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };

    watcher.watch(path.as_std_path(), mode)?;

    tracing::info!(path = %path, recursive = recursive, "File watcher started");

    let _ = shutdown_rx.blocking_recv();

    tracing::info!(path = %path, "File watcher stopped");

    Ok(())
}
