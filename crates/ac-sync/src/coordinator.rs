//! Event routing from the watcher to the transfer session.
//!
//! ```text
//! RawEvent ──► Created / Deleted ─────────────────────────► log
//!          ──► Moved ──► classify_rename ─────────────────► log (noise at debug)
//!          ──► Modified ──► timestamp ──► DebounceFilter ──► reject: debug log
//!                                                       └──► accept:
//!                         relative_path ──► TransferTarget ──► TransferSession::send
//!                                                              └──► post command
//! ```
//!
//! The debounce filter and the session sit behind one async mutex, so an
//! upload and a remote command never interleave on the session.

use std::time::SystemTime;

use camino::Utf8Path;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ac_core::{RemoteRoot, TimestampSource, TransferConfig, WatchConfig, WatchRoot};
use ac_transfer::{CommandOutput, Connector, TransferError, TransferReport, TransferSession};
use ac_watcher::{DebounceFilter, RawEvent, RenameKind, classify_rename, relative_path};

/// What happened to one event.
#[derive(Debug)]
pub enum Outcome {
    /// Created, Deleted, or a genuine rename. Reported, nothing sent.
    Logged,
    /// A rename that only shuffled an editor's temp file.
    Suppressed,
    /// A Modified event inside the debounce window for its path.
    Debounced,
    /// The file was uploaded.
    Sent(TransferReport),
    /// The upload failed. The error has already been logged.
    Failed(TransferError),
}

/// Counters over one [`WatchCoordinator::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Events received.
    pub events: u64,
    /// Files uploaded.
    pub sent: u64,
    /// Modified events dropped by the debounce filter.
    pub debounced: u64,
    /// Uploads that failed.
    pub failed: u64,
    /// Bytes uploaded.
    pub bytes: u64,
}

impl SyncStats {
    fn record(&mut self, outcome: &Outcome) {
        self.events += 1;
        match outcome {
            Outcome::Sent(report) => {
                self.sent += 1;
                self.bytes += report.bytes;
            }
            Outcome::Debounced => self.debounced += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Logged | Outcome::Suppressed => {}
        }
    }
}

struct Pipeline<C: Connector> {
    debounce: DebounceFilter,
    session: TransferSession<C>,
}

/// Mirrors committed changes under a [`WatchRoot`] to a [`RemoteRoot`].
pub struct WatchCoordinator<C: Connector> {
    pipeline: Mutex<Pipeline<C>>,
    watch_root: WatchRoot,
    remote_root: RemoteRoot,
    timestamp_source: TimestampSource,
    temp_markers: Vec<String>,
    post_command: Option<String>,
}

impl<C: Connector> std::fmt::Debug for WatchCoordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchCoordinator")
            .field("watch_root", &self.watch_root)
            .field("remote_root", &self.remote_root)
            .field("timestamp_source", &self.timestamp_source)
            .field("post_command", &self.post_command)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> WatchCoordinator<C> {
    /// Creates a coordinator around an existing session.
    ///
    /// The session may already be connected; if not, the first accepted
    /// change connects it.
    pub fn new(
        watch_root: WatchRoot,
        remote_root: RemoteRoot,
        session: TransferSession<C>,
        watch: &WatchConfig,
        transfer: &TransferConfig,
    ) -> Self {
        Self {
            pipeline: Mutex::new(Pipeline {
                debounce: DebounceFilter::new(watch.debounce_threshold()),
                session,
            }),
            watch_root,
            remote_root,
            timestamp_source: watch.timestamp_source,
            temp_markers: watch.temp_markers.clone(),
            post_command: transfer.post_command.clone(),
        }
    }

    /// The local watch root.
    pub fn watch_root(&self) -> &WatchRoot {
        &self.watch_root
    }

    /// The remote destination root.
    pub fn remote_root(&self) -> &RemoteRoot {
        &self.remote_root
    }

    /// Consumes events until `shutdown` fires or the channel closes.
    ///
    /// Cancellation is checked between events, so an upload in progress
    /// always completes. On return the receiver is closed and the session
    /// disconnected.
    pub async fn run(&self, events: &mut mpsc::Receiver<RawEvent>, shutdown: CancellationToken) -> SyncStats {
        let mut stats = SyncStats::default();
        info!(
            local = %self.watch_root.absolute_path(),
            remote = %self.remote_root,
            "Watching for changes"
        );

        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Event channel closed");
                        break;
                    }
                },
            };
            let outcome = self.handle_event(event).await;
            stats.record(&outcome);
        }

        events.close();
        self.pipeline.lock().await.session.disconnect().await;
        info!(
            events = stats.events,
            sent = stats.sent,
            debounced = stats.debounced,
            failed = stats.failed,
            bytes = stats.bytes,
            "Stopped watching"
        );
        stats
    }

    /// Handles a single event.
    pub async fn handle_event(&self, event: RawEvent) -> Outcome {
        match event {
            RawEvent::Created { path, .. } => {
                info!(path = %path, "Created");
                Outcome::Logged
            }
            RawEvent::Deleted { path, .. } => {
                info!(path = %path, "Deleted");
                Outcome::Logged
            }
            RawEvent::Moved { from, to, .. } => match classify_rename(&from, &to, &self.temp_markers) {
                RenameKind::TempFileNoise(marker) => {
                    debug!(from = %from, to = %to, marker = %marker, "Ignoring temp-file rename");
                    Outcome::Suppressed
                }
                RenameKind::Genuine => {
                    info!(from = %from, to = %to, "Moved");
                    Outcome::Logged
                }
            },
            RawEvent::Modified { path, observed_at } => self.on_modified(&path, observed_at).await,
        }
    }

    async fn on_modified(&self, path: &Utf8Path, observed_at: SystemTime) -> Outcome {
        let at = self.timestamp(path, observed_at).await;
        let mut pipeline = self.pipeline.lock().await;

        if !pipeline.debounce.on_modified(path, at).is_accept() {
            info!(path = %path, "Modified, duplicate of previous save");
            return Outcome::Debounced;
        }

        let relative = relative_path(path.as_str(), self.watch_root.basename());
        let remote = self.remote_root.target(relative).full_path();
        info!(local = %path, remote = %remote, "Modified, transferring");

        let report = match pipeline.session.send(path, &remote).await {
            Ok(report) => report,
            Err(err) => {
                error!(local = %path, remote = %remote, operation = "send", error = %err, "Transfer failed");
                return Outcome::Failed(err);
            }
        };

        if let Some(command) = &self.post_command {
            match pipeline.session.run_remote_command(command).await {
                Ok(output) if output.success() => {
                    debug!(command = %command, "Post-transfer command succeeded");
                }
                Ok(output) => {
                    warn!(
                        command = %command,
                        exit_status = ?output.exit_status,
                        exit_signal = ?output.exit_signal,
                        stderr = %output.stderr.trim_end(),
                        "Post-transfer command failed"
                    );
                }
                Err(err) => {
                    error!(command = %command, operation = "post command", error = %err, "Post-transfer command failed");
                }
            }
        }

        Outcome::Sent(report)
    }

    /// Runs `command` on the remote host, waiting for any upload in flight.
    pub async fn run_remote_command(&self, command: &str) -> Result<CommandOutput, TransferError> {
        self.pipeline.lock().await.session.run_remote_command(command).await
    }

    async fn timestamp(&self, path: &Utf8Path, observed_at: SystemTime) -> SystemTime {
        match self.timestamp_source {
            TimestampSource::Observed => observed_at,
            _ => match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    debug!(path = %path, error = %err, "Cannot read modification time, using event time");
                    observed_at
                }
            },
        }
    }
}
