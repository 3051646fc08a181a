//! Raw filesystem event types.
//!
//! [`RawEvent`] is the tagged form of a single notification coming out of the
//! OS event source: a creation, modification, deletion, or rename. Events are
//! consumed once by the coordinator and never persisted.
//!
//! [`NotifyTranslator`] turns `notify` events into [`RawEvent`]s, pairing the
//! two halves of a rename on backends that report them separately.
//!
//! # Event Flow
//!
//! ```text
//! notify::Event ──► NotifyTranslator ──► FileFilter ──► channel ──► coordinator
//! ```

use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use notify::event::{EventKind, ModifyKind, RenameMode};
use smallvec::SmallVec;

use crate::error::WatchError;

/// A single filesystem notification.
///
/// Every variant carries `observed_at`, the wall-clock time the watcher saw
/// the notification.
///
/// # Examples
///
/// ```
/// use ac_watcher::RawEvent;
/// use camino::Utf8PathBuf;
///
/// let event = RawEvent::modified(Utf8PathBuf::from("/w/proj/a.py"));
/// assert_eq!(event.kind_label(), "modified");
/// assert_eq!(event.source_path().as_str(), "/w/proj/a.py");
/// assert!(event.dest_path().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// A file or directory was created.
    Created {
        /// The created path.
        path: Utf8PathBuf,
        /// When the watcher saw the event.
        observed_at: SystemTime,
    },
    /// File content or metadata changed.
    Modified {
        /// The modified path.
        path: Utf8PathBuf,
        /// When the watcher saw the event.
        observed_at: SystemTime,
    },
    /// A file or directory was removed.
    Deleted {
        /// The removed path.
        path: Utf8PathBuf,
        /// When the watcher saw the event.
        observed_at: SystemTime,
    },
    /// A file or directory was renamed within the watched tree.
    Moved {
        /// The old path.
        from: Utf8PathBuf,
        /// The new path.
        to: Utf8PathBuf,
        /// When the watcher saw the event.
        observed_at: SystemTime,
    },
}

impl RawEvent {
    /// Creates a [`RawEvent::Created`] observed now.
    #[must_use]
    pub fn created(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Created {
            path: path.into(),
            observed_at: SystemTime::now(),
        }
    }

    /// Creates a [`RawEvent::Modified`] observed now.
    #[must_use]
    pub fn modified(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Modified {
            path: path.into(),
            observed_at: SystemTime::now(),
        }
    }

    /// Creates a [`RawEvent::Deleted`] observed now.
    #[must_use]
    pub fn deleted(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Deleted {
            path: path.into(),
            observed_at: SystemTime::now(),
        }
    }

    /// Creates a [`RawEvent::Moved`] observed now.
    #[must_use]
    pub fn moved(from: impl Into<Utf8PathBuf>, to: impl Into<Utf8PathBuf>) -> Self {
        Self::Moved {
            from: from.into(),
            to: to.into(),
            observed_at: SystemTime::now(),
        }
    }

    /// Replaces the observation time.
    ///
    /// Useful for testing or when replaying recorded events.
    #[must_use]
    pub fn at(mut self, time: SystemTime) -> Self {
        match &mut self {
            Self::Created { observed_at, .. }
            | Self::Modified { observed_at, .. }
            | Self::Deleted { observed_at, .. }
            | Self::Moved { observed_at, .. } => *observed_at = time,
        }
        self
    }

    /// Returns when the watcher saw this event.
    #[must_use]
    pub const fn observed_at(&self) -> SystemTime {
        match self {
            Self::Created { observed_at, .. }
            | Self::Modified { observed_at, .. }
            | Self::Deleted { observed_at, .. }
            | Self::Moved { observed_at, .. } => *observed_at,
        }
    }

    /// Returns the path the event is about (the old path for a rename).
    #[must_use]
    pub fn source_path(&self) -> &Utf8Path {
        match self {
            Self::Created { path, .. } | Self::Modified { path, .. } | Self::Deleted { path, .. } => {
                path
            }
            Self::Moved { from, .. } => from,
        }
    }

    /// Returns the new path of a rename.
    #[must_use]
    pub fn dest_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Moved { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Returns every path named by the event.
    #[must_use]
    pub fn paths(&self) -> SmallVec<[&Utf8Path; 2]> {
        let mut paths = SmallVec::new();
        paths.push(self.source_path());
        if let Some(to) = self.dest_path() {
            paths.push(to);
        }
        paths
    }

    /// Short lowercase name of the event kind, for logs.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Modified { .. } => "modified",
            Self::Deleted { .. } => "deleted",
            Self::Moved { .. } => "moved",
        }
    }
}

/// Converts `notify` events into [`RawEvent`]s.
///
/// Backends differ in how they report renames. Inotify sends a `From` half,
/// a `To` half, and a combined `Both` event sharing one tracker id; other
/// backends send only the two halves without a tracker. The translator keeps
/// the last unmatched `From` half and emits exactly one [`RawEvent::Moved`]
/// per rename either way. A `To` half with nothing to pair with is a file
/// moved in from outside the tree and is reported as a creation.
#[derive(Debug, Default)]
pub struct NotifyTranslator {
    pending_from: Option<(Option<usize>, Utf8PathBuf)>,
}

impl NotifyTranslator {
    /// Creates a translator with no pending rename.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Translates one notify event.
    ///
    /// Returns `Ok(None)` for events that carry nothing to report (access
    /// notifications, the first half of a rename).
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NonUtf8Path`] if a path is not valid UTF-8.
    pub fn translate(&mut self, event: notify::Event) -> Result<Option<RawEvent>, WatchError> {
        let tracker = event.attrs.tracker();
        let mut paths = SmallVec::<[Utf8PathBuf; 2]>::new();
        for path in event.paths {
            paths.push(Utf8PathBuf::from_path_buf(path).map_err(WatchError::non_utf8_path)?);
        }
        let mut paths = paths.into_iter();
        let Some(first) = paths.next() else {
            return Ok(None);
        };

        let raw = match event.kind {
            EventKind::Create(_) => Some(RawEvent::created(first)),
            EventKind::Remove(_) => Some(RawEvent::deleted(first)),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                self.pending_from = None;
                paths.next().map(|to| RawEvent::moved(first, to))
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                if let Some((_, previous)) = self.pending_from.replace((tracker, first)) {
                    tracing::trace!(path = %previous, "Rename source left the watched tree");
                }
                None
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => self.pair_rename_target(tracker, first),
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Backend could not tell which side of the rename this is.
                if first.exists() {
                    Some(RawEvent::created(first))
                } else {
                    Some(RawEvent::deleted(first))
                }
            }
            EventKind::Modify(_) => Some(RawEvent::modified(first)),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        };

        Ok(raw)
    }

    fn pair_rename_target(&mut self, tracker: Option<usize>, to: Utf8PathBuf) -> Option<RawEvent> {
        match self.pending_from.take() {
            Some((pending_tracker, from)) if pending_tracker == tracker => {
                if tracker.is_some() {
                    // A combined `Both` event with the same tracker follows.
                    self.pending_from = Some((pending_tracker, from));
                    None
                } else {
                    Some(RawEvent::moved(from, to))
                }
            }
            other => {
                self.pending_from = other;
                Some(RawEvent::created(to))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::path::PathBuf;
    use std::time::Duration;

    fn notify_event(kind: EventKind, paths: &[&str], tracker: Option<usize>) -> notify::Event {
        let mut event = notify::Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        if let Some(tracker) = tracker {
            event = event.set_tracker(tracker);
        }
        event
    }

    fn translate(translator: &mut NotifyTranslator, event: notify::Event) -> Option<RawEvent> {
        translator.translate(event).expect("paths are UTF-8")
    }

    #[test]
    fn test_raw_event_accessors() {
        let moved = RawEvent::moved("/w/a.py___jb_tmp___", "/w/a.py");
        assert_eq!(moved.kind_label(), "moved");
        assert_eq!(moved.source_path().as_str(), "/w/a.py___jb_tmp___");
        assert_eq!(moved.dest_path().map(Utf8Path::as_str), Some("/w/a.py"));
        assert_eq!(moved.paths().len(), 2);

        let deleted = RawEvent::deleted("/w/b.py");
        assert_eq!(deleted.paths().len(), 1);
        assert_eq!(deleted.kind_label(), "deleted");
    }

    #[test]
    fn test_raw_event_at_overrides_time() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        let event = RawEvent::created("/w/a.py").at(t);
        assert_eq!(event.observed_at(), t);
    }

    #[test]
    fn test_translate_basic_kinds() {
        let mut translator = NotifyTranslator::new();

        let created = translate(
            &mut translator,
            notify_event(EventKind::Create(CreateKind::File), &["/w/a.py"], None),
        );
        assert!(matches!(created, Some(RawEvent::Created { ref path, .. }) if path == "/w/a.py"));

        let modified = translate(
            &mut translator,
            notify_event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/w/a.py"],
                None,
            ),
        );
        assert!(matches!(modified, Some(RawEvent::Modified { .. })));

        let deleted = translate(
            &mut translator,
            notify_event(EventKind::Remove(RemoveKind::File), &["/w/a.py"], None),
        );
        assert!(matches!(deleted, Some(RawEvent::Deleted { .. })));

        let access = translate(
            &mut translator,
            notify_event(EventKind::Access(notify::event::AccessKind::Any), &["/w/a.py"], None),
        );
        assert!(access.is_none());
    }

    #[test]
    fn test_translate_inotify_rename_emits_single_move() {
        let mut translator = NotifyTranslator::new();
        let from = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/w/a.py___jb_tmp___"],
            Some(7),
        );
        let to = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/w/a.py"],
            Some(7),
        );
        let both = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/a.py___jb_tmp___", "/w/a.py"],
            Some(7),
        );

        assert!(translate(&mut translator, from).is_none());
        assert!(translate(&mut translator, to).is_none());
        let moved = translate(&mut translator, both).expect("rename reported");
        assert_eq!(moved.source_path().as_str(), "/w/a.py___jb_tmp___");
        assert_eq!(moved.dest_path().map(Utf8Path::as_str), Some("/w/a.py"));
    }

    #[test]
    fn test_translate_untracked_rename_halves_are_paired() {
        let mut translator = NotifyTranslator::new();
        let from = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/w/old.py"],
            None,
        );
        let to = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/w/new.py"],
            None,
        );

        assert!(translate(&mut translator, from).is_none());
        let moved = translate(&mut translator, to).expect("rename reported");
        assert!(matches!(moved, RawEvent::Moved { ref from, ref to, .. } if from == "/w/old.py" && to == "/w/new.py"));
    }

    #[test]
    fn test_translate_unpaired_target_is_creation() {
        let mut translator = NotifyTranslator::new();
        let to = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/w/incoming.py"],
            Some(3),
        );
        let event = translate(&mut translator, to);
        assert!(matches!(event, Some(RawEvent::Created { ref path, .. }) if path == "/w/incoming.py"));
    }

    #[test]
    fn test_translate_event_without_paths() {
        let mut translator = NotifyTranslator::new();
        let event = notify::Event::new(EventKind::Create(CreateKind::Any));
        assert!(translate(&mut translator, event).is_none());
    }
}
