//! Duplicate-write suppression.
//!
//! Editors frequently produce two or more Modified notifications for one
//! logical save. [`DebounceFilter`] commits the first event of such a burst
//! and drops the rest, while never dropping the first edit to a *different*
//! file. It only remembers the immediately preceding event, so events must be
//! fed to it in a single total order.
//!
//! # Decision Rule
//!
//! ```text
//! Modified(P, T):
//!     accept  if  last_path != P
//!             or  T - last_time > threshold
//!     last := (P, T)          // regardless of the outcome
//! ```
//!
//! Renames are handled separately by [`classify_rename`]: a rename whose two
//! paths differ by exactly an editor temp-file marker is save noise.

use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};

/// Outcome of feeding one Modified event to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The event is a committed change and should be transferred.
    Accept,
    /// The event duplicates the previous one.
    Reject,
}

impl Decision {
    /// Returns `true` for [`Decision::Accept`].
    #[must_use]
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// The filter's memory of the preceding Modified event.
///
/// Starts at zero values: an empty path and the Unix epoch. An empty path
/// never equals a real event path, so the first event is always accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Path of the previous event.
    pub last_path: Utf8PathBuf,
    /// Timestamp of the previous event.
    pub last_mod_time: SystemTime,
    /// Path of the event being decided.
    pub most_recent_path: Utf8PathBuf,
    /// Timestamp of the event being decided.
    pub most_recent_mod_time: SystemTime,
}

impl Default for ChangeRecord {
    fn default() -> Self {
        Self {
            last_path: Utf8PathBuf::new(),
            last_mod_time: SystemTime::UNIX_EPOCH,
            most_recent_path: Utf8PathBuf::new(),
            most_recent_mod_time: SystemTime::UNIX_EPOCH,
        }
    }
}

impl ChangeRecord {
    /// Decides an event and returns the record to use for the next one.
    ///
    /// A timestamp earlier than the previous one counts as a zero delta.
    #[must_use]
    pub fn observe(self, path: &Utf8Path, at: SystemTime, threshold: Duration) -> (Decision, Self) {
        let observing = Self {
            most_recent_path: path.to_owned(),
            most_recent_mod_time: at,
            ..self
        };

        let delta = observing
            .most_recent_mod_time
            .duration_since(observing.last_mod_time)
            .unwrap_or(Duration::ZERO);
        let decision = if observing.last_path != observing.most_recent_path || delta > threshold {
            Decision::Accept
        } else {
            Decision::Reject
        };

        let next = Self {
            last_path: observing.most_recent_path.clone(),
            last_mod_time: observing.most_recent_mod_time,
            ..observing
        };
        (decision, next)
    }
}

/// Debounce state for one watched tree.
///
/// # Examples
///
/// ```
/// use ac_watcher::{DebounceFilter, Decision};
/// use camino::Utf8Path;
/// use std::time::{Duration, SystemTime};
///
/// let mut filter = DebounceFilter::new(Duration::from_millis(500));
/// let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
/// let path = Utf8Path::new("/w/proj/a.py");
///
/// assert_eq!(filter.on_modified(path, t0), Decision::Accept);
/// assert_eq!(filter.on_modified(path, t0 + Duration::from_millis(200)), Decision::Reject);
/// ```
#[derive(Debug, Clone)]
pub struct DebounceFilter {
    record: ChangeRecord,
    threshold: Duration,
}

impl DebounceFilter {
    /// Creates a filter with the given threshold and a zeroed record.
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            record: ChangeRecord::default(),
            threshold,
        }
    }

    /// Feeds one Modified event and returns whether it is a committed change.
    pub fn on_modified(&mut self, path: &Utf8Path, at: SystemTime) -> Decision {
        let (decision, next) = std::mem::take(&mut self.record).observe(path, at, self.threshold);
        self.record = next;
        tracing::trace!(
            path = %path,
            ?decision,
            "Debounce decision"
        );
        decision
    }

    /// Returns the current record.
    #[must_use]
    pub const fn record(&self) -> &ChangeRecord {
        &self.record
    }

    /// Returns the configured threshold.
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }
}

/// How a rename event should be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameKind {
    /// The paths differ by exactly this temp-file marker.
    TempFileNoise(String),
    /// Any other rename.
    Genuine,
}

/// Classifies a rename by the text that separates its two paths.
///
/// The longer path has every occurrence of the shorter one removed; if what
/// remains is exactly one of `markers`, the rename is an editor's temp-file
/// shuffle rather than something the user did.
///
/// # Examples
///
/// ```
/// use ac_watcher::{classify_rename, RenameKind};
/// use camino::Utf8Path;
///
/// let markers = ["___jb_tmp___".to_owned(), "___jb_old___".to_owned()];
/// let kind = classify_rename(
///     Utf8Path::new("/w/proj/file.py___jb_tmp___"),
///     Utf8Path::new("/w/proj/file.py"),
///     &markers,
/// );
/// assert_eq!(kind, RenameKind::TempFileNoise("___jb_tmp___".to_owned()));
/// ```
#[must_use]
pub fn classify_rename(from: &Utf8Path, to: &Utf8Path, markers: &[String]) -> RenameKind {
    let (from, to) = (from.as_str(), to.as_str());
    let diff = if from.len() > to.len() {
        from.replace(to, "")
    } else {
        to.replace(from, "")
    };

    match markers.iter().find(|marker| **marker == diff) {
        Some(marker) => RenameKind::TempFileNoise(marker.clone()),
        None => RenameKind::Genuine,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_millis(500);

    fn t(secs: f64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_secs_f64(secs)
    }

    fn markers() -> Vec<String> {
        vec!["___jb_tmp___".to_owned(), "___jb_old___".to_owned()]
    }

    #[test]
    fn test_first_event_is_accepted() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        assert!(filter.on_modified(Utf8Path::new("/w/proj/a.py"), t(0.0)).is_accept());
    }

    #[test]
    fn test_duplicate_within_threshold_is_rejected() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        let path = Utf8Path::new("/w/proj/a.py");
        assert_eq!(filter.on_modified(path, t(0.0)), Decision::Accept);
        assert_eq!(filter.on_modified(path, t(0.2)), Decision::Reject);
    }

    #[test]
    fn test_second_burst_after_threshold_is_accepted() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        let path = Utf8Path::new("/w/proj/a.py");
        assert_eq!(filter.on_modified(path, t(0.0)), Decision::Accept);
        assert_eq!(filter.on_modified(path, t(0.9)), Decision::Accept);
    }

    #[test]
    fn test_exactly_at_threshold_is_rejected() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        let path = Utf8Path::new("/w/proj/a.py");
        filter.on_modified(path, t(10.0));
        assert_eq!(filter.on_modified(path, t(10.5)), Decision::Reject);
    }

    #[test]
    fn test_close_events_only_first_accepted() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        let path = Utf8Path::new("/w/proj/a.py");
        let accepted = (0..20)
            .map(|i| filter.on_modified(path, t(f64::from(i) * 0.4)))
            .filter(|d| d.is_accept())
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_spaced_events_all_accepted() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        let path = Utf8Path::new("/w/proj/a.py");
        let accepted = (0..20)
            .map(|i| filter.on_modified(path, t(f64::from(i) * 0.6)))
            .filter(|d| d.is_accept())
            .count();
        assert_eq!(accepted, 20);
    }

    #[test]
    fn test_distinct_paths_always_accepted() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        let a = Utf8Path::new("/w/proj/a.py");
        let b = Utf8Path::new("/w/proj/b.py");
        assert!(filter.on_modified(a, t(0.0)).is_accept());
        assert!(filter.on_modified(b, t(0.0)).is_accept());
        assert!(filter.on_modified(a, t(0.01)).is_accept());
    }

    #[test]
    fn test_rejected_event_still_updates_record() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        let path = Utf8Path::new("/w/proj/a.py");
        filter.on_modified(path, t(0.0));
        filter.on_modified(path, t(0.4));
        // 0.8 is 0.8 after the accepted event but only 0.4 after the last seen.
        assert_eq!(filter.on_modified(path, t(0.8)), Decision::Reject);
        assert_eq!(filter.record().last_mod_time, t(0.8));
        assert_eq!(filter.record().last_path, path);
    }

    #[test]
    fn test_clock_going_backwards_counts_as_zero_delta() {
        let mut filter = DebounceFilter::new(THRESHOLD);
        let path = Utf8Path::new("/w/proj/a.py");
        filter.on_modified(path, t(5.0));
        assert_eq!(filter.on_modified(path, t(1.0)), Decision::Reject);
    }

    #[test]
    fn test_change_record_observe_is_functional() {
        let start = ChangeRecord::default();
        let path = Utf8Path::new("/w/proj/a.py");
        let (decision, next) = start.clone().observe(path, t(0.0), THRESHOLD);
        assert_eq!(decision, Decision::Accept);
        assert_eq!(next.most_recent_path, path);
        assert_eq!(next.last_path, path);
        assert_eq!(start, ChangeRecord::default());
    }

    #[test]
    fn test_configurable_threshold() {
        let mut filter = DebounceFilter::new(Duration::from_millis(100));
        let path = Utf8Path::new("/w/proj/a.py");
        filter.on_modified(path, t(0.0));
        assert_eq!(filter.on_modified(path, t(0.2)), Decision::Accept);
        assert_eq!(filter.threshold(), Duration::from_millis(100));
    }

    #[test]
    fn test_rename_temp_marker_is_noise() {
        let kind = classify_rename(
            Utf8Path::new("file.py___jb_tmp___"),
            Utf8Path::new("file.py"),
            &markers(),
        );
        assert_eq!(kind, RenameKind::TempFileNoise("___jb_tmp___".to_owned()));

        let kind = classify_rename(
            Utf8Path::new("/w/proj/file.py"),
            Utf8Path::new("/w/proj/file.py___jb_old___"),
            &markers(),
        );
        assert_eq!(kind, RenameKind::TempFileNoise("___jb_old___".to_owned()));
    }

    #[test]
    fn test_rename_other_suffix_is_genuine() {
        // `___jb_temp___` is an ignore pattern spelling, not a rename marker.
        let kind = classify_rename(
            Utf8Path::new("/w/proj/file.py___jb_temp___"),
            Utf8Path::new("/w/proj/file.py"),
            &markers(),
        );
        assert_eq!(kind, RenameKind::Genuine);

        let kind = classify_rename(
            Utf8Path::new("/w/proj/old.py"),
            Utf8Path::new("/w/proj/new.py"),
            &markers(),
        );
        assert_eq!(kind, RenameKind::Genuine);
    }

    #[test]
    fn test_rename_with_no_markers_is_genuine() {
        let kind = classify_rename(
            Utf8Path::new("file.py___jb_tmp___"),
            Utf8Path::new("file.py"),
            &[],
        );
        assert_eq!(kind, RenameKind::Genuine);
    }
}
