//! File filtering for watch events.
//!
//! Filtering happens on the watcher thread, before events reach the channel,
//! so ignored files never cost the coordinator anything.
//!
//! # Examples
//!
//! ```
//! use ac_watcher::{FileFilter, PatternFilter};
//! use camino::Utf8Path;
//!
//! let filter = PatternFilter::new(
//!     &["*.py".to_owned()],
//!     &["*.py___jb_old___".to_owned()],
//!     false,
//! )?;
//!
//! assert!(filter.should_process(Utf8Path::new("/w/proj/main.py")));
//! assert!(!filter.should_process(Utf8Path::new("/w/proj/main.py___jb_old___")));
//! assert!(!filter.should_process(Utf8Path::new("/w/proj/notes.txt")));
//! # Ok::<(), ac_watcher::WatchError>(())
//! ```

use ac_core::WatchConfig;
use camino::Utf8Path;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use smallvec::SmallVec;

use crate::error::WatchError;
use crate::events::RawEvent;

/// A filter for determining which file events to process.
///
/// Filters must be [`Send`] and [`Sync`] because they run on the blocking
/// watcher thread, and `'static` to be moved into the spawned task.
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if events for the given path should be processed.
    fn should_process(&self, path: &Utf8Path) -> bool;

    /// Returns `true` if the event should be processed.
    ///
    /// A rename passes when either of its paths passes.
    fn should_process_event(&self, event: &RawEvent) -> bool {
        event.paths().iter().any(|path| self.should_process(path))
    }
}

/// A filter that accepts all files.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// Include/ignore glob filter.
///
/// A path passes when it matches at least one include pattern (or the include
/// list is empty) and no ignore pattern. Patterns are matched against the full
/// path and `*` also matches `/`, so `*.py` selects Python files at any depth.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    include: GlobSet,
    ignore: GlobSet,
    include_patterns: SmallVec<[String; 4]>,
    ignore_patterns: SmallVec<[String; 4]>,
}

impl PatternFilter {
    /// Compiles include and ignore patterns.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidPattern`] for a malformed glob.
    pub fn new(
        patterns: &[String],
        ignore_patterns: &[String],
        case_sensitive: bool,
    ) -> Result<Self, WatchError> {
        Ok(Self {
            include: build_set(patterns, case_sensitive)?,
            ignore: build_set(ignore_patterns, case_sensitive)?,
            include_patterns: patterns.iter().cloned().collect(),
            ignore_patterns: ignore_patterns.iter().cloned().collect(),
        })
    }

    /// Builds the filter described by a [`WatchConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidPattern`] for a malformed glob.
    pub fn from_config(config: &WatchConfig) -> Result<Self, WatchError> {
        Self::new(&config.patterns, &config.ignore_patterns, config.case_sensitive)
    }

    /// Returns the include patterns.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.include_patterns
    }

    /// Returns the ignore patterns.
    #[must_use]
    pub fn ignore_patterns(&self) -> &[String] {
        &self.ignore_patterns
    }
}

fn build_set(patterns: &[String], case_sensitive: bool) -> Result<GlobSet, WatchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .literal_separator(false)
            .build()
            .map_err(|source| WatchError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| WatchError::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}

impl FileFilter for PatternFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        if self.ignore.is_match(path.as_str()) {
            return false;
        }
        self.include_patterns.is_empty() || self.include.is_match(path.as_str())
    }
}

// Implement FileFilter for boxed filters
impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

// Implement FileFilter for Arc-wrapped filters (useful for shared filters)
impl<F: FileFilter + ?Sized> FileFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}
