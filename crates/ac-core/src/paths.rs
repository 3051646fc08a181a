//! Local and remote path anchors.
//!
//! A [`WatchRoot`] is the directory under observation; its basename anchors
//! relative-path extraction. A [`RemoteRoot`] is the destination prefix, and a
//! [`TransferTarget`] joins the two for a single upload.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The local directory tree being watched.
///
/// Created once at startup and immutable afterwards. The path is absolute
/// and points at an existing directory.
///
/// # Examples
///
/// ```no_run
/// use ac_core::WatchRoot;
///
/// let root = WatchRoot::resolve("/home/u/proj/")?;
/// assert_eq!(root.basename(), "proj");
/// # Ok::<(), ac_core::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchRoot {
    absolute_path: Utf8PathBuf,
    basename: String,
}

impl WatchRoot {
    /// Resolves user input into a watch root.
    ///
    /// `"."` means the current directory. Trailing `/` or `\` separators are
    /// ignored. The directory must exist.
    pub fn resolve(input: &str) -> Result<Self, ConfigError> {
        let path = if input == "." {
            let cwd = std::env::current_dir()?;
            Utf8PathBuf::from_path_buf(cwd).map_err(|p| {
                ConfigError::invalid_path(p.to_string_lossy().into_owned(), "path is not valid UTF-8")
            })?
        } else {
            let trimmed = input.trim_end_matches(['/', '\\']);
            Utf8PathBuf::from(if trimmed.is_empty() { input } else { trimmed })
        };

        if !path.exists() {
            return Err(ConfigError::MissingDirectory(path));
        }
        if !path.is_dir() {
            return Err(ConfigError::invalid_path(path, "not a directory"));
        }

        let absolute_path = path.canonicalize_utf8()?;
        let basename = absolute_path
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| ConfigError::invalid_path(absolute_path.clone(), "has no final component"))?;

        Ok(Self {
            absolute_path,
            basename,
        })
    }

    /// Returns the absolute path of the watched directory.
    #[must_use]
    pub fn absolute_path(&self) -> &Utf8Path {
        &self.absolute_path
    }

    /// Returns the final path component.
    #[must_use]
    pub fn basename(&self) -> &str {
        &self.basename
    }
}

/// Destination prefix on the remote host.
///
/// Always ends in `/` or in a drive-letter `:` so that a relative path can
/// be appended directly.
///
/// # Examples
///
/// ```
/// use ac_core::RemoteRoot;
///
/// assert_eq!(RemoteRoot::new("/home/robot").unwrap().as_str(), "/home/robot/");
/// assert_eq!(RemoteRoot::new("/home/robot/").unwrap().as_str(), "/home/robot/");
/// assert_eq!(RemoteRoot::new("C:").unwrap().as_str(), "C:");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteRoot(String);

impl RemoteRoot {
    /// Normalizes a target directory.
    pub fn new(target: impl Into<String>) -> Result<Self, ConfigError> {
        let mut target = target.into();
        if target.trim().is_empty() {
            return Err(ConfigError::invalid_option("target", "must not be empty"));
        }
        if !target.ends_with('/') && !target.ends_with(':') {
            target.push('/');
        }
        Ok(Self(target))
    }

    /// Returns the normalized prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the transfer target for a relative path below this root.
    #[must_use]
    pub fn target(&self, relative_path: impl Into<String>) -> TransferTarget {
        TransferTarget {
            remote_root: self.clone(),
            relative_path: relative_path.into(),
        }
    }
}

impl TryFrom<String> for RemoteRoot {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RemoteRoot> for String {
    fn from(root: RemoteRoot) -> Self {
        root.0
    }
}

impl fmt::Display for RemoteRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where one committed change is uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferTarget {
    /// Destination prefix.
    pub remote_root: RemoteRoot,
    /// Path below the watch root, `/` separated.
    pub relative_path: String,
}

impl TransferTarget {
    /// Returns the complete remote destination path.
    #[must_use]
    pub fn full_path(&self) -> String {
        format!("{}{}", self.remote_root, self.relative_path)
    }
}
