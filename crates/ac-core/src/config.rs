//! Configuration structures for autocopy.
//!
//! This module provides configuration types for all components of the application:
//!
//! - [`WatchConfig`] - Change detection settings (debounce threshold, patterns, temp markers)
//! - [`RemoteConfig`] - SSH session settings (host, credentials, keepalive)
//! - [`TransferConfig`] - Upload settings (chunk size, post-transfer command)
//! - [`Config`] - Root configuration combining all settings
//!
//! All configuration types implement [`Default`] and deserialize with
//! `#[serde(default)]`, so a JSON file only needs to name what it overrides.

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which clock stamps a Modified event for the debounce decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TimestampSource {
    /// The file's modification time, read when the event is handled.
    ///
    /// Falls back to the observation time if the file cannot be stat'ed.
    #[default]
    Modified,
    /// The wall-clock time the watcher observed the event.
    Observed,
}

/// Configuration for change detection.
///
/// # Examples
///
/// ```
/// use ac_core::WatchConfig;
/// use std::time::Duration;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.debounce_threshold(), Duration::from_millis(500));
/// assert!(config.recursive);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce threshold in milliseconds.
    ///
    /// A second Modified event for the same file is committed only if it
    /// arrives strictly more than this long after the previous one.
    pub debounce_ms: u64,

    /// Whether to watch subdirectories recursively.
    pub recursive: bool,

    /// Clock used to stamp Modified events.
    pub timestamp_source: TimestampSource,

    /// Glob patterns a path must match to be considered. Empty accepts all.
    pub patterns: Vec<String>,

    /// Glob patterns that exclude a path even if it matches `patterns`.
    pub ignore_patterns: Vec<String>,

    /// Whether glob patterns are matched case-sensitively.
    pub case_sensitive: bool,

    /// Editor temp-file suffixes; a rename whose paths differ by exactly one
    /// of these is treated as save noise.
    pub temp_markers: Vec<String>,

    /// Capacity of the channel between the watcher thread and the coordinator.
    pub channel_capacity: usize,
}

impl WatchConfig {
    /// Returns the debounce threshold as a [`Duration`].
    #[must_use]
    pub const fn debounce_threshold(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid_option(
                "watch.channel_capacity",
                "must be greater than zero",
            ));
        }
        if self.temp_markers.iter().any(String::is_empty) {
            return Err(ConfigError::invalid_option(
                "watch.temp_markers",
                "markers must not be empty strings",
            ));
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            recursive: true,
            timestamp_source: TimestampSource::Modified,
            patterns: vec!["*.py".to_owned()],
            // JetBrains "safe write" leftovers. Note these spell `temp` while the
            // rename markers below spell `tmp`; both are kept as shipped.
            ignore_patterns: vec![
                "*.py___jb_old___".to_owned(),
                "*.py___jb_temp___".to_owned(),
            ],
            case_sensitive: false,
            temp_markers: vec!["___jb_tmp___".to_owned(), "___jb_old___".to_owned()],
            channel_capacity: 100,
        }
    }
}

/// Configuration for the SSH session to the remote device.
///
/// The password is never serialized and is redacted from `Debug` output.
///
/// # Examples
///
/// ```
/// use ac_core::RemoteConfig;
///
/// let config = RemoteConfig::default();
/// assert_eq!(config.port, 22);
/// assert_eq!(config.address(), "ev3dev:22");
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Remote host name or address.
    pub host: String,

    /// Remote SSH port.
    pub port: u16,

    /// User to authenticate as.
    pub user: String,

    /// Password for password authentication.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Private key used for public-key authentication.
    pub identity_file: Option<Utf8PathBuf>,

    /// Expected SHA-256 fingerprint of the server host key.
    ///
    /// When unset, any host key is accepted and its fingerprint is logged.
    pub host_key_fingerprint: Option<String>,

    /// Interval between keepalive messages, in seconds.
    pub keepalive_secs: u64,

    /// Timeout for establishing the connection, in seconds.
    pub connect_timeout_secs: u64,
}

impl RemoteConfig {
    /// Returns `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the keepalive interval.
    #[must_use]
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Returns the connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid_option("remote.host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid_option("remote.port", "must not be zero"));
        }
        if self.user.is_empty() {
            return Err(ConfigError::invalid_option("remote.user", "must not be empty"));
        }
        if self.keepalive_secs == 0 {
            return Err(ConfigError::invalid_option(
                "remote.keepalive_secs",
                "must be greater than zero",
            ));
        }
        match &self.identity_file {
            Some(identity) if !identity.is_file() => Err(ConfigError::invalid_path(
                identity.clone(),
                "identity file does not exist",
            )),
            _ => Ok(()),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "ev3dev".to_owned(),
            port: 22,
            user: "robot".to_owned(),
            password: None,
            identity_file: None,
            host_key_fingerprint: None,
            keepalive_secs: 60,
            connect_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identity_file", &self.identity_file)
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Configuration for individual file uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Size of each chunk read from the local file and written to the channel.
    pub chunk_size: usize,

    /// Remote command to run after every successful upload.
    pub post_command: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32 * 1024,
            post_command: None,
        }
    }
}

/// Root configuration for autocopy.
///
/// Can be loaded from a JSON file and then overridden from the command line.
///
/// # Examples
///
/// ```
/// use ac_core::Config;
///
/// let config = Config::default();
/// let json = serde_json::to_string_pretty(&config).unwrap();
/// assert!(json.contains("debounce_ms"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Change detection configuration.
    pub watch: WatchConfig,

    /// SSH session configuration.
    pub remote: RemoteConfig,

    /// Upload configuration.
    pub transfer: TransferConfig,
}

impl Config {
    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Checks option values that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.watch.validate()?;
        self.remote.validate()?;
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::invalid_option(
                "transfer.chunk_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_config_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.debounce_ms, 500);
        assert!(config.recursive);
        assert_eq!(config.timestamp_source, TimestampSource::Modified);
        assert_eq!(config.patterns, vec!["*.py"]);
        assert_eq!(config.temp_markers, vec!["___jb_tmp___", "___jb_old___"]);
    }

    #[test]
    fn test_remote_config_defaults() {
        let config = RemoteConfig::default();
        assert_eq!(config.address(), "ev3dev:22");
        assert_eq!(config.keepalive_interval(), Duration::from_secs(60));
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert!(config.password.is_none());
    }

    #[test]
    fn test_password_is_not_serialized_or_debug_printed() {
        let config = RemoteConfig {
            password: Some("maker".to_owned()),
            ..RemoteConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("maker"));
        assert!(!format!("{config:?}").contains("maker"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let json = r#"{"watch": {"debounce_ms": 250}, "remote": {"host": "pi", "password": "x"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.remote.host, "pi");
        assert_eq!(config.remote.password.as_deref(), Some("x"));
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.transfer.chunk_size, 32 * 1024);
    }

    #[test]
    fn test_timestamp_source_serialization() {
        assert_eq!(
            serde_json::to_string(&TimestampSource::Modified).unwrap(),
            r#""modified""#
        );
        assert_eq!(
            serde_json::to_string(&TimestampSource::Observed).unwrap(),
            r#""observed""#
        );
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.transfer.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOption { option, .. }) if option == "transfer.chunk_size"
        ));

        let mut config = Config::default();
        config.remote.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.watch.temp_markers.push(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("autocopy.json")).unwrap();
        std::fs::write(&path, r#"{"transfer": {"post_command": "sync"}}"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.transfer.post_command.as_deref(), Some("sync"));

        let missing = Config::from_json_file(Utf8Path::new("/no/such/autocopy.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_password_never_serialized() {
        let config = RemoteConfig {
            password: Some("maker".to_owned()),
            ..RemoteConfig::default()
        };
        insta::assert_json_snapshot!(config, @r#"
        {
          "host": "ev3dev",
          "port": 22,
          "user": "robot",
          "identity_file": null,
          "host_key_fingerprint": null,
          "keepalive_secs": 60,
          "connect_timeout_secs": 30
        }
        "#);
        assert!(!format!("{config:?}").contains("maker"));
    }
}
