//! Core types, configuration, and errors for autocopy.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - [`ConfigError`] for startup validation failures
//! - Configuration structures ([`Config`], [`WatchConfig`], [`RemoteConfig`],
//!   [`TransferConfig`])
//! - Path anchors ([`WatchRoot`], [`RemoteRoot`], [`TransferTarget`])

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod paths;

pub use config::{Config, RemoteConfig, TimestampSource, TransferConfig, WatchConfig};
pub use error::ConfigError;
pub use paths::{RemoteRoot, TransferTarget, WatchRoot};
