//! SSH transport backed by `russh`.
//!
//! [`SshConnector`] dials the configured host, verifies its key against the
//! optional pinned fingerprint, and authenticates with a private key or a
//! password. Keepalives run every `remote.keepalive_secs` so an idle watch
//! session survives NAT timeouts.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, info, warn};

use ac_core::RemoteConfig;

use crate::error::{ConnectionError, TransferError};
use crate::transport::{ChannelMessage, Connection, Connector, RemoteChannel};

/// Missed keepalives tolerated before the session is considered dead.
const KEEPALIVE_MAX: usize = 3;

/// Opens SSH sessions to the host named in a [`RemoteConfig`].
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: RemoteConfig,
}

impl SshConnector {
    /// Creates a connector. No connection is attempted until
    /// [`Connector::connect`].
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    async fn authenticate(&self, handle: &mut client::Handle<HostKeyCheck>) -> Result<(), ConnectionError> {
        let user = &self.config.user;

        if let Some(identity) = &self.config.identity_file {
            debug!(path = %identity, "Loading identity file");
            let key_data = tokio::fs::read(identity)
                .await
                .map_err(|e| ConnectionError::Credentials(format!("cannot read {identity}: {e}")))?;
            let key_pair = russh_keys::decode_secret_key(&String::from_utf8_lossy(&key_data), None)
                .map_err(|e| ConnectionError::Credentials(format!("cannot decode {identity}: {e}")))?;
            let accepted = handle
                .authenticate_publickey(user.as_str(), Arc::new(key_pair))
                .await
                .map_err(|e| self.handshake_error(&e))?;
            if accepted {
                return Ok(());
            }
            warn!(path = %identity, "Key authentication rejected");
        }

        if let Some(password) = &self.config.password {
            let accepted = handle
                .authenticate_password(user.as_str(), password.as_str())
                .await
                .map_err(|e| self.handshake_error(&e))?;
            if accepted {
                return Ok(());
            }
        } else if self.config.identity_file.is_none() {
            return Err(ConnectionError::Credentials(
                "neither a password nor an identity file is configured".to_owned(),
            ));
        }

        Err(ConnectionError::AuthenticationRejected {
            user: user.clone(),
            address: self.config.address(),
        })
    }

    fn handshake_error(&self, error: &russh::Error) -> ConnectionError {
        match error {
            russh::Error::UnknownKey => ConnectionError::HostKeyRejected {
                address: self.config.address(),
            },
            other => ConnectionError::Handshake {
                address: self.config.address(),
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Connection = SshConnection;

    async fn connect(&self) -> Result<SshConnection, ConnectionError> {
        let address = self.config.address();
        info!(address = %address, user = %self.config.user, "Connecting via SSH");

        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.config.keepalive_interval()),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        });
        let handler = HostKeyCheck {
            expected: self.config.host_key_fingerprint.clone(),
        };

        let timeout = self.config.connect_timeout();
        let mut handle = tokio::time::timeout(timeout, client::connect(ssh_config, address.as_str(), handler))
            .await
            .map_err(|_| ConnectionError::Timeout {
                address: address.clone(),
                after: timeout,
            })?
            .map_err(|e| self.handshake_error(&e))?;

        debug!(address = %address, "SSH handshake complete");
        self.authenticate(&mut handle).await?;
        info!(address = %address, "SSH authentication successful");

        Ok(SshConnection { handle, address })
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.config.user, self.config.address())
    }
}

/// Verifies the server key against a pinned SHA-256 fingerprint.
struct HostKeyCheck {
    expected: Option<String>,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let actual = server_public_key.fingerprint();
        match &self.expected {
            Some(expected) => {
                let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
                if expected == actual {
                    Ok(true)
                } else {
                    warn!(expected = %expected, actual = %actual, "Host key fingerprint mismatch");
                    Ok(false)
                }
            }
            None => {
                warn!(fingerprint = %format!("SHA256:{actual}"), "No host key pinned, accepting server key");
                Ok(true)
            }
        }
    }
}

/// An authenticated SSH session.
pub struct SshConnection {
    handle: client::Handle<HostKeyCheck>,
    address: String,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for SshConnection {
    type Channel = SshChannel;

    async fn exec(&mut self, command: &str) -> Result<SshChannel, TransferError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TransferError::channel("open channel", e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| TransferError::channel("exec", e))?;
        debug!(address = %self.address, command = command, "Remote command started");
        Ok(SshChannel { channel })
    }

    async fn disconnect(&mut self) -> Result<(), TransferError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| TransferError::channel("disconnect", e))
    }
}

/// A session channel running one remote command.
pub struct SshChannel {
    channel: russh::Channel<client::Msg>,
}

impl std::fmt::Debug for SshChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshChannel").field("id", &self.channel.id()).finish()
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| TransferError::channel("write", e))
    }

    async fn send_eof(&mut self) -> Result<(), TransferError> {
        self.channel
            .eof()
            .await
            .map_err(|e| TransferError::channel("send eof", e))
    }

    async fn next_message(&mut self) -> Option<ChannelMessage> {
        loop {
            let message = match self.channel.wait().await? {
                ChannelMsg::Data { data } => ChannelMessage::Stdout(data.to_vec()),
                ChannelMsg::ExtendedData { data, ext: 1 } => ChannelMessage::Stderr(data.to_vec()),
                ChannelMsg::ExitStatus { exit_status } => ChannelMessage::ExitStatus(exit_status),
                ChannelMsg::ExitSignal {
                    signal_name,
                    error_message,
                    ..
                } => ChannelMessage::ExitSignal {
                    name: format!("{signal_name:?}"),
                    error_message,
                },
                ChannelMsg::Eof => ChannelMessage::Eof,
                ChannelMsg::Failure => ChannelMessage::Refused,
                ChannelMsg::Close => return None,
                _ => continue,
            };
            return Some(message);
        }
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        self.channel
            .close()
            .await
            .map_err(|e| TransferError::channel("close", e))
    }
}
