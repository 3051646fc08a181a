//! In-memory remote host for tests.
//!
//! [`FakeRemote`] emulates enough of an SSH server to exercise
//! [`TransferSession`](crate::TransferSession) without a network: `scp -t`
//! commands get a sink that parses the upload and stores the file, and any
//! other command answers from canned responses.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{ConnectionError, TransferError};
use crate::transport::{ChannelMessage, Connection, Connector, RemoteChannel};

/// A file written by the fake sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// File contents.
    pub contents: Vec<u8>,
    /// Permission bits from the `C` line.
    pub mode: u32,
    /// Modification time from the `T` line.
    pub mtime: u64,
    /// Access time from the `T` line.
    pub atime: u64,
}

#[derive(Debug, Clone)]
struct CannedOutput {
    stdout: String,
    status: u32,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, RemoteFile>,
    uploads: Vec<String>,
    commands: Vec<String>,
    responses: HashMap<String, CannedOutput>,
    rejected: HashSet<String>,
    connects: usize,
    disconnects: usize,
    failing_connects: usize,
    generation: u64,
    write_delay: Duration,
    connect_delay: Duration,
}

/// Shared handle to the fake host's state.
///
/// Clones observe the same host.
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<State>>,
}

impl FakeRemote {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector to this host.
    #[must_use]
    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            state: Arc::clone(&self.state),
        }
    }

    /// The file stored at `path`, if any.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<RemoteFile> {
        self.state.lock().files.get(path).cloned()
    }

    /// Remote paths of every completed upload, in order.
    #[must_use]
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().uploads.clone()
    }

    /// Every command executed, in order, including `scp -t` sinks.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Number of connection attempts, successful or not.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of explicit disconnects.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failing_connects = count;
    }

    /// Makes uploads to `path` fail with a permission error.
    pub fn reject_path(&self, path: impl Into<String>) {
        self.state.lock().rejected.insert(path.into());
    }

    /// Sets the stdout and exit status returned for `command`.
    ///
    /// Commands without a response exit with status 127.
    pub fn respond_to(&self, command: impl Into<String>, stdout: impl Into<String>, status: u32) {
        self.state.lock().responses.insert(
            command.into(),
            CannedOutput {
                stdout: stdout.into(),
                status,
            },
        );
    }

    /// Breaks every open connection. New connections work again.
    pub fn lose_session(&self) {
        self.state.lock().generation += 1;
    }

    /// Delays every write to a sink, to simulate a slow link.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().write_delay = delay;
    }

    /// Makes every connect take `delay` before the session is handed out.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }
}

/// [`Connector`] for a [`FakeRemote`].
#[derive(Debug, Clone)]
pub struct FakeConnector {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, ConnectionError> {
        let delay = self.state.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ConnectionError::Handshake {
                address: "fake:22".to_owned(),
                message: "connection refused".to_owned(),
            });
        }
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
            generation: state.generation,
        })
    }

    fn describe(&self) -> String {
        "robot@fake:22".to_owned()
    }
}

/// One connection to a [`FakeRemote`].
#[derive(Debug)]
pub struct FakeConnection {
    state: Arc<Mutex<State>>,
    generation: u64,
}

#[async_trait]
impl Connection for FakeConnection {
    type Channel = FakeChannel;

    async fn exec(&mut self, command: &str) -> Result<FakeChannel, TransferError> {
        let mut state = self.state.lock();
        if state.generation != self.generation {
            return Err(TransferError::channel("open channel", "connection reset by peer"));
        }
        state.commands.push(command.to_owned());

        let channel = if let Some(target) = command.strip_prefix("scp -t ") {
            FakeChannel::sink(Arc::clone(&self.state), unquote(target))
        } else {
            let outbox = match state.responses.get(command) {
                Some(canned) => vec![
                    ChannelMessage::Stdout(canned.stdout.clone().into_bytes()),
                    ChannelMessage::ExitStatus(canned.status),
                    ChannelMessage::Eof,
                ],
                None => vec![
                    ChannelMessage::Stderr(format!("sh: 1: {command}: not found\n").into_bytes()),
                    ChannelMessage::ExitStatus(127),
                    ChannelMessage::Eof,
                ],
            };
            FakeChannel {
                state: Arc::clone(&self.state),
                outbox: outbox.into(),
                sink: None,
            }
        };
        Ok(channel)
    }

    async fn disconnect(&mut self) -> Result<(), TransferError> {
        self.state.lock().disconnects += 1;
        Ok(())
    }
}

#[derive(Debug)]
enum Phase {
    Header,
    Data { remaining: u64 },
    Terminator,
    Done,
    Failed,
}

#[derive(Debug)]
struct Sink {
    path: String,
    phase: Phase,
    buffer: Vec<u8>,
    file: RemoteFile,
}

/// Channel of a [`FakeConnection`].
#[derive(Debug)]
pub struct FakeChannel {
    state: Arc<Mutex<State>>,
    outbox: VecDeque<ChannelMessage>,
    sink: Option<Sink>,
}

impl FakeChannel {
    fn sink(state: Arc<Mutex<State>>, path: String) -> Self {
        Self {
            state,
            outbox: VecDeque::from([ChannelMessage::Stdout(vec![0])]),
            sink: Some(Sink {
                path,
                phase: Phase::Header,
                buffer: Vec::new(),
                file: RemoteFile {
                    contents: Vec::new(),
                    mode: 0,
                    mtime: 0,
                    atime: 0,
                },
            }),
        }
    }

    fn ack(&mut self) {
        self.outbox.push_back(ChannelMessage::Stdout(vec![0]));
    }

    fn fail(&mut self, message: &str) {
        let mut reply = vec![2];
        reply.extend_from_slice(message.as_bytes());
        reply.push(b'\n');
        self.outbox.push_back(ChannelMessage::Stdout(reply));
        self.outbox.push_back(ChannelMessage::ExitStatus(1));
        self.outbox.push_back(ChannelMessage::Eof);
        if let Some(sink) = self.sink.as_mut() {
            sink.phase = Phase::Failed;
        }
    }

    /// Consumes as much buffered input as the sink's current phase allows.
    fn pump(&mut self) {
        loop {
            let Some(sink) = self.sink.as_mut() else { return };
            match sink.phase {
                Phase::Header => {
                    let Some(end) = sink.buffer.iter().position(|&b| b == b'\n') else {
                        return;
                    };
                    let line: Vec<u8> = sink.buffer.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&line[..end]).into_owned();
                    self.header_line(&line);
                }
                Phase::Data { remaining } => {
                    if remaining == 0 {
                        sink.phase = Phase::Terminator;
                        continue;
                    }
                    if sink.buffer.is_empty() {
                        return;
                    }
                    let take = usize::try_from(remaining).map_or(sink.buffer.len(), |r| r.min(sink.buffer.len()));
                    sink.file.contents.extend(sink.buffer.drain(..take));
                    sink.phase = Phase::Data {
                        remaining: remaining - take as u64,
                    };
                }
                Phase::Terminator => {
                    if sink.buffer.is_empty() {
                        return;
                    }
                    let byte = sink.buffer.remove(0);
                    if byte != 0 {
                        self.fail("scp: protocol error: expected end of file");
                        continue;
                    }
                    let path = sink.path.clone();
                    let file = sink.file.clone();
                    sink.phase = Phase::Done;
                    let mut state = self.state.lock();
                    state.uploads.push(path.clone());
                    state.files.insert(path, file);
                    drop(state);
                    self.ack();
                }
                Phase::Done | Phase::Failed => {
                    sink.buffer.clear();
                    return;
                }
            }
        }
    }

    fn header_line(&mut self, line: &str) {
        let Some(sink) = self.sink.as_mut() else { return };
        if let Some(times) = line.strip_prefix('T') {
            let fields: Vec<u64> = times.split(' ').filter_map(|f| f.parse().ok()).collect();
            if let [mtime, 0, atime, 0] = fields[..] {
                sink.file.mtime = mtime;
                sink.file.atime = atime;
                self.ack();
            } else {
                self.fail("scp: protocol error: mtime.sec not delimited");
            }
        } else if let Some(file) = line.strip_prefix('C') {
            let mut fields = file.splitn(3, ' ');
            let mode = fields.next().and_then(|m| u32::from_str_radix(m, 8).ok());
            let size = fields.next().and_then(|s| s.parse::<u64>().ok());
            match (mode, size, fields.next()) {
                (Some(mode), Some(size), Some(_name)) => {
                    if self.state.lock().rejected.contains(&sink.path) {
                        let message = format!("scp: {}: Permission denied", sink.path);
                        self.fail(&message);
                        return;
                    }
                    sink.file.mode = mode;
                    sink.phase = Phase::Data { remaining: size };
                    self.ack();
                }
                _ => self.fail("scp: protocol error: bad mode"),
            }
        } else {
            self.fail("scp: protocol error: expected control record");
        }
    }
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransferError> {
        let delay = self.state.lock().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.buffer.extend_from_slice(data);
            self.pump();
        }
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<(), TransferError> {
        if let Some(sink) = self.sink.as_ref() {
            match sink.phase {
                Phase::Done => {
                    self.outbox.push_back(ChannelMessage::ExitStatus(0));
                    self.outbox.push_back(ChannelMessage::Eof);
                }
                Phase::Failed => {}
                _ => {
                    self.outbox.push_back(ChannelMessage::ExitStatus(1));
                    self.outbox.push_back(ChannelMessage::Eof);
                }
            }
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Option<ChannelMessage> {
        self.outbox.pop_front()
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        self.outbox.clear();
        Ok(())
    }
}

fn unquote(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('\'')
        .and_then(|q| q.strip_suffix('\''))
        .unwrap_or(quoted);
    inner.replace("'\\''", "'")
}
