//! Source Reader: pulls raw lines from one transport into an internal queue.
//!
//! There is one driver, [`SourceReader`], and one block-reading algorithm.
//! The transports ([`SourceTarget::File`], [`SourceTarget::Socket`]) only
//! differ in how they connect and whether the end of their stream is final.
//!
//! # Block reading
//!
//! A block keeps growing until both the minimum time and minimum size are
//! satisfied, or the maximum time or maximum size is hit. A single read that
//! blocks past `read_timeout` ends the block; if nothing was read at all this
//! is a transient [`ReadError::Timeout`] and the loop carries on.
//!
//! An empty block means the source is caught up. In [`EofMode::Stop`] the
//! reader moves to `EofReached` and stops; in [`EofMode::Continue`] it sleeps
//! for `eof_poll_interval` and polls again. A socket whose peer hung up can
//! never produce more data, so it reaches `EofReached` in either mode. In
//! stop mode an unterminated last line is queued as it stands.
//!
//! Every state change is also appended to a transition log that the
//! publisher collects, so a reader that opens and closes between two polls
//! still reports both steps.

use logtap_core::config::ReaderConfig;
use logtap_core::{OpenError, ReadError, ReaderState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Targets and modes
// ---------------------------------------------------------------------------

/// Where a reader pulls its lines from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceTarget {
    File(PathBuf),
    Socket { host: String, port: u16 },
}

impl SourceTarget {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        SourceTarget::File(path.into())
    }

    pub fn socket(host: impl Into<String>, port: u16) -> Self {
        SourceTarget::Socket {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for SourceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceTarget::File(path) => write!(f, "file:{}", path.display()),
            SourceTarget::Socket { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

/// What the reader does once it has caught up with its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofMode {
    /// Move to `EofReached` and stop. For static files.
    Stop,
    /// Keep polling. For tailing a growing file or a live socket.
    Continue,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

enum Transport {
    File(BufReader<File>),
    Socket(BufReader<TcpStream>),
}

impl Transport {
    async fn connect(target: &SourceTarget, config: &ReaderConfig) -> Result<Self, OpenError> {
        match target {
            SourceTarget::File(path) => {
                if path.as_os_str().is_empty() {
                    return Err(OpenError::InvalidTarget("empty file path".into()));
                }
                let file = File::open(path).await.map_err(|source| OpenError::File {
                    path: path.clone(),
                    source,
                })?;
                Ok(Transport::File(BufReader::new(file)))
            }
            SourceTarget::Socket { host, port } => {
                if host.is_empty() || *port == 0 {
                    return Err(OpenError::InvalidTarget(format!("bad socket address {host}:{port}")));
                }
                let addr = format!("{host}:{port}");
                let stream = tokio::time::timeout(
                    config.connect_timeout(),
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| OpenError::Socket {
                    addr: addr.clone(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })?
                .map_err(|source| OpenError::Socket { addr, source })?;
                Ok(Transport::Socket(BufReader::new(stream)))
            }
        }
    }

    /// Whether reaching the end of the stream means no more data can ever
    /// arrive.
    fn end_is_final(&self) -> bool {
        matches!(self, Transport::Socket(_))
    }

    /// Next complete line, or `None` when nothing more is available right now.
    ///
    /// Bytes of an unfinished line stay in `pending` across calls (and across
    /// cancelled calls) until the newline arrives.
    async fn read_line(&mut self, pending: &mut Vec<u8>) -> io::Result<Option<String>> {
        let n = match self {
            Transport::File(r) => r.read_until(b'\n', pending).await?,
            Transport::Socket(r) => r.read_until(b'\n', pending).await?,
        };
        let complete = pending.last() == Some(&b'\n');
        if n == 0 || !complete {
            if self.end_is_final() && !pending.is_empty() {
                return Ok(Some(take_line(pending)));
            }
            return Ok(None);
        }
        Ok(Some(take_line(pending)))
    }
}

fn take_line(pending: &mut Vec<u8>) -> String {
    let mut bytes = std::mem::take(pending);
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

// ---------------------------------------------------------------------------
// Block reading
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Block {
    lines: Vec<String>,
    /// The transport hit a final end of stream.
    exhausted: bool,
}

async fn read_block(
    transport: &mut Transport,
    pending: &mut Vec<u8>,
    config: &ReaderConfig,
) -> Result<Block, ReadError> {
    let started = Instant::now();
    let mut lines = Vec::new();

    loop {
        let elapsed = started.elapsed();
        if lines.len() >= config.max_block_size || elapsed >= config.max_block_time() {
            break;
        }
        if lines.len() >= config.min_block_size && elapsed >= config.min_block_time() {
            break;
        }

        let budget = config.read_timeout().min(config.max_block_time() - elapsed);
        match tokio::time::timeout(budget, transport.read_line(pending)).await {
            Err(_) if lines.is_empty() => return Err(ReadError::Timeout),
            Err(_) => break,
            Ok(Ok(Some(line))) => lines.push(line),
            Ok(Ok(None)) => {
                let exhausted = transport.end_is_final();
                return Ok(Block { lines, exhausted });
            }
            Ok(Err(err)) => return Err(ReadError::Io(err)),
        }
    }

    Ok(Block {
        lines,
        exhausted: false,
    })
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Current state plus the transitions nobody has collected yet.
#[derive(Default)]
struct StateCell {
    current: AtomicU8,
    changes: Mutex<Vec<ReaderState>>,
}

impl StateCell {
    fn get(&self) -> ReaderState {
        ReaderState::from_u8(self.current.load(Ordering::Acquire))
    }

    fn set(&self, state: ReaderState) {
        let mut changes = self.changes.lock();
        let previous = ReaderState::from_u8(self.current.swap(state.as_u8(), Ordering::AcqRel));
        if previous != state {
            changes.push(state);
        }
    }

    fn take_changes(&self) -> Vec<ReaderState> {
        std::mem::take(&mut *self.changes.lock())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SourceReader {
    target: SourceTarget,
    config: ReaderConfig,
    eof_mode: EofMode,
    state: Arc<StateCell>,
    queue: Arc<Mutex<VecDeque<String>>>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl SourceReader {
    pub fn new(target: SourceTarget, config: ReaderConfig, eof_mode: EofMode) -> Self {
        Self {
            target,
            config,
            eof_mode,
            state: Arc::new(StateCell::default()),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn target(&self) -> &SourceTarget {
        &self.target
    }

    pub fn eof_mode(&self) -> EofMode {
        self.eof_mode
    }

    pub fn state(&self) -> ReaderState {
        self.state.get()
    }

    /// State changes since the last call, oldest first.
    pub fn take_transitions(&self) -> Vec<ReaderState> {
        self.state.take_changes()
    }

    /// Establish the transport and start the read loop.
    ///
    /// Fails if the reader is not closed or the transport cannot be set up;
    /// the state stays `Closed` in the latter case.
    pub async fn open(&self) -> Result<(), OpenError> {
        let mut slot = self.worker.lock().await;
        if self.state() != ReaderState::Closed {
            return Err(OpenError::AlreadyOpen);
        }
        if let Some(stale) = slot.take() {
            // A loop that ended on its own (I/O error) has already finished.
            stale.cancel.cancel();
            let _ = stale.handle.await;
        }

        let transport = Transport::connect(&self.target, &self.config).await?;
        self.state.set(ReaderState::Open);
        tracing::info!(source = %self.target, mode = ?self.eof_mode, "source opened");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            transport,
            self.target.clone(),
            self.config.clone(),
            self.eof_mode,
            Arc::clone(&self.state),
            Arc::clone(&self.queue),
            cancel.clone(),
        ));
        *slot = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Stop the read loop and release the transport. Idempotent.
    ///
    /// Returns once the OS handle has been dropped.
    pub async fn close(&self) {
        let mut slot = self.worker.lock().await;
        if let Some(worker) = slot.take() {
            worker.cancel.cancel();
            if let Err(err) = worker.handle.await {
                tracing::warn!(source = %self.target, error = %err, "read loop ended abnormally");
            }
            tracing::info!(source = %self.target, "source closed");
        }
        self.state.set(ReaderState::Closed);
    }

    pub fn has_data(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    /// Take every queued line.
    pub fn drain(&self) -> Vec<String> {
        self.queue.lock().drain(..).collect()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

async fn read_loop(
    mut transport: Transport,
    target: SourceTarget,
    config: ReaderConfig,
    eof_mode: EofMode,
    state: Arc<StateCell>,
    queue: Arc<Mutex<VecDeque<String>>>,
    cancel: CancellationToken,
) {
    let mut pending = Vec::new();

    loop {
        let block = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            block = read_block(&mut transport, &mut pending, &config) => block,
        };

        match block {
            Ok(Block { lines, .. }) if !lines.is_empty() => {
                tracing::trace!(source = %target, lines = lines.len(), "block read");
                queue.lock().extend(lines);
            }
            Ok(Block { exhausted, .. }) => {
                if exhausted || eof_mode == EofMode::Stop {
                    if !pending.is_empty() {
                        queue.lock().push_back(take_line(&mut pending));
                    }
                    state.set(ReaderState::EofReached);
                    tracing::info!(source = %target, "end of source reached");
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.eof_poll_interval()) => {}
                }
            }
            Err(ReadError::Timeout) => {
                tracing::trace!(source = %target, "read timed out");
            }
            Err(ReadError::Io(err)) => {
                tracing::warn!(source = %target, error = %err, "read failed, stopping reader");
                state.set(ReaderState::Closed);
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
