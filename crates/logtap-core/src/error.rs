//! Error taxonomy shared by every logtap stage.

use std::io;
use std::path::PathBuf;

/// A non-monotonic insert into the line buffer. Signals an upstream logic
/// error; it is never repaired silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("non-monotonic insert: first id {first_id} is not greater than buffer max id {max_id}")]
    Corrupt { first_id: u64, max_id: u64 },
    #[error("batch is not sorted by id at position {position}")]
    Unsorted { position: usize },
}

/// Failure to establish a source.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("source is already open")]
    AlreadyOpen,
    #[error("cannot open file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot connect to {addr}: {source}")]
    Socket {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid source target: {0}")]
    InvalidTarget(String),
}

/// Failure while reading a block from an open source.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The read blocked past the hard timeout. Transient.
    #[error("read timed out")]
    Timeout,
    /// The transport failed. Fatal to the reader.
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

impl ReadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ReadError::Timeout)
    }
}

/// A filter pattern that does not compile.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid filter pattern {pattern:?}: {source}")]
pub struct FilterError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}
