//! Core types for logtap-core.
//!
//! This module defines the value types shared across every stage of the
//! pipeline: the constructed [`LogLine`] record, its interned [`LogLineDat`]
//! payload, and the [`ReaderState`] of a source.

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Deduplicated text content of a line.
///
/// Equality and hashing are by content, so two payloads built from the same
/// text are interchangeable. The payload cache owns the long-lived reference;
/// records hold shared read-only clones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogLineDat {
    text: Arc<str>,
}

impl LogLineDat {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Shared handle to the text, used as the cache key.
    pub fn key(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }

    /// Estimated heap footprint in bytes.
    pub fn memory_size(&self) -> u64 {
        (std::mem::size_of::<Self>() + self.text.len()) as u64
    }
}

impl Serialize for LogLineDat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// An immutable, id-ordered record of the log stream.
///
/// Ids are unique and strictly increasing for the lifetime of the hub that
/// built them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    id: u64,
    timestamp: NaiveDateTime,
    #[serde(rename = "text")]
    payload: Arc<LogLineDat>,
}

impl LogLine {
    pub fn new(id: u64, timestamp: NaiveDateTime, payload: Arc<LogLineDat>) -> Self {
        Self { id, timestamp, payload }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Parsed from the line, or inherited from the previous record.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn payload(&self) -> &Arc<LogLineDat> {
        &self.payload
    }

    pub fn text(&self) -> &str {
        self.payload.text()
    }

    /// Estimated footprint of the record itself plus its text.
    pub fn memory_size(&self) -> u64 {
        (std::mem::size_of::<Self>() + self.payload.text().len()) as u64
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.id, self.timestamp.format("%H:%M:%S%.3f"), self.text())
    }
}

/// Lifecycle of a source reader: `Closed → Open → EofReached`.
///
/// Owned and mutated by the reader; everyone else only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReaderState {
    #[default]
    Closed,
    Open,
    EofReached,
}

impl ReaderState {
    pub fn as_u8(self) -> u8 {
        match self {
            ReaderState::Closed => 0,
            ReaderState::Open => 1,
            ReaderState::EofReached => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ReaderState::Open,
            2 => ReaderState::EofReached,
            _ => ReaderState::Closed,
        }
    }
}

impl std::fmt::Display for ReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderState::Closed => write!(f, "closed"),
            ReaderState::Open => write!(f, "open"),
            ReaderState::EofReached => write!(f, "eof"),
        }
    }
}
