//! Line Factory: turns a raw line into a [`LogLine`].
//!
//! Each line is split into a timestamp and the text that follows it. The text
//! is interned through the [`PayloadCache`] and the record receives the next
//! sequential id. A line whose prefix does not parse keeps its whole text as
//! payload and inherits the previous record's timestamp.

use crate::cache::{CacheStats, PayloadCache};
use crate::types::LogLine;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Timestamp extraction
// ---------------------------------------------------------------------------

/// Strategy for splitting a timestamp off the front of a raw line.
pub trait TimestampExtractor: Send + Sync {
    /// Returns the parsed timestamp and the remaining text, or `None` if the
    /// line does not start with a timestamp.
    fn extract<'a>(&self, raw: &'a str) -> Option<(NaiveDateTime, &'a str)>;
}

/// Parses a chrono strftime format at the start of the line.
///
/// Formats without a date component (the default `%H:%M:%S%.3f`) are
/// combined with `reference_date`.
#[derive(Debug, Clone)]
pub struct ClockFormat {
    format: String,
    reference_date: NaiveDate,
}

impl ClockFormat {
    pub fn new(format: impl Into<String>) -> Self {
        Self::with_reference_date(format, Local::now().date_naive())
    }

    pub fn with_reference_date(format: impl Into<String>, reference_date: NaiveDate) -> Self {
        Self {
            format: format.into(),
            reference_date,
        }
    }
}

impl TimestampExtractor for ClockFormat {
    fn extract<'a>(&self, raw: &'a str) -> Option<(NaiveDateTime, &'a str)> {
        let (ts, rest) = match NaiveDateTime::parse_and_remainder(raw, &self.format) {
            Ok(parsed) => parsed,
            Err(_) => {
                let (time, rest) = NaiveTime::parse_and_remainder(raw, &self.format).ok()?;
                (self.reference_date.and_time(time), rest)
            }
        };
        Some((ts, rest.trim_start()))
    }
}

/// Never finds a timestamp; every line inherits the ingest time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTimestamp;

impl TimestampExtractor for NoTimestamp {
    fn extract<'a>(&self, _raw: &'a str) -> Option<(NaiveDateTime, &'a str)> {
        None
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

struct Cursor {
    next_id: u64,
    last_timestamp: Option<NaiveDateTime>,
}

pub struct LineFactory {
    cache: Arc<PayloadCache>,
    extractor: Box<dyn TimestampExtractor>,
    cursor: Mutex<Cursor>,
}

impl LineFactory {
    pub fn new(cache: Arc<PayloadCache>, extractor: Box<dyn TimestampExtractor>) -> Self {
        Self {
            cache,
            extractor,
            cursor: Mutex::new(Cursor {
                next_id: 0,
                last_timestamp: None,
            }),
        }
    }

    /// Build the next record from `raw`.
    pub fn build(&self, raw: &str) -> LogLine {
        let extracted = self.extractor.extract(raw);
        let text = extracted.map_or(raw, |(_, rest)| rest);
        let payload = self.cache.intern(text);

        let mut cursor = self.cursor.lock();
        let timestamp = match extracted {
            Some((ts, _)) => ts,
            None => cursor
                .last_timestamp
                .unwrap_or_else(|| Local::now().naive_local()),
        };
        cursor.last_timestamp = Some(timestamp);
        let id = cursor.next_id;
        cursor.next_id += 1;

        LogLine::new(id, timestamp, payload)
    }

    /// Id the next record will receive.
    pub fn next_id(&self) -> u64 {
        self.cursor.lock().next_id
    }

    pub fn cache(&self) -> &Arc<PayloadCache> {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
