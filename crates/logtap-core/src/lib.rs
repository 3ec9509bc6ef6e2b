//! logtap-core — the ingestion core of logtap.
//!
//! This crate holds the value types and the stages that do not touch a
//! transport: record construction, interning, buffering and memory pressure.
//!
//! # Architecture
//!
//! ```text
//! SourceReader ──► Publisher ──► StreamHub ──► subscribers
//!                                   │
//!                      LineFactory ─┤─ PayloadCache
//!                                   └─ LineBuffer ◄── range requests
//!
//! MemoryWatchdog ──► { PayloadCache, LineBuffer, … }
//! ```
//!
//! Readers and the publisher live in `logtap-feeds`; the hub and connector in
//! the `logtap` crate.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod filter;
pub mod memory;
pub mod types;

pub use buffer::LineBuffer;
pub use cache::{CacheStats, PayloadCache};
pub use config::Config;
pub use error::{BufferError, FilterError, OpenError, ReadError};
pub use events::{BlockListener, StateListener};
pub use factory::{ClockFormat, LineFactory, NoTimestamp, TimestampExtractor};
pub use filter::LineFilter;
pub use memory::{MemoryReporter, MemoryWatchdog, Sweep};
pub use types::{LogLine, LogLineDat, ReaderState};
