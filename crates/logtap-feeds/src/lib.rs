//! logtap-feeds — line sources for logtap.
//!
//! A [`SourceReader`] pulls raw lines from a file or a TCP socket into its own
//! queue on a background task. The [`StreamPublisher`] polls the active reader
//! and fans its state transitions and line blocks out to listeners.

pub mod publisher;
pub mod reader;

pub use publisher::StreamPublisher;
pub use reader::{EofMode, SourceReader, SourceTarget};
