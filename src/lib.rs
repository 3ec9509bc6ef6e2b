//! logtap — tail, deduplicate, buffer and fan out live log streams.
//!
//! This crate holds the two coordinating stages on top of `logtap-core` and
//! `logtap-feeds`, and is what the `logtap` binary and the integration tests
//! import.
//!
//! # Architecture
//!
//! ```text
//! Connector ──► StreamHub ◄── StreamPublisher ◄── SourceReader
//!                  │
//!                  ├──► LineFactory ──► PayloadCache
//!                  ├──► LineBuffer
//!                  └──► subscribers / range requesters
//! ```
//!
//! Every stage runs on its own tokio task and is stopped through a
//! `CancellationToken`; nothing holds a lock across a listener callback.

pub mod connector;
pub mod hub;

pub use connector::{Connector, Opener};
pub use hub::{
    HubError, LineSubscriber, RangeRequester, RangeResponse, RequestId, StreamHub, SubscriptionId,
};
