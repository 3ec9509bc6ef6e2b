//! Shared test utilities for logtap integration harnesses.
//!
//! Import everything via `mod common; use common::*;` at the top of each
//! harness file.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod recorders;

pub use fixtures::*;
pub use recorders::*;

use std::future::Future;
use std::time::Duration;

/// Poll `cond` every few milliseconds until it holds, panicking after
/// `within`.
pub async fn wait_for(within: Duration, what: &str, mut cond: impl FnMut() -> bool) {
    let polled = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(within, polled).await.is_err() {
        panic!("timed out after {within:?} waiting for {what}");
    }
}

/// Run `fut` with a generous deadline so a hung worker fails the test
/// instead of the whole run.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation did not finish in time")
}
