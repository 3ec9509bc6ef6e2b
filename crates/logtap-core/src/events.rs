//! Listener contracts for reader state transitions and raw line blocks, plus
//! the slow-callback timing used wherever listeners are invoked.

use crate::types::ReaderState;
use std::time::{Duration, Instant};

/// Receives reader state transitions. `name` is stable and appears in
/// slow-callback diagnostics.
pub trait StateListener: Send + Sync {
    fn name(&self) -> &str;
    fn on_opened(&self);
    fn on_closed(&self);
    fn on_eof_reached(&self);
}

/// Receives blocks of raw lines as they are drained from a reader.
pub trait BlockListener: Send + Sync {
    fn name(&self) -> &str;
    fn on_block(&self, lines: &[String]);
}

/// Dispatch a state to the matching [`StateListener`] callback.
pub fn notify_state(listener: &dyn StateListener, state: ReaderState) {
    match state {
        ReaderState::Closed => listener.on_closed(),
        ReaderState::Open => listener.on_opened(),
        ReaderState::EofReached => listener.on_eof_reached(),
    }
}

/// Run `f`, warning when it takes longer than `threshold`. The callback is
/// never aborted.
pub fn timed<R>(listener: &str, threshold: Duration, f: impl FnOnce() -> R) -> R {
    let started = Instant::now();
    let out = f();
    let elapsed = started.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            listener,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            "slow listener"
        );
    }
    out
}
