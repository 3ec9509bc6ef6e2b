//! # Memory Watchdog
//!
//! Coarse, reactive backpressure. Every component that holds a meaningful
//! amount of memory implements [`MemoryReporter`]; the [`MemoryWatchdog`]
//! periodically sums what they report and, once the total meets the
//! configured threshold, asks every one of them to free what it holds.
//!
//! The watchdog does not prevent growth between checks. It only drains it
//! after the fact.

use crate::config::WatchdogConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Implemented by every component the watchdog tracks.
pub trait MemoryReporter: Send + Sync {
    fn name(&self) -> &str;
    /// Estimated bytes currently held.
    fn current_memory_bytes(&self) -> u64;
    /// Release everything that can be rebuilt or dropped.
    fn free_memory(&self);
}

/// Outcome of a sweep that crossed the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    pub before: u64,
    pub after: u64,
}

pub struct MemoryWatchdog {
    config: WatchdogConfig,
    reporters: Mutex<Vec<Arc<dyn MemoryReporter>>>,
}

impl MemoryWatchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            reporters: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, reporter: Arc<dyn MemoryReporter>) {
        tracing::debug!(reporter = reporter.name(), "memory reporter registered");
        self.reporters.lock().push(reporter);
    }

    pub fn reporter_count(&self) -> usize {
        self.reporters.lock().len()
    }

    /// Sum of what every registered reporter currently holds.
    pub fn total_bytes(&self) -> u64 {
        self.snapshot()
            .iter()
            .map(|r| r.current_memory_bytes())
            .sum()
    }

    /// One watchdog pass. Returns the before/after totals when a sweep ran.
    pub fn check(&self) -> Option<Sweep> {
        let reporters = self.snapshot();
        let before: u64 = reporters.iter().map(|r| r.current_memory_bytes()).sum();
        if before < self.config.threshold_bytes {
            tracing::trace!(total = before, threshold = self.config.threshold_bytes, "memory ok");
            return None;
        }

        for reporter in &reporters {
            let held = reporter.current_memory_bytes();
            reporter.free_memory();
            tracing::debug!(reporter = reporter.name(), freed = held, "freed memory");
        }

        let after: u64 = reporters.iter().map(|r| r.current_memory_bytes()).sum();
        tracing::warn!(
            before,
            after,
            threshold = self.config.threshold_bytes,
            "memory threshold reached, freed registered components"
        );
        Some(Sweep { before, after })
    }

    /// Run [`check`](Self::check) every `interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.check();
                    }
                }
            }
            tracing::debug!("memory watchdog stopped");
        })
    }

    // Callbacks run without the registry lock held.
    fn snapshot(&self) -> Vec<Arc<dyn MemoryReporter>> {
        self.reporters.lock().clone()
    }
}
