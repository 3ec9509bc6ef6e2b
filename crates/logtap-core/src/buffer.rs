//! Line Buffer: ordered, capacity-bounded store of [`LogLine`] records.
//!
//! Records must arrive with strictly increasing ids; an insert whose first id
//! is not above the buffer's high-water mark is rejected whole. Capacity is
//! enforced by a periodic watcher rather than on every insert, so the buffer
//! may briefly hold more than `max_capacity` entries between passes.

use crate::config::BufferConfig;
use crate::error::BufferError;
use crate::memory::MemoryReporter;
use crate::types::LogLine;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Inner {
    entries: VecDeque<Arc<LogLine>>,
    /// Highest id ever accepted. Survives eviction and clearing.
    max_id: Option<u64>,
    memory_bytes: u64,
}

pub struct LineBuffer {
    config: BufferConfig,
    inner: Mutex<Inner>,
}

impl LineBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                max_id: None,
                memory_bytes: 0,
            }),
        }
    }

    pub fn insert(&self, record: Arc<LogLine>) -> Result<(), BufferError> {
        let mut inner = self.inner.lock();
        check_above(inner.max_id, record.id())?;
        inner.max_id = Some(record.id());
        inner.memory_bytes += record.memory_size();
        inner.entries.push_back(record);
        Ok(())
    }

    /// Append a batch already ordered by id. Nothing is applied if any part
    /// of the batch would break ordering.
    pub fn insert_sorted(&self, records: &[Arc<LogLine>]) -> Result<(), BufferError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        if let Some(position) = records
            .windows(2)
            .position(|pair| pair[1].id() <= pair[0].id())
        {
            return Err(BufferError::Unsorted { position: position + 1 });
        }

        let mut inner = self.inner.lock();
        check_above(inner.max_id, first.id())?;
        for record in records {
            inner.memory_bytes += record.memory_size();
            inner.entries.push_back(Arc::clone(record));
        }
        inner.max_id = records.last().map(|r| r.id());
        Ok(())
    }

    /// Inclusive id range. `None` on either end means the first/last entry.
    pub fn get_range(&self, start: Option<u64>, end: Option<u64>) -> Vec<Arc<LogLine>> {
        let inner = self.inner.lock();
        let entries = &inner.entries;
        let lo = match start {
            Some(id) => entries.partition_point(|r| r.id() < id),
            None => 0,
        };
        let hi = match end {
            Some(id) => entries.partition_point(|r| r.id() <= id),
            None => entries.len(),
        };
        if lo >= hi {
            return Vec::new();
        }
        entries.range(lo..hi).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_id(&self) -> Option<u64> {
        self.inner.lock().entries.front().map(|r| r.id())
    }

    pub fn last_id(&self) -> Option<u64> {
        self.inner.lock().entries.back().map(|r| r.id())
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.memory_bytes = 0;
    }

    /// Trim the oldest entries down to `max_capacity * load_factor` once the
    /// buffer has reached `max_capacity`. Returns how many were evicted.
    pub fn evict_if_over_capacity(&self) -> usize {
        let mut inner = self.inner.lock();
        let len = inner.entries.len();
        if len < self.config.max_capacity {
            return 0;
        }

        let evict = len - self.config.target_len().min(len);
        let freed: u64 = inner.entries.drain(..evict).map(|r| r.memory_size()).sum();
        inner.memory_bytes = inner.memory_bytes.saturating_sub(freed);
        tracing::debug!(evicted = evict, remaining = len - evict, freed, "line buffer trimmed");
        evict
    }

    /// Run [`evict_if_over_capacity`](Self::evict_if_over_capacity) every
    /// `eviction_interval` until `cancel` fires.
    pub fn spawn_capacity_watcher(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.config.eviction_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.evict_if_over_capacity();
                    }
                }
            }
        })
    }
}

fn check_above(max_id: Option<u64>, first_id: u64) -> Result<(), BufferError> {
    match max_id {
        Some(max_id) if first_id <= max_id => {
            tracing::error!(first_id, max_id, "rejected non-monotonic insert");
            Err(BufferError::Corrupt { first_id, max_id })
        }
        _ => Ok(()),
    }
}

impl MemoryReporter for LineBuffer {
    fn name(&self) -> &str {
        "line-buffer"
    }

    fn current_memory_bytes(&self) -> u64 {
        self.inner.lock().memory_bytes
    }

    fn free_memory(&self) {
        self.clear();
    }
}
