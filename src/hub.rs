//! Stream Hub, the central coordinator.
//!
//! The hub owns the [`LineFactory`], the [`LineBuffer`] and the
//! [`StreamPublisher`]. Raw blocks drained by the publisher are matched
//! against every registered pattern; a line that matches at least one pattern
//! is built into a [`LogLine`] exactly once, appended to the buffer and then
//! handed to every subscriber of every matching pattern. Lines that match
//! nothing are never built.
//!
//! Historical queries go through [`StreamHub::request_range`]. Requests are
//! queued to a single worker and each one receives exactly one
//! [`RangeResponse`].

use logtap_core::config::{Config, ReaderConfig};
use logtap_core::events::{notify_state, timed};
use logtap_core::{
    BlockListener, ClockFormat, LineBuffer, LineFactory, LineFilter, LogLine, MemoryReporter,
    OpenError, PayloadCache, ReaderState, StateListener, TimestampExtractor,
};
use logtap_feeds::{EofMode, SourceReader, SourceTarget, StreamPublisher};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type SubscriptionId = u64;
pub type RequestId = u64;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Open(#[from] OpenError),
}

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

/// A live consumer of records. Registered under exactly one filter pattern.
pub trait LineSubscriber: Send + Sync {
    fn name(&self) -> &str;
    /// Pattern a raw line must match in full for this subscriber to see it.
    fn filter(&self) -> &str;
    fn on_record(&self, record: Arc<LogLine>);
    fn on_block(&self, records: &[Arc<LogLine>]);
}

/// Receives the answer to a [`StreamHub::request_range`] call.
pub trait RangeRequester: Send + Sync {
    fn name(&self) -> &str;
    fn on_response(&self, response: RangeResponse);
}

#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub request_id: RequestId,
    pub records: Vec<Arc<LogLine>>,
    /// `false` when the stream was closed at the time the request was served.
    pub valid: bool,
}

// ---------------------------------------------------------------------------
// Subscription registry
// ---------------------------------------------------------------------------

struct PatternGroup {
    filter: Arc<LineFilter>,
    subscribers: Vec<(SubscriptionId, Arc<dyn LineSubscriber>)>,
}

#[derive(Default)]
struct Registry {
    groups: BTreeMap<String, PatternGroup>,
    next_id: SubscriptionId,
}

/// Copy of one pattern group taken before delivery.
struct Snapshot {
    filter: Arc<LineFilter>,
    subscribers: Vec<Arc<dyn LineSubscriber>>,
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// The part of the hub the publisher calls into.
struct Fanout {
    factory: LineFactory,
    buffer: Arc<LineBuffer>,
    registry: Mutex<Registry>,
    /// Serializes build, insert and delivery so ids reach every subscriber
    /// in order.
    ingest: Mutex<()>,
    state_listeners: Mutex<Vec<Arc<dyn StateListener>>>,
    slow_listener: Duration,
}

impl Fanout {
    fn snapshot(&self) -> Vec<Snapshot> {
        self.registry
            .lock()
            .groups
            .values()
            .map(|group| Snapshot {
                filter: Arc::clone(&group.filter),
                subscribers: group.subscribers.iter().map(|(_, s)| Arc::clone(s)).collect(),
            })
            .collect()
    }

    /// Build one record per line that matches any group and buffer them.
    /// Returns, per group, the records that group should receive.
    fn build_matching(&self, groups: &[Snapshot], lines: &[String]) -> Vec<Vec<Arc<LogLine>>> {
        let mut per_group = vec![Vec::new(); groups.len()];
        let mut built = Vec::new();

        for raw in lines {
            let mut record: Option<Arc<LogLine>> = None;
            for (group, matched) in groups.iter().zip(per_group.iter_mut()) {
                if !group.filter.matches_line(raw) {
                    continue;
                }
                let record = record.get_or_insert_with(|| Arc::new(self.factory.build(raw)));
                matched.push(Arc::clone(record));
            }
            built.extend(record);
        }

        if let Err(err) = self.buffer.insert_sorted(&built) {
            tracing::error!(error = %err, records = built.len(), "records not buffered");
        }
        per_group
    }

    fn ingest_block(&self, lines: &[String]) {
        let groups = self.snapshot();
        if groups.is_empty() || lines.is_empty() {
            return;
        }
        let _ingest = self.ingest.lock();
        let per_group = self.build_matching(&groups, lines);
        for (group, records) in groups.iter().zip(&per_group) {
            if records.is_empty() {
                continue;
            }
            for subscriber in &group.subscribers {
                timed(subscriber.name(), self.slow_listener, || subscriber.on_block(records));
            }
        }
    }

    fn ingest_line(&self, line: &str) {
        let groups = self.snapshot();
        if groups.is_empty() {
            return;
        }
        let _ingest = self.ingest.lock();
        let per_group = self.build_matching(&groups, &[line.to_owned()]);
        for (group, records) in groups.iter().zip(per_group) {
            let Some(record) = records.into_iter().next() else {
                continue;
            };
            for subscriber in &group.subscribers {
                timed(subscriber.name(), self.slow_listener, || {
                    subscriber.on_record(Arc::clone(&record))
                });
            }
        }
    }

    fn forward_state(&self, state: ReaderState) {
        let listeners = self.state_listeners.lock().clone();
        for listener in &listeners {
            timed(listener.name(), self.slow_listener, || {
                notify_state(listener.as_ref(), state)
            });
        }
    }
}

impl BlockListener for Fanout {
    fn name(&self) -> &str {
        "stream-hub"
    }

    fn on_block(&self, lines: &[String]) {
        self.ingest_block(lines);
    }
}

impl StateListener for Fanout {
    fn name(&self) -> &str {
        "stream-hub"
    }

    fn on_opened(&self) {
        self.forward_state(ReaderState::Open);
    }

    fn on_closed(&self) {
        self.forward_state(ReaderState::Closed);
    }

    fn on_eof_reached(&self) {
        self.forward_state(ReaderState::EofReached);
    }
}

// ---------------------------------------------------------------------------
// Range requests
// ---------------------------------------------------------------------------

struct RangeRequest {
    id: RequestId,
    start: Option<u64>,
    end: Option<u64>,
    filter: Option<LineFilter>,
    requester: Arc<dyn RangeRequester>,
}

impl RangeRequest {
    fn answer(&self, buffer: &LineBuffer, state: ReaderState) -> RangeResponse {
        if state == ReaderState::Closed {
            return self.invalid();
        }
        let mut records = buffer.get_range(self.start, self.end);
        if let Some(filter) = &self.filter {
            records.retain(|r| filter.finds_in(r.text()));
        }
        RangeResponse {
            request_id: self.id,
            records,
            valid: true,
        }
    }

    fn invalid(&self) -> RangeResponse {
        RangeResponse {
            request_id: self.id,
            records: Vec::new(),
            valid: false,
        }
    }

    fn respond(self, response: RangeResponse, slow_listener: Duration) {
        timed(self.requester.name(), slow_listener, || {
            self.requester.on_response(response)
        });
    }
}

async fn serve_ranges(
    mut requests: mpsc::UnboundedReceiver<RangeRequest>,
    buffer: Arc<LineBuffer>,
    publisher: Arc<StreamPublisher>,
    slow_listener: Duration,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let state = publisher
            .current_reader()
            .map_or(ReaderState::Closed, |r| r.state());
        let response = request.answer(&buffer, state);
        tracing::trace!(
            request_id = request.id,
            records = response.records.len(),
            valid = response.valid,
            "range request served"
        );
        request.respond(response, slow_listener);
    }

    // Anything still queued gets its one response.
    requests.close();
    while let Ok(request) = requests.try_recv() {
        let response = request.invalid();
        request.respond(response, slow_listener);
    }
    tracing::debug!("range worker stopped");
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

pub struct StreamHub {
    fanout: Arc<Fanout>,
    cache: Arc<PayloadCache>,
    publisher: Arc<StreamPublisher>,
    reader_config: ReaderConfig,
    requests: mpsc::UnboundedSender<RangeRequest>,
    next_request: AtomicU64,
    /// Held across open/close so two lifecycle calls never interleave.
    lifecycle: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamHub {
    /// Build a hub that parses timestamps with `config.timestamp.format`.
    ///
    /// Must be called inside a tokio runtime: the publisher loop, the range
    /// worker and the buffer's capacity watcher are spawned here.
    pub fn new(config: &Config) -> Self {
        let extractor = ClockFormat::new(config.timestamp.format.clone());
        Self::with_extractor(config, Box::new(extractor))
    }

    pub fn with_extractor(config: &Config, extractor: Box<dyn TimestampExtractor>) -> Self {
        let cache = Arc::new(PayloadCache::new(config.cache.max_entries));
        let buffer = Arc::new(LineBuffer::new(config.buffer.clone()));
        let slow_listener = config.publisher.slow_listener();

        let fanout = Arc::new(Fanout {
            factory: LineFactory::new(Arc::clone(&cache), extractor),
            buffer: Arc::clone(&buffer),
            registry: Mutex::new(Registry::default()),
            ingest: Mutex::new(()),
            state_listeners: Mutex::new(Vec::new()),
            slow_listener,
        });

        let publisher = Arc::new(StreamPublisher::start(config.publisher.clone()));
        publisher.add_state_listener(Arc::clone(&fanout) as Arc<dyn StateListener>);
        publisher.add_block_listener(Arc::clone(&fanout) as Arc<dyn BlockListener>);

        let cancel = CancellationToken::new();
        let (requests, rx) = mpsc::unbounded_channel();
        let range_worker = tokio::spawn(serve_ranges(
            rx,
            Arc::clone(&buffer),
            Arc::clone(&publisher),
            slow_listener,
            cancel.clone(),
        ));
        let watcher = Arc::clone(&buffer).spawn_capacity_watcher(cancel.clone());

        Self {
            fanout,
            cache,
            publisher,
            reader_config: config.reader.clone(),
            requests,
            next_request: AtomicU64::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
            cancel,
            tasks: Mutex::new(vec![range_worker, watcher]),
        }
    }

    // -- subscriptions -------------------------------------------------------

    pub fn subscribe(&self, subscriber: Arc<dyn LineSubscriber>) -> SubscriptionId {
        let pattern = subscriber.filter().to_owned();
        let mut registry = self.fanout.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .groups
            .entry(pattern)
            .or_insert_with_key(|pattern| PatternGroup {
                filter: Arc::new(LineFilter::new(pattern.as_str())),
                subscribers: Vec::new(),
            })
            .subscribers
            .push((id, subscriber));
        tracing::debug!(subscription = id, "subscriber registered");
        id
    }

    /// Remove a subscription. The pattern goes with its last subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.fanout.registry.lock();
        let Some(pattern) = registry
            .groups
            .iter()
            .find(|(_, group)| group.subscribers.iter().any(|(sid, _)| *sid == id))
            .map(|(pattern, _)| pattern.clone())
        else {
            return false;
        };
        if let Some(group) = registry.groups.get_mut(&pattern) {
            group.subscribers.retain(|(sid, _)| *sid != id);
            if group.subscribers.is_empty() {
                registry.groups.remove(&pattern);
            }
        }
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.fanout
            .registry
            .lock()
            .groups
            .values()
            .map(|g| g.subscribers.len())
            .sum()
    }

    pub fn pattern_count(&self) -> usize {
        self.fanout.registry.lock().groups.len()
    }

    pub fn add_state_listener(&self, listener: Arc<dyn StateListener>) {
        self.fanout.state_listeners.lock().push(listener);
    }

    pub fn remove_state_listener(&self, name: &str) {
        self.fanout.state_listeners.lock().retain(|l| l.name() != name);
    }

    // -- live ingestion ------------------------------------------------------

    /// Feed a block of raw lines as if drained from the active reader.
    pub fn ingest_block(&self, lines: &[String]) {
        self.fanout.ingest_block(lines);
    }

    /// Feed a single raw line; matching subscribers get `on_record`.
    pub fn ingest_line(&self, line: &str) {
        self.fanout.ingest_line(line);
    }

    // -- historical queries --------------------------------------------------

    /// Queue a range query. `None` bounds mean the first/last buffered
    /// record; `filter` narrows by substring find.
    pub fn request_range(
        &self,
        start: Option<u64>,
        end: Option<u64>,
        requester: Arc<dyn RangeRequester>,
        filter: Option<&str>,
    ) -> RequestId {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let request = RangeRequest {
            id,
            start,
            end,
            filter: filter.map(LineFilter::new),
            requester,
        };
        if let Err(mpsc::error::SendError(request)) = self.requests.send(request) {
            tracing::debug!(request_id = id, "range worker gone, answering invalid");
            let response = request.invalid();
            request.respond(response, self.fanout.slow_listener);
        }
        id
    }

    // -- lifecycle -----------------------------------------------------------

    /// Replace the active reader with `reader` and start publishing from it.
    ///
    /// Any reader already active is closed first. If `reader` fails to open
    /// the hub is left without a reader.
    pub async fn open(&self, reader: Arc<SourceReader>) -> Result<(), HubError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.retire_current().await;
        reader.open().await?;
        tracing::info!(source = %reader.target(), "hub publishing");
        self.publisher.start_publishing(reader);
        Ok(())
    }

    /// Open a continue-on-EOF reader for `target`.
    pub async fn open_target(&self, target: &SourceTarget) -> Result<(), HubError> {
        let reader = SourceReader::new(target.clone(), self.reader_config.clone(), EofMode::Continue);
        self.open(Arc::new(reader)).await
    }

    /// Stop publishing and close the active reader, if any.
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(reader) = self.retire_current().await {
            tracing::info!(source = %reader.target(), "hub closed");
        }
    }

    /// Close the active reader, then detach it. The publisher still drains
    /// what it queued before closing.
    async fn retire_current(&self) -> Option<Arc<SourceReader>> {
        let reader = self.publisher.current_reader()?;
        reader.close().await;
        self.publisher.stop_publishing()
    }

    pub fn state(&self) -> ReaderState {
        self.publisher
            .current_reader()
            .map_or(ReaderState::Closed, |r| r.state())
    }

    // -- accessors -----------------------------------------------------------

    pub fn buffer(&self) -> &Arc<LineBuffer> {
        &self.fanout.buffer
    }

    pub fn factory(&self) -> &LineFactory {
        &self.fanout.factory
    }

    pub fn publisher(&self) -> &StreamPublisher {
        &self.publisher
    }

    /// Components a [`MemoryWatchdog`](logtap_core::MemoryWatchdog) should track.
    pub fn memory_reporters(&self) -> Vec<Arc<dyn MemoryReporter>> {
        vec![
            Arc::clone(&self.cache) as Arc<dyn MemoryReporter>,
            Arc::clone(&self.fanout.buffer) as Arc<dyn MemoryReporter>,
        ]
    }

    /// Close the reader and stop every worker the hub owns.
    pub async fn shutdown(&self) {
        self.close().await;
        // Deliver whatever the last reader still had queued.
        self.publisher.poll_once();
        self.publisher.shutdown().await;
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        tracing::debug!("hub shut down");
    }
}

impl Drop for StreamHub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
