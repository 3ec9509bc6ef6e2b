//! Stream Publisher: decouples readers from consumers.
//!
//! A single polling loop watches whichever [`SourceReader`] is currently
//! active. On every tick it first publishes the reader's state transitions,
//! then drains every queued line as one block. Transitions come from the
//! reader's own log, so a reader that opened and closed between two ticks
//! still reports both. A detached reader gets one last tick of its own.
//! Listener callbacks run outside every lock except the reentrant tick guard
//! and are timed; slow ones are logged, never aborted.

use crate::reader::SourceReader;
use logtap_core::config::PublisherConfig;
use logtap_core::events::{notify_state, timed};
use logtap_core::{BlockListener, ReaderState, StateListener};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Shared {
    reader: Mutex<Option<Arc<SourceReader>>>,
    /// Detached readers still owed their last transitions and lines.
    retired: Mutex<Vec<Arc<SourceReader>>>,
    published: Mutex<ReaderState>,
    /// Serializes ticks. Reentrant so a listener may poll from its callback.
    ticking: ReentrantMutex<()>,
    state_listeners: Mutex<Vec<Arc<dyn StateListener>>>,
    block_listeners: Mutex<Vec<Arc<dyn BlockListener>>>,
    slow_listener: Duration,
}

impl Shared {
    fn tick(&self) {
        let _tick = self.ticking.lock();

        let retired = std::mem::take(&mut *self.retired.lock());
        for reader in &retired {
            self.publish_from(reader);
        }

        let current = self.reader.lock().clone();
        match current {
            Some(reader) => self.publish_from(&reader),
            None => self.announce(ReaderState::Closed),
        }
    }

    fn publish_from(&self, reader: &SourceReader) {
        for state in reader.take_transitions() {
            self.announce(state);
        }

        // Lines queued before a read error or a detach still go out.
        if !reader.has_data() {
            return;
        }
        let lines = reader.drain();
        if lines.is_empty() {
            return;
        }
        let listeners = self.block_listeners.lock().clone();
        for listener in &listeners {
            timed(listener.name(), self.slow_listener, || listener.on_block(&lines));
        }
    }

    fn announce(&self, state: ReaderState) {
        {
            let mut published = self.published.lock();
            if *published == state {
                return;
            }
            *published = state;
        }
        tracing::debug!(%state, "publishing state transition");
        let listeners = self.state_listeners.lock().clone();
        for listener in &listeners {
            timed(listener.name(), self.slow_listener, || {
                notify_state(listener.as_ref(), state)
            });
        }
    }

    fn retire(&self, reader: Option<Arc<SourceReader>>) {
        if let Some(reader) = reader {
            self.retired.lock().push(reader);
        }
    }
}

pub struct StreamPublisher {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamPublisher {
    /// Create the publisher and start its polling loop.
    pub fn start(config: PublisherConfig) -> Self {
        let shared = Arc::new(Shared {
            reader: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            published: Mutex::new(ReaderState::Closed),
            ticking: ReentrantMutex::new(()),
            state_listeners: Mutex::new(Vec::new()),
            block_listeners: Mutex::new(Vec::new()),
            slow_listener: config.slow_listener(),
        });
        let cancel = CancellationToken::new();

        let handle = {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            let period = config.poll_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => shared.tick(),
                    }
                }
                tracing::debug!("publisher stopped");
            })
        };

        Self {
            shared,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Make `reader` the active source. A reader it replaces is retired.
    pub fn start_publishing(&self, reader: Arc<SourceReader>) {
        tracing::debug!(source = %reader.target(), "publishing from reader");
        let previous = self.shared.reader.lock().replace(reader);
        self.shared.retire(previous);
    }

    /// Detach the active source, returning it.
    ///
    /// The next tick still publishes whatever the reader logged or queued up
    /// to then. Close the reader before detaching it so its final lines are
    /// included.
    pub fn stop_publishing(&self) -> Option<Arc<SourceReader>> {
        let reader = self.shared.reader.lock().take();
        self.shared.retire(reader.clone());
        reader
    }

    pub fn current_reader(&self) -> Option<Arc<SourceReader>> {
        self.shared.reader.lock().clone()
    }

    /// Last state announced to listeners.
    pub fn published_state(&self) -> ReaderState {
        *self.shared.published.lock()
    }

    pub fn add_state_listener(&self, listener: Arc<dyn StateListener>) {
        self.shared.state_listeners.lock().push(listener);
    }

    pub fn remove_state_listener(&self, name: &str) {
        self.shared.state_listeners.lock().retain(|l| l.name() != name);
    }

    pub fn add_block_listener(&self, listener: Arc<dyn BlockListener>) {
        self.shared.block_listeners.lock().push(listener);
    }

    pub fn remove_block_listener(&self, name: &str) {
        self.shared.block_listeners.lock().retain(|l| l.name() != name);
    }

    /// Run one tick on the caller's thread.
    pub fn poll_once(&self) {
        self.shared.tick();
    }

    /// Stop the polling loop. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{EofMode, SourceTarget};
    use logtap_core::config::ReaderConfig;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl StateListener for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn on_opened(&self) {
            self.events.lock().push("opened".into());
        }
        fn on_closed(&self) {
            self.events.lock().push("closed".into());
        }
        fn on_eof_reached(&self) {
            self.events.lock().push("eof".into());
        }
    }

    impl BlockListener for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn on_block(&self, lines: &[String]) {
            self.events.lock().push(format!("block:{}", lines.join("|")));
        }
    }

    fn idle_publisher() -> StreamPublisher {
        // Long poll interval so only poll_once drives the tests.
        StreamPublisher::start(PublisherConfig {
            poll_interval_ms: 60_000,
            slow_listener_ms: 100,
        })
    }

    fn reader_config() -> ReaderConfig {
        ReaderConfig {
            min_block_size: 1,
            max_block_size: 100,
            min_block_time_ms: 1,
            max_block_time_ms: 50,
            read_timeout_ms: 50,
            eof_poll_interval_ms: 10,
            connect_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn publishes_transition_then_one_block() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a\nb\nc").unwrap();

        let publisher = idle_publisher();
        let rec = Arc::new(Recorder::default());
        publisher.add_state_listener(rec.clone());
        publisher.add_block_listener(rec.clone());

        let reader = Arc::new(SourceReader::new(
            SourceTarget::file(file.path()),
            reader_config(),
            EofMode::Stop,
        ));
        reader.open().await.unwrap();
        publisher.start_publishing(Arc::clone(&reader));

        tokio::time::timeout(Duration::from_secs(5), async {
            while reader.state() != ReaderState::EofReached {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        publisher.poll_once();
        publisher.poll_once();
        assert_eq!(*rec.events.lock(), vec!["opened", "eof", "block:a|b|c"]);

        reader.close().await;
        publisher.poll_once();
        assert_eq!(rec.events.lock().last().map(String::as_str), Some("closed"));
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn no_event_without_change_or_data() {
        let publisher = idle_publisher();
        let rec = Arc::new(Recorder::default());
        publisher.add_state_listener(rec.clone());
        publisher.add_block_listener(rec.clone());

        publisher.poll_once();
        publisher.poll_once();
        assert!(rec.events.lock().is_empty());
        assert_eq!(publisher.published_state(), ReaderState::Closed);
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn removed_listener_gets_nothing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let publisher = idle_publisher();
        let rec = Arc::new(Recorder::default());
        publisher.add_state_listener(rec.clone());
        publisher.remove_state_listener("recorder");

        let reader = Arc::new(SourceReader::new(
            SourceTarget::file(file.path()),
            reader_config(),
            EofMode::Continue,
        ));
        reader.open().await.unwrap();
        publisher.start_publishing(Arc::clone(&reader));
        publisher.poll_once();

        assert!(rec.events.lock().is_empty());
        assert_eq!(publisher.published_state(), ReaderState::Open);
        assert!(publisher.stop_publishing().is_some());
        reader.close().await;
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn open_and_close_between_ticks_reports_both() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let publisher = idle_publisher();
        let rec = Arc::new(Recorder::default());
        publisher.add_state_listener(rec.clone());

        let reader = Arc::new(SourceReader::new(
            SourceTarget::file(file.path()),
            reader_config(),
            EofMode::Continue,
        ));
        reader.open().await.unwrap();
        publisher.start_publishing(Arc::clone(&reader));
        reader.close().await;
        publisher.poll_once();

        assert_eq!(*rec.events.lock(), vec!["opened", "closed"]);
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn detached_reader_gets_a_last_tick() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a\nb").unwrap();

        let publisher = idle_publisher();
        let rec = Arc::new(Recorder::default());
        publisher.add_state_listener(rec.clone());
        publisher.add_block_listener(rec.clone());

        let reader = Arc::new(SourceReader::new(
            SourceTarget::file(file.path()),
            reader_config(),
            EofMode::Stop,
        ));
        reader.open().await.unwrap();
        publisher.start_publishing(Arc::clone(&reader));
        tokio::time::timeout(Duration::from_secs(5), async {
            while reader.state() != ReaderState::EofReached {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        reader.close().await;
        publisher.stop_publishing();

        // Closed, yet its queue is still delivered.
        publisher.poll_once();
        publisher.poll_once();
        assert_eq!(*rec.events.lock(), vec!["opened", "eof", "closed", "block:a|b"]);
        assert!(publisher.current_reader().is_none());
        publisher.shutdown().await;
    }

    /// Polls and reads the published state from inside its own callbacks.
    #[derive(Default)]
    struct Reentrant {
        publisher: std::sync::OnceLock<Arc<StreamPublisher>>,
        seen: Mutex<Vec<ReaderState>>,
    }

    impl Reentrant {
        fn record(&self) {
            let publisher = self.publisher.get().unwrap();
            publisher.poll_once();
            self.seen.lock().push(publisher.published_state());
        }
    }

    impl StateListener for Reentrant {
        fn name(&self) -> &str {
            "reentrant"
        }
        fn on_opened(&self) {
            self.record();
        }
        fn on_closed(&self) {
            self.record();
        }
        fn on_eof_reached(&self) {
            self.record();
        }
    }

    #[tokio::test]
    async fn listener_may_call_back_into_the_publisher() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let publisher = Arc::new(idle_publisher());
        let listener = Arc::new(Reentrant::default());
        let _ = listener.publisher.set(Arc::clone(&publisher));
        publisher.add_state_listener(listener.clone());

        let reader = Arc::new(SourceReader::new(
            SourceTarget::file(file.path()),
            reader_config(),
            EofMode::Continue,
        ));
        reader.open().await.unwrap();
        publisher.start_publishing(Arc::clone(&reader));
        publisher.poll_once();
        reader.close().await;
        publisher.poll_once();

        assert_eq!(*listener.seen.lock(), vec![ReaderState::Open, ReaderState::Closed]);
        publisher.shutdown().await;
    }
}
