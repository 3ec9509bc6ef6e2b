//! Connector: turns connect intents into retries until a source opens.
//!
//! Intents are queued to one worker. Each intent may carry a delay that the
//! worker sleeps before trying; a failed attempt re-queues the same intent
//! with the fixed reconnect delay. The connector also listens to the hub's
//! state: a close or an end of stream re-queues the last target that opened
//! successfully, which is what keeps a tailed socket alive across restarts
//! of its peer.
//!
//! Every explicit call ([`Connector::connect_to_host`],
//! [`Connector::connect_to_file`], [`Connector::disconnect`]) starts a new
//! generation; retries queued under an older generation are dropped.
//!
//! An attempt counts as pending until the hub reports `opened`. Opening a
//! target closes the reader it replaces, and that close must not queue yet
//! another attempt.

use crate::hub::{HubError, StreamHub};
use logtap_core::config::ConnectorConfig;
use logtap_core::StateListener;
use logtap_feeds::SourceTarget;
use parking_lot::Mutex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the connector opens targets through. [`StreamHub`] is the production
/// implementation.
pub trait Opener: Send + Sync + 'static {
    fn open_target(&self, target: &SourceTarget) -> impl Future<Output = Result<(), HubError>> + Send;
    fn close(&self) -> impl Future<Output = ()> + Send;
}

impl Opener for StreamHub {
    async fn open_target(&self, target: &SourceTarget) -> Result<(), HubError> {
        StreamHub::open_target(self, target).await
    }

    async fn close(&self) {
        StreamHub::close(self).await
    }
}

#[derive(Debug)]
struct ConnectIntent {
    target: SourceTarget,
    delay: Duration,
    generation: u64,
}

struct Shared {
    intents: mpsc::UnboundedSender<ConnectIntent>,
    reconnect_delay: Duration,
    generation: AtomicU64,
    /// Last target that opened, under the current generation.
    last: Mutex<Option<SourceTarget>>,
    /// An attempt is queued or in flight and the hub has not reported
    /// `opened` since. Close and EOF events seen meanwhile are fallout of
    /// that attempt and do not queue another one.
    retry_pending: AtomicBool,
    retries: AtomicU64,
}

impl Shared {
    fn begin_generation(&self, attempt: bool) -> u64 {
        self.retry_pending.store(attempt, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn send(&self, intent: ConnectIntent) {
        if self.intents.send(intent).is_err() {
            tracing::debug!("connector stopped, intent dropped");
        }
    }

    /// Queue a delayed retry of `target` unless one is already queued.
    fn schedule_retry(&self, target: SourceTarget, generation: u64) {
        if self.retry_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        self.send(ConnectIntent {
            target,
            delay: self.reconnect_delay,
            generation,
        });
    }

    /// Re-queue a failed attempt. The pending flag stays set until the hub
    /// reports `opened`.
    fn requeue(&self, target: SourceTarget, generation: u64) {
        self.retry_pending.store(true, Ordering::Release);
        self.send(ConnectIntent {
            target,
            delay: self.reconnect_delay,
            generation,
        });
    }

    fn retry_last(&self, reason: &str) {
        let Some(target) = self.last.lock().clone() else {
            return;
        };
        tracing::info!(source = %target, reason, "scheduling reconnect");
        self.schedule_retry(target, self.generation.load(Ordering::Acquire));
    }
}

impl StateListener for Shared {
    fn name(&self) -> &str {
        "connector"
    }

    fn on_opened(&self) {
        self.retry_pending.store(false, Ordering::Release);
    }

    fn on_closed(&self) {
        self.retry_last("closed");
    }

    fn on_eof_reached(&self) {
        self.retry_last("end of stream");
    }
}

pub struct Connector<O: Opener> {
    shared: Arc<Shared>,
    opener: Arc<O>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<O: Opener> Connector<O> {
    /// Start the connector worker. The caller registers
    /// [`state_listener`](Self::state_listener) with whatever emits state.
    pub fn new(opener: Arc<O>, config: ConnectorConfig) -> Self {
        let (intents, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            intents,
            reconnect_delay: config.reconnect_delay(),
            generation: AtomicU64::new(0),
            last: Mutex::new(None),
            retry_pending: AtomicBool::new(false),
            retries: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            rx,
            Arc::clone(&shared),
            Arc::clone(&opener),
            cancel.clone(),
        ));
        Self {
            shared,
            opener,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn state_listener(&self) -> Arc<dyn StateListener> {
        Arc::clone(&self.shared) as Arc<dyn StateListener>
    }

    pub fn connect_to_host(&self, host: impl Into<String>, port: u16) {
        self.connect(SourceTarget::socket(host, port));
    }

    pub fn connect_to_file(&self, path: impl Into<PathBuf>) {
        self.connect(SourceTarget::file(path));
    }

    /// Queue an immediate attempt at `target`. Fire and forget; the outcome
    /// shows up as state events.
    pub fn connect(&self, target: SourceTarget) {
        let generation = self.shared.begin_generation(true);
        *self.shared.last.lock() = None;
        tracing::debug!(source = %target, generation, "connect requested");
        self.shared.send(ConnectIntent {
            target,
            delay: Duration::ZERO,
            generation,
        });
    }

    /// Forget the last target and close the source without reconnecting.
    pub async fn disconnect(&self) {
        self.shared.begin_generation(false);
        *self.shared.last.lock() = None;
        self.opener.close().await;
    }

    /// Target that most recently opened, if it is still the one to keep.
    pub fn last_target(&self) -> Option<SourceTarget> {
        self.shared.last.lock().clone()
    }

    /// Failed attempts that were re-queued.
    pub fn retries(&self) -> u64 {
        self.shared.retries.load(Ordering::Relaxed)
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Connector<StreamHub> {
    /// Start a connector for `hub` and subscribe it to the hub's state.
    pub fn attach(hub: Arc<StreamHub>, config: ConnectorConfig) -> Self {
        let connector = Self::new(Arc::clone(&hub), config);
        hub.add_state_listener(connector.state_listener());
        connector
    }
}

impl<O: Opener> Drop for Connector<O> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<O: Opener>(
    mut intents: mpsc::UnboundedReceiver<ConnectIntent>,
    shared: Arc<Shared>,
    opener: Arc<O>,
    cancel: CancellationToken,
) {
    loop {
        let intent = tokio::select! {
            _ = cancel.cancelled() => break,
            intent = intents.recv() => match intent {
                Some(intent) => intent,
                None => break,
            },
        };

        if !intent.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(intent.delay) => {}
            }
        }

        let current = shared.generation.load(Ordering::Acquire);
        if intent.generation != current {
            tracing::debug!(source = %intent.target, "stale intent dropped");
            continue;
        }

        match opener.open_target(&intent.target).await {
            Ok(()) => {
                tracing::info!(source = %intent.target, "connected");
                if shared.generation.load(Ordering::Acquire) == intent.generation {
                    *shared.last.lock() = Some(intent.target);
                }
            }
            Err(err) => {
                shared.retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    source = %intent.target,
                    error = %err,
                    retry_in_ms = shared.reconnect_delay.as_millis() as u64,
                    "connect failed, retrying"
                );
                shared.requeue(intent.target, intent.generation);
            }
        }
    }
    tracing::debug!("connector stopped");
}
