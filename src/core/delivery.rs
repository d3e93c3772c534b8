//! Delivery of queued events to the collection service.
//!
//! The controller owns the persistent queue. It decides when to flush
//! (queue depth threshold, periodic timer, explicit request, network coming
//! back), makes sure only one flush is in flight, and backs off after
//! retryable failures.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::config::{DataMode, SignalKitOptions};
use super::single_flight::SingleFlight;
use crate::error::{ErrorCode, Result, SignalKitError};
use crate::event_store::EventStore;
use crate::http::Transport;
use crate::types::Event;

const DELIVERED_CHANNEL_CAPACITY: usize = 64;

/// Connectivity as reported by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Unreachable,
    Cellular,
    Wifi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NetworkPaused,
    BackingOff { remaining: Duration },
}

/// What a call to [`DeliveryController::flush`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    Skipped(SkipReason),
    /// The server accepted the batch; its entries were removed.
    Delivered { count: usize },
    /// Retryable failure; entries stay queued and flushing pauses for `delay`.
    Retrying { count: usize, delay: Duration },
    /// Rejected with a final status; entries were removed without delivery.
    Dropped { count: usize, status: u16 },
}

/// Published after every batch the server accepted.
#[derive(Debug, Clone)]
pub struct DeliveredBatch {
    pub events: Arc<Vec<Event>>,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub flush_at: usize,
    pub max_batch_size: usize,
    pub max_queue_size: usize,
    pub flush_interval: Duration,
    pub data_mode: DataMode,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl From<&SignalKitOptions> for DeliveryConfig {
    fn from(options: &SignalKitOptions) -> Self {
        Self {
            flush_at: options.flush_at,
            max_batch_size: options.max_batch_size,
            max_queue_size: options.max_queue_size,
            flush_interval: options.flush_interval,
            data_mode: options.data_mode,
            retry_delay: options.retry_delay,
            max_retry_delay: options.max_retry_delay,
        }
    }
}

impl DeliveryConfig {
    /// Pause after the `retry_count`-th consecutive retryable failure.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        self.retry_delay
            .saturating_mul(retry_count)
            .min(self.max_retry_delay)
    }
}

struct DeliveryState {
    network_paused: bool,
    paused_until: Option<Instant>,
    retry_count: u32,
}

pub struct DeliveryController {
    config: DeliveryConfig,
    store: EventStore,
    transport: Arc<dyn Transport>,
    state: Mutex<DeliveryState>,
    flight: SingleFlight<FlushOutcome>,
    delivered_tx: broadcast::Sender<DeliveredBatch>,
    runtime: Handle,
    is_running: AtomicBool,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl DeliveryController {
    /// Must be called from within a Tokio runtime; background flushes are
    /// spawned onto it even when events are added from other threads.
    pub fn new(
        store: EventStore,
        transport: Arc<dyn Transport>,
        config: DeliveryConfig,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| SignalKitError::no_runtime())?;
        let (delivered_tx, _) = broadcast::channel(DELIVERED_CHANNEL_CAPACITY);

        Ok(Arc::new(Self {
            config,
            store,
            transport,
            state: Mutex::new(DeliveryState {
                network_paused: false,
                paused_until: None,
                retry_count: 0,
            }),
            flight: SingleFlight::new(),
            delivered_tx,
            runtime,
            is_running: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
        }))
    }

    /// Persist an event, flushing in the background once `flush_at` is reached.
    pub fn add(self: &Arc<Self>, event: &Event) {
        let bytes = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    "{}",
                    SignalKitError::with_source(
                        ErrorCode::EventSerializationFailed,
                        format!("Could not serialize {}, dropping it", event.event),
                        e,
                    )
                );
                return;
            }
        };

        if self.store.depth() >= self.config.max_queue_size {
            tracing::warn!("Event queue full, dropping oldest event");
            self.store.delete(0);
        }

        if self.store.add(&bytes).is_none() {
            return;
        }

        let depth = self.store.depth();
        tracing::debug!("Queued {} (depth {})", event.event, depth);

        if depth >= self.config.flush_at {
            self.trigger_flush();
        }
    }

    /// Send the oldest batch now, or join the flush that is already running.
    pub async fn flush(&self) -> FlushOutcome {
        self.flight.run(|| self.flush_batch()).await
    }

    /// Spawn a flush unless one is already running.
    pub fn trigger_flush(self: &Arc<Self>) {
        if self.flight.is_in_flight() {
            return;
        }
        let controller = Arc::clone(self);
        self.runtime.spawn(async move {
            controller.flush().await;
        });
    }

    async fn flush_batch(&self) -> FlushOutcome {
        if let Some(reason) = self.skip_reason() {
            tracing::debug!("Flush skipped: {:?}", reason);
            return FlushOutcome::Skipped(reason);
        }

        let batch = self.store.peek_as::<Event>(self.config.max_batch_size);
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let (keys, events): (Vec<_>, Vec<_>) = batch.into_iter().unzip();
        let count = events.len();
        let info = self.transport.batch(&events).await;

        if info.is_retryable() {
            let delay = {
                let mut state = self.state.lock();
                state.retry_count += 1;
                let delay = self.config.backoff_delay(state.retry_count);
                state.paused_until = Some(Instant::now() + delay);
                delay
            };
            match &info.error {
                Some(e) => tracing::warn!("Batch of {} not delivered, retrying in {:?}: {}", count, delay, e),
                None => tracing::warn!("Batch of {} not delivered, retrying in {:?}", count, delay),
            }
            return FlushOutcome::Retrying { count, delay };
        }

        {
            let mut state = self.state.lock();
            state.retry_count = 0;
            state.paused_until = None;
        }
        self.store.remove(&keys);

        if info.is_success() {
            tracing::debug!("Delivered {} events", count);
            let _ = self.delivered_tx.send(DeliveredBatch {
                events: Arc::new(events),
            });
            FlushOutcome::Delivered { count }
        } else {
            let status = info.status_code.unwrap_or_default();
            match &info.error {
                Some(e) => tracing::warn!("Batch of {} rejected, dropping it: {}", count, e),
                None => tracing::warn!("Batch of {} rejected with status {}, dropping it", count, status),
            }
            FlushOutcome::Dropped { count, status }
        }
    }

    fn skip_reason(&self) -> Option<SkipReason> {
        let state = self.state.lock();
        if state.network_paused {
            return Some(SkipReason::NetworkPaused);
        }
        match state.paused_until {
            Some(until) => {
                let now = Instant::now();
                (until > now).then(|| SkipReason::BackingOff {
                    remaining: until - now,
                })
            }
            None => None,
        }
    }

    pub fn set_network_status(self: &Arc<Self>, status: NetworkStatus) {
        let (paused, flush_now) = match status {
            NetworkStatus::Unreachable => (true, false),
            NetworkStatus::Cellular => (self.config.data_mode == DataMode::Wifi, false),
            NetworkStatus::Wifi => (false, true),
        };

        let was_paused = std::mem::replace(&mut self.state.lock().network_paused, paused);
        if was_paused != paused {
            tracing::debug!(
                "Delivery {} ({:?})",
                if paused { "paused" } else { "resumed" },
                status
            );
        }

        if flush_now {
            self.trigger_flush();
        }
    }

    /// Start the periodic flush timer.
    pub fn start(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let controller = Arc::downgrade(self);
        let period = self.config.flush_interval;

        self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Delivery timer shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.flush().await;
                    }
                }
            }
        });

        tracing::debug!("Delivery timer started with interval {:?}", period);
    }

    /// Stop the periodic flush timer. Queued events stay on disk.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.try_send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn depth(&self) -> usize {
        self.store.depth()
    }

    pub fn retry_count(&self) -> u32 {
        self.state.lock().retry_count
    }

    /// Whether delivery is gated by connectivity.
    pub fn is_paused(&self) -> bool {
        self.state.lock().network_paused
    }

    /// Time left before flushing resumes after a retryable failure.
    pub fn backoff_remaining(&self) -> Option<Duration> {
        match self.skip_reason() {
            Some(SkipReason::BackingOff { remaining }) => Some(remaining),
            _ => None,
        }
    }

    pub fn is_flushing(&self) -> bool {
        self.flight.is_in_flight()
    }

    pub fn subscribe_delivered(&self) -> broadcast::Receiver<DeliveredBatch> {
        self.delivered_tx.subscribe()
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }
}

impl Drop for DeliveryController {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
    }
}
