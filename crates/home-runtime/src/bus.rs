//! Bounded asynchronous event bus
//!
//! Producers enqueue events into a fixed-capacity channel. A small pool of
//! worker tasks drains the channel and fans each event out to the matching
//! listeners on the blocking pool. Every wait is bounded: a full queue drops
//! the event, and a slow listener is abandoned after the dispatch timeout.

use crate::event::{Event, EventKind};
use crate::listener::EventListener;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Tuning knobs for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Maximum number of queued events
    pub capacity: usize,
    /// Number of worker tasks draining the queue
    pub workers: usize,
    /// How long `publish` waits for queue space
    pub publish_timeout: Duration,
    /// How long a worker waits for the listeners of one event
    pub dispatch_timeout: Duration,
    /// How long `stop` waits for workers before aborting them
    pub shutdown_grace: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            workers: 3,
            publish_timeout: Duration::from_millis(100),
            dispatch_timeout: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Point-in-time view of the bus
#[derive(Debug, Clone, Serialize)]
pub struct EventBusStats {
    pub queue_len: usize,
    pub capacity: usize,
    pub workers: usize,
    pub listeners: usize,
    pub running: bool,
    pub published: u64,
    pub dropped: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub per_kind: BTreeMap<String, u64>,
}

impl fmt::Display for EventBusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Event System Statistics:")?;
        writeln!(f, "  Queue size: {} / {}", self.queue_len, self.capacity)?;
        writeln!(f, "  Worker tasks: {}", self.workers)?;
        writeln!(f, "  Total listeners: {}", self.listeners)?;
        writeln!(f, "  Running: {}", self.running)?;
        writeln!(
            f,
            "  Published: {} (dropped {})",
            self.published, self.dropped
        )?;
        write!(
            f,
            "  Deliveries: {} ok, {} failed, {} timed out",
            self.dispatched, self.failed, self.timed_out
        )?;
        for (kind, count) in &self.per_kind {
            write!(f, "\n    {}: {}", kind, count)?;
        }
        Ok(())
    }
}

/// Multi-producer event bus with a bounded queue and a worker pool
pub struct EventBus {
    config: EventBusConfig,
    sender: mpsc::Sender<Event>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
    /// Listeners registered for a single kind
    listeners: DashMap<EventKind, Vec<Arc<dyn EventListener>>>,
    /// Listeners registered for every kind
    global_listeners: parking_lot::RwLock<Vec<Arc<dyn EventListener>>>,
    workers: parking_lot::Mutex<Option<WorkerPool>>,
    running: AtomicBool,
    counters: Counters,
    per_kind: DashMap<EventKind, u64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    /// Create a stopped bus. Events can be queued before `start`.
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        Self {
            config,
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            listeners: DashMap::new(),
            global_listeners: parking_lot::RwLock::new(Vec::new()),
            workers: parking_lot::Mutex::new(None),
            running: AtomicBool::new(false),
            counters: Counters::default(),
            per_kind: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Register a listener for one event kind
    pub fn subscribe(&self, kind: EventKind, listener: Arc<dyn EventListener>) {
        tracing::debug!("Listener {} subscribed to {}", listener.name(), kind);
        self.listeners.entry(kind).or_default().push(listener);
    }

    /// Register a listener for every event kind
    pub fn subscribe_all(&self, listener: Arc<dyn EventListener>) {
        tracing::debug!("Listener {} subscribed to all events", listener.name());
        self.global_listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        let per_kind: usize = self.listeners.iter().map(|entry| entry.value().len()).sum();
        per_kind + self.global_listeners.read().len()
    }

    /// Enqueue an event, waiting at most `publish_timeout` for space.
    ///
    /// Returns `false` when the event was dropped.
    pub async fn publish(&self, event: Event) -> bool {
        let kind = event.kind();
        match self
            .sender
            .send_timeout(event, self.config.publish_timeout)
            .await
        {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                *self.per_kind.entry(kind).or_insert(0) += 1;
                true
            }
            Err(SendTimeoutError::Timeout(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Event queue full, dropping event: {} from {}",
                    event.kind(),
                    event.source()
                );
                false
            }
            Err(SendTimeoutError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Event queue closed, dropping event: {}", event.kind());
                false
            }
        }
    }

    /// Number of events waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the worker pool. Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let handles = (0..self.config.workers.max(1))
            .map(|id| tokio::spawn(Arc::clone(self).worker_loop(id, cancel.clone())))
            .collect();

        *workers = Some(WorkerPool { cancel, handles });
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Event bus started with {} workers (capacity {})",
            self.config.workers.max(1),
            self.config.capacity
        );
        true
    }

    /// Cancel the worker pool and wait up to `shutdown_grace` for it.
    ///
    /// Events still queued stay queued and are delivered after a restart.
    pub async fn stop(&self) -> bool {
        let pool = self.workers.lock().take();
        let Some(pool) = pool else {
            return false;
        };

        self.running.store(false, Ordering::SeqCst);
        pool.cancel.cancel();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        for mut handle in pool.handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                tracing::warn!("Event worker did not stop in time, aborting");
                handle.abort();
            }
        }

        tracing::info!("Event bus stopped ({} events queued)", self.queue_len());
        true
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            queue_len: self.queue_len(),
            capacity: self.sender.max_capacity(),
            workers: self.config.workers.max(1),
            listeners: self.listener_count(),
            running: self.is_running(),
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            per_kind: self
                .per_kind
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        }
    }

    /// Reset every counter. Queued events and listeners are untouched.
    pub fn clear_stats(&self) {
        for counter in [
            &self.counters.published,
            &self.counters.dropped,
            &self.counters.dispatched,
            &self.counters.failed,
            &self.counters.timed_out,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.per_kind.clear();
        tracing::debug!("Event bus statistics cleared");
    }

    async fn worker_loop(self: Arc<Self>, id: usize, cancel: CancellationToken) {
        tracing::debug!("Event worker {} started", id);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = async { self.receiver.lock().await.recv().await } => event,
            };

            match next {
                Some(event) => self.dispatch(event).await,
                None => break,
            }
        }
        tracing::debug!("Event worker {} stopped", id);
    }

    fn listeners_for(&self, event: &Event) -> Vec<Arc<dyn EventListener>> {
        let mut matched: Vec<Arc<dyn EventListener>> = self
            .listeners
            .get(&event.kind())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        matched.extend(self.global_listeners.read().iter().cloned());
        matched.retain(|listener| listener.accepts(event));
        matched
    }

    async fn dispatch(&self, event: Event) {
        let listeners = self.listeners_for(&event);
        if listeners.is_empty() {
            return;
        }

        let event = Arc::new(event);
        let mut tasks = JoinSet::new();
        for listener in listeners {
            let event = Arc::clone(&event);
            tasks.spawn_blocking(move || {
                let result = listener.on_event(&event);
                (listener.name().to_string(), result)
            });
        }

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => {
                        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok((name, Err(e))) => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!("Listener {} failed on {}: {}", name, event.kind(), e);
                    }
                    Err(e) => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!("Listener panicked on {}: {}", event.kind(), e);
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.dispatch_timeout, drain)
            .await
            .is_err()
        {
            let pending = tasks.len();
            self.counters
                .timed_out
                .fetch_add(pending as u64, Ordering::Relaxed);
            tracing::warn!(
                "{} listener(s) still running after {:?} on {}, abandoning",
                pending,
                self.config.dispatch_timeout,
                event.kind()
            );
            tasks.detach_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenerError;
    use crate::listener::FnListener;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedSender;

    fn recorder(name: &str, tx: UnboundedSender<Event>) -> Arc<dyn EventListener> {
        Arc::new(FnListener::new(name, move |e: &Event| {
            tx.send(e.clone()).map_err(|e| ListenerError::new(e.to_string()))
        }))
    }

    fn event(kind: EventKind) -> Event {
        Event::new(kind, "test", json!({"n": 1}))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_delivers_to_kind_and_global_listeners() {
        let bus = Arc::new(EventBus::default());
        let (kind_tx, mut kind_rx) = mpsc::unbounded_channel();
        let (all_tx, mut all_rx) = mpsc::unbounded_channel();
        bus.subscribe(EventKind::MotionDetected, recorder("motion", kind_tx));
        bus.subscribe_all(recorder("all", all_tx));
        bus.start();

        let motion = event(EventKind::MotionDetected);
        assert!(bus.publish(motion.clone()).await);
        assert!(bus.publish(event(EventKind::UserCommand)).await);

        assert_eq!(kind_rx.recv().await, Some(motion));
        let mut kinds = vec![
            all_rx.recv().await.map(|e| e.kind()),
            all_rx.recv().await.map(|e| e.kind()),
        ];
        kinds.sort_by_key(|k| k.map(|k| k.as_str()));
        assert_eq!(
            kinds,
            vec![Some(EventKind::MotionDetected), Some(EventKind::UserCommand)]
        );
        assert!(kind_rx.try_recv().is_err());

        bus.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_keeps_exactly_capacity_events() {
        let bus = EventBus::new(EventBusConfig {
            capacity: 4,
            ..Default::default()
        });

        let mut accepted = 0;
        for _ in 0..6 {
            if bus.publish(event(EventKind::UserCommand)).await {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 4);
        assert_eq!(bus.queue_len(), 4);
        let stats = bus.stats();
        assert_eq!(stats.published, 4);
        assert_eq!(stats.dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_stats_resets_counters_only() {
        let bus = EventBus::new(EventBusConfig {
            capacity: 2,
            ..Default::default()
        });
        for _ in 0..3 {
            bus.publish(event(EventKind::MotionDetected)).await;
        }
        let stats = bus.stats();
        assert_eq!((stats.published, stats.dropped), (2, 1));

        bus.clear_stats();
        let stats = bus.stats();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.dropped, 0);
        assert!(stats.per_kind.is_empty());
        assert_eq!(stats.queue_len, 2);

        bus.publish(event(EventKind::UserCommand)).await;
        assert_eq!(bus.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_failing_listeners_are_isolated() {
        let bus = Arc::new(EventBus::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            EventKind::UserCommand,
            Arc::new(FnListener::new("broken", |_e: &Event| {
                Err(ListenerError::new("broken"))
            })),
        );
        bus.subscribe(
            EventKind::UserCommand,
            Arc::new(FnListener::new("panics", |_e: &Event| -> Result<(), ListenerError> {
                panic!("listener exploded")
            })),
        );
        bus.subscribe(EventKind::UserCommand, recorder("healthy", tx));
        bus.start();

        bus.publish(event(EventKind::UserCommand)).await;
        bus.publish(event(EventKind::UserCommand)).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        wait_until(|| {
            let stats = bus.stats();
            stats.failed == 4 && stats.dispatched == 2
        })
        .await;

        bus.stop().await;
    }

    #[tokio::test]
    async fn test_slow_listener_is_abandoned() {
        let bus = Arc::new(EventBus::new(EventBusConfig {
            dispatch_timeout: Duration::from_millis(50),
            ..Default::default()
        }));
        bus.subscribe(
            EventKind::UserCommand,
            Arc::new(FnListener::new("slow", |_e: &Event| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })),
        );
        bus.start();

        bus.publish(event(EventKind::UserCommand)).await;
        wait_until(|| bus.stats().timed_out == 1).await;

        bus.stop().await;
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let bus = Arc::new(EventBus::default());
        assert!(bus.start());
        assert!(!bus.start());
        assert!(bus.is_running());
        assert!(bus.stop().await);
        assert!(!bus.stop().await);
        assert!(!bus.is_running());

        // Events queued while stopped are delivered after a restart
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe_all(recorder("late", tx));
        bus.publish(event(EventKind::AutomationTriggered)).await;
        assert_eq!(bus.queue_len(), 1);
        assert!(bus.start());
        assert!(rx.recv().await.is_some());
        bus.stop().await;
    }
}
