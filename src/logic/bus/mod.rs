//! Signal Bus - In-process publish/subscribe
//!
//! Tách producers (orchestrator) khỏi consumers (receiver, metrics, sinks).
//!
//! # Guarantees
//! - `publish` never waits on a slow subscriber: every subscriber owns a
//!   bounded queue and overflow is resolved by the configured `DropPolicy`.
//! - `receive(timeout)` blocks at most `timeout`.
//! - Tearing the bus down wakes every waiting receiver with `BusError::Unavailable`.

pub mod payload;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};

pub use payload::{clamp_to_byte, Payload, TopicId};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Underlying channel was torn down
    #[error("bus unavailable")]
    Unavailable,

    #[error("send failed on topic {topic}")]
    SendFailed { topic: TopicId },

    #[error("payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },
}

// ============================================================================
// CONFIG
// ============================================================================

/// What to do when a subscriber queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest queued message (keeps latest state)
    #[default]
    DropOldest,
    /// Discard the incoming message
    DropNewest,
}

impl std::str::FromStr for DropPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop_oldest" | "oldest" => Ok(DropPolicy::DropOldest),
            "drop_newest" | "newest" => Ok(DropPolicy::DropNewest),
            other => Err(format!("unknown drop policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub queue_capacity: usize,
    pub drop_policy: DropPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::constants::DEFAULT_QUEUE_CAPACITY,
            drop_policy: DropPolicy::default(),
        }
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: TopicId,
    pub payload: Payload,
    pub published_at: Instant,
}

/// Outcome of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Bus counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub dropped: u64,
}

// ============================================================================
// SUBSCRIBER QUEUE
// ============================================================================

struct SubscriberQueue {
    queue: Mutex<VecDeque<BusMessage>>,
    ready: Condvar,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns false if the message was dropped
    fn push(&self, message: BusMessage, capacity: usize, policy: DropPolicy) -> bool {
        let mut queue = self.queue.lock();
        let mut kept = true;
        if queue.len() >= capacity {
            match policy {
                DropPolicy::DropOldest => {
                    queue.pop_front();
                    queue.push_back(message);
                }
                DropPolicy::DropNewest => kept = false,
            }
        } else {
            queue.push_back(message);
        }
        drop(queue);
        self.ready.notify_one();
        kept
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Take the lock so a receiver between its check and its wait sees the flag
        let _guard = self.queue.lock();
        self.ready.notify_all();
    }
}

// ============================================================================
// BUS
// ============================================================================

struct BusInner {
    config: BusConfig,
    topics: RwLock<HashMap<TopicId, Vec<Weak<SubscriberQueue>>>>,
    closed: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let topics = self.topics.read();
        for queue in topics.values().flatten().filter_map(Weak::upgrade) {
            queue.close();
        }
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Cloneable handle to one in-process bus
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<BusInner>,
}

impl SignalBus {
    pub fn new(config: BusConfig) -> Self {
        let config = BusConfig {
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        Self {
            inner: Arc::new(BusInner {
                config,
                topics: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Clamp `values` into a payload and fan it out to every subscriber of `topic`
    pub fn publish(&self, topic: TopicId, values: &[f64]) -> Result<PublishReport, BusError> {
        let payload = Payload::encode(values)?;
        self.publish_payload(topic, payload)
    }

    pub fn publish_payload(&self, topic: TopicId, payload: Payload) -> Result<PublishReport, BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::SendFailed { topic });
        }

        let message = BusMessage {
            topic,
            payload,
            published_at: Instant::now(),
        };
        let capacity = self.inner.config.queue_capacity;
        let policy = self.inner.config.drop_policy;

        let mut report = PublishReport::default();
        let mut has_dead = false;
        {
            let topics = self.inner.topics.read();
            if let Some(queues) = topics.get(&topic) {
                for weak in queues {
                    match weak.upgrade() {
                        Some(queue) => {
                            if queue.push(message, capacity, policy) {
                                report.delivered += 1;
                            } else {
                                report.dropped += 1;
                            }
                        }
                        None => has_dead = true,
                    }
                }
            }
        }

        if has_dead {
            self.prune(topic);
        }

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        if report.dropped > 0 {
            self.inner.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
            log::debug!("[Bus] {} message(s) dropped on topic {}", report.dropped, topic);
        }

        Ok(report)
    }

    /// Subscribe to one topic
    pub fn subscribe(&self, topic: TopicId) -> Result<Subscription, BusError> {
        self.subscribe_many(&[topic])
    }

    /// One queue receiving every listed topic
    pub fn subscribe_many(&self, topics: &[TopicId]) -> Result<Subscription, BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable);
        }

        let mut unique: Vec<TopicId> = Vec::with_capacity(topics.len());
        for topic in topics {
            if !unique.contains(topic) {
                unique.push(*topic);
            }
        }

        let queue = Arc::new(SubscriberQueue::new(self.inner.config.queue_capacity));
        let mut registry = self.inner.topics.write();
        for topic in &unique {
            registry.entry(*topic).or_default().push(Arc::downgrade(&queue));
        }

        Ok(Subscription {
            topics: unique,
            queue,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Tear the bus down; waiting receivers wake with `Unavailable`
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            log::info!("[Bus] Closing signal bus");
        }
        self.inner.close_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, topic: TopicId) -> usize {
        self.inner
            .topics
            .read()
            .get(&topic)
            .map(|queues| queues.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    fn prune(&self, topic: TopicId) {
        let mut topics = self.inner.topics.write();
        if let Some(queues) = topics.get_mut(&topic) {
            queues.retain(|w| w.strong_count() > 0);
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Receiving end; dropping it unsubscribes
pub struct Subscription {
    topics: Vec<TopicId>,
    queue: Arc<SubscriberQueue>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Next message, `Ok(None)` if nothing arrived within `timeout`
    pub fn receive(&self, timeout: Duration) -> Result<Option<BusMessage>, BusError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.queue.lock();

        loop {
            if let Some(message) = queue.pop_front() {
                return Ok(Some(message));
            }
            if self.is_torn_down() {
                return Err(BusError::Unavailable);
            }
            if self.queue.ready.wait_until(&mut queue, deadline).timed_out() {
                return match queue.pop_front() {
                    Some(message) => Ok(Some(message)),
                    None if self.is_torn_down() => Err(BusError::Unavailable),
                    None => Ok(None),
                };
            }
        }
    }

    /// Non-blocking receive
    pub fn try_receive(&self) -> Result<Option<BusMessage>, BusError> {
        let mut queue = self.queue.queue.lock();
        match queue.pop_front() {
            Some(message) => Ok(Some(message)),
            None if self.is_torn_down() => Err(BusError::Unavailable),
            None => Ok(None),
        }
    }

    pub fn topics(&self) -> &[TopicId] {
        &self.topics
    }

    pub fn pending(&self) -> usize {
        self.queue.queue.lock().len()
    }

    fn is_torn_down(&self) -> bool {
        self.queue.closed.load(Ordering::SeqCst) || self.bus.strong_count() == 0
    }
}
