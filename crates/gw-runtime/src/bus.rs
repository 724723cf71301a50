//! Fan-out bus (spec C5): the single point of contact between southbound
//! adapters/sidecars and every downstream consumer (rule engine, direct
//! sinks). Generalizes the teacher's `wf-core::window::registry::WindowRegistry`
//! (named producer -> consumer routing table) from "windows" to "any bus
//! subscriber": each subscriber gets its own bounded queue and backpressure
//! policy, and `publish` fans a Point out to every live subscriber. Borrows
//! `wf-core::window::buffer::Window`'s front-eviction `VecDeque` idiom for
//! the `DropOldest` policy — a plain `tokio::sync::mpsc` channel has no way
//! to evict an already-queued item, so admission is modeled explicitly here
//! instead of on top of `mpsc`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use gw_config::{BusConfig, BusPolicy};
use gw_core::Point;
use tokio::sync::Notify;

use crate::error::{RuntimeReason, RuntimeResult};

#[derive(Default)]
pub struct BusMetrics {
    pub admitted_total: AtomicU64,
    pub dropped_newest_total: AtomicU64,
    pub dropped_oldest_total: AtomicU64,
    pub admission_timeout_total: AtomicU64,
}

struct SubscriptionState {
    queue: VecDeque<Point>,
    closed: bool,
}

/// One subscriber's own bounded queue and backpressure policy. Every
/// `Bus::publish` fans out to a snapshot of these independently, so a slow
/// or full subscriber never blocks delivery to the others.
struct Subscription {
    state: Mutex<SubscriptionState>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
    policy: BusPolicy,
    admission_timeout: std::time::Duration,
}

impl Subscription {
    fn new(capacity: usize, policy: BusPolicy, admission_timeout: std::time::Duration) -> Self {
        Self {
            state: Mutex::new(SubscriptionState { queue: VecDeque::with_capacity(capacity), closed: false }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
            policy,
            admission_timeout,
        }
    }

    async fn admit(&self, point: Point, metrics: &BusMetrics) -> RuntimeResult<()> {
        loop {
            {
                let mut state = self.state.lock().expect("bus subscription lock poisoned");
                if state.queue.len() < self.capacity {
                    state.queue.push_back(point);
                    metrics.admitted_total.fetch_add(1, Ordering::Relaxed);
                    self.not_empty.notify_one();
                    return Ok(());
                }

                match self.policy {
                    BusPolicy::DropNewest => {
                        metrics.dropped_newest_total.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                    BusPolicy::DropOldest => {
                        state.queue.pop_front();
                        state.queue.push_back(point);
                        metrics.admitted_total.fetch_add(1, Ordering::Relaxed);
                        metrics.dropped_oldest_total.fetch_add(1, Ordering::Relaxed);
                        self.not_empty.notify_one();
                        return Ok(());
                    }
                    BusPolicy::Block => {}
                }
            }

            let waited = tokio::time::timeout(self.admission_timeout, self.not_full.notified()).await;
            if waited.is_err() {
                metrics.admission_timeout_total.fetch_add(1, Ordering::Relaxed);
                return Err(gw_struct_error(RuntimeReason::BusAdmission(
                    "bus full, admission timed out".to_string(),
                )));
            }
        }
    }

    async fn recv(&self) -> Option<Point> {
        loop {
            {
                let mut state = self.state.lock().expect("bus subscription lock poisoned");
                if let Some(point) = state.queue.pop_front() {
                    self.not_full.notify_one();
                    return Some(point);
                }
                if state.closed {
                    return None;
                }
            }
            self.not_empty.notified().await;
        }
    }

    fn close(&self) {
        self.state.lock().expect("bus subscription lock poisoned").closed = true;
        self.not_empty.notify_waiters();
    }

    fn len(&self) -> usize {
        self.state.lock().expect("bus subscription lock poisoned").queue.len()
    }
}

/// A handle returned by [`Bus::subscribe`]. Consumers `recv()` from this
/// directly; dropping it leaves the subscription registered (callers that
/// need clean teardown should pair it with [`Bus::unsubscribe`]).
pub struct BusSubscriber {
    id: String,
    inner: Arc<Subscription>,
}

impl BusSubscriber {
    pub async fn recv(&self) -> Option<Point> {
        self.inner.recv().await
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Multi-subscriber fan-out point (spec C5): every adapter and sidecar
/// publishes here, and every downstream consumer (rule engine, direct
/// sinks) holds its own [`BusSubscriber`] with an independent queue and
/// drop/block policy.
pub struct Bus {
    subscribers: RwLock<HashMap<String, Arc<Subscription>>>,
    capacity: usize,
    policy: BusPolicy,
    admission_timeout: std::time::Duration,
    pub metrics: BusMetrics,
}

impl Bus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: config.capacity,
            policy: config.policy,
            admission_timeout: config.admission_timeout.as_duration(),
            metrics: BusMetrics::default(),
        }
    }

    /// Registers a new subscriber under `id`, using the bus's configured
    /// capacity/policy. Re-subscribing under an id already in use replaces
    /// the prior subscription (the old handle keeps draining its own
    /// detached queue until dropped).
    pub fn subscribe(&self, id: impl Into<String>) -> BusSubscriber {
        let id = id.into();
        let inner = Arc::new(Subscription::new(self.capacity, self.policy, self.admission_timeout));
        self.subscribers.write().expect("bus subscribers lock poisoned").insert(id.clone(), Arc::clone(&inner));
        BusSubscriber { id, inner }
    }

    /// Removes and closes a subscriber's queue, unblocking any pending `recv`.
    pub fn unsubscribe(&self, id: &str) {
        if let Some(sub) = self.subscribers.write().expect("bus subscribers lock poisoned").remove(id) {
            sub.close();
        }
    }

    /// Fans `point` out to every currently registered subscriber,
    /// applying each subscriber's own backpressure policy independently.
    /// Returns an error only if every subscriber failed admission (a
    /// single slow subscriber under `Block` never stalls delivery to
    /// the others — they run concurrently).
    pub async fn publish(&self, point: Point) -> RuntimeResult<()> {
        let subs: Vec<Arc<Subscription>> = self.subscribers.read().expect("bus subscribers lock poisoned").values().cloned().collect();
        if subs.is_empty() {
            return Ok(());
        }

        let mut last_err = None;
        let mut any_ok = false;
        for sub in &subs {
            match sub.admit(point.clone(), &self.metrics).await {
                Ok(()) => any_ok = true,
                Err(e) => last_err = Some(e),
            }
        }

        if any_ok || last_err.is_none() {
            Ok(())
        } else {
            Err(last_err.expect("checked above"))
        }
    }

    /// Total queued points across every subscriber (used for the
    /// `gw_bus_queue_depth` gauge — an aggregate backlog, not any single
    /// subscriber's depth).
    pub fn len(&self) -> usize {
        self.subscribers.read().expect("bus subscribers lock poisoned").values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every subscriber's queue (full shutdown, not per-subscriber
    /// teardown — see [`Bus::unsubscribe`] for that).
    pub fn close(&self) {
        for sub in self.subscribers.read().expect("bus subscribers lock poisoned").values() {
            sub.close();
        }
    }
}

fn gw_struct_error(reason: RuntimeReason) -> crate::error::RuntimeError {
    orion_error::StructError::from(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_config::{BusConfig, BusPolicy};
    use gw_core::{Point, Value};

    fn point(n: i64) -> Point {
        Point::new("dev1", "k", Value::Int(n), 0)
    }

    fn cfg(capacity: usize, policy: BusPolicy) -> BusConfig {
        BusConfig { capacity, policy, admission_timeout: std::time::Duration::from_millis(50).into() }
    }

    #[tokio::test]
    async fn publish_then_recv_preserves_order() {
        let bus = Bus::new(&cfg(4, BusPolicy::Block));
        let sub = bus.subscribe("a");
        bus.publish(point(1)).await.unwrap();
        bus.publish(point(2)).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().value, Value::Int(1));
        assert_eq!(sub.recv().await.unwrap().value, Value::Int(2));
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber_independently() {
        let bus = Bus::new(&cfg(4, BusPolicy::Block));
        let rules = bus.subscribe("rules");
        let sinks = bus.subscribe("sinks");
        bus.publish(point(1)).await.unwrap();
        assert_eq!(rules.recv().await.unwrap().value, Value::Int(1));
        assert_eq!(sinks.recv().await.unwrap().value, Value::Int(1));
    }

    #[tokio::test]
    async fn drop_newest_keeps_oldest_items() {
        let bus = Bus::new(&cfg(1, BusPolicy::DropNewest));
        let sub = bus.subscribe("a");
        bus.publish(point(1)).await.unwrap();
        bus.publish(point(2)).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().value, Value::Int(1));
        assert_eq!(bus.metrics.dropped_newest_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn drop_oldest_keeps_newest_items() {
        let bus = Bus::new(&cfg(1, BusPolicy::DropOldest));
        let sub = bus.subscribe("a");
        bus.publish(point(1)).await.unwrap();
        bus.publish(point(2)).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().value, Value::Int(2));
        assert_eq!(bus.metrics.dropped_oldest_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn block_policy_times_out_when_full() {
        let bus = Bus::new(&cfg(1, BusPolicy::Block));
        let _sub = bus.subscribe("a");
        bus.publish(point(1)).await.unwrap();
        let err = bus.publish(point(2)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn unsubscribe_unblocks_pending_recv() {
        let bus = Bus::new(&cfg(1, BusPolicy::Block));
        let sub = bus.subscribe("a");
        bus.unsubscribe("a");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_noop() {
        let bus = Bus::new(&cfg(1, BusPolicy::Block));
        assert!(bus.publish(point(1)).await.is_ok());
    }
}
