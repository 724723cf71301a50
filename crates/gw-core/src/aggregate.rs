//! Aggregation engine (spec C9): incremental statistics keyed by
//! `(rule_id, group_key)`, generalizing the teacher's
//! `wf-core::rule::match_engine::types::RollingStats` (cumulative
//! mean/stddev/median/ewma) with sliding-window eviction, a monotonic-deque
//! min/max, and TTL expiry neither of which `RollingStats` had.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::rule::AggFn;

/// `(rule_id, group_key)` lookup key for a single aggregation accumulator.
pub type AggKey = (String, String);

/// Joins `group_by` field values with a separator; a missing field
/// collapses to the empty string (spec §4.7).
pub fn group_key(values: &[Option<String>]) -> String {
    values
        .iter()
        .map(|v| v.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// One accumulator instance. `window_size == 0` means cumulative (no
/// eviction); otherwise sliding over the last `window_size` values.
#[derive(Debug)]
pub struct AggregationState {
    window_size: usize,
    values: VecDeque<f64>,
    count: u64,
    sum: f64,
    sum_sq: f64,
    min_deque: VecDeque<f64>,
    max_deque: VecDeque<f64>,
    sorted_median_buf: Vec<f64>,
    first: Option<f64>,
    last: Option<f64>,
    last_update: Instant,
}

impl AggregationState {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            values: VecDeque::new(),
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min_deque: VecDeque::new(),
            max_deque: VecDeque::new(),
            sorted_median_buf: Vec::new(),
            first: None,
            last: None,
            last_update: Instant::now(),
        }
    }

    pub fn is_cumulative(&self) -> bool {
        self.window_size == 0
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub fn expired(&self, ttl: Duration) -> bool {
        self.last_update.elapsed() > ttl
    }

    /// Feed one new value, evicting the oldest if sliding and at capacity.
    pub fn update(&mut self, value: f64) {
        self.last_update = Instant::now();
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.first.get_or_insert(value);
        self.last = Some(value);

        push_monotonic_min(&mut self.min_deque, value);
        push_monotonic_max(&mut self.max_deque, value);
        insert_sorted(&mut self.sorted_median_buf, value);

        if self.window_size > 0 {
            self.values.push_back(value);
            if self.values.len() > self.window_size {
                if let Some(evicted) = self.values.pop_front() {
                    self.evict(evicted);
                }
            }
        }
    }

    fn evict(&mut self, evicted: f64) {
        // Never let count go negative; a ring buffer bound to window_size
        // guarantees count >= 1 here whenever eviction runs.
        self.count = self.count.saturating_sub(1);
        self.sum -= evicted;
        self.sum_sq -= evicted * evicted;

        if self.min_deque.front() == Some(&evicted) {
            self.min_deque.pop_front();
        }
        if self.max_deque.front() == Some(&evicted) {
            self.max_deque.pop_front();
        }
        if let Ok(idx) = self.sorted_median_buf.binary_search_by(|probe| probe.partial_cmp(&evicted).unwrap()) {
            self.sorted_median_buf.remove(idx);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Population variance via the running `sum`/`sum_sq` accumulators.
    /// Numerically stable enough for the gateway's bounded windows; a
    /// true Welford recurrence is unnecessary once sliding eviction
    /// already keeps `sum`/`sum_sq` exact via subtraction.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.avg();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0)
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        self.min_deque.front().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.max_deque.back().copied()
    }

    pub fn median(&self) -> Option<f64> {
        let n = self.sorted_median_buf.len();
        if n == 0 {
            return None;
        }
        if n % 2 == 1 {
            Some(self.sorted_median_buf[n / 2])
        } else {
            Some((self.sorted_median_buf[n / 2 - 1] + self.sorted_median_buf[n / 2]) / 2.0)
        }
    }

    pub fn first(&self) -> Option<f64> {
        self.first
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn result(&self, func: AggFn) -> Option<f64> {
        match func {
            AggFn::Count => Some(self.count as f64),
            AggFn::Sum => Some(self.sum),
            AggFn::Avg => Some(self.avg()),
            AggFn::Variance => Some(self.variance()),
            AggFn::Stddev => Some(self.stddev()),
            AggFn::Min => self.min(),
            AggFn::Max => self.max(),
            AggFn::Median => self.median(),
            AggFn::First => self.first(),
            AggFn::Last => self.last(),
        }
    }
}

/// Min-tracking monotonic deque: non-decreasing from front, so `front()`
/// is always the current minimum. Values equal to the incoming one are
/// popped from the back since they can never be the min again before the
/// new one evicts.
fn push_monotonic_min(deque: &mut VecDeque<f64>, value: f64) {
    while deque.back().is_some_and(|&v| v >= value) {
        deque.pop_back();
    }
    deque.push_back(value);
}

fn push_monotonic_max(deque: &mut VecDeque<f64>, value: f64) {
    while deque.back().is_some_and(|&v| v <= value) {
        deque.pop_back();
    }
    deque.push_back(value);
}

fn insert_sorted(buf: &mut Vec<f64>, value: f64) {
    let idx = buf.partition_point(|&v| v < value);
    buf.insert(idx, value);
}

/// Sharded map of `AggKey -> AggregationState`, one shard per rule+group
/// pair's hash bucket, mirroring the teacher's
/// `wf-core::window::registry::WindowRegistry` sharding idiom.
pub struct AggregateStore {
    shards: Vec<std::sync::RwLock<HashMap<AggKey, AggregationState>>>,
}

const SHARD_COUNT: usize = 16;

impl Default for AggregateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| std::sync::RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, key: &AggKey) -> &std::sync::RwLock<HashMap<AggKey, AggregationState>> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Feed `value` into the accumulator for `key`, creating one with
    /// `window_size` if it doesn't exist yet.
    pub fn update(&self, key: AggKey, window_size: usize, value: f64) {
        let shard = self.shard_for(&key);
        let mut map = shard.write().expect("aggregate shard lock poisoned");
        map.entry(key).or_insert_with(|| AggregationState::new(window_size)).update(value);
    }

    pub fn results(&self, key: &AggKey, functions: &[AggFn]) -> Option<HashMap<String, f64>> {
        let shard = self.shard_for(key);
        let map = shard.read().expect("aggregate shard lock poisoned");
        map.get(key).map(|state| {
            functions
                .iter()
                .filter_map(|f| state.result(*f).map(|v| (format!("{f:?}").to_lowercase(), v)))
                .collect()
        })
    }

    /// Drop every entry whose key's rule id matches `rule_id` — called when
    /// the rule store's hot reload tears down a deleted rule (spec C6).
    pub fn remove_rule(&self, rule_id: &str) {
        for shard in &self.shards {
            shard.write().expect("aggregate shard lock poisoned").retain(|(r, _), _| r != rule_id);
        }
    }

    /// Periodic TTL sweep (spec §4.7): drop any entry whose last update
    /// exceeds `ttl`. Run from a `gw-runtime::aggregate_evictor_task` tick.
    pub fn sweep_expired(&self, ttl: Duration) {
        for shard in &self.shards {
            shard.write().expect("aggregate shard lock poisoned").retain(|_, state| !state.expired(ttl));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_matches_spec_example() {
        // spec §8 property 2: ten points 1..10, window_size=5.
        let mut state = AggregationState::new(5);
        for v in 1..=10 {
            state.update(v as f64);
        }
        assert_eq!(state.count(), 5);
        assert_eq!(state.avg(), 8.0);
        assert_eq!(state.min(), Some(6.0));
        assert_eq!(state.max(), Some(10.0));
        assert!((state.stddev() - 1.5811388300841898).abs() < 1e-9);
    }

    #[test]
    fn cumulative_never_evicts() {
        let mut state = AggregationState::new(0);
        for v in 1..=100 {
            state.update(v as f64);
        }
        assert_eq!(state.count(), 100);
        assert_eq!(state.sum(), 5050.0);
    }

    #[test]
    fn median_odd_and_even() {
        let mut state = AggregationState::new(0);
        for v in [3.0, 1.0, 2.0] {
            state.update(v);
        }
        assert_eq!(state.median(), Some(2.0));
        state.update(4.0);
        assert_eq!(state.median(), Some(2.5));
    }

    #[test]
    fn group_key_joins_with_missing_as_empty() {
        let k = group_key(&[Some("dev1".to_string()), None]);
        assert_eq!(k, "dev1\u{1f}");
    }

    #[test]
    fn store_isolates_keys_by_rule_and_group() {
        let store = AggregateStore::new();
        store.update(("r1".into(), "a".into()), 0, 10.0);
        store.update(("r1".into(), "b".into()), 0, 20.0);

        let a = store.results(&("r1".into(), "a".into()), &[AggFn::Sum]).unwrap();
        let b = store.results(&("r1".into(), "b".into()), &[AggFn::Sum]).unwrap();
        assert_eq!(a["sum"], 10.0);
        assert_eq!(b["sum"], 20.0);
    }

    #[test]
    fn remove_rule_drops_only_that_rules_entries() {
        let store = AggregateStore::new();
        store.update(("r1".into(), "a".into()), 0, 1.0);
        store.update(("r2".into(), "a".into()), 0, 1.0);
        store.remove_rule("r1");
        assert!(store.results(&("r1".into(), "a".into()), &[AggFn::Count]).is_none());
        assert!(store.results(&("r2".into(), "a".into()), &[AggFn::Count]).is_some());
    }
}
