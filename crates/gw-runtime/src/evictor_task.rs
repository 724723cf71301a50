//! Aggregate TTL sweep (spec C9): periodically drops accumulator entries
//! that haven't seen a new value in longer than any configured rule's
//! `ttl`. Grounded on the teacher's `run_evictor` tick-loop shape, with the
//! window-memory/time eviction swapped for `gw_core::AggregateStore`'s own
//! `sweep_expired`.

use std::sync::Arc;
use std::time::Duration;

use gw_core::{AggregateStore, RuleStore};
use tokio_util::sync::CancellationToken;

use crate::metrics::RuntimeMetrics;

/// Runs `store.sweep_expired` on a fixed tick until cancelled, using the
/// longest `ttl` configured across every `aggregate` action in the current
/// rule snapshot so no rule's window is purged before it was asked to be —
/// the tradeoff is that a short-`ttl` rule's stale entries may briefly
/// outlive their own ttl when another rule configures a much longer one.
#[tracing::instrument(name = "aggregate_evictor", skip_all)]
pub async fn run_aggregate_evictor(
    store: Arc<AggregateStore>,
    rule_store: Arc<RuleStore>,
    metrics: Arc<RuntimeMetrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let ttl = longest_configured_ttl(&rule_store).unwrap_or(interval);
                store.sweep_expired(ttl);
                metrics.inc_aggregate_sweep();
                gw_debug!(res, ttl = ?ttl, "aggregate evictor sweep");
            }
            _ = cancel.cancelled() => break,
        }
    }
}

fn longest_configured_ttl(rule_store: &RuleStore) -> Option<Duration> {
    rule_store
        .snapshot()
        .iter()
        .flat_map(|rule| rule.actions.iter())
        .filter_map(|action| match &action.config {
            gw_core::ActionConfig::Aggregate(cfg) => Some(cfg.ttl),
            _ => None,
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::AggFn;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn sweeps_entries_past_ttl() {
        let store = Arc::new(AggregateStore::new());
        store.update(("r1".into(), "g".into()), 0, 1.0);
        assert!(store.results(&("r1".into(), "g".into()), &[AggFn::Sum]).is_some());

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        store.sweep_expired(StdDuration::from_millis(10));
        assert!(store.results(&("r1".into(), "g".into()), &[AggFn::Sum]).is_none());
    }
}
