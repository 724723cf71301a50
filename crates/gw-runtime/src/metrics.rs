//! Runtime metrics and their Prometheus/summary-log exporter. Grounded on
//! the teacher's `RuntimeMetrics`: lock-free atomics for hot-path counters,
//! a hand-rolled Prometheus text exporter over a bare `TcpListener`, and a
//! periodic summary line logged at the configured interval. Unlike the
//! teacher's fixed `rule_names`/`window_names` label sets (built once at
//! startup, since CEP windows don't change at runtime), rule and sink ids
//! here can come and go under hot reload, so per-label counters use a
//! `Mutex<HashMap<..>>` instead of a label set fixed at construction.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gw_config::MetricsConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;

/// Shared runtime metrics store, always allocated regardless of whether
/// the Prometheus exporter is enabled — the counters cost nothing to
/// maintain and the periodic summary log is useful even without scraping.
pub struct RuntimeMetrics {
    bus: Arc<Bus>,

    rule_evaluations_total: AtomicU64,
    rule_matches_total: Mutex<HashMap<String, u64>>,
    rule_action_errors_total: AtomicU64,
    rule_exec_timeouts_total: AtomicU64,

    alert_emitted_total: Mutex<HashMap<String, u64>>,
    alert_dispatch_failed_total: AtomicU64,

    forward_dispatch_total: AtomicU64,
    forward_dispatch_failed_total: AtomicU64,

    aggregate_sweeps_total: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            rule_evaluations_total: AtomicU64::new(0),
            rule_matches_total: Mutex::new(HashMap::new()),
            rule_action_errors_total: AtomicU64::new(0),
            rule_exec_timeouts_total: AtomicU64::new(0),
            alert_emitted_total: Mutex::new(HashMap::new()),
            alert_dispatch_failed_total: AtomicU64::new(0),
            forward_dispatch_total: AtomicU64::new(0),
            forward_dispatch_failed_total: AtomicU64::new(0),
            aggregate_sweeps_total: AtomicU64::new(0),
        }
    }

    pub fn inc_rule_evaluation(&self) {
        self.rule_evaluations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rule_match(&self, rule_id: &str) {
        *self.rule_matches_total.lock().expect("metrics lock poisoned").entry(rule_id.to_string()).or_insert(0) += 1;
    }

    pub fn inc_rule_action_error(&self) {
        self.rule_action_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rule_exec_timeout(&self) {
        self.rule_exec_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alert_emitted(&self, rule_id: &str) {
        *self.alert_emitted_total.lock().expect("metrics lock poisoned").entry(rule_id.to_string()).or_insert(0) += 1;
    }

    pub fn inc_alert_dispatch_failed(&self) {
        self.alert_dispatch_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_forward_dispatch(&self) {
        self.forward_dispatch_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_forward_dispatch_failed(&self) {
        self.forward_dispatch_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_aggregate_sweep(&self) {
        self.aggregate_sweeps_total.fetch_add(1, Ordering::Relaxed);
    }

    fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(4 * 1024);

        self.render_counter(&mut out, "gw_bus_admitted_total", self.bus.metrics.admitted_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "gw_bus_dropped_newest_total", self.bus.metrics.dropped_newest_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "gw_bus_dropped_oldest_total", self.bus.metrics.dropped_oldest_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "gw_bus_admission_timeout_total", self.bus.metrics.admission_timeout_total.load(Ordering::Relaxed));
        self.render_gauge(&mut out, "gw_bus_queue_depth", self.bus.len() as u64);

        self.render_counter(&mut out, "gw_rule_evaluations_total", self.rule_evaluations_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "gw_rule_action_errors_total", self.rule_action_errors_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "gw_rule_exec_timeouts_total", self.rule_exec_timeouts_total.load(Ordering::Relaxed));
        for (rule, count) in self.rule_matches_total.lock().expect("metrics lock poisoned").iter() {
            self.render_counter_labeled(&mut out, "gw_rule_matches_total", &[("rule", rule)], *count);
        }

        for (rule, count) in self.alert_emitted_total.lock().expect("metrics lock poisoned").iter() {
            self.render_counter_labeled(&mut out, "gw_alert_emitted_total", &[("rule", rule)], *count);
        }
        self.render_counter(&mut out, "gw_alert_dispatch_failed_total", self.alert_dispatch_failed_total.load(Ordering::Relaxed));

        self.render_counter(&mut out, "gw_forward_dispatch_total", self.forward_dispatch_total.load(Ordering::Relaxed));
        self.render_counter(&mut out, "gw_forward_dispatch_failed_total", self.forward_dispatch_failed_total.load(Ordering::Relaxed));

        self.render_counter(&mut out, "gw_aggregate_sweeps_total", self.aggregate_sweeps_total.load(Ordering::Relaxed));

        out
    }

    fn render_counter(&self, out: &mut String, name: &str, value: u64) {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }

    fn render_gauge(&self, out: &mut String, name: &str, value: u64) {
        let _ = writeln!(out, "# TYPE {name} gauge");
        let _ = writeln!(out, "{name} {value}");
    }

    fn render_counter_labeled(&self, out: &mut String, name: &str, labels: &[(&str, &str)], value: u64) {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
    }

    fn summary_line(&self) -> String {
        format!(
            "bus_depth={} bus_admitted={} bus_dropped={} rule_evals={} rule_errors={} alerts={} forwards={}",
            self.bus.len(),
            self.bus.metrics.admitted_total.load(Ordering::Relaxed),
            self.bus.metrics.dropped_newest_total.load(Ordering::Relaxed) + self.bus.metrics.dropped_oldest_total.load(Ordering::Relaxed),
            self.rule_evaluations_total.load(Ordering::Relaxed),
            self.rule_action_errors_total.load(Ordering::Relaxed),
            self.alert_emitted_total.lock().expect("metrics lock poisoned").values().sum::<u64>(),
            self.forward_dispatch_total.load(Ordering::Relaxed),
        )
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut out = String::from("{");
    for (idx, (key, value)) in labels.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push('=');
        out.push('"');
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                _ => out.push(ch),
            }
        }
        out.push('"');
    }
    out.push('}');
    out
}

/// Serves `GET /metrics` and logs a periodic summary until cancelled.
pub async fn run_metrics_task(metrics: Arc<RuntimeMetrics>, config: MetricsConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.prometheus_listen).await?;
    gw_info!(sys, listen = %config.prometheus_listen, interval = %config.report_interval, "metrics exporter started");

    let mut tick = tokio::time::interval(config.report_interval.as_duration());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                gw_info!(res, summary = %metrics.summary_line(), "metrics snapshot");
            }
            result = listener.accept() => {
                let (mut stream, _) = result?;
                let body = metrics.render_prometheus();
                let mut req_buf = [0u8; 512];
                let req_n = stream.read(&mut req_buf).await.unwrap_or(0);
                let is_metrics = req_n > 0
                    && std::str::from_utf8(&req_buf[..req_n]).unwrap_or("").starts_with("GET /metrics");
                if is_metrics {
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    stream.write_all(header.as_bytes()).await?;
                    stream.write_all(body.as_bytes()).await?;
                } else {
                    stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await?;
                }
                stream.shutdown().await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_config::{BusConfig, BusPolicy};

    fn metrics() -> RuntimeMetrics {
        RuntimeMetrics::new(Arc::new(Bus::new(&BusConfig { capacity: 4, policy: BusPolicy::Block, admission_timeout: std::time::Duration::from_secs(1).into() })))
    }

    #[test]
    fn render_prometheus_includes_counter_names() {
        let m = metrics();
        m.inc_rule_match("r1");
        m.inc_alert_emitted("r1");
        let body = m.render_prometheus();
        assert!(body.contains("gw_rule_matches_total{rule=\"r1\"} 1"));
        assert!(body.contains("gw_alert_emitted_total{rule=\"r1\"} 1"));
        assert!(body.contains("gw_bus_queue_depth"));
    }

    #[test]
    fn summary_line_reports_zero_counts_initially() {
        let m = metrics();
        assert!(m.summary_line().contains("rule_evals=0"));
    }
}
