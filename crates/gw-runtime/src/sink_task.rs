//! Sink orchestration (spec C10): builds every enabled sink `PluginDef`
//! up front and owns the running instances, so the rule engine and the
//! alert dispatcher can address a sink purely by its configured id. Each
//! sink gets its own [`SinkBuffer`]: points are batched up to
//! `batch_size` or flushed by a `tokio::time::interval` timer, whichever
//! comes first, grounded on `wf-core::window::buffer::Window::append`'s
//! size-threshold eviction shape repurposed as a flush threshold.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use gw_config::PluginDef;
use gw_core::Point;
use gw_plugin_api::{SinkHandle, SinkRegistry};
use orion_error::StructError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeError, RuntimeReason};

/// At most this many attempts (including the first) before a batch is
/// logged and dropped, matching the capped-backoff shape used by the
/// adapter reconnect loops.
const MAX_FLUSH_ATTEMPTS: u32 = 3;

struct SinkBuffer {
    id: String,
    handle: Mutex<SinkHandle>,
    pending: Mutex<VecDeque<Point>>,
    batch_size: usize,
    flush_timeout: Duration,
}

impl SinkBuffer {
    /// Appends `point`, flushing immediately if the batch threshold is
    /// reached (the timer handles the case where it never is).
    async fn push(&self, point: Point) -> Result<(), RuntimeError> {
        let should_flush = {
            let mut pending = self.pending.lock().await;
            pending.push_back(point);
            pending.len() >= self.batch_size
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drains whatever is buffered and hands it to the sink's batch API,
    /// retrying a capped number of times before logging and dropping.
    async fn flush(&self) -> Result<(), RuntimeError> {
        let batch: Vec<Point> = {
            let mut pending = self.pending.lock().await;
            if pending.is_empty() {
                return Ok(());
            }
            pending.drain(..).collect()
        };

        let mut backoff = Duration::from_millis(100);
        let mut last_err = None;
        for attempt in 1..=MAX_FLUSH_ATTEMPTS {
            let mut handle = self.handle.lock().await;
            match handle.sink_points(&batch).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < MAX_FLUSH_ATTEMPTS {
                        drop(handle);
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        let e = last_err.expect("loop ran at least once");
        gw_warn!(sys, sink = %self.id, batch = batch.len(), error = %e, "sink batch flush failed after retries, dropping batch");
        Err(StructError::from(RuntimeReason::Sink(format!("sink {:?}: {e}", self.id))))
    }
}

/// Owns every built sink instance, keyed by its configured id (spec C10's
/// forward/alert targets address sinks this way, e.g. `"mqtt_primary"`).
pub struct SinkRuntime {
    sinks: HashMap<String, Arc<SinkBuffer>>,
    cancel: CancellationToken,
    flush_timers: Mutex<Vec<JoinHandle<()>>>,
}

impl SinkRuntime {
    /// Builds one instance per enabled definition. A single bad sink
    /// definition fails the whole bootstrap (spec §7's fail-fast startup
    /// discipline) rather than silently running with a missing target.
    /// Spawns a per-sink flush-timer task, stopped and drained by
    /// [`Self::stop_all`].
    pub async fn build(registry: &SinkRegistry, defs: Vec<PluginDef>, work_root: impl AsRef<std::path::Path>) -> Result<Self, RuntimeError> {
        let work_root = work_root.as_ref();
        let mut sinks = HashMap::new();
        let cancel = CancellationToken::new();
        let mut flush_timers = Vec::new();

        for def in defs.into_iter().filter(|d| d.enabled) {
            let handle = registry
                .build(&def.kind, &def.id, work_root, def.params.clone())
                .await
                .map_err(|e| StructError::from(RuntimeReason::Sink(format!("sink {:?} ({}): {e}", def.id, def.kind))))?;

            let buffer = Arc::new(SinkBuffer {
                id: def.id.clone(),
                handle: Mutex::new(handle),
                pending: Mutex::new(VecDeque::new()),
                batch_size: def.batch_size,
                flush_timeout: def.flush_timeout.as_duration(),
            });

            flush_timers.push(tokio::spawn(run_flush_timer(Arc::clone(&buffer), cancel.child_token())));
            sinks.insert(def.id, buffer);
        }

        Ok(Self { sinks, cancel, flush_timers: Mutex::new(flush_timers) })
    }

    pub fn contains(&self, target: &str) -> bool {
        self.sinks.contains_key(target)
    }

    /// Buffers `point` for the sink configured under `target`, flushing
    /// immediately once `batch_size` is reached. Unknown target ids are a
    /// rule-configuration error, not a transient one — they're reported
    /// as `RuntimeReason::Sink` so they surface the same way a
    /// misconfigured sink connection would.
    pub async fn dispatch(&self, target: &str, point: &Point) -> Result<(), RuntimeError> {
        let buffer = self
            .sinks
            .get(target)
            .ok_or_else(|| StructError::from(RuntimeReason::Sink(format!("unknown sink target {target:?}"))))?;
        buffer.push(point.clone()).await
    }

    /// Stops the flush timers (each does one final flush as it exits),
    /// then stops every sink instance. Called once the alert dispatcher's
    /// channel closes (spec §7's drain-on-shutdown discipline).
    pub async fn stop_all(&self) {
        self.cancel.cancel();
        let timers = std::mem::take(&mut *self.flush_timers.lock().await);
        for timer in timers {
            let _ = timer.await;
        }

        for (id, buffer) in &self.sinks {
            if let Err(e) = buffer.flush().await {
                gw_warn!(sys, sink = %id, error = %e, "final sink flush failed");
            }
            let mut guard = buffer.handle.lock().await;
            if let Err(e) = guard.stop().await {
                gw_warn!(sys, sink = %id, error = %e, "sink failed to stop cleanly");
            }
        }
    }
}

async fn run_flush_timer(buffer: Arc<SinkBuffer>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(buffer.flush_timeout);
    tick.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                if let Err(e) = buffer.flush().await {
                    gw_warn!(sys, sink = %buffer.id, error = %e, "timed sink flush failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_config::{HumanDuration, PluginScope};
    use gw_core::Value;

    fn console_def(id: &str) -> PluginDef {
        PluginDef {
            id: id.into(),
            kind: "console".into(),
            scope: PluginScope::Sink,
            enabled: true,
            params: Default::default(),
            origin: None,
            batch_size: 1,
            flush_timeout: Duration::from_secs(60).into(),
        }
    }

    fn batched_console_def(id: &str, batch_size: usize) -> PluginDef {
        PluginDef { batch_size, flush_timeout: HumanDuration::from(Duration::from_secs(60)), ..console_def(id) }
    }

    #[tokio::test]
    async fn dispatches_to_built_sink_by_id() {
        let mut registry = SinkRegistry::new();
        gw_sinks::register_all(&mut registry);

        let runtime = SinkRuntime::build(&registry, vec![console_def("out")], std::env::temp_dir()).await.unwrap();
        assert!(runtime.contains("out"));

        let point = Point::new("dev1", "temp", Value::Float(1.0), 0);
        runtime.dispatch("out", &point).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_target_is_an_error() {
        let registry = SinkRegistry::new();
        let runtime = SinkRuntime::build(&registry, vec![], std::env::temp_dir()).await.unwrap();
        let point = Point::new("dev1", "temp", Value::Float(1.0), 0);
        assert!(runtime.dispatch("missing", &point).await.is_err());
    }

    #[tokio::test]
    async fn points_below_batch_size_stay_buffered_until_flush() {
        let mut registry = SinkRegistry::new();
        gw_sinks::register_all(&mut registry);
        let runtime = SinkRuntime::build(&registry, vec![batched_console_def("out", 10)], std::env::temp_dir()).await.unwrap();

        let point = Point::new("dev1", "temp", Value::Float(1.0), 0);
        runtime.dispatch("out", &point).await.unwrap();

        let buffer = &runtime.sinks["out"];
        assert_eq!(buffer.pending.lock().await.len(), 1);

        buffer.flush().await.unwrap();
        assert_eq!(buffer.pending.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn reaching_batch_size_flushes_immediately() {
        let mut registry = SinkRegistry::new();
        gw_sinks::register_all(&mut registry);
        let runtime = SinkRuntime::build(&registry, vec![batched_console_def("out", 2)], std::env::temp_dir()).await.unwrap();

        let point = Point::new("dev1", "temp", Value::Float(1.0), 0);
        runtime.dispatch("out", &point.clone()).await.unwrap();
        runtime.dispatch("out", &point).await.unwrap();

        let buffer = &runtime.sinks["out"];
        assert_eq!(buffer.pending.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn stop_all_flushes_remaining_buffered_points() {
        let mut registry = SinkRegistry::new();
        gw_sinks::register_all(&mut registry);
        let runtime = SinkRuntime::build(&registry, vec![batched_console_def("out", 10)], std::env::temp_dir()).await.unwrap();

        let point = Point::new("dev1", "temp", Value::Float(1.0), 0);
        runtime.dispatch("out", &point).await.unwrap();
        runtime.stop_all().await;

        assert_eq!(runtime.sinks["out"].pending.lock().await.len(), 0);
    }
}
