//! Alert dispatch (spec C8): consumes `AlertRecord`s produced by the rule
//! engine and routes each to every channel the firing action named.
//! Grounded on the teacher's `run_alert_dispatcher` drain-on-close shape;
//! the connector-based `SinkDispatcher` is replaced by two destinations,
//! exactly as `gw_core::alert::sink` documents: built-in `console`/`file`
//! channels handled in-process, everything else forwarded through
//! [`crate::sink_task::SinkRuntime`] as an ordinary Point.

use std::collections::HashMap;
use std::sync::Arc;

use gw_config::AlertConfig;
use gw_core::alert::{AlertRecord, AlertSink, ConsoleAlertSink, FileAlertSink};
use gw_core::{Point, Value};
use tokio::sync::mpsc;

use crate::sink_task::SinkRuntime;

/// Bounded channel capacity between the rule engine and this dispatcher.
pub const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Builds the built-in alert sink map from `AlertConfig.sinks`' URI list,
/// e.g. `"console://"` -> `console`, `"file:///var/log/gw-alerts.jsonl"` -> `file`.
pub fn build_alert_sinks(config: &AlertConfig) -> anyhow::Result<HashMap<String, Box<dyn AlertSink>>> {
    let mut sinks: HashMap<String, Box<dyn AlertSink>> = HashMap::new();
    for uri in &config.sinks {
        let (scheme, rest) = uri.split_once("://").ok_or_else(|| anyhow::anyhow!("alert sink uri missing scheme: {uri:?}"))?;
        match scheme {
            "console" => {
                sinks.insert("console".to_string(), Box::new(ConsoleAlertSink));
            }
            "file" => {
                sinks.insert("file".to_string(), Box::new(FileAlertSink::open(rest)?));
            }
            other => anyhow::bail!("unknown built-in alert sink scheme {other:?}"),
        }
    }
    Ok(sinks)
}

/// Drains alert records until the rule engine's `Sender<AlertRecord>` is
/// dropped, routing each to every channel named on the firing action.
/// Unrecognized channel names fall back to `sinks`, so an alert action can
/// name any configured sink id (e.g. `"mqtt_alerts"`) without it needing to
/// be a built-in console/file destination.
pub async fn run_alert_dispatcher(
    mut rx: mpsc::Receiver<AlertRecord>,
    alert_sinks: HashMap<String, Box<dyn AlertSink>>,
    sinks: Arc<SinkRuntime>,
) {
    while let Some(record) = rx.recv().await {
        for channel in &record.channels {
            if let Some(sink) = alert_sinks.get(channel) {
                if let Err(e) = sink.send(&record) {
                    gw_warn!(pipe, channel = %channel, error = %e, "built-in alert sink send failed");
                }
                continue;
            }
            if sinks.contains(channel) {
                let point = alert_record_to_point(&record);
                if let Err(e) = sinks.dispatch(channel, &point).await {
                    gw_warn!(pipe, channel = %channel, error = %e, "alert forward to sink failed");
                }
                continue;
            }
            gw_warn!(pipe, channel = %channel, rule = %record.rule_id, "alert channel not found in built-ins or configured sinks");
        }
    }
    sinks.stop_all().await;
}

fn alert_record_to_point(record: &AlertRecord) -> Point {
    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    Point::new(record.device_id.clone(), record.key.clone(), Value::Str(record.message.clone()), timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_config::AlertConfig;
    use gw_core::AlertLevel;
    use gw_plugin_api::SinkRegistry;

    #[test]
    fn builds_console_and_file_sinks() {
        let dir = std::env::temp_dir().join("gw_test_alert_task");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("alerts.jsonl");
        let config = AlertConfig { sinks: vec!["console://".into(), format!("file://{}", path.display())] };
        let sinks = build_alert_sinks(&config).unwrap();
        assert!(sinks.contains_key("console"));
        assert!(sinks.contains_key("file"));
    }

    #[tokio::test]
    async fn dispatches_unknown_channel_to_sink_runtime() {
        let mut registry = SinkRegistry::new();
        gw_sinks::register_all(&mut registry);
        let runtime = Arc::new(
            SinkRuntime::build(
                &registry,
                vec![gw_config::PluginDef {
                    id: "console_out".into(),
                    kind: "console".into(),
                    scope: gw_config::PluginScope::Sink,
                    enabled: true,
                    params: Default::default(),
                    origin: None,
                    batch_size: 1,
                    flush_timeout: std::time::Duration::from_secs(60).into(),
                }],
                std::env::temp_dir(),
            )
            .await
            .unwrap(),
        );

        let (tx, rx) = mpsc::channel(ALERT_CHANNEL_CAPACITY);
        let dispatcher = tokio::spawn(run_alert_dispatcher(rx, HashMap::new(), Arc::clone(&runtime)));

        let record = AlertRecord::new("r1", AlertLevel::Warning, "hot", vec!["console_out".into()], "dev1", "temp", "2026-01-01T00:00:00Z");
        tx.send(record).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();
    }
}
