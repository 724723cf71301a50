//! End-to-end integration test for the assembled gateway: `mock` adapter ->
//! fan-out bus -> rule engine -> alert action -> file alert sink, driven
//! entirely through [`gw_runtime::lifecycle::Reactor`] against a config
//! tree written to a temp directory.

use std::time::Duration;

use gw_config::GatewayConfig;
use gw_runtime::lifecycle::Reactor;

fn write_config(base: &std::path::Path, alerts_path: &std::path::Path) -> std::path::PathBuf {
    std::fs::create_dir_all(base.join("rules.d")).unwrap();
    std::fs::create_dir_all(base.join("adapters.d")).unwrap();
    std::fs::create_dir_all(base.join("sinks.d")).unwrap();

    std::fs::write(
        base.join("adapters.d/mock.toml"),
        r#"
[[plugins]]
id = "sensor1"
type = "mock"

[plugins.params]
device_id = "sensor1"
key = "counter"
interval_ms = 5
"#,
    )
    .unwrap();

    std::fs::write(
        base.join("rules.d/threshold.json"),
        r#"{
            "id": "counter_high",
            "name": "counter_high",
            "priority": 10,
            "condition": {"kind": "simple", "field": "value", "op": "gt", "value": 2},
            "actions": [
                {"type": "alert", "config": {"message": "counter over threshold", "channels": ["file"]}}
            ]
        }"#,
    )
    .unwrap();

    let config_path = base.join("gateway.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[bus]
capacity = 64

[rules]
dir = "rules.d"
hot_reload = false

adapters = "adapters.d"
sinks = "sinks.d"

[runtime]
executor_parallelism = 2
rule_exec_timeout = "1s"

[alert]
sinks = ["file://{}"]
"#,
            alerts_path.display()
        ),
    )
    .unwrap();

    config_path
}

#[tokio::test]
async fn mock_adapter_fires_alert_into_file_sink() {
    let dir = tempfile::tempdir().unwrap();
    let alerts_path = dir.path().join("alerts.jsonl");
    let config_path = write_config(dir.path(), &alerts_path);

    let config = GatewayConfig::load(&config_path).unwrap();
    let reactor = Reactor::start(config, dir.path()).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut alerts = Vec::new();
    while tokio::time::Instant::now() < deadline {
        if let Ok(content) = std::fs::read_to_string(&alerts_path) {
            if !content.trim().is_empty() {
                alerts = content.lines().map(|l| l.to_string()).collect();
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    reactor.shutdown();
    reactor.wait().await.unwrap();

    assert!(!alerts.is_empty(), "expected at least one alert line in {}", alerts_path.display());
    let record: serde_json::Value = serde_json::from_str(&alerts[0]).unwrap();
    assert_eq!(record["rule_id"], serde_json::json!("counter_high"));
    assert_eq!(record["device_id"], serde_json::json!("sensor1"));
    assert_eq!(record["channels"], serde_json::json!(["file"]));
}
