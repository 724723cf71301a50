use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;

use super::AlertRecord;

/// Trait for alert output destinations reachable from `gw-core` alone
/// (file/console); MQTT/InfluxDB/Redis/WebSocket alert channels are
/// `gw-sinks` sink instances addressed by name in `AlertActionConfig::channels`
/// and dispatched by `gw-runtime`, not through this trait.
pub trait AlertSink: Send + Sync {
    fn send(&self, record: &AlertRecord) -> Result<()>;
}

/// Appends alerts as JSON Lines to a file.
pub struct FileAlertSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileAlertSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl AlertSink for FileAlertSink {
    fn send(&self, record: &AlertRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut w = self.writer.lock().expect("alert sink lock poisoned");
        w.write_all(json.as_bytes())?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

/// Writes a one-line human-readable summary to stdout; the default
/// `console` alert channel.
pub struct ConsoleAlertSink;

impl AlertSink for ConsoleAlertSink {
    fn send(&self, record: &AlertRecord) -> Result<()> {
        println!("[{:?}] {} {}/{}: {}", record.level, record.rule_id, record.device_id, record.key, record.message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::AlertLevel;
    use std::io::Read;

    fn sample_alert() -> AlertRecord {
        AlertRecord::new(
            "high_temp",
            AlertLevel::Warning,
            "temp over threshold",
            vec!["console".to_string()],
            "dev1",
            "temp",
            "2026-01-01T00:00:00.000Z",
        )
    }

    #[test]
    fn test_alert_record_serialization() {
        let alert = sample_alert();
        let json = serde_json::to_string(&alert).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["rule_id"], "high_temp");
        assert_eq!(parsed["device_id"], "dev1");
        assert_eq!(parsed["key"], "temp");
        assert_eq!(parsed["level"], "warning");
    }

    #[test]
    fn test_file_alert_sink_writes_jsonl() {
        let dir = std::env::temp_dir().join("gw_test_alert_sink");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("alerts.jsonl");
        let _ = std::fs::remove_file(&path);

        {
            let sink = FileAlertSink::open(&path).unwrap();
            sink.send(&sample_alert()).unwrap();

            let mut alert2 = sample_alert();
            alert2.rule_id = "rule_two".to_string();
            sink.send(&alert2).unwrap();
        }

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();

        let lines: Vec<&str> = contents.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["rule_id"], "high_temp");

        let parsed2: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed2["rule_id"], "rule_two");

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn console_sink_never_errors() {
        let sink = ConsoleAlertSink;
        assert!(sink.send(&sample_alert()).is_ok());
    }
}
