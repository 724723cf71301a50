//! Standalone replay tool: pulls the durable JetStream log (spec C11) and
//! republishes every point into a single configured sink, independent of
//! the gateway process. Grounded on `gw-runtime`'s sink/signal plumbing,
//! reduced to the one-sink, fetch/ack-or-nak loop the recovery use case
//! needs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use gw_config::{LoggingConfig, PluginDef, PluginScope, PluginTomlFile};
use gw_plugin_api::SinkRegistry;
use gw_replay::{AckPolicy, DeliverPolicy, ReplayLog};
use gw_runtime::lifecycle::wait_for_signal;
use gw_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "gw-recovery", about = "Replay the durable JetStream log into a configured sink")]
struct Cli {
    /// NATS server URL
    #[arg(long = "nats", default_value = "nats://127.0.0.1:4222")]
    nats: String,
    /// JetStream stream name
    #[arg(long = "stream", default_value = "iot_data")]
    stream: String,
    /// Filter subject for the pull consumer (defaults to the whole stream)
    #[arg(long = "subject")]
    subject: Option<String>,
    /// Durable consumer name
    #[arg(long = "consumer", default_value = "gw-recovery")]
    consumer: String,
    /// Id of the sink to replay into, looked up in --config
    #[arg(long = "sink")]
    sink: String,
    /// Path to a sink plugin definition TOML file (same `[[plugins]]` format as sinks_dir/*.toml)
    #[arg(long = "config")]
    config: PathBuf,
    /// Max messages fetched per batch
    #[arg(long = "batch", default_value_t = 100)]
    batch: usize,
    /// Optional log file path
    #[arg(long = "log")]
    log: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let logging = LoggingConfig { file: cli.log.clone(), ..Default::default() };
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let _guard = match init_tracing(&logging, &base_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return 1;
        }
    };

    let def = match load_sink_def(&cli.config, &cli.sink) {
        Ok(def) => def,
        Err(e) => {
            tracing::error!(domain = "conf", error = %e, "failed to load sink config");
            return 1;
        }
    };

    let mut registry = SinkRegistry::new();
    gw_sinks::register_all(&mut registry);
    let work_root = cli.config.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let mut sink = match registry.build(&def.kind, &def.id, &work_root, def.params.clone()).await {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!(domain = "conf", error = %e, "failed to build sink {:?}", def.id);
            return 1;
        }
    };

    let log = match ReplayLog::connect(&cli.nats, &cli.stream, "iot.data").await {
        Ok(log) => log,
        Err(e) => {
            tracing::error!(domain = "res", error = %e, "failed to connect to jetstream");
            return 2;
        }
    };

    let consumer = match log.consumer(&cli.consumer, DeliverPolicy::All, AckPolicy::Explicit, cli.subject.clone()).await {
        Ok(consumer) => consumer,
        Err(e) => {
            tracing::error!(domain = "res", error = %e, "failed to bind pull consumer");
            return 2;
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move { wait_for_signal(signal_cancel).await });

    let mut processed: u64 = 0;
    let mut failed: u64 = 0;

    while !cancel.is_cancelled() {
        let messages = tokio::select! {
            result = ReplayLog::fetch_batch(&consumer, cli.batch) => result,
            _ = cancel.cancelled() => break,
        };
        let messages = match messages {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(domain = "res", error = %e, "batch fetch failed, retrying");
                continue;
            }
        };
        if messages.is_empty() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        }

        // Partial-batch semantics per message: each point is acked or
        // naked independently, since JetStream acks have no batch concept.
        for message in &messages {
            match sink.sink_point(&message.point).await {
                Ok(()) => {
                    processed += 1;
                    if let Err(e) = message.ack().await {
                        tracing::warn!(domain = "res", error = %e, "ack failed");
                    }
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(domain = "res", error = %e, "sink publish failed, naking message");
                    if let Err(e) = message.nak().await {
                        tracing::warn!(domain = "res", error = %e, "nak failed");
                    }
                }
            }
        }
    }

    if let Err(e) = sink.stop().await {
        tracing::warn!(domain = "sys", error = %e, "sink failed to stop cleanly");
    }

    println!("{{\"processed\": {processed}, \"failed\": {failed}}}");
    0
}

/// Load a single plugin definition by id from a `sinks_dir`-style TOML file.
fn load_sink_def(path: &Path, sink_id: &str) -> Result<PluginDef> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: PluginTomlFile = toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    let origin = path.display().to_string();
    file.plugins
        .into_iter()
        .find(|p| p.id == sink_id)
        .map(|raw| raw.into_plugin_def(PluginScope::Sink, Some(origin)))
        .ok_or_else(|| anyhow::anyhow!("no sink with id {sink_id:?} in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_matching_sink_id_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sinks.toml");
        std::fs::write(
            &path,
            r#"
[[plugins]]
id = "console_out"
type = "console"
"#,
        )
        .unwrap();

        let def = load_sink_def(&path, "console_out").unwrap();
        assert_eq!(def.kind, "console");
        assert_eq!(def.scope, PluginScope::Sink);
    }

    #[test]
    fn missing_sink_id_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sinks.toml");
        std::fs::write(&path, "[[plugins]]\nid = \"other\"\ntype = \"console\"\n").unwrap();

        assert!(load_sink_def(&path, "console_out").is_err());
    }
}
