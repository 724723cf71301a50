//! ISP sidecar supervisor (spec C4): spawns (and, if configured, auto-
//! restarts) an out-of-process ISP sidecar binary, accepts its TCP
//! connection, and exchanges length-prefixed JSON [`SidecarMessage`]
//! frames over it. Grounded directly on `receiver.rs`'s accept-loop/
//! frame-read shape, generalized from one-directional Arrow-IPC ingestion
//! to the bidirectional CONFIG/DATA/STATUS/RESPONSE/HEARTBEAT/METRICS
//! control channel, and on `modbus_tcp.rs`'s capped-backoff reconnect
//! loop for child-process respawning.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gw_config::{ServerConfig, SidecarProcessConfig};
use gw_core::Point;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;

/// The six frame kinds the sidecar wire protocol exchanges.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Config,
    Data,
    Status,
    Response,
    Heartbeat,
    Metrics,
}

/// One length-prefixed frame on the sidecar wire. `id` correlates a
/// `Status`/`Metrics` request with its eventual `Response`; it is absent
/// on unsolicited frames (`Data`, `Heartbeat`, the initial `Config`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SidecarMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp_ns: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SidecarMessage {
    fn new(kind: MessageType, id: Option<String>, payload: serde_json::Value) -> Self {
        Self { kind, id, timestamp_ns: now_nanos(), payload }
    }
}

/// TCP listener that accepts the sidecar's connection, optionally
/// supervising the child process that is expected to dial back into it.
pub struct SidecarListener {
    listener: TcpListener,
    bus: Arc<Bus>,
    cancel: CancellationToken,
    process: Option<SidecarProcessConfig>,
    isp_timeout: Duration,
    auto_restart: bool,
    max_retries: u32,
}

impl SidecarListener {
    /// Parse `"tcp://host:port"` (or a bare `host:port`) and bind, per
    /// `server.listen`. If `server.process` is set, the child is spawned
    /// (and re-spawned on exit) by a supervisor task started in [`Self::run`].
    pub async fn bind(server: &ServerConfig, bus: Arc<Bus>) -> anyhow::Result<Self> {
        let addr = server.listen.strip_prefix("tcp://").unwrap_or(&server.listen);
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            bus,
            cancel: CancellationToken::new(),
            process: server.process.clone(),
            isp_timeout: server.isp_timeout.as_duration(),
            auto_restart: server.auto_restart,
            max_retries: server.max_retries,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[tracing::instrument(name = "sidecar_listener", skip_all)]
    pub async fn run(self) -> anyhow::Result<()> {
        let supervisor = self.process.clone().map(|process| {
            let cancel = self.cancel.child_token();
            let auto_restart = self.auto_restart;
            let max_retries = self.max_retries;
            tokio::spawn(async move { supervise_child(process, auto_restart, max_retries, cancel).await })
        });

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = result?;
                    gw_debug!(conn, peer = %peer, "sidecar connected");
                    let bus = Arc::clone(&self.bus);
                    let cancel = self.cancel.child_token();
                    let isp_timeout = self.isp_timeout;
                    tokio::spawn(handle_connection(stream, bus, cancel, peer, isp_timeout));
                }
                _ = self.cancel.cancelled() => break,
            }
        }

        if let Some(handle) = supervisor {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Spawns `process` and respawns it under a capped doubling backoff every
/// time it exits, up to `max_retries` consecutive failures, as long as
/// `auto_restart` is set and the listener hasn't been cancelled.
async fn supervise_child(process: SidecarProcessConfig, auto_restart: bool, max_retries: u32, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    let mut backoff = Duration::from_millis(500);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let mut cmd = Command::new(&process.command);
        cmd.args(&process.args);
        for (key, value) in &process.env {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                gw_warn!(conn, command = %process.command, error = %e, "sidecar process spawn failed");
                attempt += 1;
                if attempt > max_retries {
                    gw_error!(conn, attempts = attempt, "sidecar process exceeded max_retries, giving up");
                    return;
                }
                if tokio::time::timeout(backoff, cancel.cancelled()).await.is_ok() {
                    return;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        gw_info!(sys, command = %process.command, "sidecar process spawned");
        attempt = 0;
        backoff = Duration::from_millis(500);

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return;
            }
            status = child.wait() => {
                match status {
                    Ok(status) => gw_warn!(conn, %status, "sidecar process exited"),
                    Err(e) => gw_warn!(conn, error = %e, "sidecar process wait failed"),
                }
                if !auto_restart {
                    return;
                }
                attempt += 1;
                if attempt > max_retries {
                    gw_error!(conn, attempts = attempt, "sidecar process exceeded max_retries, giving up");
                    return;
                }
                if tokio::time::timeout(backoff, cancel.cancelled()).await.is_ok() {
                    return;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// One live sidecar connection: the write half plus the bookkeeping
/// needed to correlate outgoing `Status`/`Metrics` requests with their
/// `Response` frames, and to track heartbeat liveness.
struct Connection {
    writer: Mutex<OwnedWriteHalf>,
    pending: std::sync::Mutex<HashMap<String, oneshot::Sender<SidecarMessage>>>,
    next_id: AtomicU64,
    last_heartbeat_ns: AtomicI64,
}

impl Connection {
    fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Mutex::new(writer),
            pending: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            last_heartbeat_ns: AtomicI64::new(now_nanos()),
        }
    }

    async fn send(&self, msg: &SidecarMessage) -> io::Result<()> {
        let frame = encode_frame(msg)?;
        self.writer.lock().await.write_all(&frame).await
    }

    /// Sends a `Status`/`Metrics` request and awaits its `Response`,
    /// timing out after `timeout`. The response is delivered through a
    /// oneshot registered in `pending` and resolved by [`Self::resolve`]
    /// when the matching frame arrives.
    async fn request(&self, kind: MessageType, timeout: Duration) -> anyhow::Result<SidecarMessage> {
        let id = format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("sidecar pending-request lock poisoned").insert(id.clone(), tx);

        let msg = SidecarMessage::new(kind, Some(id.clone()), serde_json::Value::Null);
        if let Err(e) = self.send(&msg).await {
            self.pending.lock().expect("sidecar pending-request lock poisoned").remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => anyhow::bail!("sidecar closed before responding to {id}"),
            Err(_) => {
                self.pending.lock().expect("sidecar pending-request lock poisoned").remove(&id);
                anyhow::bail!("sidecar did not respond to {id} within {timeout:?}")
            }
        }
    }

    /// Routes an inbound `Response` frame to its waiting requester, if any.
    fn resolve(&self, msg: SidecarMessage) {
        let Some(id) = msg.id.clone() else { return };
        if let Some(tx) = self.pending.lock().expect("sidecar pending-request lock poisoned").remove(&id) {
            let _ = tx.send(msg);
        }
    }

    fn mark_heartbeat(&self) {
        self.last_heartbeat_ns.store(now_nanos(), Ordering::Relaxed);
    }

    fn silence(&self) -> Duration {
        let elapsed_ns = (now_nanos() - self.last_heartbeat_ns.load(Ordering::Relaxed)).max(0);
        Duration::from_nanos(elapsed_ns as u64)
    }
}

#[tracing::instrument(skip_all, fields(peer = %peer))]
async fn handle_connection(stream: TcpStream, bus: Arc<Bus>, cancel: CancellationToken, peer: SocketAddr, isp_timeout: Duration) {
    let (read_half, write_half) = stream.into_split();
    let conn = Arc::new(Connection::new(write_half));

    let config_msg = SidecarMessage::new(MessageType::Config, None, serde_json::json!({}));
    if let Err(e) = conn.send(&config_msg).await {
        gw_warn!(conn, peer = %peer, error = %e, "sidecar config handshake failed");
        return;
    }

    let watchdog_cancel = cancel.child_token();
    let watchdog_conn = Arc::clone(&conn);
    let watchdog = tokio::spawn(async move {
        let mut tick = tokio::time::interval(isp_timeout);
        tick.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = watchdog_cancel.cancelled() => break,
                _ = tick.tick() => {
                    if watchdog_conn.silence() > isp_timeout {
                        gw_warn!(conn, peer = %peer, silence_ms = watchdog_conn.silence().as_millis() as u64, "sidecar heartbeat missed, marking unhealthy");
                    }
                }
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(None) => break,
                    Ok(Some(payload)) => handle_frame(&conn, &bus, &payload, peer).await,
                    Err(e) => {
                        gw_warn!(conn, peer = %peer, error = %e, "sidecar connection read error");
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    watchdog.abort();
    gw_debug!(conn, peer = %peer, "sidecar disconnected");
}

async fn handle_frame(conn: &Arc<Connection>, bus: &Arc<Bus>, payload: &[u8], peer: SocketAddr) {
    let msg = match serde_json::from_slice::<SidecarMessage>(payload) {
        Ok(msg) => msg,
        Err(e) => {
            gw_warn!(conn, peer = %peer, error = %e, "sidecar frame decode error");
            return;
        }
    };

    match msg.kind {
        MessageType::Data => match serde_json::from_value::<Point>(msg.payload) {
            Ok(point) => {
                if let Err(e) = bus.publish(point).await {
                    gw_warn!(bus, peer = %peer, error = %e, "point dropped at bus admission");
                }
            }
            Err(e) => gw_warn!(conn, peer = %peer, error = %e, "sidecar data frame payload decode error"),
        },
        MessageType::Heartbeat => conn.mark_heartbeat(),
        MessageType::Response => conn.resolve(msg),
        MessageType::Status | MessageType::Metrics | MessageType::Config => {
            gw_debug!(conn, peer = %peer, kind = ?msg.kind, "sidecar frame ignored (not expected inbound)");
        }
    }
}

fn encode_frame(msg: &SidecarMessage) -> io::Result<Vec<u8>> {
    let payload = serde_json::to_vec(msg).map_err(io::Error::other)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read a single length-prefixed frame: `[4B BE u32 len][JSON payload]`.
/// Returns `Ok(None)` on clean EOF.
async fn read_frame(reader: &mut (impl AsyncReadExt + Unpin)) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let frame_len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; frame_len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_config::{BusConfig, BusPolicy};
    use gw_core::Value;
    use tokio::io::AsyncWriteExt as _;

    fn bus() -> Arc<Bus> {
        Arc::new(Bus::new(&BusConfig {
            capacity: 16,
            policy: BusPolicy::Block,
            admission_timeout: Duration::from_secs(1).into(),
        }))
    }

    fn server_cfg(listen: &str) -> ServerConfig {
        ServerConfig {
            listen: listen.to_string(),
            process: None,
            isp_timeout: Duration::from_millis(200).into(),
            auto_restart: false,
            max_retries: 0,
        }
    }

    fn frame_for(msg: &SidecarMessage) -> Vec<u8> {
        encode_frame(msg).unwrap()
    }

    async fn read_one_frame(stream: &mut TcpStream) -> SidecarMessage {
        let mut reader = BufReader::new(stream);
        let payload = read_frame(&mut reader).await.unwrap().unwrap();
        serde_json::from_slice(&payload).unwrap()
    }

    #[tokio::test]
    async fn sends_config_frame_on_connect() {
        let bus = bus();
        let listener = SidecarListener::bind(&server_cfg("127.0.0.1:0"), Arc::clone(&bus)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = listener.cancel_token();
        let server = tokio::spawn(async move { listener.run().await });

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let msg = read_one_frame(&mut conn).await;
        assert_eq!(msg.kind, MessageType::Config);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn decodes_data_frame_and_publishes_point_onto_bus() {
        let bus = bus();
        let listener = SidecarListener::bind(&server_cfg("127.0.0.1:0"), Arc::clone(&bus)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = listener.cancel_token();
        let server = tokio::spawn(async move { listener.run().await });

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let _config = read_one_frame(&mut conn).await;

        let point = Point::new("plc1", "temp", Value::Float(21.5), 0);
        let data_msg = SidecarMessage::new(MessageType::Data, None, serde_json::to_value(&point).unwrap());
        conn.write_all(&frame_for(&data_msg)).await.unwrap();
        conn.flush().await.unwrap();

        let sub = bus.subscribe("test");
        let received = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
        assert_eq!(received.device_id, "plc1");

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_does_not_crash_listener() {
        let bus = bus();
        let listener = SidecarListener::bind(&server_cfg("127.0.0.1:0"), Arc::clone(&bus)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = listener.cancel_token();
        let server = tokio::spawn(async move { listener.run().await });

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let _config = read_one_frame(&mut conn).await;

        let garbage = b"not json";
        let mut frame = Vec::new();
        frame.extend_from_slice(&(garbage.len() as u32).to_be_bytes());
        frame.extend_from_slice(garbage);
        conn.write_all(&frame).await.unwrap();
        conn.flush().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.len(), 0);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn response_frame_resolves_matching_pending_request() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _peer) = listener.accept().await.unwrap();
        let (_read_half, write_half) = server_stream.into_split();
        let conn = Arc::new(Connection::new(write_half));

        let (mut client_read, _client_write) = client.into_split();
        let request = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.request(MessageType::Status, Duration::from_secs(1)).await }
        });

        let mut reader = BufReader::new(&mut client_read);
        let sent = read_frame(&mut reader).await.unwrap().unwrap();
        let sent: SidecarMessage = serde_json::from_slice(&sent).unwrap();
        assert_eq!(sent.kind, MessageType::Status);
        let id = sent.id.clone().unwrap();

        conn.resolve(SidecarMessage::new(MessageType::Response, Some(id), serde_json::json!({"ok": true})));

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.kind, MessageType::Response);
        assert_eq!(response.payload["ok"], true);
    }

    #[tokio::test]
    async fn request_times_out_when_no_response_arrives() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _peer) = listener.accept().await.unwrap();
        let (_read_half, write_half) = server_stream.into_split();
        let conn = Connection::new(write_half);

        let result = conn.request(MessageType::Metrics, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
