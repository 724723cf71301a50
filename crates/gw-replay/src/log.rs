//! Durable replay log (spec C11): a JetStream stream that every configured
//! sink's points are mirrored into, plus the pull-consumer machinery the
//! standalone recovery tool uses to replay it into any sink after an outage.

use async_nats::jetstream::consumer::pull::Config as PullConfig;
pub use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy};
use async_nats::jetstream::{self, Context};
use futures_util::StreamExt;
use gw_core::Point;
use orion_error::StructError;

use crate::error::{ReplayReason, ReplayResult};

/// One message pulled off the log: the decoded point plus the raw JetStream
/// message, so the caller can ack/nak it once the point has been delivered
/// downstream.
pub struct ReplayMessage {
    pub point: Point,
    raw: jetstream::Message,
}

impl ReplayMessage {
    pub async fn ack(&self) -> ReplayResult<()> {
        self.raw
            .ack()
            .await
            .map_err(|e| StructError::from(ReplayReason::Consume(format!("ack failed: {e}"))))
    }

    pub async fn nak(&self) -> ReplayResult<()> {
        self.raw
            .ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| StructError::from(ReplayReason::Consume(format!("nak failed: {e}"))))
    }
}

/// Handle on the gateway's JetStream-backed replay log.
pub struct ReplayLog {
    jetstream: Context,
    stream: jetstream::stream::Stream,
    subject_prefix: String,
}

impl ReplayLog {
    /// Connect to NATS and ensure the replay stream exists, creating it with
    /// a limits-based retention policy if absent.
    pub async fn connect(nats_url: &str, stream_name: &str, subject_prefix: &str) -> ReplayResult<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| StructError::from(ReplayReason::Connect(format!("{nats_url}: {e}"))))?;
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(StreamConfig {
                name: stream_name.to_string(),
                subjects: vec![format!("{subject_prefix}.>")],
                retention: RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .map_err(|e| StructError::from(ReplayReason::Connect(format!("stream {stream_name}: {e}"))))?;

        Ok(Self { jetstream, stream, subject_prefix: subject_prefix.to_string() })
    }

    fn subject_for(&self, point: &Point) -> String {
        format!("{}.{}.{}", self.subject_prefix, point.device_id, point.key)
    }

    /// Append one point to the log, waiting for the JetStream ack.
    pub async fn publish(&self, point: &Point) -> ReplayResult<()> {
        let subject = self.subject_for(point);
        let payload = serde_json::to_vec(point)
            .map_err(|e| StructError::from(ReplayReason::Decode(e.to_string())))?;

        let ack_future = self
            .jetstream
            .publish(subject, payload.into())
            .await
            .map_err(|e| StructError::from(ReplayReason::Publish(e.to_string())))?;
        ack_future
            .await
            .map_err(|e| StructError::from(ReplayReason::Publish(format!("ack: {e}"))))?;
        Ok(())
    }

    /// Create (or reattach to) a durable pull consumer over the log.
    pub async fn consumer(
        &self,
        durable_name: &str,
        deliver_policy: DeliverPolicy,
        ack_policy: AckPolicy,
        filter_subject: Option<String>,
    ) -> ReplayResult<PullConsumer> {
        let config = PullConfig {
            durable_name: Some(durable_name.to_string()),
            deliver_policy,
            ack_policy,
            filter_subject: filter_subject.unwrap_or_default(),
            ..Default::default()
        };
        self.stream
            .get_or_create_consumer(durable_name, config)
            .await
            .map_err(|e| StructError::from(ReplayReason::Consume(format!("consumer {durable_name}: {e}"))))
    }

    /// Pull up to `batch_size` messages and decode them as [`Point`]s.
    /// Decode failures are logged and skipped rather than failing the batch.
    pub async fn fetch_batch(consumer: &PullConsumer, batch_size: usize) -> ReplayResult<Vec<ReplayMessage>> {
        let mut batch = consumer
            .fetch()
            .max_messages(batch_size)
            .messages()
            .await
            .map_err(|e| StructError::from(ReplayReason::Consume(e.to_string())))?;

        let mut out = Vec::with_capacity(batch_size);
        while let Some(msg) = batch.next().await {
            let msg = msg.map_err(|e| StructError::from(ReplayReason::Consume(e.to_string())))?;
            match serde_json::from_slice::<Point>(&msg.payload) {
                Ok(point) => out.push(ReplayMessage { point, raw: msg }),
                Err(e) => {
                    tracing::warn!(domain = "conf", error = %e, "skipping undecodable replay message");
                    let _ = msg.ack_with(jetstream::AckKind::Term).await;
                }
            }
        }
        Ok(out)
    }
}
