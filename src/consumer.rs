use crate::config::KafkaConfig;
use crate::event::NotificationBatch;
use crate::processor::ResizeProcessor;
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Kafka consumer delivering change-notification batches to the processor.
///
/// The consumer is a thin shell: each message payload is one notification
/// batch; per-item outcomes are handled inside the processor, and only a
/// malformed batch surfaces here as a message-level failure.
pub struct NotificationConsumer {
    consumer: StreamConsumer,
    processor: Arc<ResizeProcessor>,
}

impl NotificationConsumer {
    /// Create a new Kafka consumer for notification batches
    pub fn new(config: &KafkaConfig, processor: Arc<ResizeProcessor>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval_ms.to_string(),
            );

        // Configure SSL if enabled
        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        // Configure SASL if credentials provided
        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.notification_topic])
            .context("Failed to subscribe to notification topic")?;

        info!(
            topic = %config.notification_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            processor,
        })
    }

    /// Start consuming and processing notification batches
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting notification consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => {
                    if let Err(e) = self.process_message(&message).await {
                        // Batch-level failure: the payload itself was bad,
                        // no per-item report exists for it
                        error!(
                            error = %e,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Failed to process notification batch"
                        );
                        metrics::counter!("resize.batches.failed").increment(1);
                    } else {
                        // Commit offset on success
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                        metrics::counter!("resize.batches.processed").increment(1);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("resize.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Process a single Kafka message carrying one notification batch
    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let payload = message.payload().context("Message has no payload")?;

        let batch: NotificationBatch = serde_json::from_slice(payload)
            .context("Malformed notification batch")?;

        debug!(records = batch.records.len(), "Received notification batch");

        let report = self.processor.handle_batch(&batch).await;

        info!(
            processed = report.processed,
            report = %serde_json::to_string(&report).unwrap_or_default(),
            "Notification batch processed"
        );

        Ok(())
    }
}
