use crate::config::KafkaConfig;
use crate::event::{decode_notification, EventError};
use crate::orchestrator::{IngestError, IngestOrchestrator, IngestOutcome};
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Why a notification could not be handled
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Message has no payload")]
    EmptyPayload,

    #[error(transparent)]
    Undecodable(#[from] EventError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl MessageError {
    /// Payloads that can never be decoded are committed. Ingest failures are
    /// not, but the next commit on the partition moves past them; replay an
    /// export by re-triggering its source object.
    pub fn should_commit(&self) -> bool {
        !matches!(self, MessageError::Ingest(_))
    }
}

/// Decode a notification and run every object it announces through the
/// orchestrator, in order. Stops at the first ingest error.
pub async fn process_payload(
    orchestrator: &IngestOrchestrator,
    payload: Option<&[u8]>,
) -> Result<Vec<IngestOutcome>, MessageError> {
    let payload = payload.ok_or(MessageError::EmptyPayload)?;
    let events = decode_notification(payload)?;

    let mut outcomes = Vec::with_capacity(events.len());
    for event in &events {
        debug!(bucket = %event.bucket, object = %event.name, "Received object notification");
        outcomes.push(orchestrator.handle(event).await?);
    }
    Ok(outcomes)
}

/// Kafka consumer for export-created notifications
pub struct SurveyExportConsumer {
    consumer: StreamConsumer,
    orchestrator: Arc<IngestOrchestrator>,
    running: Arc<AtomicBool>,
}

impl SurveyExportConsumer {
    /// Create a new Kafka consumer subscribed to the notification topic
    pub fn new(
        config: &KafkaConfig,
        orchestrator: Arc<IngestOrchestrator>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

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
            .subscribe(&[config.notification_topic.as_str()])
            .context("Failed to subscribe to notification topic")?;

        info!(
            topic = %config.notification_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            orchestrator,
            running,
        })
    }

    /// Consume until the stream ends or `shutdown` fires.
    ///
    /// Messages are processed one at a time so exports of a survey are
    /// handled in arrival order.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting survey export consumer");
        self.running.store(true, Ordering::SeqCst);

        let mut message_stream = self.consumer.stream();

        loop {
            let message_result = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Consumer shutdown requested");
                    break;
                }
                next = message_stream.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            match message_result {
                Ok(message) => self.handle_message(&message).await,
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("survey_photos.kafka.errors").increment(1);
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn handle_message(&self, message: &BorrowedMessage<'_>) {
        match process_payload(&self.orchestrator, message.payload()).await {
            Ok(outcomes) => {
                debug!(objects = outcomes.len(), "Notification processed");
                metrics::counter!("survey_photos.messages.processed").increment(1);
                self.commit(message);
            }
            Err(e) => {
                error!(error = %e, "Failed to process message");
                metrics::counter!("survey_photos.messages.failed").increment(1);
                if e.should_commit() {
                    self.commit(message);
                }
            }
        }
    }

    fn commit(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            warn!(error = %e, "Failed to commit offset");
        }
    }
}
