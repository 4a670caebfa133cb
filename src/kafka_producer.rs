use crate::config::KafkaConfig;
use crate::kafka_consumer::ArticleRecord;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while publishing enriched articles
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("failed to create producer: {0}")]
    Creation(String),

    #[error("failed to serialize enriched article: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to deliver to topic {topic}: {message}")]
    Delivery { topic: String, message: String },
}

/// Publishes enriched articles to the outbound topic, blocking until the
/// broker confirms delivery. A failed delivery never rolls back an upload
/// already performed; the two effects are deliberately uncoupled.
pub struct EnrichedProducer {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
}

impl EnrichedProducer {
    /// Create a new producer for the enriched-articles topic
    pub fn new(config: &KafkaConfig) -> Result<Self, ProducerError> {
        info!(
            brokers = %config.bootstrap_servers,
            topic = %config.enriched_topic,
            "Creating Kafka producer"
        );

        let producer: FutureProducer = config
            .producer_client_config()
            .create()
            .map_err(|e| ProducerError::Creation(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.enriched_topic.clone(),
            delivery_timeout: config.delivery_timeout(),
        })
    }

    /// Serialize and publish one enriched article, waiting for the
    /// delivery acknowledgment. Returns the partition and offset the
    /// record landed at.
    pub async fn publish(
        &self,
        key: &str,
        record: &ArticleRecord,
    ) -> Result<(i32, i64), ProducerError> {
        let payload = serde_json::to_vec(record)?;

        debug!(
            topic = %self.topic,
            key = %key,
            size_bytes = payload.len(),
            "Publishing enriched article"
        );

        let record = FutureRecord::to(&self.topic).payload(&payload).key(key);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(e, _)| ProducerError::Delivery {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Enriched article delivered");
        Ok((partition, offset))
    }
}

impl Drop for EnrichedProducer {
    fn drop(&mut self) {
        info!("Shutting down Kafka producer");
        if let Err(e) = self.producer.flush(Timeout::After(Duration::from_secs(5))) {
            warn!(error = %e, "Failed to flush producer on shutdown");
        }
    }
}
