use crate::config::Config;
use crate::image_fetcher::ImageFetcher;
use crate::kafka_producer::{EnrichedProducer, ProducerError};
use crate::quality_scorer::{QualityScorer, RejectReason};
use crate::s3_uploader::{object_key, S3Uploader};
use crate::transcoder::Transcoder;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Article record received from the parser, republished with `bestImage`
/// filled in. Fields this service does not interpret pass through intact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Article identifier, used as the outbound message key when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Article title (for logging only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Candidate images in the order the parser found them
    #[serde(rename = "imageCandidates", default)]
    pub image_candidates: Vec<ImageCandidate>,
    /// Chosen image metadata; serialized as `null` when no candidate won
    #[serde(rename = "bestImage", default)]
    pub best_image: Option<BestImageMeta>,
    /// Passthrough fields owned by other pipeline stages
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One proposed image for an article
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageCandidate {
    /// Source URL; candidates without one are skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Referer to forward with the download request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Source-priority hint from the parser, expected in [0, 1]
    #[serde(
        rename = "scoreModifier",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub score_modifier: Option<f64>,
    /// Passthrough fields (e.g. the parser's sourceType)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Metadata for the winning image, attached to the enriched article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestImageMeta {
    /// Stored image width in pixels (after transcoding)
    pub width: u32,
    /// Stored image height in pixels (after transcoding)
    pub height: u32,
    /// Public reference URL of the stored object
    pub url: String,
    /// Quality score the candidate won with
    pub score: f64,
}

/// The best-scoring candidate seen so far while evaluating one article.
/// Owns the raw bytes of the current leader only; surpassed candidates
/// are dropped immediately.
struct BestCandidate {
    min_score: f64,
    winner: Option<Winner>,
}

/// A candidate that cleared the score floor, ready to materialize
struct Winner {
    url: String,
    score: f64,
    bytes: Bytes,
}

impl BestCandidate {
    fn new(min_score: f64) -> Self {
        Self {
            min_score,
            winner: None,
        }
    }

    /// Offer a scored candidate. Strict comparison on both the running
    /// best and the floor, so ties keep the earlier candidate and a score
    /// equal to the floor never wins.
    fn offer(&mut self, url: &str, score: f64, bytes: &Bytes) -> bool {
        let improves = match self.winner {
            Some(ref winner) => score > winner.score,
            None => true,
        };

        if improves && score > self.min_score {
            self.winner = Some(Winner {
                url: url.to_string(),
                score,
                bytes: bytes.clone(),
            });
            true
        } else {
            false
        }
    }

    fn into_winner(self) -> Option<Winner> {
        self.winner
    }
}

/// How handling of one message failed, deciding offset semantics:
/// skipped messages still advance the offset, publish failures leave the
/// offset untouched so the article is redelivered.
enum ProcessError {
    Skip(anyhow::Error),
    Publish(ProducerError),
}

/// Kafka consumer driving the enrichment pipeline: one article at a time,
/// candidates evaluated serially in list order, winner materialized once.
pub struct ArticleConsumer {
    consumer: StreamConsumer,
    fetcher: ImageFetcher,
    scorer: QualityScorer,
    transcoder: Transcoder,
    uploader: S3Uploader,
    producer: EnrichedProducer,
    min_score: f64,
    throttle: Duration,
}

impl ArticleConsumer {
    /// Create the consumer and subscribe to the articles topic
    pub fn new(
        config: &Config,
        fetcher: ImageFetcher,
        scorer: QualityScorer,
        transcoder: Transcoder,
        uploader: S3Uploader,
        producer: EnrichedProducer,
    ) -> Result<Self> {
        let consumer: StreamConsumer = config
            .kafka
            .consumer_client_config()
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.kafka.articles_topic])
            .context("Failed to subscribe to articles topic")?;

        info!(
            topic = %config.kafka.articles_topic,
            group = %config.kafka.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            fetcher,
            scorer,
            transcoder,
            uploader,
            producer,
            min_score: config.scoring.min_score,
            throttle: config.throttle_delay(),
        })
    }

    /// Start consuming and enriching articles. Runs until the stream ends;
    /// individual message failures never abort the loop.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting article consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => self.handle_message(&message).await,
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("ranker.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Process one message and apply the matching offset semantics
    async fn handle_message(&self, message: &BorrowedMessage<'_>) {
        let started = Instant::now();

        match self.process_message(message).await {
            Ok(()) => {
                if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
                    warn!(error = %e, "Failed to commit offset");
                }
                metrics::counter!("ranker.articles.processed").increment(1);
                metrics::histogram!("ranker.article.process_seconds")
                    .record(started.elapsed().as_secs_f64());

                if !self.throttle.is_zero() {
                    tokio::time::sleep(self.throttle).await;
                }
            }
            Err(ProcessError::Skip(e)) => {
                error!(
                    error = %e,
                    partition = message.partition(),
                    offset = message.offset(),
                    "Skipping article message"
                );
                metrics::counter!("ranker.articles.skipped").increment(1);
                // A poison message is never retried; the offset advances
                if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
                    warn!(error = %e, "Failed to commit offset");
                }
            }
            Err(ProcessError::Publish(e)) => {
                // No commit: the broker redelivers and enrichment is retried
                error!(
                    error = %e,
                    partition = message.partition(),
                    offset = message.offset(),
                    "Failed to publish enriched article"
                );
                metrics::counter!("ranker.articles.publish_failed").increment(1);
            }
        }
    }

    /// Parse, evaluate, enrich, publish
    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<(), ProcessError> {
        let payload = message
            .payload()
            .ok_or_else(|| ProcessError::Skip(anyhow::anyhow!("message has no payload")))?;

        let mut record: ArticleRecord = serde_json::from_slice(payload)
            .context("Malformed article payload")
            .map_err(ProcessError::Skip)?;

        info!(
            title = record.title.as_deref().unwrap_or("unknown"),
            candidates = record.image_candidates.len(),
            "Evaluating article image candidates"
        );

        let winner = self.evaluate_candidates(&record.image_candidates).await;

        record.best_image = match winner {
            Some(winner) => Some(self.materialize(winner).await.map_err(ProcessError::Skip)?),
            None => None,
        };

        let key = record
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.producer
            .publish(&key, &record)
            .await
            .map_err(ProcessError::Publish)?;

        Ok(())
    }

    /// Fetch and score every candidate in list order, keeping the single
    /// best above the floor. No storage I/O happens here: losing
    /// candidates never touch the bucket.
    async fn evaluate_candidates(&self, candidates: &[ImageCandidate]) -> Option<Winner> {
        let mut best = BestCandidate::new(self.min_score);

        for candidate in candidates {
            let Some(url) = candidate.url.as_deref().filter(|u| !u.is_empty()) else {
                debug!("Skipping candidate without URL");
                continue;
            };

            let bytes = self.fetcher.fetch(url, candidate.referer.as_deref()).await;
            let scored = self.scorer.score(candidate, bytes.as_deref());

            info!(
                url = %url,
                score = scored.score,
                reason = %scored.reason,
                "Scored candidate"
            );

            if scored.reason != RejectReason::Ok {
                metrics::counter!("ranker.candidates.rejected", "reason" => scored.reason.as_str())
                    .increment(1);
                continue;
            }

            if let Some(bytes) = bytes {
                best.offer(url, scored.score, &bytes);
            }
        }

        best.into_winner()
    }

    /// Transcode, derive the storage key, and upload the winning image.
    /// An upload failure is logged but the metadata is still attached;
    /// the public reference is derivable without the object.
    async fn materialize(&self, winner: Winner) -> Result<BestImageMeta> {
        let transcoded = self
            .transcoder
            .transcode(&winner.bytes)
            .context("Failed to transcode winning candidate")?;

        let key = object_key(&winner.url);

        match self.uploader.upload_image(&key, transcoded.bytes).await {
            Ok(()) => {
                metrics::counter!("ranker.uploads.completed").increment(1);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    key = %key,
                    "Failed to upload winning image; reference may not resolve"
                );
                metrics::counter!("ranker.uploads.failed").increment(1);
            }
        }

        Ok(BestImageMeta {
            width: transcoded.width,
            height: transcoded.height,
            url: self.uploader.public_url(&key),
            score: winner.score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_article_record() {
        let json = r#"{
            "id": "article-42",
            "title": "Sample headline",
            "link": "https://news.example.com/story",
            "imageCandidates": [
                {
                    "url": "https://cdn.example.com/a.jpg",
                    "referer": "https://news.example.com/story",
                    "scoreModifier": 0.9,
                    "sourceType": "og"
                },
                {"sourceType": "inline"}
            ]
        }"#;

        let record: ArticleRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id.as_deref(), Some("article-42"));
        assert_eq!(record.image_candidates.len(), 2);
        assert_eq!(record.image_candidates[0].score_modifier, Some(0.9));
        assert_eq!(
            record.image_candidates[0].extra.get("sourceType"),
            Some(&serde_json::json!("og"))
        );
        assert!(record.image_candidates[1].url.is_none());
        assert!(record.best_image.is_none());
        assert!(record.extra.contains_key("link"));
    }

    #[test]
    fn test_malformed_payload_fails_to_parse() {
        assert!(serde_json::from_str::<ArticleRecord>("{not json").is_err());
        assert!(serde_json::from_str::<ArticleRecord>(r#"[1, 2, 3]"#).is_err());
    }

    #[test]
    fn test_enriched_record_serializes_null_best_image() {
        let record = ArticleRecord {
            title: Some("No usable image".to_string()),
            ..ArticleRecord::default()
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["bestImage"], serde_json::Value::Null);
    }

    #[test]
    fn test_passthrough_fields_survive_enrichment() {
        let json = r#"{
            "title": "Sample",
            "publishedAt": "2024-03-01T12:00:00Z",
            "imageCandidates": [{"url": "https://cdn.example.com/a.jpg", "sourceType": "og"}]
        }"#;

        let mut record: ArticleRecord = serde_json::from_str(json).unwrap();
        record.best_image = Some(BestImageMeta {
            width: 1200,
            height: 675,
            url: "http://localhost:9000/processed-images/abc.webp".to_string(),
            score: 76.0,
        });

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["publishedAt"], "2024-03-01T12:00:00Z");
        assert_eq!(value["imageCandidates"][0]["sourceType"], "og");
        assert_eq!(value["bestImage"]["width"], 1200);
        assert_eq!(value["bestImage"]["score"], 76.0);
    }

    #[test]
    fn test_first_seen_wins_when_later_scores_lower() {
        let mut best = BestCandidate::new(10.0);
        assert!(best.offer("https://a", 60.0, &Bytes::from_static(b"a")));
        assert!(!best.offer("https://b", 45.0, &Bytes::from_static(b"b")));

        let winner = best.into_winner().unwrap();
        assert_eq!(winner.url, "https://a");
        assert_eq!(winner.score, 60.0);
    }

    #[test]
    fn test_first_seen_wins_ties() {
        let mut best = BestCandidate::new(10.0);
        best.offer("https://a", 60.0, &Bytes::from_static(b"a"));
        assert!(!best.offer("https://b", 60.0, &Bytes::from_static(b"b")));
        assert_eq!(best.into_winner().unwrap().url, "https://a");
    }

    #[test]
    fn test_later_improvement_replaces_leader() {
        let mut best = BestCandidate::new(10.0);
        best.offer("https://a", 45.0, &Bytes::from_static(b"a"));
        assert!(best.offer("https://b", 60.0, &Bytes::from_static(b"b")));
        assert_eq!(best.into_winner().unwrap().url, "https://b");
    }

    #[test]
    fn test_score_floor_is_strict() {
        let mut best = BestCandidate::new(10.0);
        assert!(!best.offer("https://a", 10.0, &Bytes::from_static(b"a")));
        assert!(best.into_winner().is_none());

        let mut best = BestCandidate::new(10.0);
        assert!(best.offer("https://a", 10.01, &Bytes::from_static(b"a")));
        assert!(best.into_winner().is_some());
    }

    #[test]
    fn test_no_candidates_means_no_winner() {
        let best = BestCandidate::new(10.0);
        assert!(best.into_winner().is_none());
    }
}
