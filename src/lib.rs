//! Image Ranker Service
//!
//! Article image ranking and enrichment service for the news aggregation
//! pipeline. The service consumes parsed articles from Kafka, downloads and
//! scores each candidate image against quality heuristics (size, aspect
//! ratio, blur, resolution, source priority), transcodes the single best
//! candidate to WebP, stores it in S3-compatible object storage under a
//! URL-derived key, and republishes the article with `bestImage` metadata.
//!
//! ## Architecture
//!
//! ```text
//! parsed-articles (Kafka)
//!        │
//!        ▼
//! ┌──────────────┐   per candidate   ┌──────────────┐
//! │ Article      │──────────────────▶│ Image        │
//! │ Consumer     │                   │ Fetcher      │
//! └──────────────┘                   └──────────────┘
//!        │                                  │
//!        │ winner only                      ▼
//!        │                           ┌──────────────┐
//!        │                           │ Quality      │
//!        │                           │ Scorer       │
//!        │                           └──────────────┘
//!        ▼
//! ┌──────────────┐    ┌──────────────┐
//! │ Transcoder   │───▶│ S3 Uploader  │
//! └──────────────┘    └──────────────┘
//!        │
//!        ▼
//! enriched-articles (Kafka)
//! ```
//!
//! At most one object is uploaded per article: candidates are all scored
//! first, then the winner alone is transcoded and stored.

pub mod config;
pub mod image_fetcher;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod quality_scorer;
pub mod s3_uploader;
pub mod transcoder;

pub use config::Config;
pub use image_fetcher::ImageFetcher;
pub use kafka_consumer::{ArticleConsumer, ArticleRecord, BestImageMeta, ImageCandidate};
pub use kafka_producer::{EnrichedProducer, ProducerError};
pub use quality_scorer::{QualityScorer, RejectReason, ScoredCandidate};
pub use s3_uploader::{object_key, S3Uploader};
pub use transcoder::{TranscodedImage, Transcoder};
