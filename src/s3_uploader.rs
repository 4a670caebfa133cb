use crate::config::S3Config;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

/// Content type for every stored object; the transcoder emits WebP only
pub const IMAGE_CONTENT_TYPE: &str = "image/webp";

/// Extension appended to every derived storage key
const KEY_EXTENSION: &str = ".webp";

/// Derive the storage key for a candidate URL: lowercase hex MD5 of the
/// URL plus the fixed extension. Content-addressed on the *URL*, not the
/// bytes, so re-processing the same URL overwrites the same object.
pub fn object_key(url: &str) -> String {
    format!("{:x}{}", md5::compute(url.as_bytes()), KEY_EXTENSION)
}

/// S3 uploader for processed article images
pub struct S3Uploader {
    client: S3Client,
    bucket: String,
    public_base: String,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 uploader initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_base: public_base(config),
        })
    }

    /// Idempotently create the bucket. "Already exists" is success; any
    /// other failure is returned and treated as fatal at startup.
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self
            .client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => {
                info!(bucket = %self.bucket, "Created storage bucket");
                Ok(())
            }
            Err(e) => {
                let already_exists = e
                    .as_service_error()
                    .map(|se| se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists())
                    .unwrap_or(false);

                if already_exists {
                    debug!(bucket = %self.bucket, "Storage bucket already exists");
                    Ok(())
                } else {
                    Err(e).context("Failed to ensure storage bucket")
                }
            }
        }
    }

    /// Upload a processed image, overwriting any object under the same key
    #[instrument(skip(self, data), fields(key = %key, size_bytes = data.len()))]
    pub async fn upload_image(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let body = ByteStream::from(data);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(IMAGE_CONTENT_TYPE)
            .send()
            .await
            .context("Failed to upload image to object storage")?;

        debug!(key = %key, "Image uploaded");
        Ok(())
    }

    /// Public reference URL for a stored object
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Base of the public reference URL: custom endpoint + bucket when one is
/// configured (MinIO path style), else the virtual-hosted AWS form.
fn public_base(config: &S3Config) -> String {
    match config.endpoint_url {
        Some(ref endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
        None => format!(
            "https://{}.s3.{}.amazonaws.com",
            config.bucket, config.region
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_is_deterministic() {
        let url = "https://example.com/images/photo.jpg";
        assert_eq!(object_key(url), object_key(url));
        assert_eq!(object_key(url), "b46ca04023feeac3addabe8e574e2211.webp");
    }

    #[test]
    fn test_object_key_depends_on_url_only() {
        // Different URLs map to different keys; the image bytes never
        // participate in key derivation.
        assert_ne!(
            object_key("https://example.com/images/photo.jpg"),
            object_key("https://example.com/images/other.jpg")
        );
    }

    #[test]
    fn test_public_base_with_custom_endpoint() {
        let config = S3Config {
            endpoint_url: Some("http://localhost:9000/".to_string()),
            ..S3Config::default()
        };
        assert_eq!(public_base(&config), "http://localhost:9000/processed-images");
    }

    #[test]
    fn test_public_base_without_endpoint() {
        let config = S3Config::default();
        assert_eq!(
            public_base(&config),
            "https://processed-images.s3.us-east-1.amazonaws.com"
        );
    }
}
