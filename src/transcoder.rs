use crate::config::TranscodeConfig;
use image::imageops::FilterType;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while normalizing a winning image
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Result of transcoding: WebP bytes plus the output dimensions
#[derive(Debug, Clone)]
pub struct TranscodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Normalizes the winning candidate for storage: bounded width, fixed
/// codec and quality. Only ever applied to a single image per article.
pub struct Transcoder {
    config: TranscodeConfig,
}

impl Transcoder {
    /// Create a new transcoder
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    /// Decode, downscale to the width bound if needed (Lanczos3, aspect
    /// preserved), and re-encode as lossy WebP. Deterministic for
    /// identical input bytes.
    pub fn transcode(&self, bytes: &[u8]) -> Result<TranscodedImage, TranscodeError> {
        let image = image::load_from_memory(bytes)?;

        let image = if image.width() > self.config.max_width {
            let ratio = self.config.max_width as f64 / image.width() as f64;
            let new_height = ((image.height() as f64 * ratio).round() as u32).max(1);
            debug!(
                from_width = image.width(),
                from_height = image.height(),
                to_width = self.config.max_width,
                to_height = new_height,
                "Downscaling winning image"
            );
            image.resize_exact(self.config.max_width, new_height, FilterType::Lanczos3)
        } else {
            image
        };

        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let encoded =
            webp::Encoder::from_rgb(rgb.as_raw(), width, height).encode(self.config.webp_quality);

        Ok(TranscodedImage {
            bytes: encoded.to_vec(),
            width,
            height,
        })
    }
}
