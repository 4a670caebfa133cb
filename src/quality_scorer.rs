use crate::config::ScoringConfig;
use crate::kafka_consumer::ImageCandidate;
use image::GrayImage;
use std::fmt;
use tracing::trace;

/// Source-priority modifier applied when the candidate carries none
const DEFAULT_SCORE_MODIFIER: f64 = 0.5;

/// Why a candidate was rejected, or `Ok` if it passed every check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The download returned no bytes
    DownloadFailure,
    /// Width or height below the configured minimum
    TooSmall,
    /// Width/height ratio outside the accepted band
    BadAspectRatio,
    /// Laplacian variance below the blur threshold
    TooBlurry,
    /// The bytes could not be decoded as an image
    ProcessingError,
    /// Passed all rejection checks
    Ok,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::DownloadFailure => "download-failure",
            RejectReason::TooSmall => "too-small",
            RejectReason::BadAspectRatio => "bad-aspect-ratio",
            RejectReason::TooBlurry => "too-blurry",
            RejectReason::ProcessingError => "processing-error",
            RejectReason::Ok => "ok",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for a single candidate. Score is 0 whenever the reason is not
/// `Ok`; dimensions are 0 when the bytes never decoded.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate {
    pub score: f64,
    pub reason: RejectReason,
    pub width: u32,
    pub height: u32,
}

impl ScoredCandidate {
    fn rejected(reason: RejectReason) -> Self {
        Self {
            score: 0.0,
            reason,
            width: 0,
            height: 0,
        }
    }
}

/// Multi-factor quality scorer for candidate images.
///
/// Rejection checks run in a fixed order (size, aspect ratio, blur) and
/// short-circuit; survivors receive a weighted score combining resolution,
/// source priority, and a landscape-aspect bonus. The function never fails:
/// undecodable input becomes a `ProcessingError` rejection.
pub struct QualityScorer {
    config: ScoringConfig,
}

impl QualityScorer {
    /// Create a new scorer with the given thresholds and weights
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score one candidate against its downloaded bytes
    pub fn score(&self, candidate: &ImageCandidate, bytes: Option<&[u8]>) -> ScoredCandidate {
        let Some(bytes) = bytes else {
            return ScoredCandidate::rejected(RejectReason::DownloadFailure);
        };

        let image = match image::load_from_memory(bytes) {
            Ok(image) => image,
            Err(e) => {
                trace!(error = %e, "Candidate bytes failed to decode");
                return ScoredCandidate::rejected(RejectReason::ProcessingError);
            }
        };

        let width = image.width();
        let height = image.height();

        if width < self.config.min_width || height < self.config.min_height {
            return ScoredCandidate::rejected(RejectReason::TooSmall);
        }

        let aspect = width as f64 / height as f64;
        if aspect < self.config.min_aspect || aspect > self.config.max_aspect {
            return ScoredCandidate::rejected(RejectReason::BadAspectRatio);
        }

        let blur = laplacian_variance(&image.to_luma8());
        if blur < self.config.blur_threshold {
            return ScoredCandidate::rejected(RejectReason::TooBlurry);
        }

        let resolution_score = (width as f64 / self.config.reference_width as f64).min(1.0);
        let aspect_bonus = if aspect > 1.3 && aspect < 2.0 { 0.2 } else { 0.0 };
        let source_modifier = candidate.score_modifier.unwrap_or(DEFAULT_SCORE_MODIFIER);

        let score = resolution_score * 40.0 + source_modifier * 40.0 + aspect_bonus * 20.0;

        ScoredCandidate {
            score,
            reason: RejectReason::Ok,
            width,
            height,
        }
    }
}

/// Variance of a 3x3 Laplacian (`[0,1,0; 1,-4,1; 0,1,0]`) over the interior
/// pixels of a grayscale image. Low variance means little edge detail, i.e.
/// a blurry image. Images smaller than 3x3 report 0.
pub fn laplacian_variance(img: &GrayImage) -> f64 {
    let (w, h) = (img.width() as i64, img.height() as i64);
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = img.get_pixel(x as u32, y as u32).0[0] as f64;
            let top = img.get_pixel(x as u32, (y - 1) as u32).0[0] as f64;
            let bottom = img.get_pixel(x as u32, (y + 1) as u32).0[0] as f64;
            let left = img.get_pixel((x - 1) as u32, y as u32).0[0] as f64;
            let right = img.get_pixel((x + 1) as u32, y as u32).0[0] as f64;

            let laplacian = top + bottom + left + right - 4.0 * center;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    ((sum_sq / count as f64) - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    /// Checkerboard: maximal edge detail, far above any blur threshold
    fn sharp_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    /// Uniform gray: zero Laplacian variance
    fn flat_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([128, 128, 128])))
    }

    fn candidate(score_modifier: Option<f64>) -> ImageCandidate {
        ImageCandidate {
            score_modifier,
            ..ImageCandidate::default()
        }
    }

    fn scorer() -> QualityScorer {
        QualityScorer::new(ScoringConfig::default())
    }

    #[test]
    fn test_missing_bytes_is_download_failure() {
        let scored = scorer().score(&candidate(None), None);
        assert_eq!(scored.reason, RejectReason::DownloadFailure);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn test_undecodable_bytes_is_processing_error() {
        let scored = scorer().score(&candidate(None), Some(b"definitely not an image"));
        assert_eq!(scored.reason, RejectReason::ProcessingError);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn test_tiny_image_rejected() {
        let bytes = encode_png(&sharp_image(100, 80));
        let scored = scorer().score(&candidate(None), Some(&bytes));
        assert_eq!(scored.reason, RejectReason::TooSmall);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn test_short_image_rejected() {
        // Wide enough but below the height floor
        let bytes = encode_png(&sharp_image(400, 100));
        let scored = scorer().score(&candidate(None), Some(&bytes));
        assert_eq!(scored.reason, RejectReason::TooSmall);
    }

    #[test]
    fn test_panorama_rejected() {
        let bytes = encode_png(&sharp_image(1000, 200));
        let scored = scorer().score(&candidate(None), Some(&bytes));
        assert_eq!(scored.reason, RejectReason::BadAspectRatio);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn test_tall_portrait_rejected() {
        let bytes = encode_png(&sharp_image(200, 800));
        let scored = scorer().score(&candidate(None), Some(&bytes));
        assert_eq!(scored.reason, RejectReason::BadAspectRatio);
    }

    #[test]
    fn test_flat_image_rejected_as_blurry() {
        let bytes = encode_png(&flat_image(800, 600));
        let scored = scorer().score(&candidate(None), Some(&bytes));
        assert_eq!(scored.reason, RejectReason::TooBlurry);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn test_weighted_score_for_good_candidate() {
        // 1600x900 saturates resolution, aspect 1.78 earns the bonus:
        // 1.0*40 + 0.8*40 + 0.2*20 = 76
        let bytes = encode_png(&sharp_image(1600, 900));
        let scored = scorer().score(&candidate(Some(0.8)), Some(&bytes));
        assert_eq!(scored.reason, RejectReason::Ok);
        assert!((scored.score - 76.0).abs() < 1e-9);
        assert_eq!((scored.width, scored.height), (1600, 900));
    }

    #[test]
    fn test_default_score_modifier_applied() {
        let bytes = encode_png(&sharp_image(1600, 900));
        let scored = scorer().score(&candidate(None), Some(&bytes));
        assert_eq!(scored.reason, RejectReason::Ok);
        // 1.0*40 + 0.5*40 + 0.2*20 = 64
        assert!((scored.score - 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_monotonic_in_width_up_to_cap() {
        // Constant 4:3 aspect so only the resolution component moves
        let widths = [400u32, 800, 1200, 1600];
        let scores: Vec<f64> = widths
            .iter()
            .map(|&w| {
                let bytes = encode_png(&sharp_image(w, w * 3 / 4));
                scorer().score(&candidate(Some(0.5)), Some(&bytes)).score
            })
            .collect();

        for pair in scores.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        // Saturated at the reference width
        assert!((scores[2] - scores[3]).abs() < 1e-9);
    }

    #[test]
    fn test_no_aspect_bonus_outside_band() {
        // Square image: aspect 1.0, no bonus
        let bytes = encode_png(&sharp_image(1200, 1200));
        let scored = scorer().score(&candidate(Some(0.5)), Some(&bytes));
        assert_eq!(scored.reason, RejectReason::Ok);
        // 1.0*40 + 0.5*40 = 60
        assert!((scored.score - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_laplacian_variance_extremes() {
        let flat = flat_image(64, 64).to_luma8();
        assert_eq!(laplacian_variance(&flat), 0.0);

        let sharp = sharp_image(64, 64).to_luma8();
        assert!(laplacian_variance(&sharp) > 50.0);

        let tiny = flat_image(2, 2).to_luma8();
        assert_eq!(laplacian_variance(&tiny), 0.0);
    }
}
