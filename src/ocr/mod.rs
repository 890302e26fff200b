//! OCR and layout-analysis abstraction: a small trait wrapping whichever
//! OCR engine is installed, with Tesseract as the default, pluggable
//! implementation.

pub mod layout;
pub mod tesseract;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::models::{BBox, Segment};

/// Result of running OCR on a single page image.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    pub hocr: String,
    pub confidence: f32,
}

/// Pluggable OCR engine. `run_ocr` and `analyze_layout` are async because
/// every implementation shells out to (or otherwise awaits) an external
/// process; a test double can implement this trait without touching the
/// filesystem at all.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Human-readable identifier, used in logs and task metadata.
    fn name(&self) -> &'static str;

    /// Whether this engine's runtime dependencies (binaries, models) are
    /// present on this host.
    fn is_available(&self) -> bool;

    /// Extract text and hOCR markup from a page image.
    async fn run_ocr(&self, image_bytes: &[u8], language_hint: Option<&str>) -> Result<OcrOutput>;

    /// Classify regions of the hOCR output into segments, filtering out
    /// anything below the minimum bounding-box size or confidence.
    async fn analyze_layout(&self, hocr: &str, image_bytes: &[u8]) -> Result<Vec<Segment>>;
}

/// Minimum shorter-side dimension (pixels) for a region to be kept as a
/// segment rather than discarded as noise.
pub const MIN_SEGMENT_SIZE_PX: u32 = 100;

/// Minimum OCR confidence for a region to be kept as a segment.
pub const MIN_SEGMENT_CONFIDENCE: f32 = 0.5;

/// Shared filter applied by every `OcrEngine::analyze_layout` implementation
/// after it has extracted raw candidate regions.
pub fn filter_candidate_segments(
    candidates: Vec<(BBox, String, f32, crate::models::SegmentKind)>,
    page_id: &str,
) -> Vec<Segment> {
    candidates
        .into_iter()
        .filter(|(bbox, _, confidence, _)| {
            bbox.shorter_side() >= MIN_SEGMENT_SIZE_PX && *confidence >= MIN_SEGMENT_CONFIDENCE
        })
        .map(|(bbox, text, confidence, kind)| Segment {
            segment_id: uuid::Uuid::new_v4().to_string(),
            page_id: page_id.to_string(),
            kind,
            bbox,
            text,
            confidence,
            image_clip_ref: None,
            status: crate::models::SegmentStatus::Draft,
        })
        .collect()
}

/// Construct the default engine (Tesseract).
pub fn default_engine() -> Box<dyn OcrEngine> {
    Box::new(tesseract::TesseractEngine::new())
}

/// Wraps an `OcrEngine` with a semaphore bounding concurrent `run_ocr`
/// calls to `ocr.max_workers`, so a worker pool sharing one engine instance
/// doesn't saturate the host's Tesseract processes or CPU cores.
pub struct ConcurrencyLimitedEngine {
    inner: Box<dyn OcrEngine>,
    permits: Arc<Semaphore>,
}

impl ConcurrencyLimitedEngine {
    pub fn new(inner: Box<dyn OcrEngine>, max_workers: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }
}

#[async_trait]
impl OcrEngine for ConcurrencyLimitedEngine {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn run_ocr(&self, image_bytes: &[u8], language_hint: Option<&str>) -> Result<OcrOutput> {
        let _permit = self.permits.acquire().await.unwrap();
        self.inner.run_ocr(image_bytes, language_hint).await
    }

    async fn analyze_layout(&self, hocr: &str, image_bytes: &[u8]) -> Result<Vec<Segment>> {
        let _permit = self.permits.acquire().await.unwrap();
        self.inner.analyze_layout(hocr, image_bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SegmentKind;

    #[test]
    fn filters_small_and_low_confidence_regions() {
        let candidates = vec![
            (
                BBox { x: 0, y: 0, w: 200, h: 150 },
                "kept".to_string(),
                0.9,
                SegmentKind::Article,
            ),
            (
                BBox { x: 0, y: 0, w: 50, h: 40 },
                "too small".to_string(),
                0.9,
                SegmentKind::Article,
            ),
            (
                BBox { x: 0, y: 0, w: 200, h: 150 },
                "low confidence".to_string(),
                0.2,
                SegmentKind::Article,
            ),
        ];
        let segments = filter_candidate_segments(candidates, "page-1");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "kept");
    }
}
