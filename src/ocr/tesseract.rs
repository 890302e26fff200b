//! Tesseract backend: shells out to the `tesseract` binary for text and
//! hOCR extraction, run off the async executor via `spawn_blocking` since
//! `std::process::Command` is synchronous.

use std::io::Write;
use std::process::Command;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};
use crate::models::Segment;

use super::layout;
use super::{OcrEngine, OcrOutput};

pub struct TesseractEngine {
    language: String,
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self {
            language: "eng".to_string(),
        }
    }

    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    fn check_binary(name: &str) -> bool {
        Command::new("which")
            .arg(name)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn run_tesseract_blocking(image_bytes: &[u8], language: &str) -> Result<OcrOutput> {
    let mut image_file = NamedTempFile::new()?;
    image_file.write_all(image_bytes)?;
    let image_path = image_file.path();

    let text_output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .args(["-l", language])
        .output();

    let text = match text_output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).to_string(),
        Ok(output) => {
            return Err(PipelineError::TransientUpstream(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::Internal(
                "tesseract not found (install tesseract-ocr)".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    let hocr_output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .args(["-l", language])
        .args(["--psm", "3"])
        .args(["hocr"])
        .output();

    let hocr = match hocr_output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).to_string(),
        _ => String::new(),
    };

    Ok(OcrOutput {
        text,
        hocr,
        confidence: estimate_confidence(&hocr),
    })
}

/// Tesseract's hOCR output carries a per-word `x_wconf` confidence (0-100);
/// average it across words as a page-level estimate.
fn estimate_confidence(hocr: &str) -> f32 {
    let scores: Vec<f32> = layout::extract_word_confidences(hocr);
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f32>() / scores.len() as f32 / 100.0
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        Self::check_binary("tesseract")
    }

    async fn run_ocr(&self, image_bytes: &[u8], language_hint: Option<&str>) -> Result<OcrOutput> {
        let language = language_hint.unwrap_or(&self.language).to_string();
        let bytes = image_bytes.to_vec();
        tokio::task::spawn_blocking(move || run_tesseract_blocking(&bytes, &language))
            .await
            .map_err(|e| PipelineError::Internal(format!("tesseract task panicked: {e}")))?
    }

    async fn analyze_layout(&self, hocr: &str, _image_bytes: &[u8]) -> Result<Vec<Segment>> {
        layout::segments_from_hocr(hocr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_estimate_averages_word_scores() {
        let hocr = r#"<span class='ocrx_word' title='x_wconf 90'>a</span><span class='ocrx_word' title='x_wconf 70'>b</span>"#;
        let conf = estimate_confidence(hocr);
        assert!((conf - 0.8).abs() < 0.001);
    }

    #[test]
    fn confidence_estimate_defaults_to_zero_without_hocr() {
        assert_eq!(estimate_confidence(""), 0.0);
    }
}
