//! hOCR layout parsing: pulls bounding boxes, text, and per-word confidence
//! out of Tesseract's hOCR markup and classifies each block into a
//! `SegmentKind` by simple heuristics (font size / position) — Tesseract
//! only emits flat hOCR, so block classification is this pipeline's own
//! addition on top of it.

use regex::Regex;

use crate::error::Result;
use crate::models::{BBox, Segment, SegmentKind};

use super::filter_candidate_segments;

/// Parse every `ocrx_word` `x_wconf` value out of hOCR markup.
pub fn extract_word_confidences(hocr: &str) -> Vec<f32> {
    let re = Regex::new(r"x_wconf (\d+)").unwrap();
    re.captures_iter(hocr)
        .filter_map(|c| c.get(1)?.as_str().parse::<f32>().ok())
        .collect()
}

struct RawBlock {
    bbox: BBox,
    text: String,
    confidences: Vec<f32>,
}

fn parse_bbox(title: &str) -> Option<BBox> {
    let re = Regex::new(r"bbox (\d+) (\d+) (\d+) (\d+)").unwrap();
    let caps = re.captures(title)?;
    let x0: u32 = caps.get(1)?.as_str().parse().ok()?;
    let y0: u32 = caps.get(2)?.as_str().parse().ok()?;
    let x1: u32 = caps.get(3)?.as_str().parse().ok()?;
    let y1: u32 = caps.get(4)?.as_str().parse().ok()?;
    Some(BBox {
        x: x0,
        y: y0,
        w: x1.saturating_sub(x0),
        h: y1.saturating_sub(y0),
    })
}

fn strip_tags(fragment: &str) -> String {
    let re = Regex::new(r"<[^>]+>").unwrap();
    re.replace_all(fragment, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract `ocr_carea`/`ocr_par` blocks from hOCR markup, one `RawBlock`
/// per paragraph-level element.
fn extract_blocks(hocr: &str) -> Vec<RawBlock> {
    let block_re = Regex::new(r#"(?s)<(?:p|div)\s+class='ocr_(?:par|carea)'[^>]*title='([^']+)'[^>]*>(.*?)</(?:p|div)>"#)
        .unwrap();
    block_re
        .captures_iter(hocr)
        .filter_map(|c| {
            let title = c.get(1)?.as_str();
            let body = c.get(2)?.as_str();
            let bbox = parse_bbox(title)?;
            let text = strip_tags(body);
            if text.is_empty() {
                return None;
            }
            let confidences = extract_word_confidences(body);
            Some(RawBlock {
                bbox,
                text,
                confidences,
            })
        })
        .collect()
}

/// Heuristic classification: a short all-caps or large block near the top
/// of the page reads as a headline; a narrow tall block reads as an image
/// placeholder; everything else is treated as running article text.
fn classify(block: &RawBlock) -> SegmentKind {
    let word_count = block.text.split_whitespace().count();
    if word_count <= 8 && block.text.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase()) {
        return SegmentKind::Headline;
    }
    if block.bbox.w > 0 && block.bbox.h > block.bbox.w * 3 {
        return SegmentKind::Image;
    }
    SegmentKind::Article
}

/// Parse hOCR markup into classified, filtered `Segment`s.
pub fn segments_from_hocr(hocr: &str) -> Result<Vec<Segment>> {
    let blocks = extract_blocks(hocr);
    let candidates = blocks
        .into_iter()
        .map(|block| {
            let confidence = if block.confidences.is_empty() {
                0.0
            } else {
                block.confidences.iter().sum::<f32>() / block.confidences.len() as f32 / 100.0
            };
            let kind = classify(&block);
            (block.bbox, block.text, confidence, kind)
        })
        .collect();
    Ok(filter_candidate_segments(candidates, ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HOCR: &str = r#"
        <div class='ocr_carea' title='bbox 10 10 500 120'>
            <p class='ocr_par' title='bbox 10 10 500 120'>
                <span class='ocrx_word' title='bbox 10 10 200 60; x_wconf 95'>HEADLINE</span>
                <span class='ocrx_word' title='bbox 210 10 500 60; x_wconf 92'>TEXT</span>
            </p>
        </div>
        <div class='ocr_carea' title='bbox 10 150 600 400'>
            <p class='ocr_par' title='bbox 10 150 600 400'>
                <span class='ocrx_word' title='bbox 10 150 100 180; x_wconf 80'>Lorem</span>
                <span class='ocrx_word' title='bbox 110 150 200 180; x_wconf 75'>ipsum</span>
                <span class='ocrx_word' title='bbox 210 150 300 180; x_wconf 70'>dolor</span>
                <span class='ocrx_word' title='bbox 310 150 400 180; x_wconf 85'>sit</span>
                <span class='ocrx_word' title='bbox 410 150 500 180; x_wconf 88'>amet</span>
            </p>
        </div>
    "#;

    #[test]
    fn parses_headline_and_article_blocks() {
        let segments = segments_from_hocr(SAMPLE_HOCR).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().any(|s| s.kind == SegmentKind::Headline));
        assert!(segments.iter().any(|s| s.kind == SegmentKind::Article));
    }

    #[test]
    fn extracts_bbox_dimensions() {
        let segments = segments_from_hocr(SAMPLE_HOCR).unwrap();
        let headline = segments.iter().find(|s| s.kind == SegmentKind::Headline).unwrap();
        assert_eq!(headline.bbox.x, 10);
        assert_eq!(headline.bbox.y, 10);
        assert_eq!(headline.bbox.w, 490);
        assert_eq!(headline.bbox.h, 110);
    }

    #[test]
    fn empty_hocr_yields_no_segments() {
        assert!(segments_from_hocr("").unwrap().is_empty());
    }
}
