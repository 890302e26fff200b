use serde::{Deserialize, Serialize};

/// A bounding box in page-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BBox {
    pub fn shorter_side(&self) -> u32 {
        self.w.min(self.h)
    }

    /// Whether `self` lies entirely within a page image of the given
    /// dimensions.
    pub fn within(&self, image_w: u32, image_h: u32) -> bool {
        self.x
            .checked_add(self.w)
            .map(|right| right <= image_w)
            .unwrap_or(false)
            && self
                .y
                .checked_add(self.h)
                .map(|bottom| bottom <= image_h)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Article,
    Headline,
    Image,
    Advertisement,
    Other,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Headline => "headline",
            Self::Image => "image",
            Self::Advertisement => "advertisement",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "article" => Self::Article,
            "headline" => Self::Headline,
            "image" => Self::Image,
            "advertisement" => Self::Advertisement,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Draft,
    Reviewed,
    Promoted,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Reviewed => "reviewed",
            Self::Promoted => "promoted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "reviewed" => Some(Self::Reviewed),
            "promoted" => Some(Self::Promoted),
            _ => None,
        }
    }
}

/// A classified bounding-box region of a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: String,
    pub page_id: String,
    pub kind: SegmentKind,
    pub bbox: BBox,
    pub text: String,
    pub confidence: f32,
    pub image_clip_ref: Option<String>,
    pub status: SegmentStatus,
}

impl Segment {
    pub fn confidence_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_within_page_bounds() {
        let b = BBox { x: 10, y: 10, w: 100, h: 50 };
        assert!(b.within(200, 200));
        assert!(!b.within(100, 200));
        assert!(!b.within(200, 50));
    }

    #[test]
    fn bbox_overflow_is_rejected_not_wrapped() {
        let b = BBox { x: u32::MAX - 5, y: 0, w: 100, h: 10 };
        assert!(!b.within(u32::MAX, u32::MAX));
    }

    #[test]
    fn confidence_range_check() {
        let mut s = Segment {
            segment_id: "s1".into(),
            page_id: "p1".into(),
            kind: SegmentKind::Article,
            bbox: BBox { x: 0, y: 0, w: 10, h: 10 },
            text: String::new(),
            confidence: 0.5,
            image_clip_ref: None,
            status: SegmentStatus::Draft,
        };
        assert!(s.confidence_in_range());
        s.confidence = 1.5;
        assert!(!s.confidence_in_range());
    }
}
