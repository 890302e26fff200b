//! Diesel row types and their conversions to/from domain models. Kept
//! separate from `models/` so the domain types stay free of ORM traits.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

use crate::error::{PipelineError, Result};
use crate::models::{
    BBox, BulkCounters, BulkOperation, BulkStatus, Operation, Page, PageStatus, Publication,
    Segment, SegmentKind, SegmentStatus, Task, TaskStatus,
};
use crate::schema::*;

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = publications)]
pub struct PublicationRecord {
    pub lccn: String,
    pub title: String,
    pub place: Option<String>,
    pub first_issue_date: Option<String>,
    pub last_issue_date: Option<String>,
}

impl From<&Publication> for PublicationRecord {
    fn from(p: &Publication) -> Self {
        Self {
            lccn: p.lccn.clone(),
            title: p.title.clone(),
            place: p.place.clone(),
            first_issue_date: p.first_issue_date.map(|d| d.to_string()),
            last_issue_date: p.last_issue_date.map(|d| d.to_string()),
        }
    }
}

impl TryFrom<PublicationRecord> for Publication {
    type Error = PipelineError;

    fn try_from(r: PublicationRecord) -> Result<Self> {
        Ok(Publication {
            lccn: r.lccn,
            title: r.title,
            place: r.place,
            first_issue_date: r
                .first_issue_date
                .map(|d| parse_date(&d))
                .transpose()?,
            last_issue_date: r.last_issue_date.map(|d| parse_date(&d)).transpose()?,
        })
    }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = newspaper_pages)]
pub struct PageRecord {
    pub page_id: String,
    pub publication_id: String,
    pub issue_date: String,
    pub sequence: i32,
    pub source_system: String,
    pub image_ref: String,
    pub ocr_text_ref: Option<String>,
    pub hocr_ref: Option<String>,
    pub status: String,
    pub metadata: String,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
}

impl From<&Page> for PageRecord {
    fn from(p: &Page) -> Self {
        Self {
            page_id: p.page_id.clone(),
            publication_id: p.publication_id.clone(),
            issue_date: p.issue_date.to_string(),
            sequence: p.sequence,
            source_system: p.source_system.clone(),
            image_ref: p.image_ref.clone(),
            ocr_text_ref: p.ocr_text_ref.clone(),
            hocr_ref: p.hocr_ref.clone(),
            status: p.status.as_str().to_string(),
            metadata: serde_json::to_string(&p.metadata).unwrap_or_else(|_| "{}".to_string()),
            image_width: None,
            image_height: None,
        }
    }
}

impl TryFrom<PageRecord> for Page {
    type Error = PipelineError;

    fn try_from(r: PageRecord) -> Result<Self> {
        Ok(Page {
            page_id: r.page_id,
            publication_id: r.publication_id,
            issue_date: parse_date(&r.issue_date)?,
            sequence: r.sequence,
            source_system: r.source_system,
            image_ref: r.image_ref,
            ocr_text_ref: r.ocr_text_ref,
            hocr_ref: r.hocr_ref,
            status: PageStatus::from_str(&r.status)
                .ok_or_else(|| PipelineError::Internal(format!("bad page status {}", r.status)))?,
            metadata: serde_json::from_str::<HashMap<String, serde_json::Value>>(&r.metadata)
                .unwrap_or_default(),
        })
    }
}

/// Stored image dimensions accompany the page record but aren't part of
/// the domain `Page` type; the repository store reads them directly off the
/// record when validating a segment's bbox against its parent image.
pub fn page_image_bounds(r: &PageRecord) -> Option<(u32, u32)> {
    match (r.image_width, r.image_height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w as u32, h as u32)),
        _ => None,
    }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = article_segments)]
pub struct SegmentRecord {
    pub segment_id: String,
    pub page_id: String,
    pub kind: String,
    pub bbox_x: i32,
    pub bbox_y: i32,
    pub bbox_w: i32,
    pub bbox_h: i32,
    pub text: String,
    pub confidence: f32,
    pub image_clip_ref: Option<String>,
    pub status: String,
}

impl From<&Segment> for SegmentRecord {
    fn from(s: &Segment) -> Self {
        Self {
            segment_id: s.segment_id.clone(),
            page_id: s.page_id.clone(),
            kind: s.kind.as_str().to_string(),
            bbox_x: s.bbox.x as i32,
            bbox_y: s.bbox.y as i32,
            bbox_w: s.bbox.w as i32,
            bbox_h: s.bbox.h as i32,
            text: s.text.clone(),
            confidence: s.confidence,
            image_clip_ref: s.image_clip_ref.clone(),
            status: s.status.as_str().to_string(),
        }
    }
}

impl TryFrom<SegmentRecord> for Segment {
    type Error = PipelineError;

    fn try_from(r: SegmentRecord) -> Result<Self> {
        Ok(Segment {
            segment_id: r.segment_id,
            page_id: r.page_id,
            kind: SegmentKind::from_str(&r.kind),
            bbox: BBox {
                x: r.bbox_x as u32,
                y: r.bbox_y as u32,
                w: r.bbox_w as u32,
                h: r.bbox_h as u32,
            },
            text: r.text,
            confidence: r.confidence,
            image_clip_ref: r.image_clip_ref,
            status: SegmentStatus::from_str(&r.status).ok_or_else(|| {
                PipelineError::Internal(format!("bad segment status {}", r.status))
            })?,
        })
    }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = processing_queue)]
pub struct TaskRecord {
    pub task_id: String,
    pub page_id: Option<String>,
    pub operation: String,
    pub parameters: String,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub lease_expires_at: Option<String>,
    pub leased_at: Option<String>,
    pub worker_id: Option<String>,
    pub bulk_id: Option<String>,
    pub enqueued_at: String,
    pub next_eligible_at: Option<String>,
}

impl From<&Task> for TaskRecord {
    fn from(t: &Task) -> Self {
        Self {
            task_id: t.task_id.clone(),
            page_id: t.page_id.clone(),
            operation: t.operation.as_str().to_string(),
            parameters: serde_json::to_string(&t.parameters).unwrap_or_else(|_| "{}".to_string()),
            priority: t.priority,
            status: t.status.as_str().to_string(),
            attempts: t.attempts,
            max_attempts: t.max_attempts,
            last_error: t.last_error.clone(),
            lease_expires_at: t.lease_expires_at.map(|d| d.to_rfc3339()),
            leased_at: t.leased_at.map(|d| d.to_rfc3339()),
            worker_id: None,
            bulk_id: t.bulk_id.clone(),
            enqueued_at: t.enqueued_at.to_rfc3339(),
            next_eligible_at: t.next_eligible_at.map(|d| d.to_rfc3339()),
        }
    }
}

impl TryFrom<TaskRecord> for Task {
    type Error = PipelineError;

    fn try_from(r: TaskRecord) -> Result<Self> {
        Ok(Task {
            task_id: r.task_id,
            page_id: r.page_id,
            operation: Operation::from_str(&r.operation).ok_or_else(|| {
                PipelineError::Internal(format!("bad operation {}", r.operation))
            })?,
            parameters: serde_json::from_str(&r.parameters).unwrap_or_default(),
            priority: r.priority,
            status: TaskStatus::from_str(&r.status)
                .ok_or_else(|| PipelineError::Internal(format!("bad task status {}", r.status)))?,
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            last_error: r.last_error,
            lease_expires_at: r.lease_expires_at.map(|s| parse_datetime(&s)).transpose()?,
            leased_at: r.leased_at.map(|s| parse_datetime(&s)).transpose()?,
            bulk_id: r.bulk_id,
            enqueued_at: parse_datetime(&r.enqueued_at)?,
            next_eligible_at: r.next_eligible_at.map(|s| parse_datetime(&s)).transpose()?,
        })
    }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = bulk_processing_tasks)]
pub struct BulkRecord {
    pub bulk_id: String,
    pub description: String,
    pub operation: String,
    pub status: String,
    pub total: i32,
    pub pending: i32,
    pub in_progress: i32,
    pub succeeded: i32,
    pub failed: i32,
}

impl From<&BulkOperation> for BulkRecord {
    fn from(b: &BulkOperation) -> Self {
        Self {
            bulk_id: b.bulk_id.clone(),
            description: b.description.clone(),
            operation: b.operation.clone(),
            status: b.status.as_str().to_string(),
            total: b.counters.total,
            pending: b.counters.pending,
            in_progress: b.counters.in_progress,
            succeeded: b.counters.succeeded,
            failed: b.counters.failed,
        }
    }
}

impl TryFrom<BulkRecord> for BulkOperation {
    type Error = PipelineError;

    fn try_from(r: BulkRecord) -> Result<Self> {
        Ok(BulkOperation {
            bulk_id: r.bulk_id,
            description: r.description,
            operation: r.operation,
            status: BulkStatus::from_str(&r.status)
                .ok_or_else(|| PipelineError::Internal(format!("bad bulk status {}", r.status)))?,
            counters: BulkCounters {
                total: r.total,
                pending: r.pending,
                in_progress: r.in_progress,
                succeeded: r.succeeded,
                failed: r.failed,
            },
        })
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::from_str(s).map_err(|e| PipelineError::Validation(format!("bad date {s}: {e}")))
}

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| PipelineError::Validation(format!("bad timestamp {s}: {e}")))
}
