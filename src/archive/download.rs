//! Multi-format page download: builds the per-format URL for a resolved
//! page and assembles a `DownloadManifest` from whichever formats the
//! caller requested.

use super::types::{DownloadFormat, DownloadedFormat};
use crate::models::PageMetadata;

/// Build the download URL for one format of a given page, following the
/// archive's `/lccn/<lccn>/<date>/ed-<ed>/seq-<seq>.<ext>` convention.
pub fn format_url(base_url: &str, page: &PageMetadata, format: DownloadFormat) -> String {
    format!(
        "{}/lccn/{}/{}/ed-1/seq-{}.{}",
        base_url.trim_end_matches('/'),
        page.publication_id,
        page.issue_date.format("%Y-%m-%d"),
        page.sequence,
        format.extension()
    )
}

/// Assemble a manifest from per-format fetch results, skipping formats that
/// failed to download rather than aborting the whole request — a partial
/// manifest still lets callers act on the formats that succeeded.
pub fn assemble_manifest(results: Vec<(DownloadFormat, crate::error::Result<(Vec<u8>, Option<String>, String)>)>) -> super::types::DownloadManifest {
    let formats = results
        .into_iter()
        .filter_map(|(format, result)| match result {
            Ok((bytes, content_type, url)) => Some(DownloadedFormat {
                format,
                bytes,
                content_type,
                url,
            }),
            Err(e) => {
                tracing::warn!("download of format {:?} failed: {e}", format);
                None
            }
        })
        .collect();
    super::types::DownloadManifest { formats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn sample_page() -> PageMetadata {
        PageMetadata {
            publication_id: "sn83045604".to_string(),
            issue_date: NaiveDate::from_ymd_opt(1888, 5, 11).unwrap(),
            sequence: 1,
            source_system: "chronicling_america".to_string(),
            title: None,
            raw: HashMap::new(),
        }
    }

    #[test]
    fn builds_per_format_urls() {
        let page = sample_page();
        assert_eq!(
            format_url("https://chroniclingamerica.loc.gov", &page, DownloadFormat::Pdf),
            "https://chroniclingamerica.loc.gov/lccn/sn83045604/1888-05-11/ed-1/seq-1.pdf"
        );
        assert_eq!(
            format_url("https://chroniclingamerica.loc.gov", &page, DownloadFormat::OcrText),
            "https://chroniclingamerica.loc.gov/lccn/sn83045604/1888-05-11/ed-1/seq-1.txt"
        );
    }

    #[test]
    fn manifest_skips_failed_formats() {
        let results = vec![
            (
                DownloadFormat::Pdf,
                Ok((vec![1, 2, 3], Some("application/pdf".into()), "u1".into())),
            ),
            (
                DownloadFormat::Jp2,
                Err(crate::error::PipelineError::TransientUpstream("timeout".into())),
            ),
        ];
        let manifest = assemble_manifest(results);
        assert_eq!(manifest.formats.len(), 1);
        assert_eq!(manifest.formats[0].format, DownloadFormat::Pdf);
    }
}
