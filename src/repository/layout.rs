//! Deterministic on-disk layout for originals, OCR artifacts, and segment
//! clips, keyed by `(source_system, publication_id, issue_date, sequence)`
//! rather than a content hash.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Maximum entries tolerated in a single directory before a two-character
/// hash shard is interposed.
pub const MAX_DIR_ENTRIES: usize = 10_000;

fn stem(lccn: &str, issue_date: NaiveDate, sequence: i32) -> String {
    format!("{lccn}_{issue_date}_{sequence:04}")
}

/// `<base>/originals/<source>/<yyyy>/<mm>/<lccn>_<yyyy-mm-dd>_<nnnn>.<ext>`
pub fn original_path(
    base: &Path,
    source: &str,
    lccn: &str,
    issue_date: NaiveDate,
    sequence: i32,
    ext: &str,
) -> PathBuf {
    base.join("originals")
        .join(source)
        .join(format!("{:04}", issue_date.format("%Y")))
        .join(format!("{:02}", issue_date.format("%m")))
        .join(format!("{}.{ext}", stem(lccn, issue_date, sequence)))
}

/// Sidecar metadata path next to an original.
pub fn original_meta_path(
    base: &Path,
    source: &str,
    lccn: &str,
    issue_date: NaiveDate,
    sequence: i32,
) -> PathBuf {
    base.join("originals")
        .join(source)
        .join(format!("{:04}", issue_date.format("%Y")))
        .join(format!("{:02}", issue_date.format("%m")))
        .join(format!("{}.meta.json", stem(lccn, issue_date, sequence)))
}

/// `<base>/ocr/text/<source>/<yyyy>/<lccn>_<yyyy-mm-dd>_<nnnn>.txt`
pub fn ocr_text_path(
    base: &Path,
    source: &str,
    lccn: &str,
    issue_date: NaiveDate,
    sequence: i32,
) -> PathBuf {
    base.join("ocr")
        .join("text")
        .join(source)
        .join(format!("{:04}", issue_date.format("%Y")))
        .join(format!("{}.txt", stem(lccn, issue_date, sequence)))
}

/// `<base>/ocr/hocr/<source>/<yyyy>/<lccn>_<yyyy-mm-dd>_<nnnn>.hocr`
pub fn ocr_hocr_path(
    base: &Path,
    source: &str,
    lccn: &str,
    issue_date: NaiveDate,
    sequence: i32,
) -> PathBuf {
    base.join("ocr")
        .join("hocr")
        .join(source)
        .join(format!("{:04}", issue_date.format("%Y")))
        .join(format!("{}.hocr", stem(lccn, issue_date, sequence)))
}

/// `<base>/segments/<source>/<yyyy>/<segment_id>.{jpg,txt}`, sharded by the
/// first two hex characters of the segment id once a year bucket would
/// exceed `MAX_DIR_ENTRIES`.
pub fn segment_path(
    base: &Path,
    source: &str,
    issue_date: NaiveDate,
    segment_id: &str,
    ext: &str,
    shard: bool,
) -> PathBuf {
    let mut dir = base
        .join("segments")
        .join(source)
        .join(format!("{:04}", issue_date.format("%Y")));
    if shard && segment_id.len() >= 2 {
        dir = dir.join(&segment_id[..2]);
    }
    dir.join(format!("{segment_id}.{ext}"))
}

/// Whether a directory's entry count has crossed the sharding threshold.
pub fn needs_sharding(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| entries.count() >= MAX_DIR_ENTRIES)
        .unwrap_or(false)
}

/// Write `bytes` to `path`, creating parent directories as needed.
/// Writes to a sibling temp file first and renames into place so a crash
/// mid-write never leaves a partial file at the final path.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().expect("layout paths always have a parent");
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap().to_string_lossy()
    ));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn original_path_matches_layout() {
        let base = Path::new("/repo");
        let date = NaiveDate::from_ymd_opt(1891, 4, 15).unwrap();
        let path = original_path(base, "chroniclingamerica", "sn83045604", date, 3, "jp2");
        assert_eq!(
            path,
            PathBuf::from("/repo/originals/chroniclingamerica/1891/04/sn83045604_1891-04-15_0003.jp2")
        );
    }

    #[test]
    fn ocr_text_path_omits_month() {
        let base = Path::new("/repo");
        let date = NaiveDate::from_ymd_opt(1891, 4, 15).unwrap();
        let path = ocr_text_path(base, "chroniclingamerica", "sn83045604", date, 3);
        assert_eq!(
            path,
            PathBuf::from("/repo/ocr/text/chroniclingamerica/1891/sn83045604_1891-04-15_0003.txt")
        );
    }

    #[test]
    fn segment_path_shards_when_requested() {
        let base = Path::new("/repo");
        let date = NaiveDate::from_ymd_opt(1891, 4, 15).unwrap();
        let unsharded = segment_path(base, "chroniclingamerica", date, "abcd1234", "jpg", false);
        let sharded = segment_path(base, "chroniclingamerica", date, "abcd1234", "jpg", true);
        assert_eq!(
            unsharded,
            PathBuf::from("/repo/segments/chroniclingamerica/1891/abcd1234.jpg")
        );
        assert_eq!(
            sharded,
            PathBuf::from("/repo/segments/chroniclingamerica/1891/ab/abcd1234.jpg")
        );
    }

    #[test]
    fn write_atomic_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b.txt");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
