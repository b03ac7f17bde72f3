//! Parsers for backup engine stdout/stderr.
//!
//! Everything here is pure text to struct. Line-level parsers return `None`
//! for lines they do not recognise; whole-output parsers return a parse error
//! naming the field they could not extract.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

pub mod bytes;
pub mod manifest;

pub use bytes::parse_bytes;
pub use manifest::{SnapshotListStats, SnapshotManifest, snapshot_size_stats};

static LINE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n]").expect("line split pattern must compile"));

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?P<spinner>[|/\-\\\*]).+[^\d](?P<num_hashed>\d+) hashed \((?P<hashed_size>[^\)]+)\), ",
        r"(?P<num_cached>\d+) cached \((?P<cached_size>[^\)]+)\), ",
        r"uploaded (?P<uploaded_size>[^\)]+), ",
        r"(?:estimating...|estimated (?P<estimated_size>[^\)]+) ",
        r"\((?P<estimated_progress>[^\)]+)%\).+)",
    ))
    .expect("progress pattern must compile")
});

static RESTORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"Processed (?P<processed_count>\d+) \((?P<processed_size>.*)\) ",
        r"of (?P<total_count>\d+) \((?P<total_size>.*)\) ",
        r"(?P<data_rate>.*) \((?P<percentage>.*)%\) remaining (?P<remaining>.*)\.",
    ))
    .expect("restore pattern must compile")
});

static CREATED_SNAPSHOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Created snapshot with root ([^\s]+) and ID ([^\s]+).*$")
        .expect("created snapshot pattern must compile")
});

static BLOB_TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total: (\S+)$").expect("blob total pattern must compile"));
static BLOB_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Count: (\S+)$").expect("blob count pattern must compile"));

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b[^m]*?m").expect("ansi pattern must compile"));
static ERROR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:ERROR\s+|.*<ERROR>\s*|^\s*error\s+)(.*)").expect("error pattern must compile")
});

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    LINE_SPLIT_RE.split(text)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotCreated {
    pub snapshot_id: String,
    pub root_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotCreateStats {
    pub files_hashed: u64,
    pub size_hashed_bytes: u64,
    pub files_cached: u64,
    pub size_cached_bytes: u64,
    pub size_uploaded_bytes: u64,
    pub size_estimated_bytes: u64,
    pub progress_percent: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreStats {
    pub files_processed: u64,
    pub size_processed_bytes: u64,
    pub files_total: u64,
    pub size_total_bytes: u64,
    pub progress_percent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepoSizeStats {
    pub total_bytes: u64,
    pub blob_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotCreateInfo {
    pub snapshot_id: String,
    pub root_id: String,
    pub stats: Option<SnapshotCreateStats>,
}

/// Extracts snapshot and root IDs from `snapshot create` stdout.
///
/// The last line that deserialises as a complete snapshot manifest wins.
/// Manifests with an empty ID or root are skipped, and output with no
/// complete manifest falls back to the
/// `Created snapshot with root X and ID Y` sentence.
pub fn parse_snapshot_created(stdout: &str) -> Result<SnapshotCreated> {
    if stdout.trim().is_empty() {
        return Err(Error::parse("received empty snapshot create output"));
    }

    let mut found: Option<(String, String)> = None;
    let mut missing_root = false;
    for line in stdout.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(m) = serde_json::from_str::<SnapshotManifest>(line) else {
            continue;
        };
        if m.has_fatal_errors() {
            return Err(Error::parse(format!(
                "error occurred during snapshot creation (snapshot {})",
                m.id
            )));
        }
        let id = m.id.trim();
        match m.root_id() {
            Some(root) if !id.is_empty() => found = Some((id.to_string(), root.to_string())),
            None if !id.is_empty() => missing_root = true,
            _ => {}
        }
    }

    let (snapshot_id, root_id) = match found.or_else(|| created_sentence_ids(stdout)) {
        Some(ids) => ids,
        None if missing_root => {
            return Err(Error::parse("could not extract root ID from output"));
        }
        None => return Err(Error::parse("could not extract snapshot ID from output")),
    };
    Ok(SnapshotCreated {
        snapshot_id,
        root_id,
    })
}

fn created_sentence_ids(text: &str) -> Option<(String, String)> {
    split_lines(text).find_map(|l| {
        let caps = CREATED_SNAPSHOT_RE.captures(l)?;
        Some((caps[2].to_string(), caps[1].to_string()))
    })
}

/// IDs from stdout plus the final progress stats from stderr.
pub fn parse_snapshot_create_output(stdout: &str, stderr: &str) -> Result<SnapshotCreateInfo> {
    let created = parse_snapshot_created(stdout)?;
    Ok(SnapshotCreateInfo {
        snapshot_id: created.snapshot_id,
        root_id: created.root_id,
        stats: snapshot_stats_from_output(stderr, true),
    })
}

/// Parses one `snapshot create` progress line.
///
/// A line whose spinner is `*` is the finished summary and always reports
/// 100%. A running line never reports more than 99%, even when the engine's
/// estimate overshoots.
pub fn parse_progress_line(line: &str, only_finished: bool) -> Option<SnapshotCreateStats> {
    let caps = PROGRESS_RE.captures(line)?;
    let finished = &caps["spinner"] == "*";
    if only_finished && !finished {
        return None;
    }

    let field = |name: &str| caps.name(name).map(|m| m.as_str()).unwrap_or_default();
    let count = |name: &str| -> Option<u64> {
        field(name)
            .parse()
            .inspect_err(|e| debug!(field = name, value = field(name), "skipping line: {e}"))
            .ok()
    };
    let size = |name: &str| -> Option<u64> {
        parse_bytes(field(name))
            .inspect_err(|e| debug!(field = name, value = field(name), "skipping line: {e}"))
            .ok()
    };

    let files_hashed = count("num_hashed")?;
    let files_cached = count("num_cached")?;
    let size_hashed_bytes = size("hashed_size")?;
    let size_cached_bytes = size("cached_size")?;
    let size_uploaded_bytes = size("uploaded_size")?;

    let mut size_estimated_bytes = 0;
    let mut percent = 0.0f64;
    if !field("estimated_size").is_empty() || !field("estimated_progress").is_empty() {
        size_estimated_bytes = size("estimated_size")?;
        percent = parse_percent(field("estimated_progress"))?;
    }

    Some(SnapshotCreateStats {
        files_hashed,
        size_hashed_bytes,
        files_cached,
        size_cached_bytes,
        size_uploaded_bytes,
        size_estimated_bytes,
        progress_percent: clamp_percent(percent, finished),
    })
}

/// Last progress line in a whole stderr stream, if any.
pub fn snapshot_stats_from_output(
    stderr: &str,
    only_finished: bool,
) -> Option<SnapshotCreateStats> {
    split_lines(stderr)
        .filter_map(|l| parse_progress_line(l, only_finished))
        .last()
}

/// Parses a restore progress line such as
/// `Processed 5 (1.4 GB) of 5 (1.8 GB) 291.1 MB/s (75.2%) remaining 1s.`
/// Restore output has no finished marker, so 100% or more reads as 99.
pub fn parse_restore_progress(line: &str) -> Option<RestoreStats> {
    let caps = RESTORE_RE.captures(line)?;
    let files_processed = caps["processed_count"].parse().ok()?;
    let files_total = caps["total_count"].parse().ok()?;
    let size_processed_bytes = parse_bytes(&caps["processed_size"]).ok()?;
    let size_total_bytes = parse_bytes(&caps["total_size"]).ok()?;
    let percent = parse_percent(&caps["percentage"])?;

    Some(RestoreStats {
        files_processed,
        size_processed_bytes,
        files_total,
        size_total_bytes,
        progress_percent: clamp_percent(percent, false),
    })
}

pub fn restore_stats_from_output(stderr: &str) -> Option<RestoreStats> {
    split_lines(stderr).filter_map(parse_restore_progress).last()
}

fn parse_percent(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|p| p.is_finite())
}

fn clamp_percent(percent: f64, finished: bool) -> u32 {
    if finished {
        100
    } else if percent >= 100.0 {
        99
    } else {
        percent.max(0.0) as u32
    }
}

/// Reads `Count:` and `Total:` from `blob stats --raw` output. When a field
/// appears more than once the last occurrence is used.
pub fn parse_blob_stats(text: &str) -> Result<RepoSizeStats> {
    if text.trim().is_empty() {
        return Err(Error::parse("received empty blob stats output"));
    }

    let mut count: Option<&str> = None;
    let mut total: Option<&str> = None;
    for line in text.lines().map(str::trim_end) {
        if let Some(c) = BLOB_COUNT_RE.captures(line).and_then(|c| c.get(1)) {
            count = Some(c.as_str());
        }
        if let Some(t) = BLOB_TOTAL_RE.captures(line).and_then(|c| c.get(1)) {
            total = Some(t.as_str());
        }
    }

    let count =
        count.ok_or_else(|| Error::parse("could not extract count from blob stats output"))?;
    let total =
        total.ok_or_else(|| Error::parse("could not extract total from blob stats output"))?;
    Ok(RepoSizeStats {
        total_bytes: parse_non_negative("total", total)?,
        blob_count: parse_non_negative("count", count)?,
    })
}

fn parse_non_negative(field: &str, raw: &str) -> Result<u64> {
    let v: i64 = raw
        .parse()
        .map_err(|e| Error::parse(format!("invalid blob stats {field} '{raw}': {e}")))?;
    u64::try_from(v).map_err(|_| Error::parse(format!("negative blob stats {field} '{raw}'")))
}

/// Every error line in engine output with its marker and colouring removed.
pub fn extract_errors(text: &str) -> Vec<String> {
    split_lines(text)
        .filter_map(|l| {
            let clean = ANSI_RE.replace_all(l, "");
            ERROR_LINE_RE
                .captures(&clean)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Field-wise equality where two missing values compare equal.
pub fn stats_equal<T: PartialEq>(a: Option<&T>, b: Option<&T>) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_line_without_estimate() {
        let line = " - 0 hashing, 2 hashed (10 KB), 1 cached (1 KB), uploaded 3 KB, estimating...";
        let stats = parse_progress_line(line, false).unwrap();
        assert_eq!(stats.files_hashed, 2);
        assert_eq!(stats.size_uploaded_bytes, 3000);
        assert_eq!(stats.size_estimated_bytes, 0);
        assert_eq!(stats.progress_percent, 0);
        assert!(parse_progress_line(line, true).is_none());
    }

    #[test]
    fn running_line_mid_progress() {
        let line = " / 1 hashing, 5 hashed (5 MB), 0 cached (0 B), uploaded 4 MB, estimated 10 MB (42.7%) 3s left";
        let stats = parse_progress_line(line, false).unwrap();
        assert_eq!(stats.progress_percent, 42);
        assert_eq!(stats.size_estimated_bytes, 10_000_000);
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert!(parse_progress_line("Snapshotting root@host:/data ...", false).is_none());
        assert!(parse_restore_progress("Restoring to local filesystem").is_none());
    }

    #[test]
    fn stream_keeps_last_match() {
        let stderr = " | 0 hashing, 1 hashed (1 B), 0 cached (0 B), uploaded 1 B, estimating...\r\
             * 0 hashing, 3 hashed (3 B), 0 cached (0 B), uploaded 3 B, estimated 3 B (100.0%) 0s left\n\
             some trailing text";
        let stats = snapshot_stats_from_output(stderr, false).unwrap();
        assert_eq!(stats.files_hashed, 3);
        assert_eq!(stats.progress_percent, 100);
    }

    #[test]
    fn restore_progress_clamps_to_99() {
        let line = "Processed 5 (1.8 GB) of 5 (1.8 GB) 291.1 MB/s (100.0%) remaining 0s.";
        assert_eq!(parse_restore_progress(line).unwrap().progress_percent, 99);
        let line = "Processed 5 (1.4 GB) of 5 (1.8 GB) 291.1 MB/s (75.2%) remaining 1s.";
        let stats = parse_restore_progress(line).unwrap();
        assert_eq!(stats.files_processed, 5);
        assert_eq!(stats.size_processed_bytes, 1_400_000_000);
        assert_eq!(stats.size_total_bytes, 1_800_000_000);
        assert_eq!(stats.progress_percent, 75);
    }

    #[test]
    fn blob_stats_uses_last_occurrence_and_rejects_negatives() {
        let stats = parse_blob_stats("Count: 1\nTotal: 2\nCount: 3\nTotal: 4\n").unwrap();
        assert_eq!(stats.blob_count, 3);
        assert_eq!(stats.total_bytes, 4);
        let err = parse_blob_stats("Count: 1\nTotal: -5\n").unwrap_err().to_string();
        assert!(err.contains("negative"), "unexpected err: {err}");
        let err = parse_blob_stats("Count: x1\nTotal: 5\n").unwrap_err().to_string();
        assert!(err.contains("invalid blob stats count"), "unexpected err: {err}");
    }

    #[test]
    fn extract_errors_handles_colour_and_lowercase_prefix() {
        let text = "\x1b[31mERROR\x1b[0m unable to open: boom\n\
                    2024-01-01 <ERROR> bucket missing\n\
                    error connecting to server: refused\n\
                    no problem here";
        assert_eq!(
            extract_errors(text),
            vec![
                "unable to open: boom".to_string(),
                "bucket missing".to_string(),
                "connecting to server: refused".to_string(),
            ]
        );
    }

    #[test]
    fn json_manifest_fatal_errors() {
        let out = r#"{"id":"s1","rootEntry":{"obj":"k1","summ":{"size":1,"numFailed":2}}}"#;
        let err = parse_snapshot_created(out).unwrap_err().to_string();
        assert!(err.contains("error occurred during snapshot creation"), "unexpected err: {err}");
    }

    #[test]
    fn stats_equal_treats_none_as_equal() {
        let a = SnapshotCreateStats::default();
        assert!(stats_equal::<SnapshotCreateStats>(None, None));
        assert!(stats_equal(Some(&a), Some(&a)));
        assert!(!stats_equal(Some(&a), None));
    }
}
