use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// The subset of a snapshot manifest this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotManifest {
    pub id: String,
    #[serde(rename = "rootEntry", default)]
    pub root_entry: Option<RootEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootEntry {
    #[serde(default)]
    pub obj: String,
    #[serde(default)]
    pub summ: Option<DirSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirSummary {
    pub size: i64,
    pub files: i64,
    pub dirs: i64,
    #[serde(rename = "numFailed")]
    pub num_failed: i64,
}

impl SnapshotManifest {
    pub fn root_id(&self) -> Option<&str> {
        self.root_entry
            .as_ref()
            .map(|r| r.obj.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn summary(&self) -> Option<&DirSummary> {
        self.root_entry.as_ref().and_then(|r| r.summ.as_ref())
    }

    pub fn has_fatal_errors(&self) -> bool {
        self.summary().is_some_and(|s| s.num_failed > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotListStats {
    pub total_bytes: u64,
    pub snapshot_count: usize,
}

/// Sums logical snapshot sizes from `snapshot list --all --json` output.
/// Manifests without a directory summary count as zero bytes.
pub fn snapshot_size_stats(output: &str) -> Result<SnapshotListStats> {
    if output.trim().is_empty() {
        return Err(Error::parse("received empty snapshot list output"));
    }
    let manifests: Vec<SnapshotManifest> = serde_json::from_str(output)
        .map_err(|e| Error::parse(format!("could not parse snapshot list output: {e}")))?;

    let mut total: u64 = 0;
    let mut missing = 0usize;
    for m in &manifests {
        match m.summary() {
            Some(s) => total = total.saturating_add(s.size.max(0) as u64),
            None => missing += 1,
        }
    }
    if missing > 0 {
        warn!(count = missing, "snapshot manifests without size data");
    }

    Ok(SnapshotListStats {
        total_bytes: total,
        snapshot_count: manifests.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_sizes_and_treats_missing_summary_as_zero() {
        let out = r#"[
            {"id":"a","rootEntry":{"obj":"k1","summ":{"size":100,"files":1,"dirs":1,"numFailed":0}}},
            {"id":"b","rootEntry":{"obj":"k2"}},
            {"id":"c","rootEntry":{"obj":"k3","summ":{"size":23}}}
        ]"#;
        let stats = snapshot_size_stats(out).unwrap();
        assert_eq!(
            stats,
            SnapshotListStats {
                total_bytes: 123,
                snapshot_count: 3
            }
        );
    }

    #[test]
    fn empty_and_malformed_lists_are_errors() {
        assert!(snapshot_size_stats("").is_err());
        let err = snapshot_size_stats("not json").unwrap_err().to_string();
        assert!(err.contains("could not parse snapshot list"), "unexpected err: {err}");
    }
}
