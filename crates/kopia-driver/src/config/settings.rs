use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use super::duration::parse_duration;
use crate::command::kopia::{CacheArgs, DEFAULT_CACHE_DIRECTORY};

pub const GENERAL_CONTENT_CACHE_ENV: &str = "DATA_STORE_GENERAL_CONTENT_CACHE_SIZE_MB";
pub const GENERAL_METADATA_CACHE_ENV: &str = "DATA_STORE_GENERAL_METADATA_CACHE_SIZE_MB";
pub const RESTORE_CONTENT_CACHE_ENV: &str = "DATA_STORE_RESTORE_CONTENT_CACHE_SIZE_MB";
pub const RESTORE_METADATA_CACHE_ENV: &str = "DATA_STORE_RESTORE_METADATA_CACHE_SIZE_MB";
pub const PARALLEL_UPLOAD_ENV: &str = "DATA_STORE_PARALLEL_UPLOAD";
pub const PARALLEL_DOWNLOAD_ENV: &str = "DATA_STORE_PARALLEL_DOWNLOAD";
pub const ASSUME_ROLE_DURATION_ENV: &str = "AWS_ASSUME_ROLE_DURATION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    General,
    Restore,
}

/// Tunables read from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    pub general_content_cache_mb: u64,
    pub general_metadata_cache_mb: u64,
    pub restore_content_cache_mb: u64,
    pub restore_metadata_cache_mb: u64,
    pub parallel_upload: u32,
    pub parallel_download: u32,
    pub assume_role_duration: Duration,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            general_content_cache_mb: 0,
            general_metadata_cache_mb: 500,
            restore_content_cache_mb: 500,
            restore_metadata_cache_mb: 500,
            parallel_upload: 8,
            parallel_download: 8,
            assume_role_duration: Duration::from_secs(60 * 60),
        }
    }
}

impl EnvSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Unset or unparseable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            general_content_cache_mb: number_or(
                get(GENERAL_CONTENT_CACHE_ENV),
                GENERAL_CONTENT_CACHE_ENV,
                d.general_content_cache_mb,
            ),
            general_metadata_cache_mb: number_or(
                get(GENERAL_METADATA_CACHE_ENV),
                GENERAL_METADATA_CACHE_ENV,
                d.general_metadata_cache_mb,
            ),
            restore_content_cache_mb: number_or(
                get(RESTORE_CONTENT_CACHE_ENV),
                RESTORE_CONTENT_CACHE_ENV,
                d.restore_content_cache_mb,
            ),
            restore_metadata_cache_mb: number_or(
                get(RESTORE_METADATA_CACHE_ENV),
                RESTORE_METADATA_CACHE_ENV,
                d.restore_metadata_cache_mb,
            ),
            parallel_upload: number_or(
                get(PARALLEL_UPLOAD_ENV),
                PARALLEL_UPLOAD_ENV,
                d.parallel_upload,
            ),
            parallel_download: number_or(
                get(PARALLEL_DOWNLOAD_ENV),
                PARALLEL_DOWNLOAD_ENV,
                d.parallel_download,
            ),
            assume_role_duration: match get(ASSUME_ROLE_DURATION_ENV) {
                Some(v) => parse_duration(&v).unwrap_or_else(|e| {
                    warn!(key = ASSUME_ROLE_DURATION_ENV, "ignoring invalid value: {e}");
                    d.assume_role_duration
                }),
                None => d.assume_role_duration,
            },
        }
    }

    pub fn cache_for(&self, workload: Workload) -> CacheArgs {
        let (content, metadata) = match workload {
            Workload::General => (self.general_content_cache_mb, self.general_metadata_cache_mb),
            Workload::Restore => (self.restore_content_cache_mb, self.restore_metadata_cache_mb),
        };
        CacheArgs {
            directory: DEFAULT_CACHE_DIRECTORY.to_string(),
            content_cache_mb: content,
            metadata_cache_mb: metadata,
        }
    }
}

fn number_or<T: FromStr + Copy>(raw: Option<String>, key: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    raw.parse().unwrap_or_else(|e| {
        warn!(key, value = %raw, "ignoring invalid value: {e}");
        default
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_when_unset() {
        let s = EnvSettings::from_lookup(|_| None);
        assert_eq!(s, EnvSettings::default());
        assert_eq!(s.cache_for(Workload::General).content_cache_mb, 0);
        assert_eq!(s.cache_for(Workload::Restore).content_cache_mb, 500);
    }

    #[test]
    fn overrides_and_bad_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (GENERAL_CONTENT_CACHE_ENV, "100"),
            (PARALLEL_UPLOAD_ENV, "sixteen"),
            (ASSUME_ROLE_DURATION_ENV, "2h"),
        ]);
        let s = EnvSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.general_content_cache_mb, 100);
        assert_eq!(s.parallel_upload, 8);
        assert_eq!(s.assume_role_duration, Duration::from_secs(7200));
    }
}
