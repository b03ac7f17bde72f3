use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, ErrorClass};

pub const INVALID_PASSWORD_MARKER: &str = "invalid repository password";
pub const ACCESS_DENIED_MARKER: &str = "access denied";
pub const OOM_EXIT_CODE_MARKER: &str = "command terminated with exit code 137";
pub const OOM_TEXT_MARKER: &str = "container ran out of memory";
pub const REPO_NOT_INITIALIZED_MARKER: &str = "repository not initialized in the provided storage";
pub const FS_NOT_FOUND_MARKER: &str = "no such file or directory";
pub const REPO_NOT_FOUND_MARKER: &str = "repository not found";
const BUCKET_NOT_FOUND_MARKERS: &[&str] =
    &["bucket does not exist", "unable to list from the bucket"];

static BUCKET_NOT_EXIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"bucket ".*" does not exist"#).expect("bucket-not-found pattern must compile")
});

/// Closed set of failures recognised in backup engine output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    InvalidPassword,
    AccessDenied,
    RepoNotFound,
    RepoNotInitialized,
    OutOfMemory,
    BucketNotFound,
    Unknown,
}

impl EngineErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPassword => "invalid repository password",
            Self::AccessDenied => "access denied",
            Self::RepoNotFound => "repository not found",
            Self::RepoNotInitialized => "repository not initialized",
            Self::OutOfMemory => "container ran out of memory",
            Self::BucketNotFound => "bucket not found",
            Self::Unknown => "unknown error",
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            Self::InvalidPassword | Self::AccessDenied => ErrorClass::Credential,
            Self::RepoNotFound | Self::RepoNotInitialized => ErrorClass::TransientConnection,
            Self::OutOfMemory => ErrorClass::ResourceExhaustion,
            Self::BucketNotFound => ErrorClass::Configuration,
            Self::Unknown => ErrorClass::Other,
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a failed engine invocation. Both the exec error message and the
/// captured stderr are searched; markers are matched case-sensitively.
pub fn classify(err: Option<&str>, stderr: &str) -> EngineErrorKind {
    let err = err.unwrap_or_default();
    let has = |marker: &str| stderr.contains(marker) || err.contains(marker);

    if has(INVALID_PASSWORD_MARKER) {
        EngineErrorKind::InvalidPassword
    } else if has(ACCESS_DENIED_MARKER) {
        EngineErrorKind::AccessDenied
    } else if has(OOM_EXIT_CODE_MARKER) || has(OOM_TEXT_MARKER) {
        EngineErrorKind::OutOfMemory
    } else if has(REPO_NOT_INITIALIZED_MARKER) || has(FS_NOT_FOUND_MARKER) {
        EngineErrorKind::RepoNotInitialized
    } else if has(REPO_NOT_FOUND_MARKER) {
        EngineErrorKind::RepoNotFound
    } else if BUCKET_NOT_FOUND_MARKERS.iter().any(|m| has(m))
        || BUCKET_NOT_EXIST_RE.is_match(stderr)
        || BUCKET_NOT_EXIST_RE.is_match(err)
    {
        EngineErrorKind::BucketNotFound
    } else {
        EngineErrorKind::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: EngineErrorKind,
    pub original_message: String,
}

impl ClassifiedError {
    pub fn new(err: Option<&str>, stderr: &str) -> Self {
        let kind = classify(err, stderr);
        let original_message = err
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .or_else(|| last_stderr_line(stderr))
            .unwrap_or_default();
        Self {
            kind,
            original_message,
        }
    }
}

fn last_stderr_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last()
        .map(ToOwned::to_owned)
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.original_message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.original_message)
        }
    }
}

impl From<ClassifiedError> for Error {
    fn from(err: ClassifiedError) -> Self {
        Error::engine(err.kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_not_initialized_and_fs_not_found_share_a_kind() {
        assert_eq!(
            classify(None, "repository not initialized in the provided storage"),
            EngineErrorKind::RepoNotInitialized
        );
        assert_eq!(
            classify(None, "open /mnt/data/x: no such file or directory"),
            EngineErrorKind::RepoNotInitialized
        );
    }

    #[test]
    fn invalid_password_wins_over_later_markers() {
        let stderr = "access denied\nERROR invalid repository password";
        assert_eq!(classify(None, stderr), EngineErrorKind::InvalidPassword);
    }

    #[test]
    fn out_of_memory_from_exit_code_in_exec_error() {
        let kind = classify(Some("command terminated with exit code 137"), "");
        assert_eq!(kind, EngineErrorKind::OutOfMemory);
        assert_eq!(kind.class(), ErrorClass::ResourceExhaustion);
    }

    #[test]
    fn bucket_pattern_matches_quoted_name() {
        assert_eq!(
            classify(None, r#"ERROR bucket "backups-1" does not exist"#),
            EngineErrorKind::BucketNotFound
        );
    }

    #[test]
    fn markers_are_case_sensitive() {
        assert_eq!(classify(None, "Access Denied"), EngineErrorKind::Unknown);
    }

    #[test]
    fn classified_error_renders_kind_and_original() {
        let e = ClassifiedError::new(Some("exit status 1"), "ERROR repository not found");
        assert_eq!(e.to_string(), "repository not found: exit status 1");
        let e = ClassifiedError::new(None, "line one\nERROR access denied\n");
        assert_eq!(e.to_string(), "access denied: ERROR access denied");
    }
}
