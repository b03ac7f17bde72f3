use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use super::flags::{self, blob, common, maintenance, policy, repository, snapshot};
use super::{RedactedCommand, Secret};
use crate::config::duration::{format_duration, round_up_to_second};

pub const DEFAULT_CACHE_DIRECTORY: &str = "/tmp/kopia-cache";
pub const DEFAULT_CONFIG_FILE: &str = "/tmp/kopia-repository.config";
pub const DEFAULT_LOG_DIR: &str = "/tmp/kopia-log";
pub const DEFAULT_PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_secs(60 * 60);
// Effectively unlimited: the engine stores the count as a signed 32-bit value.
pub const KEEP_LATEST_UNLIMITED: i32 = i32::MAX;
pub const DEFAULT_COMPRESSION: &str = "s2-default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Error,
    Info,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

/// Flags shared by every engine invocation.
#[derive(Debug, Clone, Default)]
pub struct CommonArgs {
    pub password: Option<Secret>,
    pub config_file: Option<String>,
    pub log_dir: Option<String>,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheArgs {
    pub directory: String,
    pub content_cache_mb: u64,
    pub metadata_cache_mb: u64,
}

impl Default for CacheArgs {
    fn default() -> Self {
        Self {
            directory: DEFAULT_CACHE_DIRECTORY.to_string(),
            content_cache_mb: 0,
            metadata_cache_mb: 500,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepositoryCommandArgs {
    pub cache: CacheArgs,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub readonly: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotCreateArgs {
    pub path: String,
    pub parallelism: u32,
    /// Already in `key:value` form.
    pub tags: Vec<String>,
    pub progress_update_interval: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotRestoreArgs {
    pub snapshot_id: String,
    pub target_path: String,
    pub parallelism: Option<u32>,
    pub ignore_permission_errors: bool,
    pub sparse: bool,
}

pub fn common_args(args: &CommonArgs) -> RedactedCommand {
    common_args_with_level(args, args.log_level)
}

fn common_args_with_level(args: &CommonArgs, level: LogLevel) -> RedactedCommand {
    let mut cmd = RedactedCommand::new();
    cmd.append_loggable([flags::ENGINE_BINARY]);
    cmd.append_loggable_kv(common::LOG_LEVEL, level.as_str());
    if let Some(p) = non_empty(args.config_file.as_deref()) {
        cmd.append_loggable_kv(common::CONFIG_FILE, p);
    }
    if let Some(p) = non_empty(args.log_dir.as_deref()) {
        cmd.append_loggable_kv(common::LOG_DIR, p);
    }
    if let Some(pw) = args.password.as_ref().filter(|p| !p.is_empty()) {
        cmd.append_redacted_kv(common::PASSWORD, pw.expose());
    }
    cmd
}

fn append_cache_and_identity(cmd: &mut RedactedCommand, repo: &RepositoryCommandArgs) {
    cmd.append_loggable_kv(repository::CACHE_DIRECTORY, repo.cache.directory.as_str())
        .append_loggable_kv(
            repository::CONTENT_CACHE_SIZE_MB,
            repo.cache.content_cache_mb.to_string(),
        )
        .append_loggable_kv(
            repository::METADATA_CACHE_SIZE_MB,
            repo.cache.metadata_cache_mb.to_string(),
        );
    if let Some(h) = non_empty(repo.hostname.as_deref()) {
        cmd.append_loggable_kv(repository::OVERRIDE_HOSTNAME, h);
    }
    if let Some(u) = non_empty(repo.username.as_deref()) {
        cmd.append_loggable_kv(repository::OVERRIDE_USERNAME, u);
    }
}

/// `repository create` followed by the backend fragment.
pub fn repository_create(
    base: &CommonArgs,
    repo: &RepositoryCommandArgs,
    storage: &RedactedCommand,
) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([
        repository::SUBCOMMAND,
        repository::CREATE,
        common::NO_CHECK_FOR_UPDATES,
    ]);
    append_cache_and_identity(&mut cmd, repo);
    cmd.combine(storage);
    cmd
}

/// `repository connect` followed by the backend fragment. A point in time is
/// only emitted when one is supplied.
pub fn repository_connect(
    base: &CommonArgs,
    repo: &RepositoryCommandArgs,
    storage: &RedactedCommand,
    point_in_time: Option<DateTime<Utc>>,
) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([
        repository::SUBCOMMAND,
        repository::CONNECT,
        common::NO_CHECK_FOR_UPDATES,
    ]);
    if repo.readonly {
        cmd.append_loggable([repository::READONLY]);
    }
    append_cache_and_identity(&mut cmd, repo);
    cmd.combine(storage);
    if let Some(pit) = point_in_time {
        cmd.append_loggable_kv(
            repository::POINT_IN_TIME,
            pit.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    cmd
}

pub fn repository_connect_server(
    base: &CommonArgs,
    repo: &RepositoryCommandArgs,
    server_url: &str,
    fingerprint: &Secret,
) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([
        repository::SUBCOMMAND,
        repository::CONNECT,
        repository::SERVER,
        common::NO_CHECK_FOR_UPDATES,
    ]);
    if repo.readonly {
        cmd.append_loggable([repository::READONLY]);
    }
    append_cache_and_identity(&mut cmd, repo);
    cmd.append_loggable_kv(repository::SERVER_URL, server_url)
        .append_redacted_kv(repository::SERVER_CERT_FINGERPRINT, fingerprint.expose());
    cmd
}

/// Keeps every snapshot and disables time-based retention.
pub fn policy_set_global(base: &CommonArgs) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([policy::SUBCOMMAND, policy::SET, policy::GLOBAL])
        .append_loggable_kv(policy::KEEP_LATEST, KEEP_LATEST_UNLIMITED.to_string());
    for key in [
        policy::KEEP_HOURLY,
        policy::KEEP_DAILY,
        policy::KEEP_WEEKLY,
        policy::KEEP_MONTHLY,
        policy::KEEP_ANNUAL,
    ] {
        cmd.append_loggable_kv(key, "0");
    }
    cmd.append_loggable_kv(policy::COMPRESSION, DEFAULT_COMPRESSION);
    cmd
}

pub fn maintenance_set_owner(base: &CommonArgs, owner: &str) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([maintenance::SUBCOMMAND, maintenance::SET])
        .append_loggable_kv(maintenance::OWNER, owner);
    cmd
}

pub fn maintenance_run(base: &CommonArgs) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([maintenance::SUBCOMMAND, maintenance::RUN]);
    cmd
}

/// Always logs at info level so progress lines reach stderr.
pub fn snapshot_create(base: &CommonArgs, args: &SnapshotCreateArgs) -> RedactedCommand {
    let mut cmd = common_args_with_level(base, LogLevel::Info);
    cmd.append_loggable([
        snapshot::SUBCOMMAND,
        snapshot::CREATE,
        args.path.as_str(),
        common::JSON,
    ])
    .append_loggable_kv(common::PARALLEL, args.parallelism.to_string());
    for tag in args.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        cmd.append_loggable_kv(snapshot::TAGS, tag);
    }
    let interval = args
        .progress_update_interval
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_PROGRESS_UPDATE_INTERVAL);
    cmd.append_loggable_kv(
        snapshot::PROGRESS_UPDATE_INTERVAL,
        format_duration(round_up_to_second(interval)),
    );
    cmd
}

pub fn snapshot_restore(base: &CommonArgs, args: &SnapshotRestoreArgs) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([
        snapshot::SUBCOMMAND,
        snapshot::RESTORE,
        args.snapshot_id.as_str(),
        args.target_path.as_str(),
    ]);
    if let Some(n) = args.parallelism.filter(|n| *n > 0) {
        cmd.append_loggable_kv(common::PARALLEL, n.to_string());
    }
    if args.ignore_permission_errors {
        cmd.append_loggable([snapshot::IGNORE_PERMISSION_ERRORS]);
    } else {
        cmd.append_loggable([snapshot::NO_IGNORE_PERMISSION_ERRORS]);
    }
    if args.sparse {
        cmd.append_loggable([snapshot::SPARSE]);
    }
    cmd
}

pub fn snapshot_delete(base: &CommonArgs, snapshot_id: &str) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([
        snapshot::SUBCOMMAND,
        snapshot::DELETE,
        snapshot_id,
        snapshot::UNSAFE_IGNORE_SOURCE,
    ]);
    cmd
}

pub fn snapshot_expire(base: &CommonArgs, root_id: &str, delete: bool) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([snapshot::SUBCOMMAND, snapshot::EXPIRE, root_id]);
    if delete {
        cmd.append_loggable([common::DELETE]);
    }
    cmd
}

pub fn snapshot_gc(base: &CommonArgs) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([snapshot::SUBCOMMAND, snapshot::GC, common::DELETE]);
    cmd
}

pub fn snapshot_list_all(base: &CommonArgs) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([
        snapshot::SUBCOMMAND,
        snapshot::LIST,
        snapshot::ALL,
        snapshot::DELTA,
        snapshot::SHOW_IDENTICAL,
        common::JSON,
    ]);
    cmd
}

pub fn blob_list(base: &CommonArgs) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([blob::SUBCOMMAND, blob::LIST]);
    cmd
}

pub fn blob_stats(base: &CommonArgs) -> RedactedCommand {
    let mut cmd = common_args(base);
    cmd.append_loggable([blob::SUBCOMMAND, blob::STATS, common::RAW]);
    cmd
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
