//! Flag spellings consumed by the backup engine binary. The argv produced by
//! this crate is a contract with that binary, so every literal lives here.

pub const ENGINE_BINARY: &str = "kopia";

pub mod common {
    pub const LOG_LEVEL: &str = "--log-level";
    pub const CONFIG_FILE: &str = "--config-file";
    pub const LOG_DIR: &str = "--log-dir";
    pub const PASSWORD: &str = "--password";
    pub const NO_CHECK_FOR_UPDATES: &str = "--no-check-for-updates";
    pub const JSON: &str = "--json";
    pub const PARALLEL: &str = "--parallel";
    pub const DELETE: &str = "--delete";
    pub const RAW: &str = "--raw";
}

pub mod repository {
    pub const SUBCOMMAND: &str = "repository";
    pub const CREATE: &str = "create";
    pub const CONNECT: &str = "connect";
    pub const SERVER: &str = "server";
    pub const READONLY: &str = "--readonly";
    pub const CACHE_DIRECTORY: &str = "--cache-directory";
    pub const CONTENT_CACHE_SIZE_MB: &str = "--content-cache-size-mb";
    pub const METADATA_CACHE_SIZE_MB: &str = "--metadata-cache-size-mb";
    pub const OVERRIDE_HOSTNAME: &str = "--override-hostname";
    pub const OVERRIDE_USERNAME: &str = "--override-username";
    pub const POINT_IN_TIME: &str = "--point-in-time";
    pub const SERVER_URL: &str = "--url";
    pub const SERVER_CERT_FINGERPRINT: &str = "--server-cert-fingerprint";
}

pub mod s3 {
    pub const SUBCOMMAND: &str = "s3";
    pub const BUCKET: &str = "--bucket";
    pub const ENDPOINT: &str = "--endpoint";
    pub const DISABLE_TLS: &str = "--disable-tls";
    pub const ACCESS_KEY: &str = "--access-key";
    pub const SECRET_ACCESS_KEY: &str = "--secret-access-key";
    pub const SESSION_TOKEN: &str = "--session-token";
    pub const PREFIX: &str = "--prefix";
    pub const DISABLE_TLS_VERIFICATION: &str = "--disable-tls-verification";
    pub const REGION: &str = "--region";
}

pub mod azure {
    pub const SUBCOMMAND: &str = "azure";
    pub const CONTAINER: &str = "--container";
    pub const PREFIX: &str = "--prefix";
    pub const STORAGE_ACCOUNT: &str = "--storage-account";
    pub const STORAGE_KEY: &str = "--storage-key";
    pub const STORAGE_DOMAIN: &str = "--storage-domain";
}

pub mod gcs {
    pub const SUBCOMMAND: &str = "gcs";
    pub const BUCKET: &str = "--bucket";
    pub const CREDENTIALS_FILE: &str = "--credentials-file";
    pub const PREFIX: &str = "--prefix";
}

pub mod filesystem {
    pub const SUBCOMMAND: &str = "filesystem";
    pub const PATH: &str = "--path";
}

pub mod policy {
    pub const SUBCOMMAND: &str = "policy";
    pub const SET: &str = "set";
    pub const GLOBAL: &str = "--global";
    pub const KEEP_LATEST: &str = "--keep-latest";
    pub const KEEP_HOURLY: &str = "--keep-hourly";
    pub const KEEP_DAILY: &str = "--keep-daily";
    pub const KEEP_WEEKLY: &str = "--keep-weekly";
    pub const KEEP_MONTHLY: &str = "--keep-monthly";
    pub const KEEP_ANNUAL: &str = "--keep-annual";
    pub const COMPRESSION: &str = "--compression";
}

pub mod maintenance {
    pub const SUBCOMMAND: &str = "maintenance";
    pub const SET: &str = "set";
    pub const RUN: &str = "run";
    pub const OWNER: &str = "--owner";
}

pub mod snapshot {
    pub const SUBCOMMAND: &str = "snapshot";
    pub const CREATE: &str = "create";
    pub const RESTORE: &str = "restore";
    pub const DELETE: &str = "delete";
    pub const EXPIRE: &str = "expire";
    pub const GC: &str = "gc";
    pub const LIST: &str = "list";
    pub const TAGS: &str = "--tags";
    pub const PROGRESS_UPDATE_INTERVAL: &str = "--progress-update-interval";
    pub const UNSAFE_IGNORE_SOURCE: &str = "--unsafe-ignore-source";
    pub const IGNORE_PERMISSION_ERRORS: &str = "--ignore-permission-errors";
    pub const NO_IGNORE_PERMISSION_ERRORS: &str = "--no-ignore-permission-errors";
    pub const SPARSE: &str = "--sparse";
    pub const ALL: &str = "--all";
    pub const DELTA: &str = "--delta";
    pub const SHOW_IDENTICAL: &str = "--show-identical";
}

pub mod blob {
    pub const SUBCOMMAND: &str = "blob";
    pub const LIST: &str = "list";
    pub const STATS: &str = "stats";
}
