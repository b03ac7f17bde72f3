use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use kopia_driver::command::kopia::LogLevel;
use kopia_driver::config::{EnvSettings, JobConfig};
use kopia_driver::error::ErrorKind;
use kopia_driver::storage::{Backend, CredentialDescriptor};

fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let p = dir.join(name);
    fs::write(&p, text).unwrap();
    p
}

const SERVER_CERT: &str = include_str!("fixtures/server.crt");
const SERVER_CERT_SHA256: &str =
    "22e0b7333020db0dd32b4db31a166b0f151baa9a14a890d3dd66017b3408e11a";

const BASE: &str = r#"
[target]
namespace = "kasten-io"
pod = "data-mover-0"
container = "mover"

[repository]
password = "repo-pass"
username = "k10-admin"
hostname = "cluster"
artifact_prefix = "my-prefix/"
namespace_uid = "ns-uid-1"

[location]
type = "s3"
bucket = "backups"
prefix = "base-prefix"
region = "us-east-1"
"#;

#[test]
fn extends_merges_tables_and_overrides_scalars() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "base.toml", BASE);
    let job_path = write(
        dir.path(),
        "job.toml",
        r#"
extends = "base.toml"

[repository]
log_level = "info"
readonly = true

[location]
prefix = "cluster-id"
endpoint = "http://minio.local:9000/"

[credential]
type = "key_pair"
id = "AKID"
secret = "SECRET"
"#,
    );

    let job = JobConfig::load(&job_path).unwrap();
    let target = job.exec_target().unwrap();
    assert_eq!(target.pod, "data-mover-0");

    let args = job.repository_args(&EnvSettings::default()).unwrap();
    assert_eq!(args.common.log_level, LogLevel::Info);
    assert_eq!(args.common.password.as_ref().map(|p| p.expose()), Some("repo-pass"));
    assert!(args.repo.readonly);
    assert_eq!(args.repo.username.as_deref(), Some("k10-admin"));
    assert_eq!(args.repo.cache.metadata_cache_mb, 500);
    assert_eq!(args.location.backend, Backend::S3);
    assert_eq!(args.location.prefix, "cluster-id");
    assert_eq!(args.location.region, "us-east-1");
    assert_eq!(args.artifact_prefix, "my-prefix/");
    assert_eq!(args.namespace_uid.as_deref(), Some("ns-uid-1"));
    assert!(matches!(args.credential, Some(CredentialDescriptor::KeyPair { .. })));
}

#[test]
fn restore_cache_uses_restore_sizes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "base.toml", BASE);
    let job_path = write(
        dir.path(),
        "job.toml",
        "extends = \"base.toml\"\n[repository]\nrestore_cache = true\n",
    );
    let settings = EnvSettings::from_lookup(|k| match k {
        "DATA_STORE_RESTORE_CONTENT_CACHE_SIZE_MB" => Some("1024".into()),
        _ => None,
    });
    let args = JobConfig::load(&job_path)
        .unwrap()
        .repository_args(&settings)
        .unwrap();
    assert_eq!(args.repo.cache.content_cache_mb, 1024);
}

#[test]
fn extends_cycle_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.toml", "extends = \"b.toml\"\n");
    let b = write(dir.path(), "b.toml", "extends = \"a.toml\"\n");
    let err = JobConfig::load(&b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("cycle"), "unexpected err: {err}");
}

#[test]
fn missing_bucket_is_reported_by_path() {
    let dir = tempfile::tempdir().unwrap();
    let p = write(
        dir.path(),
        "job.toml",
        "[location]\ntype = \"gcs\"\nbucket_env = \"KOPIA_DRIVER_TEST_UNSET_BUCKET\"\n",
    );
    let err = JobConfig::load(&p)
        .unwrap()
        .location_descriptor()
        .unwrap_err()
        .to_string();
    assert!(err.contains("location.bucket is empty"), "unexpected err: {err}");
    assert!(err.contains("KOPIA_DRIVER_TEST_UNSET_BUCKET"), "unexpected err: {err}");
}

#[test]
fn server_fingerprint_from_certificate_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tls.crt", SERVER_CERT);
    let p = write(
        dir.path(),
        "job.toml",
        r#"
[repository]
password = "repo-pass"

[server]
url = "https://repo-server:51515"
password = "server-user-pass"
tls_cert_file = "TLS_PATH"
max_backoff_secs = 30
"#
        .replace("TLS_PATH", &dir.path().join("tls.crt").display().to_string())
        .as_str(),
    );

    let args = JobConfig::load(&p)
        .unwrap()
        .server_args(&EnvSettings::default())
        .unwrap();
    assert_eq!(args.fingerprint.expose(), SERVER_CERT_SHA256);
    assert_eq!(
        args.common.password.as_ref().map(|p| p.expose()),
        Some("server-user-pass")
    );
    assert_eq!(args.max_backoff, Duration::from_secs(30));
}

#[test]
fn server_fingerprint_from_certificate_json() {
    let dir = tempfile::tempdir().unwrap();
    let secret = serde_json::json!({ "tls.crt": STANDARD.encode(SERVER_CERT) }).to_string();
    let job = format!("[server]\nurl = \"https://s:1\"\ntls_cert_json = '{secret}'\n");
    let p = write(dir.path(), "job.toml", &job);
    let args = JobConfig::load(&p)
        .unwrap()
        .server_args(&EnvSettings::default())
        .unwrap();
    assert_eq!(args.fingerprint.expose(), SERVER_CERT_SHA256);
}

#[test]
fn server_rejects_a_non_certificate_file() {
    let dir = tempfile::tempdir().unwrap();
    let cert = write(
        dir.path(),
        "tls.crt",
        "-----BEGIN CERTIFICATE-----\naGVsbG8gd29ybGQ=\n-----END CERTIFICATE-----\n",
    );
    let p = write(
        dir.path(),
        "job.toml",
        "[server]\nurl = \"https://s:1\"\ntls_cert_file = \"TLS_PATH\"\n"
            .replace("TLS_PATH", &cert.display().to_string())
            .as_str(),
    );
    let err = JobConfig::load(&p)
        .unwrap()
        .server_args(&EnvSettings::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("X509"), "unexpected err: {err}");
}

#[test]
fn server_requires_a_fingerprint_source() {
    let dir = tempfile::tempdir().unwrap();
    let p = write(dir.path(), "job.toml", "[server]\nurl = \"https://s:1\"\n");
    let err = JobConfig::load(&p)
        .unwrap()
        .server_args(&EnvSettings::default())
        .unwrap_err()
        .to_string();
    assert!(err.contains("fingerprint"), "unexpected err: {err}");
}
