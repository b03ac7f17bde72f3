use super::credentials::ResolvedCredential;
use super::{FS_MOUNT_ROOT, GCS_CREDENTIALS_FILE, LocationDescriptor, compose_repo_prefix};
use crate::command::RedactedCommand;
use crate::command::flags::{azure, filesystem, gcs, s3};
use crate::error::{Error, Result};

const AZURE_PUBLIC_CLOUD: &str = "AzurePublicCloud";
const AZURE_ENVIRONMENTS: &[(&str, &str)] = &[
    (AZURE_PUBLIC_CLOUD, "core.windows.net"),
    ("AzureChinaCloud", "core.chinacloudapi.cn"),
    ("AzureUSGovernmentCloud", "core.usgovcloudapi.net"),
    ("AzureGermanCloud", "core.cloudapi.de"),
];

pub fn s3_args(
    location: &LocationDescriptor,
    credential: Option<&ResolvedCredential>,
    artifact_prefix: &str,
) -> Result<RedactedCommand> {
    let (access_key, secret_key, session_token) = match credential {
        Some(ResolvedCredential::KeyPair { id, secret }) => (id, secret, None),
        Some(ResolvedCredential::Aws {
            access_key_id,
            secret_access_key,
            session_token,
        }) => (access_key_id, secret_access_key, session_token.as_ref()),
        _ => {
            return Err(Error::config(
                "unsupported credential type for s3 location",
            ));
        }
    };

    let mut cmd = RedactedCommand::new();
    cmd.append_loggable([s3::SUBCOMMAND])
        .append_loggable_kv(s3::BUCKET, location.bucket.as_str());

    let endpoint = location.endpoint.trim();
    if !endpoint.is_empty() {
        cmd.append_loggable_kv(s3::ENDPOINT, strip_endpoint_scheme(endpoint));
        if endpoint.starts_with("http:") {
            cmd.append_loggable([s3::DISABLE_TLS]);
        }
    }

    cmd.append_redacted_kv(s3::ACCESS_KEY, access_key.expose())
        .append_redacted_kv(s3::SECRET_ACCESS_KEY, secret_key.expose());
    if let Some(token) = session_token.filter(|t| !t.is_empty()) {
        cmd.append_redacted_kv(s3::SESSION_TOKEN, token.expose());
    }

    cmd.append_loggable_kv(
        s3::PREFIX,
        compose_repo_prefix(&location.prefix, artifact_prefix),
    );
    if location.skip_tls_verify {
        cmd.append_loggable([s3::DISABLE_TLS_VERIFICATION]);
    }
    let region = location.region.trim();
    if !region.is_empty() {
        cmd.append_loggable_kv(s3::REGION, region);
    }
    Ok(cmd)
}

// "https://minio.local:9000/" -> "minio.local:9000"
fn strip_endpoint_scheme(endpoint: &str) -> &str {
    let host = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    host.trim_end_matches('/')
}

pub fn azure_args(
    location: &LocationDescriptor,
    credential: Option<&ResolvedCredential>,
    artifact_prefix: &str,
) -> Result<RedactedCommand> {
    let (account, key, environment) = match credential {
        Some(ResolvedCredential::KeyPair { id, secret }) => (id, secret, None),
        Some(ResolvedCredential::Azure {
            storage_account,
            storage_key,
            environment,
        }) => (storage_account, storage_key, environment.as_deref()),
        _ => {
            return Err(Error::config(
                "unsupported credential type for azure location",
            ));
        }
    };

    let mut cmd = RedactedCommand::new();
    cmd.append_loggable([azure::SUBCOMMAND])
        .append_loggable_kv(azure::CONTAINER, location.bucket.as_str())
        .append_loggable_kv(
            azure::PREFIX,
            compose_repo_prefix(&location.prefix, artifact_prefix),
        )
        .append_redacted_kv(azure::STORAGE_ACCOUNT, account.expose())
        .append_redacted_kv(azure::STORAGE_KEY, key.expose());

    if let Some(domain) = azure_blob_domain(environment.unwrap_or_default())? {
        cmd.append_loggable_kv(azure::STORAGE_DOMAIN, domain);
    }
    Ok(cmd)
}

/// Storage domain for a named Azure cloud. The public cloud, or no name at
/// all, needs no domain override. Names match case-insensitively.
pub fn azure_blob_domain(environment: &str) -> Result<Option<String>> {
    let environment = environment.trim();
    if environment.is_empty() || environment.eq_ignore_ascii_case(AZURE_PUBLIC_CLOUD) {
        return Ok(None);
    }
    AZURE_ENVIRONMENTS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(environment))
        .map(|(_, suffix)| Some(format!("blob.{suffix}")))
        .ok_or_else(|| Error::config(format!("unknown azure cloud environment '{environment}'")))
}

pub fn gcs_args(location: &LocationDescriptor, artifact_prefix: &str) -> RedactedCommand {
    let mut cmd = RedactedCommand::new();
    cmd.append_loggable([gcs::SUBCOMMAND])
        .append_loggable_kv(gcs::BUCKET, location.bucket.as_str())
        .append_loggable_kv(gcs::CREDENTIALS_FILE, GCS_CREDENTIALS_FILE)
        .append_loggable_kv(
            gcs::PREFIX,
            compose_repo_prefix(&location.prefix, artifact_prefix),
        );
    cmd
}

pub fn filesystem_args(location: &LocationDescriptor, artifact_prefix: &str) -> RedactedCommand {
    let repo_path = compose_repo_prefix(&location.prefix, artifact_prefix);
    let mut cmd = RedactedCommand::new();
    cmd.append_loggable([filesystem::SUBCOMMAND]).append_loggable_kv(
        filesystem::PATH,
        format!("{FS_MOUNT_ROOT}/{}", repo_path.trim_start_matches('/')),
    );
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Secret;
    use crate::storage::Backend;

    fn aws(token: Option<&str>) -> ResolvedCredential {
        ResolvedCredential::Aws {
            access_key_id: Secret::new("AKID"),
            secret_access_key: Secret::new("SECRET"),
            session_token: token.map(Secret::new),
        }
    }

    #[test]
    fn s3_full_argument_order() {
        let loc = LocationDescriptor {
            bucket: "backups".into(),
            endpoint: "http://minio.local:9000//".into(),
            prefix: "cluster-id".into(),
            region: "us-east-1".into(),
            skip_tls_verify: true,
            ..LocationDescriptor::new(Backend::S3)
        };
        let cmd = s3_args(&loc, Some(&aws(Some("TOKEN"))), "my-prefix/").unwrap();
        assert_eq!(
            cmd.render_log(),
            "s3 --bucket=backups --endpoint=minio.local:9000 --disable-tls \
             --access-key=<****> --secret-access-key=<****> --session-token=<****> \
             --prefix=cluster-id/my-prefix/ --disable-tls-verification --region=us-east-1"
        );
        let argv = cmd.render_argv();
        assert!(argv.contains(&"--access-key=AKID".to_string()));
        assert!(argv.contains(&"--session-token=TOKEN".to_string()));
    }

    #[test]
    fn s3_https_endpoint_keeps_tls() {
        let loc = LocationDescriptor {
            bucket: "b".into(),
            endpoint: "https://s3.example.com/".into(),
            ..LocationDescriptor::new(Backend::S3)
        };
        let log = s3_args(&loc, Some(&aws(None)), "p/").unwrap().render_log();
        assert!(log.contains("--endpoint=s3.example.com "), "log: {log}");
        assert!(!log.contains("--disable-tls"), "log: {log}");
        assert!(!log.contains("--session-token"), "log: {log}");
    }

    #[test]
    fn azure_without_environment_has_no_domain() {
        let loc = LocationDescriptor {
            bucket: "container".into(),
            ..LocationDescriptor::new(Backend::Azure)
        };
        let cred = ResolvedCredential::KeyPair {
            id: Secret::new("acct"),
            secret: Secret::new("key"),
        };
        let cmd = azure_args(&loc, Some(&cred), "x/").unwrap();
        assert_eq!(
            cmd.render_log(),
            "azure --container=container --prefix=x/ --storage-account=<****> --storage-key=<****>"
        );
    }

    #[test]
    fn azure_domains() {
        assert_eq!(azure_blob_domain("").unwrap(), None);
        assert_eq!(azure_blob_domain("azurepubliccloud").unwrap(), None);
        assert_eq!(
            azure_blob_domain("AzureUSGovernmentCloud").unwrap().as_deref(),
            Some("blob.core.usgovcloudapi.net")
        );
        let err = azure_blob_domain("MarsCloud").unwrap_err().to_string();
        assert!(err.contains("unknown azure cloud environment"), "unexpected err: {err}");
    }

    #[test]
    fn gcs_and_filesystem() {
        let loc = LocationDescriptor {
            bucket: "gbucket".into(),
            prefix: "test-prefix".into(),
            ..LocationDescriptor::new(Backend::Gcs)
        };
        assert_eq!(
            gcs_args(&loc, "dir/subdir/").render_log(),
            "gcs --bucket=gbucket --credentials-file=/tmp/creds.txt --prefix=test-prefix/dir/subdir/"
        );
        assert_eq!(
            filesystem_args(&loc, "dir/subdir/").render_log(),
            "filesystem --path=/mnt/data/test-prefix/dir/subdir/"
        );
    }
}
