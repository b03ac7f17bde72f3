use kopia_driver::command::Secret;
use kopia_driver::error::ErrorClass;
use kopia_driver::storage::{
    Backend, LocationDescriptor, ResolvedCredential, compose_repo_prefix, storage_args,
};

fn key_pair() -> ResolvedCredential {
    ResolvedCredential::KeyPair {
        id: Secret::new("id-1"),
        secret: Secret::new("secret-1"),
    }
}

fn location(backend: Backend, prefix: &str) -> LocationDescriptor {
    LocationDescriptor {
        bucket: "bucket-1".into(),
        prefix: prefix.into(),
        ..LocationDescriptor::new(backend)
    }
}

fn prefix_flag(argv: &[String]) -> Option<&str> {
    argv.iter()
        .find_map(|a| a.strip_prefix("--prefix="))
}

#[test]
fn s3_prefix_joins_location_and_artifact() {
    assert_eq!(compose_repo_prefix("cluster-id", "my-prefix/"), "cluster-id/my-prefix/");
    let cmd = storage_args(
        &location(Backend::S3, "cluster-id"),
        Some(&key_pair()),
        "my-prefix/",
    )
    .unwrap();
    assert_eq!(prefix_flag(&cmd.render_argv()), Some("cluster-id/my-prefix/"));
}

#[test]
fn empty_location_prefix_keeps_artifact_prefix() {
    for artifact in ["my-prefix/", "my-prefix", ""] {
        let cmd = storage_args(&location(Backend::S3, ""), Some(&key_pair()), artifact).unwrap();
        assert_eq!(prefix_flag(&cmd.render_argv()), Some(artifact));
    }
}

#[test]
fn every_backend_builds_its_subcommand() {
    let azure = ResolvedCredential::Azure {
        storage_account: Secret::new("acct"),
        storage_key: Secret::new("key"),
        environment: Some("AzureGermanCloud".into()),
    };
    let cases = [
        (Backend::S3, Some(key_pair()), "s3"),
        (Backend::Gcs, None, "gcs"),
        (Backend::Azure, Some(azure), "azure"),
        (Backend::Filesystem, None, "filesystem"),
    ];
    for (backend, cred, sub) in cases {
        let cmd = storage_args(&location(backend, "p"), cred.as_ref(), "a/").unwrap();
        assert_eq!(cmd.render_argv()[0], sub);
    }
}

#[test]
fn azure_named_cloud_adds_domain_last() {
    let cred = ResolvedCredential::Azure {
        storage_account: Secret::new("acct"),
        storage_key: Secret::new("key"),
        environment: Some("azurechinacloud".into()),
    };
    let cmd = storage_args(&location(Backend::Azure, "p"), Some(&cred), "a/").unwrap();
    assert_eq!(
        cmd.render_log(),
        "azure --container=bucket-1 --prefix=p/a/ --storage-account=<****> \
         --storage-key=<****> --storage-domain=blob.core.chinacloudapi.cn"
    );
}

#[test]
fn azure_unknown_cloud_is_an_error() {
    let cred = ResolvedCredential::Azure {
        storage_account: Secret::new("acct"),
        storage_key: Secret::new("key"),
        environment: Some("AzureMoonCloud".into()),
    };
    let err = storage_args(&location(Backend::Azure, "p"), Some(&cred), "a/").unwrap_err();
    assert!(
        err.to_string().contains("unknown azure cloud environment"),
        "unexpected err: {err}"
    );
}

#[test]
fn unsupported_credentials_are_configuration_errors() {
    let err = storage_args(&location(Backend::S3, ""), None, "a/").unwrap_err();
    assert!(err.to_string().contains("unsupported credential type"), "unexpected err: {err}");
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(!err.class().is_retryable());

    let aws = ResolvedCredential::Aws {
        access_key_id: Secret::new("a"),
        secret_access_key: Secret::new("b"),
        session_token: None,
    };
    let err = storage_args(&location(Backend::Azure, ""), Some(&aws), "a/").unwrap_err();
    assert!(err.to_string().contains("unsupported credential type"), "unexpected err: {err}");
}

#[test]
fn unsupported_location_type() {
    let err = "webdav".parse::<Backend>().unwrap_err();
    assert!(err.to_string().contains("unsupported location type"), "unexpected err: {err}");
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[test]
fn filesystem_path_under_mount_root() {
    let cmd = storage_args(&location(Backend::Filesystem, "test-prefix"), None, "dir/subdir/")
        .unwrap();
    assert_eq!(
        cmd.render_argv(),
        vec!["filesystem", "--path=/mnt/data/test-prefix/dir/subdir/"]
    );
}
