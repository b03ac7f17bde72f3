use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::command::RedactedCommand;
use crate::error::{Error, Result};

pub mod backends;
pub mod credentials;

pub use backends::{azure_args, azure_blob_domain, filesystem_args, gcs_args, s3_args};
pub use credentials::{
    CredentialDescriptor, CredentialResolver, ResolvedCredential, SecretRef,
    StaticCredentialResolver, resolve_credential,
};

/// Path of the GCS service account file inside the engine container.
pub const GCS_CREDENTIALS_FILE: &str = "/tmp/creds.txt";
/// Mount point of filesystem-backed repositories inside the engine container.
pub const FS_MOUNT_ROOT: &str = "/mnt/data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Filesystem,
    S3,
    Gcs,
    Azure,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Azure => "azure",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "filestore" | "fs" => Ok(Self::Filesystem),
            "s3" | "s3compliant" | "s3-compliant" => Ok(Self::S3),
            "gcs" => Ok(Self::Gcs),
            "azure" => Ok(Self::Azure),
            other => Err(Error::config(format!("unsupported location type: '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationDescriptor {
    pub backend: Backend,
    pub bucket: String,
    pub endpoint: String,
    pub prefix: String,
    pub region: String,
    pub skip_tls_verify: bool,
}

impl LocationDescriptor {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            bucket: String::new(),
            endpoint: String::new(),
            prefix: String::new(),
            region: String::new(),
            skip_tls_verify: false,
        }
    }
}

/// Joins the location prefix and the artifact prefix into the repository
/// path. A non-empty location prefix yields a cleaned path with a trailing
/// `/`; an empty one returns `artifact_prefix` untouched.
pub fn compose_repo_prefix(location_prefix: &str, artifact_prefix: &str) -> String {
    if location_prefix.is_empty() {
        return artifact_prefix.to_string();
    }
    let joined = clean_path(&format!("{location_prefix}/{artifact_prefix}"));
    if joined.is_empty() || joined.ends_with('/') {
        joined
    } else {
        format!("{joined}/")
    }
}

// Lexical cleanup: collapses repeated separators and resolves `.`/`..`.
fn clean_path(p: &str) -> String {
    let rooted = p.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|l| *l != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let body = parts.join("/");
    if rooted { format!("/{body}") } else { body }
}

/// Builds the backend-specific part of a `repository create|connect` command.
pub fn storage_args(
    location: &LocationDescriptor,
    credential: Option<&ResolvedCredential>,
    artifact_prefix: &str,
) -> Result<RedactedCommand> {
    match location.backend {
        Backend::Filesystem => Ok(filesystem_args(location, artifact_prefix)),
        Backend::S3 => s3_args(location, credential, artifact_prefix),
        Backend::Gcs => Ok(gcs_args(location, artifact_prefix)),
        Backend::Azure => azure_args(location, credential, artifact_prefix),
    }
}
