use std::collections::BTreeMap;

use crate::command::Secret;
use crate::error::{Error, Result};

pub const AWS_ACCESS_KEY_ID: &str = "aws_access_key_id";
pub const AWS_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
pub const AWS_SESSION_TOKEN: &str = "aws_session_token";
pub const AZURE_STORAGE_ACCOUNT_ID: &str = "azure_storage_account_id";
pub const AZURE_STORAGE_KEY: &str = "azure_storage_key";
pub const AZURE_STORAGE_ENVIRONMENT: &str = "azure_storage_environment";

/// Opaque handle to credentials held elsewhere (for example a Kubernetes Secret).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialDescriptor {
    KeyPair { id: Secret, secret: Secret },
    ExternalSecretRef(SecretRef),
}

/// Concrete credential values. Only built while arguments are being assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedCredential {
    KeyPair {
        id: Secret,
        secret: Secret,
    },
    Aws {
        access_key_id: Secret,
        secret_access_key: Secret,
        session_token: Option<Secret>,
    },
    Azure {
        storage_account: Secret,
        storage_key: Secret,
        environment: Option<String>,
    },
}

pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, secret: &SecretRef) -> Result<ResolvedCredential>;
}

pub fn resolve_credential(
    descriptor: &CredentialDescriptor,
    resolver: &dyn CredentialResolver,
) -> Result<ResolvedCredential> {
    match descriptor {
        CredentialDescriptor::KeyPair { id, secret } => Ok(ResolvedCredential::KeyPair {
            id: id.clone(),
            secret: secret.clone(),
        }),
        CredentialDescriptor::ExternalSecretRef(r) => resolver.resolve(r),
    }
}

/// Resolver over secret data known up front, keyed by secret name.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    secrets: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: BTreeMap<String, String>) {
        self.secrets.insert(name.into(), data);
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, secret: &SecretRef) -> Result<ResolvedCredential> {
        let data = self
            .secrets
            .get(&secret.name)
            .ok_or_else(|| Error::config(format!("secret '{}' not found", secret.name)))?;
        credential_from_secret_data(&secret.name, data)
    }
}

/// Interprets secret data as AWS or Azure credentials, by key.
pub fn credential_from_secret_data(
    name: &str,
    data: &BTreeMap<String, String>,
) -> Result<ResolvedCredential> {
    let get = |k: &str| {
        data.get(k)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(ToOwned::to_owned)
    };
    let required = |k: &str| {
        get(k).ok_or_else(|| Error::config(format!("secret '{name}' is missing '{k}'")))
    };

    if data.contains_key(AWS_ACCESS_KEY_ID) || data.contains_key(AWS_SECRET_ACCESS_KEY) {
        return Ok(ResolvedCredential::Aws {
            access_key_id: Secret::new(required(AWS_ACCESS_KEY_ID)?),
            secret_access_key: Secret::new(required(AWS_SECRET_ACCESS_KEY)?),
            session_token: get(AWS_SESSION_TOKEN).map(Secret::new),
        });
    }
    if data.contains_key(AZURE_STORAGE_ACCOUNT_ID) || data.contains_key(AZURE_STORAGE_KEY) {
        return Ok(ResolvedCredential::Azure {
            storage_account: Secret::new(required(AZURE_STORAGE_ACCOUNT_ID)?),
            storage_key: Secret::new(required(AZURE_STORAGE_KEY)?),
            environment: get(AZURE_STORAGE_ENVIRONMENT),
        });
    }
    Err(Error::config(format!(
        "unsupported credential type in secret '{name}'"
    )))
}
