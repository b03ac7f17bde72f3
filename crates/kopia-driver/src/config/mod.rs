use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::command::Secret;
use crate::command::kopia::{CommonArgs, LogLevel, RepositoryCommandArgs};
use crate::error::{Error, Result};
use crate::executor::ExecTarget;
use crate::fingerprint;
use crate::poll::DEFAULT_MAX_BACKOFF;
use crate::repository::{RepositoryArgs, ServerArgs};
use crate::storage::{
    Backend, CredentialDescriptor, LocationDescriptor, SecretRef, StaticCredentialResolver,
};

pub mod duration;
pub mod settings;

pub use settings::{EnvSettings, Workload};

/// A loaded job file, after `extends` has been merged in.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("invalid config at '{path}': {e}")))?;
        Ok(Some(parsed))
    }
}

// Tables merge key by key; anything else in `overlay` replaces `base`.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(overlay_tbl)) => {
            for (k, v) in overlay_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn load_with_parents(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<Value> {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(key.clone()) {
        return Err(Error::config(format!(
            "config extends cycle at {}",
            key.display()
        )));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&text)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    let parent = value
        .as_table_mut()
        .and_then(|t| t.remove("extends"))
        .and_then(|v| v.as_str().map(str::to_owned));
    let mut out = match parent {
        Some(p) => {
            let p = PathBuf::from(p);
            let p = if p.is_absolute() {
                p
            } else {
                path.parent().unwrap_or_else(|| Path::new(".")).join(p)
            };
            load_with_parents(&p, seen)?
        }
        None => Value::Table(Default::default()),
    };
    merge(&mut out, value);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut seen = HashSet::new();
    let value = load_with_parents(path, &mut seen)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

fn resolve_env_ref(env_key: Option<&str>) -> Option<String> {
    env_key
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A literal wins over its `*_env` companion.
fn resolve_string_field(literal: Option<&str>, env_key: Option<&str>) -> Option<String> {
    literal
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| resolve_env_ref(env_key))
}

fn resolve_required(
    cfg_path: &str,
    literal: Option<&str>,
    env_key: Option<&str>,
) -> Result<String> {
    resolve_string_field(literal, env_key).ok_or_else(|| {
        if let Some(k) = env_key.map(str::trim).filter(|s| !s.is_empty()) {
            Error::config(format!("{cfg_path} is empty (also checked env var '{k}')"))
        } else {
            Error::config(format!("{cfg_path} is empty"))
        }
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TargetConfig {
    pub namespace: String,
    pub namespace_env: Option<String>,
    pub pod: String,
    pub pod_env: Option<String>,
    pub container: String,
    pub container_env: Option<String>,
}

fn default_log_level() -> String {
    "error".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub password: Option<String>,
    pub password_env: Option<String>,
    pub config_file: Option<String>,
    pub log_dir: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub cache_directory: Option<String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub artifact_prefix: String,
    pub namespace_uid: Option<String>,
    pub readonly: bool,
    pub restore_cache: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            password: None,
            password_env: None,
            config_file: None,
            log_dir: None,
            log_level: default_log_level(),
            cache_directory: None,
            hostname: None,
            username: None,
            artifact_prefix: String::new(),
            namespace_uid: None,
            readonly: false,
            restore_cache: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LocationConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub bucket: String,
    pub bucket_env: Option<String>,
    pub endpoint: Option<String>,
    pub endpoint_env: Option<String>,
    pub prefix: String,
    pub region: Option<String>,
    pub skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialConfig {
    KeyPair {
        id: Option<String>,
        id_env: Option<String>,
        secret: Option<String>,
        secret_env: Option<String>,
    },
    Secret {
        name: String,
        namespace: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub url_env: Option<String>,
    pub password: Option<String>,
    pub password_env: Option<String>,
    pub fingerprint: Option<String>,
    pub fingerprint_env: Option<String>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_cert_json: Option<String>,
    pub tls_cert_json_env: Option<String>,
    pub max_backoff_secs: Option<u64>,
}

/// Everything the binary needs to drive one repository.
#[derive(Debug, Clone, Default)]
pub struct JobConfig {
    pub target: TargetConfig,
    pub repository: RepositoryConfig,
    pub location: Option<LocationConfig>,
    pub credential: Option<CredentialConfig>,
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    pub server: Option<ServerConfig>,
}

impl JobConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(Self {
            target: doc.deserialize_path("target")?.unwrap_or_default(),
            repository: doc.deserialize_path("repository")?.unwrap_or_default(),
            location: doc.deserialize_path("location")?,
            credential: doc.deserialize_path("credential")?,
            secrets: doc.deserialize_path("secrets")?.unwrap_or_default(),
            server: doc.deserialize_path("server")?,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_doc(&load(path)?)
    }

    pub fn exec_target(&self) -> Result<ExecTarget> {
        let t = &self.target;
        Ok(ExecTarget {
            namespace: resolve_required(
                "target.namespace",
                Some(&t.namespace),
                t.namespace_env.as_deref(),
            )?,
            pod: resolve_required("target.pod", Some(&t.pod), t.pod_env.as_deref())?,
            container: resolve_required(
                "target.container",
                Some(&t.container),
                t.container_env.as_deref(),
            )?,
        })
    }

    pub fn credential_resolver(&self) -> StaticCredentialResolver {
        let mut r = StaticCredentialResolver::new();
        for (name, data) in &self.secrets {
            r.insert(name.clone(), data.clone());
        }
        r
    }

    fn common_args(&self, password: Option<String>) -> Result<CommonArgs> {
        let r = &self.repository;
        let log_level = match r.log_level.trim().to_ascii_lowercase().as_str() {
            "" | "error" => LogLevel::Error,
            "info" => LogLevel::Info,
            other => {
                return Err(Error::config(format!(
                    "repository.log_level must be 'error' or 'info', got '{other}'"
                )));
            }
        };
        Ok(CommonArgs {
            password: password.map(Secret::new),
            config_file: resolve_string_field(r.config_file.as_deref(), None),
            log_dir: resolve_string_field(r.log_dir.as_deref(), None),
            log_level,
        })
    }

    fn repository_command_args(&self, settings: &EnvSettings) -> RepositoryCommandArgs {
        let r = &self.repository;
        let workload = if r.restore_cache {
            Workload::Restore
        } else {
            Workload::General
        };
        let mut cache = settings.cache_for(workload);
        if let Some(dir) = resolve_string_field(r.cache_directory.as_deref(), None) {
            cache.directory = dir;
        }
        RepositoryCommandArgs {
            cache,
            hostname: resolve_string_field(r.hostname.as_deref(), None),
            username: resolve_string_field(r.username.as_deref(), None),
            readonly: r.readonly,
        }
    }

    pub fn location_descriptor(&self) -> Result<LocationDescriptor> {
        let l = self
            .location
            .as_ref()
            .ok_or_else(|| Error::config("missing [location] table"))?;
        let backend: Backend = l.kind.parse()?;
        let bucket = match backend {
            Backend::Filesystem => {
                resolve_string_field(Some(&l.bucket), l.bucket_env.as_deref()).unwrap_or_default()
            }
            _ => resolve_required("location.bucket", Some(&l.bucket), l.bucket_env.as_deref())?,
        };
        Ok(LocationDescriptor {
            backend,
            bucket,
            endpoint: resolve_string_field(l.endpoint.as_deref(), l.endpoint_env.as_deref())
                .unwrap_or_default(),
            prefix: l.prefix.trim().to_string(),
            region: resolve_string_field(l.region.as_deref(), None).unwrap_or_default(),
            skip_tls_verify: l.skip_tls_verify,
        })
    }

    pub fn credential_descriptor(&self) -> Result<Option<CredentialDescriptor>> {
        let Some(c) = &self.credential else {
            return Ok(None);
        };
        let d = match c {
            CredentialConfig::KeyPair {
                id,
                id_env,
                secret,
                secret_env,
            } => CredentialDescriptor::KeyPair {
                id: Secret::new(resolve_required(
                    "credential.id",
                    id.as_deref(),
                    id_env.as_deref(),
                )?),
                secret: Secret::new(resolve_required(
                    "credential.secret",
                    secret.as_deref(),
                    secret_env.as_deref(),
                )?),
            },
            CredentialConfig::Secret { name, namespace } => {
                CredentialDescriptor::ExternalSecretRef(SecretRef {
                    namespace: namespace.clone(),
                    name: resolve_required("credential.name", Some(name), None)?,
                })
            }
        };
        Ok(Some(d))
    }

    pub fn repository_args(&self, settings: &EnvSettings) -> Result<RepositoryArgs> {
        let r = &self.repository;
        let password = resolve_string_field(r.password.as_deref(), r.password_env.as_deref());
        Ok(RepositoryArgs {
            common: self.common_args(password)?,
            repo: self.repository_command_args(settings),
            location: self.location_descriptor()?,
            credential: self.credential_descriptor()?,
            artifact_prefix: r.artifact_prefix.trim().to_string(),
            point_in_time: None,
            namespace_uid: resolve_string_field(r.namespace_uid.as_deref(), None),
        })
    }

    pub fn server_args(&self, settings: &EnvSettings) -> Result<ServerArgs> {
        let s = self
            .server
            .as_ref()
            .ok_or_else(|| Error::config("missing [server] table"))?;
        let password = resolve_string_field(s.password.as_deref(), s.password_env.as_deref())
            .or_else(|| {
                let r = &self.repository;
                resolve_string_field(r.password.as_deref(), r.password_env.as_deref())
            });

        let cert_json =
            resolve_string_field(s.tls_cert_json.as_deref(), s.tls_cert_json_env.as_deref());
        let fingerprint = match (
            resolve_string_field(s.fingerprint.as_deref(), s.fingerprint_env.as_deref()),
            &s.tls_cert_file,
            cert_json,
        ) {
            (Some(fp), _, _) => fp,
            (None, Some(cert), _) => {
                let pem = fs::read_to_string(cert).map_err(|e| {
                    Error::config(format!("failed to read {}: {e}", cert.display()))
                })?;
                fingerprint::from_pem(&pem)?
            }
            (None, None, Some(json)) => fingerprint::from_certificate_json(&json)?,
            (None, None, None) => {
                return Err(Error::config(
                    "server.fingerprint, server.tls_cert_file or server.tls_cert_json is required",
                ));
            }
        };

        Ok(ServerArgs {
            common: self.common_args(password)?,
            repo: self.repository_command_args(settings),
            server_url: resolve_required("server.url", Some(&s.url), s.url_env.as_deref())?,
            fingerprint: Secret::new(fingerprint),
            max_backoff: s
                .max_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MAX_BACKOFF),
        })
    }
}
