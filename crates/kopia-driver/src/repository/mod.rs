//! Repository bootstrap against the backup engine.
//!
//! Nothing is kept between calls; each operation re-derives its command from
//! the arguments. `connect_or_create` tolerates several workers racing to
//! initialise the same repository path: a failed create is followed by one
//! more connect, on the assumption that a competing worker won.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::classify::{ClassifiedError, EngineErrorKind};
use crate::command::RedactedCommand;
use crate::command::kopia::{self, CommonArgs, RepositoryCommandArgs};
use crate::error::{Error, ErrorKind, Result};
use crate::executor::{ExecOutput, ExecTarget, PodExec};
use crate::output_log::log_output;
use crate::storage::{
    CredentialDescriptor, CredentialResolver, LocationDescriptor, resolve_credential, storage_args,
};

mod server;

pub use server::{ServerArgs, UNABLE_TO_GET_REPO_PARAMS};

pub const CONNECT_FAILED: &str = "Failed to connect to the backup repository";
pub const CREATE_FAILED: &str = "Failed to create the backup repository";
pub const SET_POLICY_FAILED: &str = "Failed to set global policy";

#[derive(Debug, Clone)]
pub struct RepositoryArgs {
    pub common: CommonArgs,
    pub repo: RepositoryCommandArgs,
    pub location: LocationDescriptor,
    pub credential: Option<CredentialDescriptor>,
    pub artifact_prefix: String,
    /// Connect only. Ignored by create.
    pub point_in_time: Option<DateTime<Utc>>,
    /// Falls back to a lookup through the exec collaborator when unset.
    pub namespace_uid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOrigin {
    Connected,
    Created,
    /// Connected after a failed create, i.e. another worker created it.
    ConnectedAfterRace,
}

/// Marks a usable repository session. The session itself lives in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    origin: HandleOrigin,
}

impl RepositoryHandle {
    pub fn origin(&self) -> HandleOrigin {
        self.origin
    }
}

pub struct RepositoryClient {
    exec: Arc<dyn PodExec>,
    resolver: Arc<dyn CredentialResolver>,
    target: ExecTarget,
}

impl RepositoryClient {
    pub fn new(
        exec: Arc<dyn PodExec>,
        resolver: Arc<dyn CredentialResolver>,
        target: ExecTarget,
    ) -> Self {
        Self {
            exec,
            resolver,
            target,
        }
    }

    pub fn target(&self) -> &ExecTarget {
        &self.target
    }

    /// Backend arguments, with credentials resolved only for this call.
    pub fn storage_fragment(&self, args: &RepositoryArgs) -> Result<RedactedCommand> {
        let credential = args
            .credential
            .as_ref()
            .map(|c| resolve_credential(c, self.resolver.as_ref()))
            .transpose()
            .map_err(|e| e.context("failed to resolve storage credentials"))?;
        storage_args(&args.location, credential.as_ref(), &args.artifact_prefix).map_err(|e| {
            e.context(format!(
                "failed to build {} storage arguments",
                args.location.backend
            ))
        })
    }

    pub fn create_command(&self, args: &RepositoryArgs) -> Result<RedactedCommand> {
        let storage = self.storage_fragment(args)?;
        Ok(kopia::repository_create(&args.common, &args.repo, &storage))
    }

    pub fn connect_command(&self, args: &RepositoryArgs) -> Result<RedactedCommand> {
        let storage = self.storage_fragment(args)?;
        Ok(kopia::repository_connect(
            &args.common,
            &args.repo,
            &storage,
            args.point_in_time,
        ))
    }

    pub(crate) fn run(&self, cmd: &RedactedCommand) -> ExecOutput {
        debug!(command = %cmd, pod = %self.target.pod, "running engine command");
        let out = self.exec.exec(&self.target, &cmd.render_argv());
        log_output(&self.target, "stdout", &out.stdout);
        log_output(&self.target, "stderr", &out.stderr);
        out
    }

    /// Creates the repository, then applies the global retention policy and
    /// the maintenance owner. Only the owner step may fail without failing
    /// the create.
    pub fn create(&self, args: &RepositoryArgs) -> Result<RepositoryHandle> {
        let cmd = self.create_command(args)?;
        let out = self.run(&cmd);
        if let Err(err) = out.result {
            return Err(classified(Some(&err), &out.stderr).context(CREATE_FAILED));
        }
        info!(location = %args.location.backend, "backup repository created");

        let out = self.run(&kopia::policy_set_global(&args.common));
        if let Err(err) = out.result {
            return Err(classified(Some(&err), &out.stderr).context(SET_POLICY_FAILED));
        }

        if let Err(e) = self.set_maintenance_owner(args) {
            warn!(
                "Failed to set custom kopia maintenance owner, proceeding with default owner: {e}"
            );
        }
        Ok(RepositoryHandle {
            origin: HandleOrigin::Created,
        })
    }

    fn set_maintenance_owner(&self, args: &RepositoryArgs) -> Result<()> {
        let uid = match args
            .namespace_uid
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(uid) => uid.to_string(),
            None => self.exec.namespace_uid(&self.target.namespace)?,
        };
        let owner = maintenance_owner(args.repo.username.as_deref().unwrap_or_default(), &uid);
        let out = self.run(&kopia::maintenance_set_owner(&args.common, &owner));
        match out.result {
            Ok(()) => Ok(()),
            Err(err) => Err(classified(Some(&err), &out.stderr)),
        }
    }

    pub fn connect(&self, args: &RepositoryArgs) -> Result<RepositoryHandle> {
        self.connect_as(args, HandleOrigin::Connected)
    }

    fn connect_as(&self, args: &RepositoryArgs, origin: HandleOrigin) -> Result<RepositoryHandle> {
        let cmd = self.connect_command(args)?;
        let out = self.run(&cmd);
        match out.result {
            Ok(()) => Ok(RepositoryHandle { origin }),
            Err(err) => Err(classified(Some(&err), &out.stderr).context(CONNECT_FAILED)),
        }
    }

    /// Connect, else create, else connect once more.
    ///
    /// A wrong password or unusable configuration is returned straight from
    /// the first connect: creating under the same path would not help and
    /// could shadow the real repository.
    pub fn connect_or_create(&self, args: &RepositoryArgs) -> Result<RepositoryHandle> {
        let connect_err = match self.connect(args) {
            Ok(h) => return Ok(h),
            Err(e) => e,
        };
        if connect_err.has_kind(ErrorKind::Engine(EngineErrorKind::InvalidPassword))
            || connect_err.kind() == ErrorKind::Config
        {
            return Err(connect_err);
        }
        debug!("connect failed, trying create: {connect_err}");

        let create_err = match self.create(args) {
            Ok(h) => return Ok(h),
            Err(e) => e,
        };
        debug!("create failed, retrying connect: {create_err}");

        match self.connect_as(args, HandleOrigin::ConnectedAfterRace) {
            Ok(h) => {
                info!("connected to repository created by another worker");
                Ok(h)
            }
            Err(retry_err) => Err(create_err.append(retry_err)),
        }
    }
}

/// `<username>@<namespace uid>-maintenance`
pub fn maintenance_owner(username: &str, namespace_uid: &str) -> String {
    format!("{username}@{namespace_uid}-maintenance")
}

fn classified(err: Option<&Error>, stderr: &str) -> Error {
    let msg = err.map(ToString::to_string);
    ClassifiedError::new(msg.as_deref(), stderr).into()
}
