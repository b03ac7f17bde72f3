use std::time::Duration;

use tracing::info;

use super::{HandleOrigin, RepositoryClient, RepositoryHandle, classified};
use crate::command::Secret;
use crate::command::kopia::{self, CommonArgs, RepositoryCommandArgs};
use crate::error::{ErrorKind, Result};
use crate::executor::{CancelToken, exec_cancellable};
use crate::output_log::log_output;
use crate::poll::{Attempt, Backoff, DEFAULT_MAX_BACKOFF, poll_with_backoff};

/// Printed by the engine while the API server is still starting up.
pub const UNABLE_TO_GET_REPO_PARAMS: &str = "unable to get repository parameters";
const CONNECT_SERVER_FAILED: &str = "Failed to connect to the backup repository server";

#[derive(Debug, Clone)]
pub struct ServerArgs {
    /// The password here is the server user's password.
    pub common: CommonArgs,
    pub repo: RepositoryCommandArgs,
    pub server_url: String,
    pub fingerprint: Secret,
    pub max_backoff: Duration,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            common: CommonArgs::default(),
            repo: RepositoryCommandArgs::default(),
            server_url: String::new(),
            fingerprint: Secret::default(),
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RepositoryClient {
    /// Connects to a repository API server, retrying while the server reports
    /// that it cannot load repository parameters yet. Any other failure ends
    /// the poll. `cancel` interrupts both the wait between attempts and an
    /// attempt that is still running.
    pub fn connect_to_server(
        &self,
        args: &ServerArgs,
        cancel: &CancelToken,
    ) -> Result<RepositoryHandle> {
        let cmd = kopia::repository_connect_server(
            &args.common,
            &args.repo,
            &args.server_url,
            &args.fingerprint,
        );
        let argv = cmd.render_argv();

        poll_with_backoff(cancel, Backoff::with_cap(args.max_backoff), |attempt| {
            tracing::debug!(attempt, command = %cmd, "connecting to repository server");
            let run = exec_cancellable(self.exec.clone(), &self.target, argv.clone(), cancel);
            let out = match run {
                Ok(out) => out,
                Err(e) if e.kind() == ErrorKind::Cancelled => {
                    return Attempt::Abort(e.context("Context done while polling"));
                }
                Err(e) => return Attempt::Abort(e.context(CONNECT_SERVER_FAILED)),
            };
            log_output(&self.target, "stdout", &out.stdout);
            log_output(&self.target, "stderr", &out.stderr);

            match out.result {
                Ok(()) => Attempt::Done(()),
                Err(err) => {
                    let transient = err.to_string().contains(UNABLE_TO_GET_REPO_PARAMS)
                        || out.stderr.contains(UNABLE_TO_GET_REPO_PARAMS);
                    let err = classified(Some(&err), &out.stderr).context(CONNECT_SERVER_FAILED);
                    if transient {
                        Attempt::Retry(err)
                    } else {
                        Attempt::Abort(err)
                    }
                }
            }
        })?;

        info!(server = %args.server_url, "connected to repository server");
        Ok(RepositoryHandle {
            origin: HandleOrigin::Connected,
        })
    }
}
