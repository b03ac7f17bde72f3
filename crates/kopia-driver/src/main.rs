use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use kopia_driver::command::kopia;
use kopia_driver::config::{EnvSettings, JobConfig};
use kopia_driver::executor::{CancelToken, KubectlExec};
use kopia_driver::repository::RepositoryClient;
use kopia_driver::{Error, Result, output};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlanOp {
    Connect,
    Create,
    ConnectServer,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ParseKind {
    Progress,
    Restore,
    BlobStats,
    Snapshot,
    SnapshotList,
    Errors,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the redacted engine command a job would run
    Plan {
        /// Path to a job TOML
        job: PathBuf,
        #[arg(value_enum)]
        op: PlanOp,
    },
    /// Connect to the repository, optionally creating it
    Connect {
        /// Path to a job TOML
        job: PathBuf,
        /// Open the repository as of this RFC3339 timestamp
        #[arg(long)]
        point_in_time: Option<String>,
        /// Create the repository when it cannot be connected
        #[arg(long)]
        create: bool,
    },
    /// Create the repository
    Create {
        /// Path to a job TOML
        job: PathBuf,
    },
    /// Connect through a repository API server
    ConnectServer {
        /// Path to a job TOML
        job: PathBuf,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    /// Parse captured engine output and print it as JSON
    Parse {
        #[arg(value_enum)]
        kind: ParseKind,
        /// Input file (stdin when omitted)
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();
    init_tracing(args.log_format);

    match args.cmd {
        Command::Plan { job, op } => cmd_plan(&job, op),
        Command::Connect {
            job,
            point_in_time,
            create,
        } => cmd_connect(&job, point_in_time.as_deref(), create),
        Command::Create { job } => cmd_create(&job),
        Command::ConnectServer { job, timeout_secs } => cmd_connect_server(&job, timeout_secs),
        Command::Parse { kind, file } => cmd_parse(kind, file.as_deref()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn client_for(job: &JobConfig, cancel: Option<CancelToken>) -> Result<RepositoryClient> {
    let mut exec = KubectlExec::default();
    if let Some(c) = cancel {
        exec = exec.with_cancel(c);
    }
    Ok(RepositoryClient::new(
        Arc::new(exec),
        Arc::new(job.credential_resolver()),
        job.exec_target()?,
    ))
}

fn cmd_plan(path: &Path, op: PlanOp) -> Result<()> {
    let job = JobConfig::load(path)?;
    let settings = EnvSettings::from_env();
    let cmd = match op {
        PlanOp::Connect | PlanOp::Create => {
            let client = client_for(&job, None)?;
            let args = job.repository_args(&settings)?;
            if matches!(op, PlanOp::Create) {
                client.create_command(&args)?
            } else {
                client.connect_command(&args)?
            }
        }
        PlanOp::ConnectServer => {
            let args = job.server_args(&settings)?;
            kopia::repository_connect_server(
                &args.common,
                &args.repo,
                &args.server_url,
                &args.fingerprint,
            )
        }
    };
    println!("{cmd}");
    Ok(())
}

fn cmd_connect(path: &Path, point_in_time: Option<&str>, create: bool) -> Result<()> {
    let job = JobConfig::load(path)?;
    let mut args = job.repository_args(&EnvSettings::from_env())?;
    if let Some(raw) = point_in_time {
        let pit = DateTime::parse_from_rfc3339(raw.trim())
            .map_err(|e| Error::config(format!("invalid --point-in-time '{raw}': {e}")))?;
        args.point_in_time = Some(pit.with_timezone(&Utc));
    }
    let client = client_for(&job, None)?;
    let handle = if create {
        client.connect_or_create(&args)?
    } else {
        client.connect(&args)?
    };
    println!("ok ({:?})", handle.origin());
    Ok(())
}

fn cmd_create(path: &Path) -> Result<()> {
    let job = JobConfig::load(path)?;
    let args = job.repository_args(&EnvSettings::from_env())?;
    client_for(&job, None)?.create(&args)?;
    println!("ok");
    Ok(())
}

fn cmd_connect_server(path: &Path, timeout_secs: u64) -> Result<()> {
    let job = JobConfig::load(path)?;
    let args = job.server_args(&EnvSettings::from_env())?;
    let cancel = CancelToken::with_timeout(Duration::from_secs(timeout_secs));
    client_for(&job, Some(cancel.clone()))?.connect_to_server(&args, &cancel)?;
    println!("ok");
    Ok(())
}

fn cmd_parse(kind: ParseKind, file: Option<&Path>) -> Result<()> {
    let text = match file {
        Some(p) => std::fs::read_to_string(p)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", p.display())))?,
        None => {
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s)?;
            s
        }
    };

    match kind {
        ParseKind::Progress => print_json(&output::snapshot_stats_from_output(&text, false)),
        ParseKind::Restore => print_json(&output::restore_stats_from_output(&text)),
        ParseKind::BlobStats => print_json(&output::parse_blob_stats(&text)?),
        ParseKind::Snapshot => print_json(&output::parse_snapshot_create_output(&text, "")?),
        ParseKind::SnapshotList => print_json(&output::snapshot_size_stats(&text)?),
        ParseKind::Errors => print_json(&output::extract_errors(&text)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
