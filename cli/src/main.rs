//! treesync - command-line interface for the tree synchronization engine.
//!
//! With no remote target both sides of every job are the local
//! filesystem. With a `user@host` target the local side uploads by
//! default; `--download` flips the direction.

use anyhow::bail;
use clap::Parser;

use engine::model::DEFAULT_LIMIT;
use engine::{parse_mode, FilterSpec, LocalEndpoint, SyncJob, SyncOptions};
use sftp::{SftpConfig, SftpEndpoint};

/// One-way directory tree synchronization, local or over SFTP
#[derive(Parser, Debug)]
#[command(name = "treesync")]
#[command(version = "0.1.0")]
#[command(about = "Synchronize directory trees between local and SFTP endpoints")]
struct Args {
    /// Remote endpoint as USER@HOST[:PORT]; omit for local-to-local
    target: Option<String>,

    /// Transfer from the remote to the local side
    #[arg(long)]
    download: bool,

    /// Port used when the target carries none
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Password authentication
    #[arg(long)]
    password: Option<String>,

    /// Private key file; takes precedence over --password
    #[arg(long, value_name = "FILE")]
    private_key: Option<String>,

    /// Passphrase for the private key
    #[arg(long)]
    passphrase: Option<String>,

    /// Accepted server key (SHA256 fingerprint or base64 key); may repeat
    #[arg(long = "fingerprint", value_name = "FP")]
    fingerprints: Vec<String>,

    /// Job as SOURCE,DEST[,recursive]; may repeat
    #[arg(long = "sync", value_name = "SPEC", required = true)]
    sync: Vec<String>,

    /// Delete destination entries absent from the source
    #[arg(long)]
    delete: bool,

    /// Allow deleting non-empty extraneous directories
    #[arg(long)]
    force: bool,

    /// Skip dotfiles and dot-directories
    #[arg(long)]
    no_dot: bool,

    /// Do not create directories that end up empty
    #[arg(long)]
    no_empty_dirs: bool,

    /// Only transfer files that already exist at the destination
    #[arg(long)]
    existing: bool,

    /// Never touch files that already exist at the destination
    #[arg(long)]
    ignore_existing: bool,

    /// Skip files whose source mtime is not strictly newer
    #[arg(long)]
    check_new: bool,

    /// Skip on equal size alone
    #[arg(long)]
    size_only: bool,

    /// Transfer even when size and mtime match
    #[arg(long)]
    ignore_times: bool,

    /// Tolerance in seconds for mtime comparison
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    modify_window: i64,

    /// Permissions for created entries: octal or rwxr-xr-x form
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,

    /// Minimum depth for transferred files
    #[arg(long, value_name = "N", default_value_t = 0)]
    mindepth: usize,

    /// Maximum descent depth
    #[arg(long, value_name = "N")]
    maxdepth: Option<usize>,

    /// Glob applied to every relative path; may repeat
    #[arg(long, value_name = "GLOB")]
    filter: Vec<String>,

    /// Regex applied to every relative path (overrides --filter)
    #[arg(long, value_name = "REGEX")]
    filter_regex: Option<String>,

    /// Glob applied to files only; may repeat
    #[arg(long, value_name = "GLOB")]
    files: Vec<String>,

    /// Glob applied to directories only; may repeat
    #[arg(long, value_name = "GLOB")]
    dirs: Vec<String>,

    /// Bound on concurrent per-directory operations
    #[arg(long, value_name = "N", default_value_t = DEFAULT_LIMIT)]
    limit: usize,

    /// Use destination paths literally instead of nesting under the
    /// source basename
    #[arg(long)]
    strip: bool,

    /// Re-resolve local paths through cygpath -w when a stat fails
    #[arg(long)]
    cygpath: bool,

    /// Suppress the summary line
    #[arg(long, short = 'q')]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = run(&args).await {
        eprintln!("Error: {err}");
        std::process::exit(2);
    }
}

/// Main CLI logic - separated for testability
async fn run(args: &Args) -> anyhow::Result<()> {
    let options = build_options(args)?;
    let jobs = args
        .sync
        .iter()
        .map(|spec| parse_sync_spec(spec))
        .collect::<anyhow::Result<Vec<SyncJob>>>()?;

    let local = LocalEndpoint::new();
    let Some(target) = args.target.as_deref() else {
        engine::sync(&local, &local, &jobs, &options).await?;
        return Ok(());
    };

    let (user, host) = parse_target(target)?;
    let config = SftpConfig {
        host,
        port: args.port,
        user,
        password: args.password.clone(),
        private_key: args.private_key.clone(),
        passphrase: args.passphrase.clone(),
        fingerprints: if args.fingerprints.is_empty() {
            None
        } else {
            Some(args.fingerprints.clone())
        },
    };
    let remote = SftpEndpoint::connect(&config).await?;

    if args.download {
        engine::sync(&remote, &local, &jobs, &options).await?;
    } else {
        engine::sync(&local, &remote, &jobs, &options).await?;
    }
    Ok(())
}

fn parse_target(target: &str) -> anyhow::Result<(String, String)> {
    match target.split_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() => {
            Ok((user.to_string(), host.to_string()))
        }
        _ => bail!("expected USER@HOST[:PORT], got '{target}'"),
    }
}

fn parse_sync_spec(spec: &str) -> anyhow::Result<SyncJob> {
    let parts: Vec<&str> = spec.split(',').collect();
    match parts.as_slice() {
        [source, dest] if !source.is_empty() && !dest.is_empty() => {
            Ok(SyncJob::new(*source, *dest, false))
        }
        [source, dest, recursive]
            if !source.is_empty()
                && !dest.is_empty()
                && matches!(*recursive, "r" | "recursive" | "true") =>
        {
            Ok(SyncJob::new(*source, *dest, true))
        }
        _ => bail!("invalid sync spec '{spec}', expected SOURCE,DEST[,recursive]"),
    }
}

fn build_options(args: &Args) -> anyhow::Result<SyncOptions> {
    let mut opts = SyncOptions::new();
    opts.dot = !args.no_dot;
    opts.empty_dirs = !args.no_empty_dirs;
    opts.existing = args.existing;
    opts.ignore_existing = args.ignore_existing;
    opts.check_new = args.check_new;
    opts.size_only = args.size_only;
    opts.ignore_times = args.ignore_times;
    opts.modify_window = args.modify_window;
    opts.delete = args.delete;
    opts.force = args.force;
    opts.mindepth = args.mindepth;
    opts.maxdepth = args.maxdepth;
    opts.limit = args.limit;
    opts.silent = args.quiet;
    opts.cygpath = args.cygpath;
    if args.strip {
        opts.strip = Some(true);
    }
    if let Some(mode) = &args.mode {
        opts.mode = Some(parse_mode(mode)?);
    }

    opts.filter = if let Some(regex) = &args.filter_regex {
        Some(FilterSpec::regex(regex))
    } else if !args.filter.is_empty() {
        Some(FilterSpec::globs(args.filter.clone()))
    } else {
        None
    };
    if !args.files.is_empty() {
        opts.files = Some(FilterSpec::globs(args.files.clone()));
    }
    if !args.dirs.is_empty() {
        opts.dirs = Some(FilterSpec::globs(args.dirs.clone()));
    }

    Ok(opts)
}
