//! Batch orchestration.
//!
//! `sync` runs a batch of jobs between two endpoints: path conventions
//! are probed once per endpoint, then each job is normalized (strip
//! detection, strategy selection, container creation) and handed to the
//! tree descent, which makes the per-entry skip/transfer/delete
//! decisions.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, trace};

use crate::endpoint::{rstat, Endpoint};
use crate::error::{is_delete_transient, is_mkdir_transient, EndpointErrorKind, SyncError};
use crate::filter::{FilterSpec, Matcher};
use crate::model::{
    format_elapsed, umask_mode, EntryStats, PathConvention, SyncJob, SyncOptions, SyncState,
    FULL_ACCESS,
};
use crate::retry::{retry, RETRY_ATTEMPTS, RETRY_BASE_DELAY};
use crate::strategy::TransferStrategy;
use crate::walk::{walk, DirVisit, Visitor};

/// Run a batch of jobs and log a summary line when done.
pub async fn sync(
    source: &dyn Endpoint,
    dest: &dyn Endpoint,
    jobs: &[SyncJob],
    options: &SyncOptions,
) -> Result<(), SyncError> {
    let state = SyncState::new();
    let result = sync_with_state(source, dest, jobs, options, &state).await;
    if !options.silent {
        let files = state.files();
        let folders = state.folders();
        let elapsed = format_elapsed(state.elapsed());
        match &result {
            Ok(()) => info!(
                "processed {files} files and {folders} folders ({}) in {elapsed}",
                files + folders
            ),
            Err(err) => {
                info!("failed after {files} files and {folders} folders in {elapsed}: {err}")
            }
        }
    }
    result
}

/// Like [`sync`] but counting into a caller-owned [`SyncState`], with no
/// summary line.
pub async fn sync_with_state(
    source: &dyn Endpoint,
    dest: &dyn Endpoint,
    jobs: &[SyncJob],
    options: &SyncOptions,
    state: &SyncState,
) -> Result<(), SyncError> {
    let src_conv = PathConvention::from_probe(&source.realpath(".").await?);
    let dst_conv = PathConvention::from_probe(&dest.realpath(".").await?);

    for job in jobs {
        let opts = match &job.overrides {
            Some(overrides) => options.merged(overrides),
            None => options.clone(),
        };

        // a trailing separator on the source implies strip
        let mut src_path = job.source.clone();
        let trailing = src_path.len() > 1 && src_path.ends_with(src_conv.separator());
        let strip = opts.strip.unwrap_or(trailing);
        while src_path.len() > 1 && src_path.ends_with(src_conv.separator()) {
            src_path.pop();
        }

        let strategy = match opts.protocol {
            Some(strategy) => strategy,
            None => TransferStrategy::select(source, dest)?,
        };

        let filter = compile_filter(opts.filter.as_ref())?;
        let files = compile_filter(opts.files.as_ref())?;
        let dirs = compile_filter(opts.dirs.as_ref())?;

        let ctx = JobContext {
            source,
            dest,
            src_conv,
            dst_conv,
            strategy,
            strip,
            opts,
            state,
            filter,
            files,
            dirs,
        };
        sync_job(&ctx, src_path, job.dest.clone(), job.recursive).await?;
    }
    Ok(())
}

fn compile_filter(spec: Option<&FilterSpec>) -> Result<Option<Matcher>, SyncError> {
    spec.map(FilterSpec::compile).transpose()
}

/// Everything a job's descent needs, resolved once up front.
struct JobContext<'a> {
    source: &'a dyn Endpoint,
    dest: &'a dyn Endpoint,
    src_conv: PathConvention,
    dst_conv: PathConvention,
    strategy: TransferStrategy,
    strip: bool,
    opts: SyncOptions,
    state: &'a SyncState,
    filter: Option<Matcher>,
    files: Option<Matcher>,
    dirs: Option<Matcher>,
}

async fn sync_job(
    ctx: &JobContext<'_>,
    src_path: String,
    dst_path: String,
    recursive: bool,
) -> Result<(), SyncError> {
    // only the OS-local side of the pair may go through the cygpath shim
    let shim_on_source = ctx.strategy != TransferStrategy::Download;

    let (src_path, src_stats) =
        assert_path_exists(ctx.source, &src_path, ctx.opts.cygpath && shim_on_source).await?;

    let shim_on_dest = ctx.opts.cygpath && !shim_on_source;
    let dst_path = if ctx.strip {
        match assert_path_exists(ctx.dest, &dst_path, shim_on_dest).await {
            Ok((resolved, _)) => resolved,
            // a missing stripped destination is created during descent
            Err(err) if err.is_not_found() && recursive && src_stats.is_dir() => dst_path,
            Err(err) => return Err(err),
        }
    } else {
        let parent = ctx.dst_conv.dirname(&dst_path);
        let (parent, _) = assert_path_exists(ctx.dest, &parent, shim_on_dest).await?;
        ctx.dst_conv.join(&parent, ctx.dst_conv.basename(&dst_path))
    };

    // The container directory is created up front on a best-effort
    // basis: an SFTP failure status cannot be told apart from "already
    // exists", so real problems surface when the descent re-checks the
    // directory.
    if !ctx.strip && recursive && src_stats.is_dir() {
        let _ = retry(is_mkdir_transient, RETRY_ATTEMPTS, RETRY_BASE_DELAY, || {
            ctx.dest.mkdir(&dst_path, ctx.opts.mode)
        })
        .await;
    }

    sync_entry(ctx, &src_path, dst_path, recursive).await
}

/// Stat `path`, optionally re-resolving it through `cygpath -w` when the
/// plain stat fails. Returns the path that worked.
async fn assert_path_exists(
    endpoint: &dyn Endpoint,
    path: &str,
    cygpath: bool,
) -> Result<(String, EntryStats), SyncError> {
    match endpoint.stat(path).await {
        Ok(stats) => Ok((path.to_string(), stats)),
        Err(err) if cygpath => {
            trace!("retrying stat of {path} through cygpath");
            let output = tokio::process::Command::new("cygpath")
                .arg("-w")
                .arg(path)
                .output()
                .await;
            let translated = match output {
                Ok(out) if out.status.success() => {
                    String::from_utf8_lossy(&out.stdout).trim().to_string()
                }
                _ => return Err(err),
            };
            let stats = endpoint.stat(&translated).await?;
            Ok((translated, stats))
        }
        Err(err) => Err(err),
    }
}

async fn sync_entry(
    ctx: &JobContext<'_>,
    src_path: &str,
    mut dst_path: String,
    recursive: bool,
) -> Result<(), SyncError> {
    let src = rstat(ctx.source, src_path).await?;
    let src_path = src.resolved_path.as_str();
    let src_is_dir = src.stats.is_dir();

    let dst_probe = match rstat(ctx.dest, &dst_path).await {
        Ok(resolved) => Some(resolved),
        Err(err) if err.is_not_found() => None,
        Err(err) => return Err(err),
    };

    // Resolve the effective destination and its metadata. Without strip
    // the job copies INTO the destination, so the source basename is
    // appended when the destination is a directory.
    let dst_state: Option<(EntryStats, bool)> = if ctx.strip {
        match dst_probe {
            Some(resolved) => {
                let is_dir = resolved.stats.is_dir();
                Some((resolved.stats, is_dir))
            }
            None if src_is_dir && recursive => {
                retry(is_mkdir_transient, RETRY_ATTEMPTS, RETRY_BASE_DELAY, || {
                    ctx.dest.mkdir(&dst_path, ctx.opts.mode)
                })
                .await?;
                let resolved = rstat(ctx.dest, &dst_path).await?;
                let is_dir = resolved.stats.is_dir();
                Some((resolved.stats, is_dir))
            }
            None => None,
        }
    } else {
        match dst_probe {
            None => {
                return Err(SyncError::endpoint(
                    dst_path,
                    EndpointErrorKind::NotFound,
                    "no such file or directory",
                ))
            }
            Some(resolved) if !resolved.stats.is_dir() => Some((resolved.link_stats, false)),
            Some(_) => {
                dst_path = ctx.dst_conv.join(&dst_path, ctx.src_conv.basename(src_path));
                match rstat(ctx.dest, &dst_path).await {
                    Ok(resolved) => {
                        let is_dir = resolved.stats.is_dir();
                        Some((resolved.link_stats, is_dir))
                    }
                    Err(err) if err.is_not_found() => None,
                    Err(err) => return Err(err),
                }
            }
        }
    };

    let dst_is_dir = dst_state.as_ref().map(|(_, is_dir)| *is_dir);

    if src_is_dir {
        if !recursive {
            return Err(SyncError::RecursionRequired {
                path: src_path.to_string(),
            });
        }
        if dst_is_dir == Some(false) {
            return Err(SyncError::TypeMismatch {
                source: src_path.to_string(),
                dest: dst_path,
                source_is_dir: true,
            });
        }
    } else if dst_is_dir == Some(true) {
        return Err(SyncError::TypeMismatch {
            source: src_path.to_string(),
            dest: dst_path,
            source_is_dir: false,
        });
    }

    // file over an existing file: transfer directly, no tree walk
    if let Some((dst_stats, false)) = &dst_state {
        return upload_file(ctx, src_path, &src.stats, &dst_path, Some(dst_stats)).await;
    }

    let visitor = TreeVisitor {
        ctx,
        src_root: src_path.to_string(),
        dst_root: dst_path,
    };
    walk(ctx.source, src_path, ctx.src_conv, &visitor, ctx.opts.limit).await
}

struct TreeVisitor<'a> {
    ctx: &'a JobContext<'a>,
    src_root: String,
    dst_root: String,
}

impl TreeVisitor<'_> {
    /// Job-relative portion of a source path (empty for the root).
    fn relative<'p>(&self, path: &'p str) -> &'p str {
        if path.len() <= self.src_root.len() + 1 {
            ""
        } else {
            &path[self.src_root.len() + 1..]
        }
    }

    fn dest_for(&self, relative: &str) -> String {
        if relative.is_empty() {
            return self.dst_root.clone();
        }
        let mut out = self.dst_root.clone();
        for segment in relative.split(self.ctx.src_conv.separator()) {
            out = self.ctx.dst_conv.join(&out, segment);
        }
        out
    }
}

/// Reject source paths with a segment containing the destination's
/// separator; they cannot be represented on the other side.
fn validate_segments(
    path: &str,
    src_conv: PathConvention,
    dst_conv: PathConvention,
) -> Result<(), SyncError> {
    let src_sep = src_conv.separator();
    let dst_sep = dst_conv.separator();
    if src_sep == dst_sep {
        return Ok(());
    }
    for segment in path.split(src_sep) {
        if segment.contains(dst_sep) {
            return Err(SyncError::SeparatorClash {
                path: path.to_string(),
                separator: dst_sep,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl Visitor for TreeVisitor<'_> {
    async fn file(&self, path: &str, stats: &EntryStats) -> Result<(), SyncError> {
        let ctx = self.ctx;
        ctx.state.add_file();

        let relative = self.relative(path);
        // a bare file root counts as depth 1
        let depth = relative.split(ctx.src_conv.separator()).count();
        if ctx.opts.mindepth > 0 && depth < ctx.opts.mindepth {
            trace!("skipping {path} [mindepth]");
            return Ok(());
        }

        // an unrepresentable name is fatal even for entries the
        // predicates below would skip
        validate_segments(path, ctx.src_conv, ctx.dst_conv)?;

        if !ctx.opts.dot && ctx.src_conv.is_dot_entry(relative) {
            trace!("skipping {path} [dot]");
            return Ok(());
        }
        if let Some(filter) = &ctx.filter {
            if !filter.is_match(relative) {
                trace!("skipping {path} [filter]");
                return Ok(());
            }
        }
        if let Some(files) = &ctx.files {
            if !files.is_match(relative) {
                trace!("skipping {path} [files]");
                return Ok(());
            }
        }

        let dst_path = self.dest_for(relative);
        match rstat(ctx.dest, &dst_path).await {
            Ok(resolved) if resolved.link_stats.is_dir() => Err(SyncError::TypeMismatch {
                source: path.to_string(),
                dest: dst_path,
                source_is_dir: false,
            }),
            Ok(resolved) => {
                upload_file(ctx, path, stats, &dst_path, Some(&resolved.link_stats)).await
            }
            Err(err) if err.is_not_found() => upload_file(ctx, path, stats, &dst_path, None).await,
            Err(err) => Err(err),
        }
    }

    async fn enter_dir(
        &self,
        path: &str,
        stats: &EntryStats,
        mut children: Vec<String>,
    ) -> Result<DirVisit, SyncError> {
        let ctx = self.ctx;
        let relative = self.relative(path);
        let src_sep = ctx.src_conv.separator();
        let depth = if relative.is_empty() {
            0
        } else {
            relative.split(src_sep).count()
        };

        // job roots do not count
        if depth != 0 {
            ctx.state.add_folder();
        }

        if let Some(maxdepth) = ctx.opts.maxdepth {
            if depth > maxdepth {
                trace!("skipping {path} [maxdepth]");
                return Ok(DirVisit::Prune);
            }
        }

        validate_segments(path, ctx.src_conv, ctx.dst_conv)?;

        if depth != 0 {
            if !ctx.opts.dot && ctx.src_conv.is_dot_entry(relative) {
                trace!("skipping {path} [dot]");
                return Ok(DirVisit::Prune);
            }
            if let Some(filter) = &ctx.filter {
                if !filter.is_match(relative) {
                    trace!("skipping {path} [filter]");
                    return Ok(DirVisit::Prune);
                }
            }
            if let Some(dirs) = &ctx.dirs {
                if !dirs.is_match(relative) {
                    trace!("skipping {path} [dirs]");
                    return Ok(DirVisit::Prune);
                }
            }
        }

        // Drop children that can never transfer, so that emptiness and
        // mirror deletes see the surviving set.
        if ctx.filter.is_some() || !ctx.opts.dot {
            let prefix = if relative.is_empty() {
                String::new()
            } else {
                format!("{relative}{src_sep}")
            };
            children.retain(|name| {
                let child_relative = format!("{prefix}{name}");
                if !ctx.opts.dot && name.starts_with('.') {
                    trace!("skipping {child_relative} [dot]");
                    return false;
                }
                if let Some(filter) = &ctx.filter {
                    if !filter.is_match(&child_relative) {
                        trace!("skipping {child_relative} [filter]");
                        return false;
                    }
                }
                true
            });
        }

        // at the bound the directory itself is still created, but
        // nothing below it transfers
        if ctx.opts.maxdepth == Some(depth) {
            children.clear();
        }

        if !ctx.opts.empty_dirs && children.is_empty() {
            trace!("skipping {path} [empty]");
            return Ok(DirVisit::Prune);
        }

        children.sort();

        // the destination directory must exist before any child runs
        let dst_dir = self.dest_for(relative);
        match ctx.dest.stat(&dst_dir).await {
            Ok(existing) if existing.is_dir() => {}
            Ok(_) => {
                return Err(SyncError::TypeMismatch {
                    source: path.to_string(),
                    dest: dst_dir,
                    source_is_dir: true,
                })
            }
            Err(err) if err.is_not_found() => {
                let mode = ctx.opts.mode.or_else(|| {
                    umask_mode(
                        &dst_dir,
                        ctx.dst_conv,
                        stats.mode.unwrap_or(FULL_ACCESS),
                        None,
                        true,
                    )
                });
                debug!("creating folder {dst_dir}");
                retry(is_mkdir_transient, RETRY_ATTEMPTS, RETRY_BASE_DELAY, || {
                    ctx.dest.mkdir(&dst_dir, mode)
                })
                .await?;
            }
            Err(err) => return Err(err),
        }

        Ok(DirVisit::Descend(children))
    }

    async fn leave_dir(
        &self,
        path: &str,
        children: &[String],
        pruned: bool,
    ) -> Result<(), SyncError> {
        let ctx = self.ctx;
        if !ctx.opts.delete || pruned {
            return Ok(());
        }

        // mirror pass: destination entries with no synced source
        // counterpart go away, strictly one at a time. Entries the job's
        // own exclusions would have skipped are not extraneous.
        let relative = self.relative(path);
        let prefix = if relative.is_empty() {
            String::new()
        } else {
            format!("{relative}{}", ctx.src_conv.separator())
        };
        let dst_dir = self.dest_for(relative);
        for name in ctx.dest.read_dir(&dst_dir).await? {
            if children.iter().any(|child| child == &name) {
                continue;
            }
            if !ctx.opts.dot && name.starts_with('.') {
                continue;
            }
            if let Some(filter) = &ctx.filter {
                if !filter.is_match(&format!("{prefix}{name}")) {
                    continue;
                }
            }
            let extraneous = ctx.dst_conv.join(&dst_dir, &name);
            debug!("deleting {extraneous} [mirror]");
            remove_tree(ctx.dest, ctx.dst_conv, &extraneous, !ctx.opts.force).await?;
        }
        Ok(())
    }
}

/// Decide whether one file transfers, then run the transfer and restore
/// its timestamps from the source.
async fn upload_file(
    ctx: &JobContext<'_>,
    src_path: &str,
    src_stats: &EntryStats,
    dst_path: &str,
    dst_stats: Option<&EntryStats>,
) -> Result<(), SyncError> {
    validate_segments(src_path, ctx.src_conv, ctx.dst_conv)?;

    if ctx.opts.existing && dst_stats.is_none() {
        trace!("skipping {src_path} [existing]");
        return Ok(());
    }
    if ctx.opts.ignore_existing && dst_stats.is_some() {
        trace!("skipping {src_path} [ignore-existing]");
        return Ok(());
    }

    if let Some(dst) = dst_stats {
        if ctx.opts.check_new && src_stats.mtime <= dst.mtime {
            trace!("skipping {src_path} [check-new]");
            return Ok(());
        }
        if ctx.opts.size_only && src_stats.size == dst.size {
            trace!("skipping {src_path} [size-only]");
            return Ok(());
        }
        if !ctx.opts.ignore_times && src_stats.size == dst.size {
            let mut modified = src_stats.mtime != dst.mtime;
            if modified && ctx.opts.modify_window > 0 {
                modified = (src_stats.mtime - dst.mtime).abs() > ctx.opts.modify_window;
            }
            if !modified {
                trace!("skipping {src_path} [up to date]");
                return Ok(());
            }
        }
    }

    let mode = ctx.opts.mode.or_else(|| {
        umask_mode(
            dst_path,
            ctx.dst_conv,
            src_stats.mode.unwrap_or(0o666),
            dst_stats.and_then(|s| s.mode),
            false,
        )
    });

    debug!("uploading {src_path} to {dst_path}");
    ctx.strategy
        .transfer(ctx.source, ctx.dest, src_path, dst_path, mode)
        .await?;
    // timestamps always follow the source so the next run compares equal
    ctx.dest
        .set_times(dst_path, src_stats.atime, src_stats.mtime)
        .await?;
    debug!("uploaded {src_path} to {dst_path}");
    Ok(())
}

/// Recursively delete `path`. With `keep_nonempty` the contents of
/// directories are left alone, so a populated directory fails with
/// `NotEmpty` once the retries run out.
pub fn remove_tree<'a>(
    endpoint: &'a dyn Endpoint,
    convention: PathConvention,
    path: &'a str,
    keep_nonempty: bool,
) -> BoxFuture<'a, Result<(), SyncError>> {
    Box::pin(async move {
        let stats = match endpoint.lstat(path).await {
            Ok(stats) => stats,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };

        if !stats.is_dir() {
            debug!("deleting file {path}");
            return retry(is_delete_transient, RETRY_ATTEMPTS, RETRY_BASE_DELAY, || {
                endpoint.unlink(path)
            })
            .await;
        }

        if !keep_nonempty {
            for name in endpoint.read_dir(path).await? {
                let child = convention.join(path, &name);
                remove_tree(endpoint, convention, &child, keep_nonempty).await?;
            }
        }

        debug!("deleting folder {path}");
        retry(is_delete_transient, RETRY_ATTEMPTS, RETRY_BASE_DELAY, || {
            endpoint.rmdir(path)
        })
        .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::LocalEndpoint;
    use crate::model::EntryKind;

    #[test]
    fn test_validate_segments_mixed_conventions() {
        assert!(validate_segments(
            "/home/u/plain.txt",
            PathConvention::Posix,
            PathConvention::Windows
        )
        .is_ok());
        let err = validate_segments(
            "/home/u/back\\slash.txt",
            PathConvention::Posix,
            PathConvention::Windows,
        )
        .expect_err("clash");
        assert!(matches!(err, SyncError::SeparatorClash { separator: '\\', .. }));
    }

    #[test]
    fn test_validate_segments_same_convention_is_noop() {
        assert!(validate_segments(
            "/odd\\name/file",
            PathConvention::Posix,
            PathConvention::Posix
        )
        .is_ok());
    }

    // A clashing name must abort the job even when the dot rule or a
    // filter would otherwise have skipped the entry silently.
    #[tokio::test]
    async fn test_separator_clash_wins_over_skip_predicates() {
        let local = LocalEndpoint::new();
        let mut opts = SyncOptions::new();
        opts.dot = false;
        opts.filter = Some(FilterSpec::globs(["**/*.txt"]));
        let state = SyncState::new();
        let ctx = JobContext {
            source: &local,
            dest: &local,
            src_conv: PathConvention::Posix,
            dst_conv: PathConvention::Windows,
            strategy: TransferStrategy::Pipe,
            strip: true,
            filter: compile_filter(opts.filter.as_ref()).expect("filter"),
            files: None,
            dirs: None,
            opts,
            state: &state,
        };
        let visitor = TreeVisitor {
            ctx: &ctx,
            src_root: "/src".to_string(),
            dst_root: "C:\\dst".to_string(),
        };
        let stats = EntryStats {
            kind: EntryKind::File,
            size: 0,
            mtime: 0,
            atime: 0,
            mode: None,
        };

        let err = visitor
            .file("/src/.env\\prod", &stats)
            .await
            .expect_err("dot-excluded clash");
        assert!(matches!(err, SyncError::SeparatorClash { separator: '\\', .. }));

        let err = visitor
            .file("/src/logs\\old.dat", &stats)
            .await
            .expect_err("filter-excluded clash");
        assert!(matches!(err, SyncError::SeparatorClash { separator: '\\', .. }));
    }
}
