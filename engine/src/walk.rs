//! Depth-first tree traversal over an endpoint.
//!
//! The walker is typed by `lstat`, so symlinked directories are handed
//! to the file visitor rather than descended into. The visitor controls
//! descent: `enter_dir` returns the (possibly filtered and reordered)
//! child list to keep, or a prune decision. `leave_dir` runs strictly
//! after all kept children have been visited.
//!
//! Plain entries inside one directory are visited concurrently up to
//! `limit`; directories recurse sequentially in the visitor-returned
//! order.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};

use crate::endpoint::Endpoint;
use crate::error::SyncError;
use crate::model::{EntryStats, PathConvention};

/// Decision returned by `enter_dir`.
#[derive(Debug)]
pub enum DirVisit {
    /// Descend into these children, in this order.
    Descend(Vec<String>),
    /// Skip the subtree entirely.
    Prune,
}

/// Visitor protocol driven by [`walk`].
#[async_trait]
pub trait Visitor: Sync {
    /// Called once per non-directory entry.
    async fn file(&self, path: &str, stats: &EntryStats) -> Result<(), SyncError>;

    /// Called before descending into a directory, with its raw child
    /// names.
    async fn enter_dir(
        &self,
        path: &str,
        stats: &EntryStats,
        children: Vec<String>,
    ) -> Result<DirVisit, SyncError>;

    /// Called after the directory's children finished (or immediately
    /// with `pruned = true` when `enter_dir` skipped the subtree).
    async fn leave_dir(&self, path: &str, children: &[String], pruned: bool)
        -> Result<(), SyncError>;
}

/// Walk `root` on `endpoint`. A non-directory root is handed straight
/// to the file visitor.
pub async fn walk(
    endpoint: &dyn Endpoint,
    root: &str,
    convention: PathConvention,
    visitor: &dyn Visitor,
    limit: usize,
) -> Result<(), SyncError> {
    let stats = endpoint.lstat(root).await?;
    if stats.is_dir() {
        walk_dir(endpoint, root.to_string(), stats, convention, visitor, limit.max(1)).await
    } else {
        visitor.file(root, &stats).await
    }
}

fn walk_dir<'a>(
    endpoint: &'a dyn Endpoint,
    path: String,
    stats: EntryStats,
    convention: PathConvention,
    visitor: &'a dyn Visitor,
    limit: usize,
) -> BoxFuture<'a, Result<(), SyncError>> {
    Box::pin(async move {
        let children = endpoint.read_dir(&path).await?;

        let children = match visitor.enter_dir(&path, &stats, children).await? {
            DirVisit::Prune => return visitor.leave_dir(&path, &[], true).await,
            DirVisit::Descend(children) => children,
        };

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for name in &children {
            let child = convention.join(&path, name);
            let child_stats = endpoint.lstat(&child).await?;
            if child_stats.is_dir() {
                dirs.push((child, child_stats));
            } else {
                files.push((child, child_stats));
            }
        }

        let file_futures: Vec<_> = files
            .iter()
            .map(|(child, child_stats)| visitor.file(child, child_stats))
            .collect();
        let results: Vec<Result<(), SyncError>> = stream::iter(file_futures)
            .buffer_unordered(limit)
            .collect()
            .await;
        for result in results {
            result?;
        }

        for (child, child_stats) in dirs {
            walk_dir(endpoint, child, child_stats, convention, visitor, limit).await?;
        }

        visitor.leave_dir(&path, &children, false).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::LocalEndpoint;
    use std::sync::Mutex;

    struct Recorder {
        events: Mutex<Vec<String>>,
        prune: Option<String>,
    }

    impl Recorder {
        fn new(prune: Option<&str>) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                prune: prune.map(str::to_string),
            }
        }

        fn push(&self, event: String) {
            self.events.lock().expect("lock").push(event);
        }
    }

    #[async_trait]
    impl Visitor for Recorder {
        async fn file(&self, path: &str, _stats: &EntryStats) -> Result<(), SyncError> {
            self.push(format!("file {}", name_of(path)));
            Ok(())
        }

        async fn enter_dir(
            &self,
            path: &str,
            _stats: &EntryStats,
            mut children: Vec<String>,
        ) -> Result<DirVisit, SyncError> {
            let name = name_of(path);
            if self.prune.as_deref() == Some(name) {
                self.push(format!("prune {name}"));
                return Ok(DirVisit::Prune);
            }
            self.push(format!("enter {name}"));
            children.sort();
            Ok(DirVisit::Descend(children))
        }

        async fn leave_dir(
            &self,
            path: &str,
            _children: &[String],
            pruned: bool,
        ) -> Result<(), SyncError> {
            self.push(format!("leave {} pruned={pruned}", name_of(path)));
            Ok(())
        }
    }

    fn name_of(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"a").expect("write");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub/b.txt"), b"b").expect("write");
        dir
    }

    #[tokio::test]
    async fn test_visits_files_then_descends() {
        let dir = setup();
        let ep = LocalEndpoint::new();
        let recorder = Recorder::new(None);
        walk(
            &ep,
            &dir.path().to_string_lossy(),
            PathConvention::Posix,
            &recorder,
            4,
        )
        .await
        .expect("walk");

        let events = recorder.events.lock().expect("lock").clone();
        assert!(events.contains(&"file a.txt".to_string()));
        assert!(events.contains(&"file b.txt".to_string()));

        // sub's leave comes before the root's leave
        let leave_sub = events
            .iter()
            .position(|e| e.starts_with("leave sub"))
            .expect("leave sub");
        let leave_root = events.len() - 1;
        assert!(events[leave_root].starts_with("leave"));
        assert!(leave_sub < leave_root);
    }

    #[tokio::test]
    async fn test_prune_skips_subtree() {
        let dir = setup();
        let ep = LocalEndpoint::new();
        let recorder = Recorder::new(Some("sub"));
        walk(
            &ep,
            &dir.path().to_string_lossy(),
            PathConvention::Posix,
            &recorder,
            4,
        )
        .await
        .expect("walk");

        let events = recorder.events.lock().expect("lock").clone();
        assert!(!events.contains(&"file b.txt".to_string()));
        assert!(events.contains(&"prune sub".to_string()));
        assert!(events.contains(&"leave sub pruned=true".to_string()));
    }

    #[tokio::test]
    async fn test_file_root_goes_to_file_visitor() {
        let dir = setup();
        let ep = LocalEndpoint::new();
        let recorder = Recorder::new(None);
        walk(
            &ep,
            &dir.path().join("a.txt").to_string_lossy(),
            PathConvention::Posix,
            &recorder,
            4,
        )
        .await
        .expect("walk");

        let events = recorder.events.lock().expect("lock").clone();
        assert_eq!(events, vec!["file a.txt".to_string()]);
    }
}
