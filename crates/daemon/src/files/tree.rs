//! Concurrent recursive directory tree builder.
//!
//! Each directory level enumerates its children once and spawns one task per
//! child into a [`JoinSet`]. A directory node is only produced after all of
//! its children resolved, so the tree completes strictly bottom-up. Results
//! are assembled from task return values; no accumulator is shared between
//! tasks.
//!
//! Children are sorted by name after aggregation so that output does not
//! depend on task completion order.
//!
//! The first failure seen at a level fails that level and, transitively, the
//! whole build. Which error wins when several subtrees fail at once depends
//! on scheduling. Dropping the [`JoinSet`] aborts the remaining sibling
//! tasks, and the cancellation token is checked before every enumeration and
//! while waiting on children.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use protocol::{EntryKind, TreeEntry};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::browser::{read_children, require_directory};
use super::error::FileError;

type LevelFuture = Pin<Box<dyn Future<Output = Result<Vec<TreeEntry>, FileError>> + Send>>;

/// Builds directory trees, observing a cancellation token.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    cancel: CancellationToken,
}

impl TreeBuilder {
    /// Create a builder bound to `cancel`.
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Build the tree under `root`.
    ///
    /// `root` must be an existing directory; that precondition is checked
    /// and reported as `NotFound` / `NotADirectory`. Enumeration failures
    /// anywhere below surface as `Traversal`, cancellation as `Cancelled`.
    /// No partial tree is ever returned.
    pub async fn build(&self, root: &Path) -> Result<Vec<TreeEntry>, FileError> {
        require_directory(root).await?;

        let started = std::time::Instant::now();
        let result = build_level(root.to_path_buf(), self.cancel.clone()).await;

        match &result {
            Ok(entries) => tracing::debug!(
                root = %root.display(),
                top_level = entries.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Directory tree built"
            ),
            Err(e) => tracing::warn!(root = %root.display(), error = %e, "Directory tree failed"),
        }
        result
    }
}

fn build_level(dir: PathBuf, cancel: CancellationToken) -> LevelFuture {
    Box::pin(async move {
        let listing = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FileError::Cancelled),
            listing = read_children(&dir) => {
                listing.map_err(|e| FileError::traversal(&dir, e))?
            }
        };

        let mut tasks = JoinSet::new();
        for child in listing {
            let path = dir.join(&child.name);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                match child.kind {
                    EntryKind::File => Ok(TreeEntry::file(child.name)),
                    EntryKind::Directory => {
                        let children = build_level(path, cancel).await?;
                        Ok(TreeEntry::directory(child.name, children))
                    }
                }
            });
        }

        let mut children = Vec::with_capacity(tasks.len());
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FileError::Cancelled),
                joined = tasks.join_next() => joined,
            };

            match joined {
                None => break,
                Some(Ok(Ok(entry))) => children.push(entry),
                Some(Ok(Err(e))) => return Err(e),
                Some(Err(join_error)) => {
                    return Err(FileError::traversal(
                        &dir,
                        io::Error::other(join_error.to_string()),
                    ))
                }
            }
        }

        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn builder() -> TreeBuilder {
        TreeBuilder::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_file_and_nested_directory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(temp_dir.path().join("b")).unwrap();
        std::fs::write(temp_dir.path().join("b/c.txt"), "c").unwrap();

        let tree = builder().build(temp_dir.path()).await.unwrap();

        assert_eq!(
            tree,
            vec![
                TreeEntry::file("a.txt"),
                TreeEntry::directory("b", vec![TreeEntry::file("c.txt")]),
            ]
        );
        assert!(tree[0].children.is_none());
    }

    #[tokio::test]
    async fn test_empty_root() {
        let temp_dir = TempDir::new().unwrap();

        let tree = builder().build(temp_dir.path()).await.unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn test_empty_subdirectory_has_empty_children() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("empty")).unwrap();

        let tree = builder().build(temp_dir.path()).await.unwrap();
        assert_eq!(tree[0].children, Some(vec![]));
    }

    #[tokio::test]
    async fn test_children_sorted_by_name() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["delta", "alpha", "charlie", "bravo"] {
            std::fs::create_dir(temp_dir.path().join(name)).unwrap();
            std::fs::write(temp_dir.path().join(name).join("z.txt"), "").unwrap();
            std::fs::write(temp_dir.path().join(name).join("y.txt"), "").unwrap();
        }

        let tree = builder().build(temp_dir.path()).await.unwrap();
        let names: Vec<&str> = tree.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie", "delta"]);

        for entry in &tree {
            let children = entry.children.as_ref().unwrap();
            assert_eq!(children[0].name, "y.txt");
            assert_eq!(children[1].name, "z.txt");
        }
    }

    #[tokio::test]
    async fn test_deep_tree() {
        let temp_dir = TempDir::new().unwrap();
        let mut deepest = temp_dir.path().to_path_buf();
        for depth in 0..20 {
            deepest = deepest.join(format!("level{}", depth));
        }
        std::fs::create_dir_all(&deepest).unwrap();
        std::fs::write(deepest.join("leaf.txt"), "leaf").unwrap();

        let tree = builder().build(temp_dir.path()).await.unwrap();

        let mut node = &tree[0];
        for depth in 0..20 {
            assert_eq!(node.name, format!("level{}", depth));
            let children = node.children.as_ref().unwrap();
            if depth < 19 {
                node = &children[0];
            } else {
                assert_eq!(children, &vec![TreeEntry::file("leaf.txt")]);
            }
        }
    }

    #[tokio::test]
    async fn test_root_preconditions() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let result = builder().build(&temp_dir.path().join("missing")).await;
        assert!(matches!(result, Err(FileError::NotFound(_))));

        let result = builder().build(&file).await;
        assert!(matches!(result, Err(FileError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_vanished_directory_is_traversal_error() {
        let temp_dir = TempDir::new().unwrap();
        let gone = temp_dir.path().join("gone");

        let result = build_level(gone.clone(), CancellationToken::new()).await;
        match result {
            Err(FileError::Traversal { path, .. }) => assert_eq!(path, gone),
            other => panic!("expected traversal error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..50 {
            let dir = temp_dir.path().join(format!("dir{}", i));
            std::fs::create_dir_all(dir.join("inner")).unwrap();
            std::fs::write(dir.join("inner/file.txt"), "x").unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = TreeBuilder::new(cancel).build(temp_dir.path()).await;
        assert!(matches!(result, Err(FileError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_while_running_never_returns_partial_tree() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..20 {
            for j in 0..20 {
                let dir = temp_dir.path().join(format!("d{}/e{}", i, j));
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join("f.txt"), "x").unwrap();
            }
        }

        let cancel = CancellationToken::new();
        let builder = TreeBuilder::new(cancel.clone());
        let root = temp_dir.path().to_path_buf();
        let handle = tokio::spawn(async move { builder.build(&root).await });
        cancel.cancel();

        // Depending on timing the build either finished completely or was
        // cancelled; a truncated tree is never acceptable.
        match handle.await.unwrap() {
            Err(FileError::Cancelled) => {}
            Ok(tree) => {
                assert_eq!(tree.len(), 20);
                for dir in &tree {
                    assert_eq!(dir.children.as_ref().unwrap().len(), 20);
                }
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
}
