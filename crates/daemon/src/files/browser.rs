//! Single-level directory listing and directory creation.
//!
//! Callers gate paths through the sandbox before calling into this module;
//! nothing here consults the allow-list.

use std::io;
use std::path::Path;

use protocol::EntryKind;
use tokio::fs;

use super::error::FileError;

/// A direct child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry kind. Symlinks are reported as files and never followed.
    pub kind: EntryKind,
}

impl DirectoryEntry {
    /// Listing label, `[DIR] name` or `[FILE] name`.
    pub fn label(&self) -> String {
        match self.kind {
            EntryKind::Directory => format!("[DIR] {}", self.name),
            EntryKind::File => format!("[FILE] {}", self.name),
        }
    }
}

/// Check that `path` exists and is a directory.
pub async fn require_directory(path: &Path) -> Result<(), FileError> {
    let metadata = fs::metadata(path).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            FileError::NotFound(path.to_path_buf())
        } else {
            FileError::io(path, e)
        }
    })?;

    if !metadata.is_dir() {
        return Err(FileError::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

/// Read the direct children of `dir` without any precondition check.
///
/// Entries are returned in enumeration order.
pub(crate) async fn read_children(dir: &Path) -> io::Result<Vec<DirectoryEntry>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut children = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let kind = if entry.file_type().await?.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        children.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind,
        });
    }

    Ok(children)
}

/// List the contents of an existing directory, sorted by name.
pub async fn list_directory(path: &Path) -> Result<Vec<DirectoryEntry>, FileError> {
    require_directory(path).await?;

    let mut entries = read_children(path)
        .await
        .map_err(|e| FileError::io(path, e))?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::debug!(path = %path.display(), count = entries.len(), "Listed directory");
    Ok(entries)
}

/// Render a listing, one labelled entry per line.
pub fn render_listing(entries: &[DirectoryEntry]) -> String {
    entries
        .iter()
        .map(DirectoryEntry::label)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Create a directory, optionally with its missing parents.
///
/// Succeeds without changes when the directory already exists.
pub async fn create_directory(path: &Path, recursive: bool) -> Result<(), FileError> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => {
            tracing::debug!(path = %path.display(), "Directory already exists");
            return Ok(());
        }
        Ok(_) => return Err(FileError::NotADirectory(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(FileError::io(path, e)),
    }

    let result = if recursive {
        fs::create_dir_all(path).await
    } else {
        fs::create_dir(path).await
    };

    match result {
        Ok(()) => {
            tracing::info!(path = %path.display(), recursive, "Created directory");
            Ok(())
        }
        // Lost a race with a concurrent creator.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(FileError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_structure(dir: &Path) {
        std::fs::create_dir_all(dir.join("subdir")).unwrap();
        std::fs::create_dir_all(dir.join(".hidden_dir")).unwrap();
        std::fs::write(dir.join("file.txt"), "Hello").unwrap();
        std::fs::write(dir.join("subdir/nested.txt"), "Nested").unwrap();
        std::fs::write(dir.join(".hidden"), "Hidden").unwrap();
    }

    #[tokio::test]
    async fn test_list_directory() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());

        let entries = list_directory(temp_dir.path()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();

        // Hidden entries are included, everything sorted by name
        assert_eq!(names, vec![".hidden", ".hidden_dir", "file.txt", "subdir"]);
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[2].kind, EntryKind::File);
    }

    #[tokio::test]
    async fn test_render_listing() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("zebra.txt"), "z").unwrap();
        std::fs::create_dir(temp_dir.path().join("alpha_dir")).unwrap();

        let entries = list_directory(temp_dir.path()).await.unwrap();
        assert_eq!(render_listing(&entries), "[DIR] alpha_dir\n[FILE] zebra.txt");
    }

    #[tokio::test]
    async fn test_list_empty_directory() {
        let temp_dir = TempDir::new().unwrap();

        let entries = list_directory(temp_dir.path()).await.unwrap();
        assert!(entries.is_empty());
        assert_eq!(render_listing(&entries), "");
    }

    #[tokio::test]
    async fn test_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "Hello").unwrap();

        let result = list_directory(&file).await;
        assert!(matches!(result, Err(FileError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_path_not_found() {
        let temp_dir = TempDir::new().unwrap();

        let result = require_directory(&temp_dir.path().join("nonexistent")).await;
        assert!(matches!(result, Err(FileError::NotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_reported_as_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("link"))
            .unwrap();

        let entries = list_directory(temp_dir.path()).await.unwrap();
        let link = entries.iter().find(|e| e.name == "link").unwrap();
        assert_eq!(link.kind, EntryKind::File);
    }

    #[tokio::test]
    async fn test_create_directory_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b/c");

        create_directory(&nested, true).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_create_directory_non_recursive_needs_parent() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b");

        let result = create_directory(&nested, false).await;
        assert!(matches!(result, Err(FileError::Io { .. })));
        assert!(!nested.exists());

        create_directory(&temp_dir.path().join("a"), false).await.unwrap();
        create_directory(&nested, false).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_create_directory_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("project");

        create_directory(&dir, true).await.unwrap();
        std::fs::write(dir.join("keep.txt"), "keep").unwrap();

        create_directory(&dir, true).await.unwrap();
        create_directory(&dir, false).await.unwrap();

        let entries = list_directory(&dir).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read_to_string(dir.join("keep.txt")).unwrap(), "keep");
    }

    #[tokio::test]
    async fn test_create_directory_over_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let result = create_directory(&file, true).await;
        assert!(matches!(result, Err(FileError::NotADirectory(_))));
    }
}
