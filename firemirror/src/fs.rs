//! The filesystem collaborator.
//!
//! [`MirrorFs`] is the narrow set of filesystem operations the walkers use.
//! [`LocalFs`] implements it on `tokio::fs`; tests wrap it to inject faults.
//!
use std::{
    io,
    path::{Path, PathBuf},
};

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    /// Symlinks, sockets, devices. Skipped by the restore walker.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Filesystem operations used to build and read a mirror.
pub trait MirrorFs: Send + Sync {
    /// Creates `path` and any missing parents. Succeeds if it already exists.
    fn create_dir_all(&self, path: &Path) -> impl Future<Output = io::Result<()>> + Send;

    /// Creates or truncates the file at `path` and writes `contents`.
    fn write_file(&self, path: &Path, contents: &[u8])
    -> impl Future<Output = io::Result<()>> + Send;

    fn read_file(&self, path: &Path) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Entries of the directory at `path`, sorted by file name.
    fn read_dir(&self, path: &Path) -> impl Future<Output = io::Result<Vec<DirEntry>>> + Send;
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl MirrorFs for LocalFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            entries.push(DirEntry {
                path: entry.path(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_dir_all_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("A/d1/B");
        LocalFs.create_dir_all(&dir).await.unwrap();
        LocalFs.create_dir_all(&dir).await.unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn read_dir_sorts_and_classifies() {
        let temp = tempfile::tempdir().unwrap();
        LocalFs.create_dir_all(&temp.path().join("b")).await.unwrap();
        LocalFs
            .write_file(&temp.path().join("c.json"), b"{}")
            .await
            .unwrap();
        LocalFs
            .write_file(&temp.path().join("a.json"), b"{}")
            .await
            .unwrap();

        let entries = LocalFs.read_dir(temp.path()).await.unwrap();
        let listed: Vec<(String, EntryKind)> = entries
            .iter()
            .map(|entry| (entry.file_name(), entry.kind))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("a.json".to_string(), EntryKind::File),
                ("b".to_string(), EntryKind::Directory),
                ("c.json".to_string(), EntryKind::File),
            ]
        );
        assert_eq!(
            LocalFs.read_file(&temp.path().join("a.json")).await.unwrap(),
            b"{}"
        );
    }
}
