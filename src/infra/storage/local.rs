//! Local filesystem adapter.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::fs;

use super::{ObjectInfo, StorageAdapter, StorageError};

/// Filesystem-backed storage rooted at a directory.
///
/// Logical paths are resolved strictly below the root; absolute paths and
/// parent-directory traversal are rejected.
#[derive(Debug)]
pub struct LocalAdapter {
    root: PathBuf,
}

impl LocalAdapter {
    /// Initialise storage rooted at the provided directory, creating it if
    /// necessary.
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath { path: path.into() });
        }
        Ok(self.root.join(relative))
    }

    async fn metadata(&self, path: &str) -> Result<std::fs::Metadata, StorageError> {
        let absolute = self.resolve(path)?;
        match fs::metadata(&absolute).await {
            Ok(meta) => Ok(meta),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound { path: path.into() })
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

#[async_trait]
impl StorageAdapter for LocalAdapter {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let absolute = self.resolve(path)?;
        Ok(fs::metadata(&absolute).await.is_ok())
    }

    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let absolute = self.resolve(path)?;
        match fs::read(&absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound { path: path.into() })
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let absolute = self.resolve(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&absolute, data).await?;
        Ok(())
    }

    /// Missing files are treated as success.
    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn delete_directory(&self, path: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(path)?;
        match fs::remove_dir_all(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(path)?;
        fs::create_dir_all(&absolute).await?;
        Ok(())
    }

    /// List regular files directly under `path`. Subdirectories are not
    /// descended into; each cache directory is a flat key space.
    async fn list(&self, path: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let absolute = self.resolve(path)?;
        let mut reader = match fs::read_dir(&absolute).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };

        let mut objects = Vec::new();
        while let Some(dirent) = reader.next_entry().await? {
            let meta = dirent.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let filename = dirent.file_name().to_string_lossy().into_owned();
            let last_modified = meta
                .modified()
                .ok()
                .map(OffsetDateTime::from);
            let logical = if path.is_empty() {
                filename.clone()
            } else {
                format!("{path}/{filename}")
            };
            objects.push(ObjectInfo {
                path: logical,
                filename,
                last_modified,
            });
        }
        Ok(objects)
    }

    async fn last_modified(&self, path: &str) -> Result<OffsetDateTime, StorageError> {
        let meta = self.metadata(path).await?;
        meta.modified()
            .map(OffsetDateTime::from)
            .map_err(StorageError::Io)
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        Ok(self.metadata(path).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> (tempfile::TempDir, LocalAdapter) {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = LocalAdapter::new(dir.path().to_path_buf()).expect("adapter");
        (dir, adapter)
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let (_dir, adapter) = adapter();

        adapter.write("cache/a_1e.jpg", b"payload").await.expect("write");
        assert!(adapter.exists("cache/a_1e.jpg").await.expect("exists"));

        let data = adapter.read("cache/a_1e.jpg").await.expect("read");
        assert_eq!(data.as_ref(), b"payload");
        assert_eq!(adapter.size("cache/a_1e.jpg").await.expect("size"), 7);
    }

    #[tokio::test]
    async fn missing_objects_report_not_found() {
        let (_dir, adapter) = adapter();

        assert!(!adapter.exists("nope.jpg").await.expect("exists"));
        assert!(matches!(
            adapter.read("nope.jpg").await,
            Err(StorageError::NotFound { .. })
        ));
        // Deleting something that is already gone is fine.
        adapter.delete("nope.jpg").await.expect("delete");
    }

    #[tokio::test]
    async fn list_returns_files_only() {
        let (_dir, adapter) = adapter();

        adapter.write("cache/a.jpg", b"a").await.expect("write a");
        adapter.write("cache/b.jpg", b"b").await.expect("write b");
        adapter.write("cache/sub/c.jpg", b"c").await.expect("write c");

        let mut listed = adapter.list("cache").await.expect("list");
        listed.sort_by(|l, r| l.filename.cmp(&r.filename));

        let names: Vec<&str> = listed.iter().map(|o| o.filename.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        assert_eq!(listed[0].path, "cache/a.jpg");
        assert!(listed[0].last_modified.is_some());
    }

    #[tokio::test]
    async fn listing_missing_directory_is_empty() {
        let (_dir, adapter) = adapter();
        assert!(adapter.list("ghost").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let (_dir, adapter) = adapter();
        assert!(matches!(
            adapter.read("../escape.jpg").await,
            Err(StorageError::InvalidPath { .. })
        ));
        assert!(matches!(
            adapter.write("/absolute.jpg", b"x").await,
            Err(StorageError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn delete_directory_removes_tree() {
        let (_dir, adapter) = adapter();
        adapter.write("cache/a.jpg", b"a").await.expect("write");
        adapter.delete_directory("cache").await.expect("delete dir");
        assert!(!adapter.exists("cache/a.jpg").await.expect("exists"));
        // Idempotent.
        adapter.delete_directory("cache").await.expect("delete dir again");
    }
}
