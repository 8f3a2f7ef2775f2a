//! Local filesystem object client.
//!
//! Keys map to paths below a root directory, one path segment per `/`
//! separated key segment. Writes land in a hidden temporary file next to the
//! target and are renamed into place, so readers never see partial objects.
//! Hidden entries (leading `.`) are never listed.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bloomstore_core::{BloomResult, BloomStoreError, StorageError};
use tempfile::NamedTempFile;

use super::ObjectClient;

/// Object client storing each object as a file under `root`.
#[derive(Debug, Clone)]
pub struct FilesystemObjectClient {
    root: PathBuf,
}

impl FilesystemObjectClient {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to its path, rejecting keys that could escape the root.
    fn path_for(&self, key: &str) -> BloomResult<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.starts_with('.') {
                return Err(StorageError::LocalIo {
                    path: key.to_string(),
                    reason: format!("invalid key segment {:?}", segment),
                }
                .into());
            }
            path.push(segment);
        }
        Ok(path)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> BloomStoreError {
    StorageError::LocalIo {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn join_error(e: tokio::task::JoinError) -> BloomStoreError {
    StorageError::Cancelled {
        reason: e.to_string(),
    }
    .into()
}

/// Collect keys of all visible files below `dir`, relative to `root`.
fn walk_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_keys(root, &path, keys)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectClient for FilesystemObjectClient {
    async fn put_object(&self, key: &str, data: Vec<u8>) -> BloomResult<()> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || -> BloomResult<()> {
            let parent = path.parent().unwrap_or(Path::new("."));
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            let mut tmp = NamedTempFile::new_in(parent).map_err(|e| io_error(parent, e))?;
            tmp.write_all(&data).map_err(|e| io_error(tmp.path(), e))?;
            tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
            tmp.persist(&path).map_err(|e| io_error(&path, e.error))?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn get_object(&self, key: &str) -> BloomResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::ObjectNotFound {
                key: key.to_string(),
            }
            .into()),
            Err(e) => Err(StorageError::GetFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    async fn list(&self, prefix: &str) -> BloomResult<Vec<String>> {
        // walk the deepest directory fully named by the prefix
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let mut start = self.root.clone();
        for segment in dir_part.split('/').filter(|s| !s.is_empty()) {
            start.push(segment);
        }

        let root = self.root.clone();
        let owned_prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> BloomResult<Vec<String>> {
            let mut keys = Vec::new();
            walk_keys(&root, &start, &mut keys).map_err(|e| StorageError::ListFailed {
                prefix: owned_prefix.clone(),
                reason: e.to_string(),
            })?;
            keys.retain(|k| k.starts_with(&owned_prefix));
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let client = FilesystemObjectClient::new(dir.path());
        client
            .put_object("bloom/t/table_1/metas/x.json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            client.get_object("bloom/t/table_1/metas/x.json").await.unwrap(),
            b"{}"
        );
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let client = FilesystemObjectClient::new(dir.path());
        client.put_object("a/b", b"one".to_vec()).await.unwrap();
        client.put_object("a/b", b"two".to_vec()).await.unwrap();
        assert_eq!(client.get_object("a/b").await.unwrap(), b"two");
        assert_eq!(client.list("a/").await.unwrap(), vec!["a/b"]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let client = FilesystemObjectClient::new(dir.path());
        let err = client.get_object("a/missing").await.unwrap_err();
        assert!(matches!(
            err,
            BloomStoreError::Storage(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_prefix_filtered() {
        let dir = TempDir::new().unwrap();
        let client = FilesystemObjectClient::new(dir.path());
        for key in ["t/b/2", "t/a/1", "t/b/1", "tx/1", "u/1"] {
            client.put_object(key, Vec::new()).await.unwrap();
        }
        assert_eq!(
            client.list("t/").await.unwrap(),
            vec!["t/a/1", "t/b/1", "t/b/2"]
        );
        assert_eq!(client.list("t/b/").await.unwrap(), vec!["t/b/1", "t/b/2"]);
        assert_eq!(client.list("t").await.unwrap().len(), 4);
        assert!(client.list("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let client = FilesystemObjectClient::new(dir.path());
        assert!(client.put_object("../evil", Vec::new()).await.is_err());
        assert!(client.put_object("a//b", Vec::new()).await.is_err());
        assert!(client.get_object("a/.hidden").await.is_err());
    }
}
