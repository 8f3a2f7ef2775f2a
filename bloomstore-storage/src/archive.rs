//! Block archive format.
//!
//! A block is stored as a zip archive holding a `bloom` file and a `series`
//! file. Fetching a block extracts it into a directory under the working
//! directory; the extracted directory is what the blocks cache holds.
//! Handles to an extracted directory share a lease, and a released
//! directory is only deleted once the last handle is dropped.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use bloomstore_core::{BloomResult, BloomStoreError, DecodeError, StorageError};
use tracing::{debug, warn};
use zip::write::{FileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

use crate::cache::Weighted;

pub const BLOOM_FILE_NAME: &str = "bloom";
pub const SERIES_FILE_NAME: &str = "series";

const EXTRACT_PREFIX: &str = ".extract-";

fn io_error(path: &Path, e: std::io::Error) -> BloomStoreError {
    StorageError::LocalIo {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn archive_error(key: &str, e: impl std::fmt::Display) -> BloomStoreError {
    DecodeError::InvalidArchive {
        key: key.to_string(),
        reason: e.to_string(),
    }
    .into()
}

// ============================================================================
// BLOCK DIRECTORY
// ============================================================================

type LeaseTable = Mutex<HashMap<PathBuf, Weak<DirectoryLease>>>;

/// Shared ownership of one extracted directory.
///
/// Once released, the directory is deleted when the last handle goes away.
#[derive(Debug)]
struct DirectoryLease {
    path: PathBuf,
    released: AtomicBool,
    table: Option<Weak<LeaseTable>>,
}

impl DirectoryLease {
    fn new(path: PathBuf, table: Option<Weak<LeaseTable>>) -> Self {
        Self {
            path,
            released: AtomicBool::new(false),
            table,
        }
    }

    fn remove_directory(&self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove released block directory"
                );
            }
        }
    }
}

impl Drop for DirectoryLease {
    fn drop(&mut self) {
        let released = self.released.load(Ordering::SeqCst);
        let Some(table) = self.table.as_ref().and_then(Weak::upgrade) else {
            if released {
                self.remove_directory();
            }
            return;
        };
        let mut live = table.lock().unwrap_or_else(PoisonError::into_inner);
        // a newer lease took over the path while this one was dropping
        if live.get(&self.path).is_some_and(|w| w.strong_count() > 0) {
            return;
        }
        live.remove(&self.path);
        if released {
            self.remove_directory();
        }
    }
}

/// An extracted block on local disk.
///
/// Clones share one lease on the directory. [`BlockDirectory::release`]
/// marks it for deletion; the files stay readable until every clone is
/// dropped.
#[derive(Debug, Clone)]
pub struct BlockDirectory {
    path: PathBuf,
    size: u64,
    lease: Arc<DirectoryLease>,
}

impl PartialEq for BlockDirectory {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.size == other.size
    }
}

impl Eq for BlockDirectory {}

impl BlockDirectory {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        Self {
            lease: Arc::new(DirectoryLease::new(path.clone(), None)),
            path,
            size,
        }
    }

    /// Describe an existing directory, summing the sizes of its files.
    pub fn open(path: impl Into<PathBuf>) -> BloomResult<Self> {
        let path = path.into();
        let size = dir_size(&path).map_err(|e| io_error(&path, e))?;
        Ok(Self::new(path, size))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total bytes of extracted files.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the directory is still present on disk.
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn bloom_path(&self) -> PathBuf {
        self.path.join(BLOOM_FILE_NAME)
    }

    pub fn series_path(&self) -> PathBuf {
        self.path.join(SERIES_FILE_NAME)
    }

    /// Delete the directory once no handle to it remains.
    pub fn release(&self) {
        self.lease.released.store(true, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.lease.released.load(Ordering::SeqCst)
    }

    /// Number of live handles sharing this directory.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.lease)
    }
}

/// Hands out one shared lease per extracted directory.
///
/// Extracting onto a path that still has live handles joins their lease
/// and cancels any pending release, so a re-fetched block is never deleted
/// by an older handle.
#[derive(Debug, Clone, Default)]
pub struct BlockDirectories {
    live: Arc<LeaseTable>,
}

impl BlockDirectories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract a block archive to `dest` under a shared lease.
    pub fn extract(&self, key: &str, data: &[u8], dest: &Path) -> BloomResult<BlockDirectory> {
        let lease = self.acquire(dest)?;
        let extracted = extract_block(key, data, dest)?;
        Ok(BlockDirectory {
            path: extracted.path.clone(),
            size: extracted.size,
            lease,
        })
    }

    /// Number of directories with live handles.
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .map(|live| live.values().filter(|w| w.strong_count() > 0).count())
            .unwrap_or_default()
    }

    fn acquire(&self, dest: &Path) -> BloomResult<Arc<DirectoryLease>> {
        let mut live = self.live.lock().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(lease) = live.get(dest).and_then(Weak::upgrade) {
            lease.released.store(false, Ordering::SeqCst);
            return Ok(lease);
        }
        let lease = Arc::new(DirectoryLease::new(
            dest.to_path_buf(),
            Some(Arc::downgrade(&self.live)),
        ));
        live.insert(dest.to_path_buf(), Arc::downgrade(&lease));
        Ok(lease)
    }
}

impl Weighted for BlockDirectory {
    fn weight(&self) -> u64 {
        self.size
    }
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

// ============================================================================
// PACK / UNPACK
// ============================================================================

/// Build an archive from named in-memory files.
///
/// Entries are written sorted by name so equal inputs give equal bytes.
pub fn pack_files(files: &[(&str, &[u8])]) -> BloomResult<Vec<u8>> {
    let mut sorted: Vec<&(&str, &[u8])> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        for (name, data) in sorted {
            zip.start_file(*name, options)
                .map_err(|e| archive_error(name, e))?;
            zip.write_all(data).map_err(|e| archive_error(name, e))?;
        }
        zip.finish().map_err(|e| archive_error("<archive>", e))?;
    }
    Ok(buffer.into_inner())
}

/// Archive every file below `dir`, using `/` separated relative names.
pub fn pack_directory(dir: &Path) -> BloomResult<Vec<u8>> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files).map_err(|e| io_error(dir, e))?;
    let borrowed: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect();
    pack_files(&borrowed)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((name, fs::read(&path)?));
        }
    }
    Ok(())
}

/// Extract `data` into `dest`, which must already exist.
pub fn unpack(key: &str, data: &[u8], dest: &Path) -> BloomResult<()> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(|e| archive_error(key, e))?;
    archive.extract(dest).map_err(|e| archive_error(key, e))
}

/// Extract a block archive to `dest` and describe the result.
///
/// Extraction happens in a hidden sibling directory that is renamed onto
/// `dest` once complete. If `dest` already holds an extracted block it is
/// reused as is.
pub fn extract_block(key: &str, data: &[u8], dest: &Path) -> BloomResult<BlockDirectory> {
    if dest.is_dir() {
        return BlockDirectory::open(dest);
    }
    let parent = dest.parent().ok_or_else(|| StorageError::LocalIo {
        path: dest.display().to_string(),
        reason: "block directory has no parent".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;

    let staging = tempfile::Builder::new()
        .prefix(EXTRACT_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| io_error(parent, e))?;
    unpack(key, data, staging.path())?;

    match fs::rename(staging.path(), dest) {
        Ok(()) => {}
        // lost a race with a concurrent extraction of the same block
        Err(_) if dest.is_dir() => {
            debug!(key = %key, dest = %dest.display(), "Block already extracted");
        }
        Err(e) => return Err(io_error(dest, e)),
    }
    BlockDirectory::open(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_archive() -> Vec<u8> {
        pack_files(&[
            (SERIES_FILE_NAME, b"series-data".as_slice()),
            (BLOOM_FILE_NAME, b"bloom-data".as_slice()),
        ])
        .unwrap()
    }

    #[test]
    fn test_extract_block_writes_both_files() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("blocks").join("b1");
        let block = extract_block("k", &sample_archive(), &dest).unwrap();

        assert!(block.exists());
        assert_eq!(fs::read(block.bloom_path()).unwrap(), b"bloom-data");
        assert_eq!(fs::read(block.series_path()).unwrap(), b"series-data");
        assert_eq!(block.size(), 21);
        assert_eq!(block.weight(), 21);
    }

    #[test]
    fn test_extract_leaves_no_staging_dirs() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("b1");
        extract_block("k", &sample_archive(), &dest).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b1".to_string()]);
    }

    #[test]
    fn test_extract_reuses_existing_directory() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("b1");
        let first = extract_block("k", &sample_archive(), &dest).unwrap();
        let second = extract_block("k", b"not a zip", &dest).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_archive_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let err = extract_block("bad-key", b"garbage", &dir.path().join("b")).unwrap_err();
        assert!(matches!(
            err,
            BloomStoreError::Decode(DecodeError::InvalidArchive { ref key, .. }) if key == "bad-key"
        ));
        assert!(!dir.path().join("b").exists());
    }

    #[test]
    fn test_released_directory_removed_after_last_handle() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("b1");
        let dirs = BlockDirectories::new();
        let cached = dirs.extract("k", &sample_archive(), &dest).unwrap();
        let reader = cached.clone();
        assert_eq!(reader.handles(), 2);

        cached.release();
        drop(cached);
        assert!(reader.is_released());
        assert_eq!(fs::read(reader.bloom_path()).unwrap(), b"bloom-data");

        drop(reader);
        assert!(!dest.exists());
        assert_eq!(dirs.live_count(), 0);
    }

    #[test]
    fn test_unreleased_directory_survives_drop() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("b1");
        let dirs = BlockDirectories::new();
        drop(dirs.extract("k", &sample_archive(), &dest).unwrap());
        assert!(dest.is_dir());
    }

    #[test]
    fn test_reextract_joins_lease_and_cancels_release() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("b1");
        let dirs = BlockDirectories::new();
        let old = dirs.extract("k", &sample_archive(), &dest).unwrap();
        old.release();

        let fresh = dirs.extract("k", &sample_archive(), &dest).unwrap();
        assert_eq!(fresh.handles(), 2);
        assert!(!fresh.is_released());

        drop(old);
        drop(fresh);
        assert!(dest.is_dir());
        assert_eq!(dirs.live_count(), 0);
    }

    #[test]
    fn test_pack_directory_is_deterministic() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(BLOOM_FILE_NAME), b"b").unwrap();
        fs::write(dir.path().join(SERIES_FILE_NAME), b"s").unwrap();
        let a = pack_directory(dir.path()).unwrap();
        let b = pack_directory(dir.path()).unwrap();
        assert_eq!(a, b);

        let out = TempDir::new().unwrap();
        unpack("k", &a, out.path()).unwrap();
        assert_eq!(fs::read(out.path().join(BLOOM_FILE_NAME)).unwrap(), b"b");
    }
}
