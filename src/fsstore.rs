//! File store adapter (C8): versioned blobs on local disk plus the
//! streaming checksum primitive.
//!
//! `write` is the only operation exposed through a process-wide mutex — a
//! single critical section, not a fine-grained per-path lock, matching the
//! design note that writes to different paths still serialize.

use crate::error::{DfsResult, NodeError};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const CHECKSUM_BLOCK_SIZE: usize = 64 * 1024;

pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<root>/<path>.<version>`
    pub fn local_path(&self, path: &str, version: u32) -> PathBuf {
        self.root.join(format!("{path}.{version}"))
    }

    /// Write `data` at `offset` into the versioned blob, then re-read the
    /// whole file and return `(full_contents, checksum, size)` so callers
    /// can upsert metadata without a second pass over the file.
    pub fn write(
        &self,
        path: &str,
        version: u32,
        data: &[u8],
        offset: u64,
    ) -> DfsResult<(Vec<u8>, Vec<u8>, u64)> {
        let local_path = self.local_path(path, version);
        let _guard = self.write_lock.lock();

        if let Some(dir) = local_path.parent() {
            fs::create_dir_all(dir).map_err(|source| NodeError::Io {
                source,
                path: Some(local_path.clone()),
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&local_path)
            .map_err(|source| NodeError::Io {
                source,
                path: Some(local_path.clone()),
            })?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|source| NodeError::Io {
                source,
                path: Some(local_path.clone()),
            })?;
        file.write_all(data).map_err(|source| NodeError::Io {
            source,
            path: Some(local_path.clone()),
        })?;
        file.flush().map_err(|source| NodeError::Io {
            source,
            path: Some(local_path.clone()),
        })?;

        let contents = read_whole(&local_path)?;
        let checksum = Self::checksum(&contents);
        let size = contents.len() as u64;
        Ok((contents, checksum, size))
    }

    /// Write the full blob in one shot (used when replacing a blob fetched
    /// from a peer). Goes through the same write lock.
    pub fn replace(&self, path: &str, version: u32, data: &[u8]) -> DfsResult<()> {
        let local_path = self.local_path(path, version);
        let _guard = self.write_lock.lock();
        if let Some(dir) = local_path.parent() {
            fs::create_dir_all(dir).map_err(|source| NodeError::Io {
                source,
                path: Some(local_path.clone()),
            })?;
        }
        fs::write(&local_path, data).map_err(|source| NodeError::Io {
            source,
            path: Some(local_path),
        })?;
        Ok(())
    }

    pub fn read(&self, path: &str, version: u32) -> DfsResult<Option<Vec<u8>>> {
        let local_path = self.local_path(path, version);
        if !local_path.exists() {
            return Ok(None);
        }
        Ok(Some(read_whole(&local_path)?))
    }

    pub fn read_range(
        &self,
        path: &str,
        version: u32,
        offset: u64,
        length: i64,
    ) -> DfsResult<Option<Vec<u8>>> {
        let Some(contents) = self.read(path, version)? else {
            return Ok(None);
        };
        let start = offset as usize;
        if start > contents.len() {
            return Ok(Some(Vec::new()));
        }
        let end = if length < 0 {
            contents.len()
        } else {
            (start + length as usize).min(contents.len())
        };
        Ok(Some(contents[start..end].to_vec()))
    }

    pub fn delete(&self, path: &str, version: u32) -> DfsResult<()> {
        let local_path = self.local_path(path, version);
        let _guard = self.write_lock.lock();
        if local_path.exists() {
            fs::remove_file(&local_path).map_err(|source| NodeError::Io {
                source,
                path: Some(local_path),
            })?;
        }
        Ok(())
    }

    pub fn move_file(
        &self,
        src_path: &str,
        dst_path: &str,
        version: u32,
    ) -> DfsResult<()> {
        let src = self.local_path(src_path, version);
        let dst = self.local_path(dst_path, version);
        let _guard = self.write_lock.lock();
        if !src.exists() {
            return Ok(());
        }
        if let Some(dir) = dst.parent() {
            fs::create_dir_all(dir).map_err(|source| NodeError::Io {
                source,
                path: Some(dst.clone()),
            })?;
        }
        fs::rename(&src, &dst).map_err(|source| NodeError::Io {
            source,
            path: Some(dst),
        })?;
        Ok(())
    }

    /// Duplicate the blob at `from_version` to `to_version`, used by
    /// archive: the new version starts byte-identical to the old one.
    pub fn copy_version(&self, path: &str, from_version: u32, to_version: u32) -> DfsResult<()> {
        let src = self.local_path(path, from_version);
        let dst = self.local_path(path, to_version);
        let _guard = self.write_lock.lock();
        if let Some(dir) = dst.parent() {
            fs::create_dir_all(dir).map_err(|source| NodeError::Io {
                source,
                path: Some(dst.clone()),
            })?;
        }
        fs::copy(&src, &dst).map_err(|source| NodeError::Io {
            source,
            path: Some(dst),
        })?;
        Ok(())
    }

    /// Stream the file through the hash primitive in fixed-size blocks so
    /// large files never need to be fully materialized for hashing.
    pub fn checksum_of_file(&self, path: &str, version: u32) -> DfsResult<Vec<u8>> {
        let local_path = self.local_path(path, version);
        let mut file = File::open(&local_path).map_err(|source| NodeError::Io {
            source,
            path: Some(local_path),
        })?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHECKSUM_BLOCK_SIZE];
        loop {
            let n = file.read(&mut buf).map_err(|source| NodeError::Io {
                source,
                path: None,
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_vec())
    }

    /// Checksum of an in-memory byte slice (used once data has already
    /// been read back after a write).
    pub fn checksum(data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }
}

fn read_whole(path: &Path) -> DfsResult<Vec<u8>> {
    fs::read(path).map_err(|source| NodeError::Io {
        source,
        path: Some(path.to_path_buf()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn local_path_matches_root_path_dot_version() {
        let store = FileStore::new("/tmp/root");
        assert_eq!(
            store.local_path("a/b.txt", 3),
            PathBuf::from("/tmp/root/a/b.txt.3")
        );
    }

    #[test]
    fn write_then_read_round_trips_and_checksum_matches() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let (contents, checksum, size) = store.write("f.txt", 1, b"hello", 0).unwrap();
        assert_eq!(contents, b"hello");
        assert_eq!(size, 5);
        assert_eq!(checksum, FileStore::checksum(b"hello"));

        let read_back = store.read("f.txt", 1).unwrap().unwrap();
        assert_eq!(read_back, b"hello");
    }

    #[test]
    fn write_at_offset_preserves_surrounding_bytes() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.write("f.txt", 1, b"hello world", 0).unwrap();
        let (contents, _, _) = store.write("f.txt", 1, b"EARTH", 6).unwrap();
        assert_eq!(contents, b"hello EARTH");
    }

    #[test]
    fn copy_version_duplicates_bytes_without_mutating_source() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.write("f.txt", 1, b"v1", 0).unwrap();
        store.copy_version("f.txt", 1, 2).unwrap();
        assert_eq!(store.read("f.txt", 1).unwrap().unwrap(), b"v1");
        assert_eq!(store.read("f.txt", 2).unwrap().unwrap(), b"v1");
    }

    #[test]
    fn delete_of_missing_file_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.delete("missing.txt", 1).is_ok());
    }

    #[test]
    fn checksum_of_file_matches_in_memory_checksum() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.write("f.txt", 1, b"stream me", 0).unwrap();
        let streamed = store.checksum_of_file("f.txt", 1).unwrap();
        assert_eq!(streamed, FileStore::checksum(b"stream me"));
    }
}
