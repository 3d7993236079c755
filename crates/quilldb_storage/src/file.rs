//! File-backed, log-structured key-value store.

use crate::error::{StorageError, StorageResult};
use crate::frame::{decode_frame, encode_frame, FrameRead};
use crate::store::{KeyValueStore, WriteBatch, WriteOp};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Options for opening a [`FileStore`].
#[derive(Debug, Clone, Copy)]
pub struct FileStoreOptions {
    /// Create the file (and parent directories) if it does not exist.
    pub create_if_missing: bool,
    /// Call `sync_all` after each batch instead of only flushing.
    pub sync_on_write: bool,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
        }
    }
}

struct LogFile {
    file: File,
    size: u64,
}

/// A persistent key-value store kept in a single append-only file.
///
/// Every [`WriteBatch`] becomes one checksummed frame appended to the file.
/// Opening the store replays all frames into an in-memory sorted index, so
/// reads never touch the disk.
///
/// # Durability
///
/// - `write` appends the frame and flushes (or syncs with `sync_on_write`)
///   before the batch becomes visible
/// - A frame cut short by a crash is discarded on the next open
/// - A complete frame with a bad checksum refuses the open
///
/// # Locking
///
/// A sidecar `<file>.lock` is locked exclusively until the store is closed,
/// so a second handle on the same file fails with
/// [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use quilldb_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("data.qdb")).unwrap();
/// store.put(b"key", b"value").unwrap();
/// store.close().unwrap();
/// ```
pub struct FileStore {
    path: PathBuf,
    log: Mutex<LogFile>,
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    sync_on_write: bool,
    closed: AtomicBool,
    lock_file: Mutex<Option<File>>,
}

impl FileStore {
    /// Opens or creates a store at `path` with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is locked by another
    /// handle, or contains a corrupted frame.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, FileStoreOptions::default())
    }

    /// Opens a store at `path` with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file is absent and
    /// `create_if_missing` is false, plus the errors of [`open`](Self::open).
    pub fn open_with(path: &Path, options: FileStoreOptions) -> StorageResult<Self> {
        if !path.exists() {
            if !options.create_if_missing {
                return Err(StorageError::NotFound(path.display().to_string()));
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;

        let (index, valid_len) = replay(&data)?;
        if (valid_len as usize) < data.len() {
            // Torn tail from an interrupted write
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            log: Mutex::new(LogFile {
                file,
                size: valid_len,
            }),
            index: RwLock::new(index),
            sync_on_write: options.sync_on_write,
            closed: AtomicBool::new(false),
            lock_file: Mutex::new(Some(lock_file)),
        })
    }

    /// Returns the path to the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the store file in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.log.lock().size
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn append_frame(&self, log: &mut LogFile, frame: &[u8]) -> StorageResult<()> {
        let previous = log.size;
        let result = (|| -> StorageResult<()> {
            log.file.seek(SeekFrom::Start(previous))?;
            log.file.write_all(frame)?;
            if self.sync_on_write {
                log.file.sync_all()?;
            } else {
                log.file.flush()?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                log.size = previous + frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                // Best effort: cut the partial frame so it is never replayed
                let _ = log.file.set_len(previous);
                Err(e)
            }
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Replays all complete frames. Returns the index and the length of the
/// valid prefix of `data`.
fn replay(data: &[u8]) -> StorageResult<(BTreeMap<Vec<u8>, Vec<u8>>, u64)> {
    let mut index = BTreeMap::new();
    let mut offset = 0usize;
    while offset < data.len() {
        match decode_frame(&data[offset..], offset as u64)? {
            FrameRead::Complete { batch, len } => {
                apply(&mut index, batch);
                offset += len;
            }
            FrameRead::Torn => break,
        }
    }
    Ok((index, offset as u64))
}

fn apply(index: &mut BTreeMap<Vec<u8>, Vec<u8>>, batch: WriteBatch) {
    for op in batch.into_ops() {
        match op {
            WriteOp::Put { key, value } => {
                index.insert(key, value);
            }
            WriteOp::Delete { key } => {
                index.remove(&key);
            }
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.index.read().get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(&batch)?;

        // The log lock serializes writers; the index is updated only once
        // the frame is on disk.
        let mut log = self.log.lock();
        self.append_frame(&mut log, &frame)?;
        apply(&mut self.index.write(), batch);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let index = self.index.read();
        Ok(index
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let log = self.log.lock();
        log.file.sync_all()?;
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut log = self.log.lock();
        let flushed = log.file.flush().and_then(|()| log.file.sync_all());
        // Release the lock even if the final sync failed
        if let Some(lock_file) = self.lock_file.lock().take() {
            let _ = FileExt::unlock(&lock_file);
        }
        flushed?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rewrites the file as a single frame holding the live entries.
    fn compact(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let mut log = self.log.lock();

        let mut batch = WriteBatch::new();
        for (key, value) in self.index.read().iter() {
            batch.put(key.clone(), value.clone());
        }
        let frame = encode_frame(&batch)?;

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".compact");
        let tmp_path = self.path.with_file_name(tmp_name);
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&frame)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        log.file = file;
        log.size = frame.len() as u64;
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("keys", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let store = FileStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("test.qdb");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.file_size(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_missing_without_create_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.qdb");
        let options = FileStoreOptions {
            create_if_missing: false,
            ..FileStoreOptions::default()
        };
        assert!(matches!(
            FileStore::open_with(&path, options),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        {
            let store = FileStore::open(&path).unwrap();
            store.put(b"a", b"1").unwrap();
            store.put(b"b", b"2").unwrap();
            store.delete(b"a").unwrap();
            store.close().unwrap();
        }

        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.get(b"a").unwrap(), None);
            assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        }
    }

    #[test]
    fn file_second_handle_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let _store = FileStore::open(&path).unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Locked(_))
        ));
    }

    #[test]
    fn file_torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let good_len = {
            let store = FileStore::open(&path).unwrap();
            store.put(b"kept", b"yes").unwrap();
            let len = store.file_size();
            store.put(b"torn", b"no").unwrap();
            store.close().unwrap();
            len
        };

        // Simulate a crash in the middle of the second frame
        let full = fs::metadata(&path).unwrap().len();
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(full - 3).unwrap();
        drop(f);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(store.get(b"torn").unwrap(), None);
        assert_eq!(store.file_size(), good_len);
    }

    #[test]
    fn file_checksum_mismatch_refuses_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        {
            let store = FileStore::open(&path).unwrap();
            store.put(b"key", b"value").unwrap();
            store.close().unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        let last_payload_byte = bytes.len() - 5;
        bytes[last_payload_byte] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Corrupted { .. })
        ));
    }

    #[test]
    fn file_compact_shrinks_and_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let store = FileStore::open(&path).unwrap();
        for i in 0..20u8 {
            store.put(b"hot", &[i; 32]).unwrap();
        }
        store.put(b"cold", b"c").unwrap();
        let before = store.file_size();

        store.compact().unwrap();
        assert!(store.file_size() < before);
        assert_eq!(store.get(b"hot").unwrap(), Some(vec![19u8; 32]));

        // Appends after compaction land in the new file
        store.put(b"after", b"1").unwrap();
        store.close().unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.get(b"after").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn file_closed_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("test.qdb")).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get(b"a"), Err(StorageError::Closed)));
        assert!(matches!(store.commit(), Err(StorageError::Closed)));
    }
}
