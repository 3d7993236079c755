//! Fault injection for store failure paths.
//!
//! [`FaultyStore`] wraps another store and fails writes on demand. Reads,
//! flushes and close pass straight through, so a database over a faulty
//! store can still be closed cleanly and reopened from the inner store.
//!
//! ```rust
//! use quilldb_storage::{InMemoryStore, KeyValueStore};
//! use quilldb_testkit::FaultyStore;
//! use std::sync::Arc;
//!
//! let store = FaultyStore::new(Arc::new(InMemoryStore::new()));
//! store.put(b"a", b"1").unwrap();
//!
//! store.fail_writes(true);
//! assert!(store.put(b"b", b"2").is_err());
//! assert_eq!(store.failed_writes(), 1);
//! ```

use parking_lot::Mutex;
use quilldb_storage::{KeyValueStore, StorageError, StorageResult, WriteBatch};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Which upcoming writes fail.
#[derive(Debug, Default)]
struct Plan {
    always: bool,
    /// Writes still let through before failures start.
    pass: Option<usize>,
    /// Failures left once `pass` runs out; `None` fails forever.
    fail: Option<usize>,
}

impl Plan {
    fn next_fails(&mut self) -> bool {
        if self.always {
            return true;
        }
        match (self.pass, self.fail) {
            (None, _) => false,
            (Some(left), _) if left > 0 => {
                self.pass = Some(left - 1);
                false
            }
            (Some(_), None) => true,
            (Some(_), Some(0)) => {
                *self = Self::default();
                false
            }
            (Some(_), Some(left)) => {
                self.fail = Some(left - 1);
                true
            }
        }
    }
}

/// A store wrapper that fails writes on demand.
pub struct FaultyStore {
    inner: Arc<dyn KeyValueStore>,
    plan: Mutex<Plan>,
    writes: AtomicUsize,
    failed: AtomicUsize,
}

impl FaultyStore {
    /// Wraps a store. No faults are armed.
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner,
            plan: Mutex::new(Plan::default()),
            writes: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner
    }

    /// Makes every write fail (or stops doing so).
    pub fn fail_writes(&self, fail: bool) {
        self.plan.lock().always = fail;
    }

    /// Lets the next `pass` writes through and fails every one after.
    pub fn fail_after(&self, pass: usize) {
        let mut plan = self.plan.lock();
        plan.pass = Some(pass);
        plan.fail = None;
    }

    /// Lets `pass` writes through, fails the next `fail`, then heals.
    pub fn fail_window(&self, pass: usize, fail: usize) {
        let mut plan = self.plan.lock();
        plan.pass = Some(pass);
        plan.fail = Some(fail);
    }

    /// Disarms every fault.
    pub fn heal(&self) {
        *self.plan.lock() = Plan::default();
    }

    /// Number of writes that reached the inner store.
    pub fn successful_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of writes that were failed.
    pub fn failed_writes(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for FaultyStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        if self.plan.lock().next_fails() {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.write(batch)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }

    fn commit(&self) -> StorageResult<()> {
        self.inner.commit()
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn is_encrypted(&self) -> bool {
        self.inner.is_encrypted()
    }

    fn compact(&self) -> StorageResult<()> {
        self.inner.compact()
    }
}
