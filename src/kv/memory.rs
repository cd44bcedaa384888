use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::{GraphError, Result};

type Snapshot = Arc<BTreeMap<Vec<u8>, Vec<u8>>>;

/// An ordered, in-memory key-value store with single-writer, atomic
/// multi-key transactions. Conflicts are avoided by serializing writers
/// rather than detected after the fact.
pub struct Kv {
    snapshot: RwLock<Snapshot>,
    writer_lock: Mutex<()>,
    closed: AtomicBool,
    gc_runs: AtomicU64,
}

impl Default for Kv {
    fn default() -> Self {
        Self::new()
    }
}

impl Kv {
    /// Opens a fresh, empty store.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(BTreeMap::new())),
            writer_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            gc_runs: AtomicU64::new(0),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GraphError::StorageClosed);
        }
        Ok(())
    }

    /// Begins a read-only transaction. Reads are served from a cheap
    /// pointer-clone of the current snapshot and never block behind a
    /// concurrent writer.
    pub fn begin_read(&self) -> Result<ReadTxn> {
        self.check_open()?;
        Ok(ReadTxn {
            snapshot: self.snapshot.read().clone(),
        })
    }

    /// Begins a read-write transaction. Acquires the single-writer lock for
    /// the transaction's lifetime; held only around the critical section.
    pub fn begin_write(&self) -> Result<WriteTxn<'_>> {
        self.check_open()?;
        let guard = self.writer_lock.lock();
        let base = self.snapshot.read().clone();
        Ok(WriteTxn {
            kv: self,
            _guard: guard,
            base,
            overlay: BTreeMap::new(),
            done: false,
        })
    }

    /// Flushes to durable storage. No-op for the in-memory backend; present
    /// for interface symmetry with a future on-disk backend.
    pub fn sync(&self) -> Result<()> {
        self.check_open()
    }

    /// Reclaims space from superseded value-log entries. The in-memory
    /// backend has no value log, so this just records that a GC pass ran
    /// (observable via [`Kv::gc_runs`] for tests).
    pub fn run_gc(&self) -> Result<()> {
        self.check_open()?;
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of [`Kv::run_gc`] calls so far, for observability/tests.
    pub fn gc_runs(&self) -> u64 {
        self.gc_runs.load(Ordering::Relaxed)
    }

    /// Marks the store closed; all subsequent transactions fail with
    /// [`GraphError::StorageClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Bulk-loads key/value pairs directly, bypassing transactions. Used by
    /// WAL/snapshot recovery to rebuild the in-memory store on open.
    pub fn bulk_load(&self, entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Result<()> {
        self.check_open()?;
        let _guard = self.writer_lock.lock();
        let mut map = (*self.snapshot.read()).clone();
        for (k, v) in entries {
            map.insert(k, v);
        }
        *self.snapshot.write() = Arc::new(map);
        Ok(())
    }
}

/// A read-only view of the store at a point in time.
pub struct ReadTxn {
    snapshot: Snapshot,
}

impl ReadTxn {
    /// Looks up a single key.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.snapshot.get(key).cloned()
    }

    /// Returns all `(key, value)` pairs whose key starts with `prefix`, in
    /// key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.snapshot
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// True if `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.snapshot.contains_key(key)
    }

    /// Total number of keys in the store.
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    /// True if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}

/// A buffered read-write transaction. Nothing is visible to other readers
/// until [`WriteTxn::commit`] succeeds; `get`/`scan_prefix` observe the
/// transaction's own pending writes (read-your-writes).
pub struct WriteTxn<'kv> {
    kv: &'kv Kv,
    _guard: MutexGuard<'kv, ()>,
    base: Snapshot,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    done: bool,
}

impl<'kv> WriteTxn<'kv> {
    /// Looks up a key, consulting pending writes first.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.overlay.get(key) {
            Some(Some(v)) => Some(v.clone()),
            Some(None) => None,
            None => self.base.get(key).cloned(),
        }
    }

    /// Stages a `put`, visible to subsequent reads in this transaction.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.overlay.insert(key.into(), Some(value.into()));
    }

    /// Stages a `delete`, visible to subsequent reads in this transaction.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.overlay.insert(key.into(), None);
    }

    /// Scans by prefix, merging pending writes over the base snapshot.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .base
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in &self.overlay {
            if !k.starts_with(prefix) {
                continue;
            }
            match v {
                Some(value) => {
                    merged.insert(k.clone(), value.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }
        merged.into_iter().collect()
    }

    /// Atomically applies every staged write. All side effects become
    /// visible to future readers in one step.
    pub fn commit(mut self) -> Result<()> {
        self.kv.check_open()?;
        let mut map = (*self.base).clone();
        for (k, v) in std::mem::take(&mut self.overlay) {
            match v {
                Some(value) => {
                    map.insert(k, value);
                }
                None => {
                    map.remove(&k);
                }
            }
        }
        *self.kv.snapshot.write() = Arc::new(map);
        self.done = true;
        Ok(())
    }

    /// Discards every staged write.
    pub fn rollback(mut self) {
        self.overlay.clear();
        self.done = true;
    }
}

impl<'kv> Drop for WriteTxn<'kv> {
    fn drop(&mut self) {
        // An un-terminated transaction silently rolls back rather than
        // panicking: unlike crate::txn::Transaction (a public API surface
        // where an unterminated transaction is a caller bug worth a loud
        // panic), this type is an internal plumbing detail many call sites
        // construct and drop within a single function body.
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_makes_writes_visible() {
        let kv = Kv::new();
        let mut tx = kv.begin_write().unwrap();
        tx.put(b"a".to_vec(), b"1".to_vec());
        tx.commit().unwrap();

        let read = kv.begin_read().unwrap();
        assert_eq!(read.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_discards_writes() {
        let kv = Kv::new();
        let mut tx = kv.begin_write().unwrap();
        tx.put(b"a".to_vec(), b"1".to_vec());
        tx.rollback();

        let read = kv.begin_read().unwrap();
        assert_eq!(read.get(b"a"), None);
    }

    #[test]
    fn read_your_writes_within_transaction() {
        let kv = Kv::new();
        let mut tx = kv.begin_write().unwrap();
        tx.put(b"a".to_vec(), b"1".to_vec());
        assert_eq!(tx.get(b"a"), Some(b"1".to_vec()));
        tx.delete(b"a".to_vec());
        assert_eq!(tx.get(b"a"), None);
        tx.commit().unwrap();
    }

    #[test]
    fn scan_prefix_merges_overlay_and_base() {
        let kv = Kv::new();
        let mut tx = kv.begin_write().unwrap();
        tx.put(b"n:1".to_vec(), b"alice".to_vec());
        tx.put(b"n:2".to_vec(), b"bob".to_vec());
        tx.commit().unwrap();

        let mut tx2 = kv.begin_write().unwrap();
        tx2.put(b"n:3".to_vec(), b"carol".to_vec());
        tx2.delete(b"n:1".to_vec());
        let scanned = tx2.scan_prefix(b"n:");
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, b"n:2");
        assert_eq!(scanned[1].0, b"n:3");
    }

    #[test]
    fn closed_store_rejects_new_transactions() {
        let kv = Kv::new();
        kv.close();
        assert!(matches!(
            kv.begin_read(),
            Err(GraphError::StorageClosed)
        ));
        assert!(matches!(
            kv.begin_write(),
            Err(GraphError::StorageClosed)
        ));
    }
}
