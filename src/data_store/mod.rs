mod events;
mod ttl;

pub use events::{DataStoreEvent, StorageEventListener};

use crate::error::{CoreError, Result};
use crate::paths::CorePaths;
use rocksdb::{ColumnFamilyDescriptor, Options, ReadOptions, WriteBatch as RocksWriteBatch, DB};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub const DATA_CF: &str = "data";
pub const META_CF: &str = "meta";

/// The two logical namespaces a data store exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Data,
    Meta,
}

impl Namespace {
    fn cf_name(self) -> &'static str {
        match self {
            Namespace::Data => DATA_CF,
            Namespace::Meta => META_CF,
        }
    }
}

/// One put or delete inside an atomic batch. Every write goes through a
/// batch — there is no standalone single-key write path — so atomicity
/// is structural rather than a rule callers have to follow.
pub enum BatchOp {
    Put {
        namespace: Namespace,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        namespace: Namespace,
        key: Vec<u8>,
    },
}

/// Durable key-value namespace holding user data plus the "meta" namespace
/// that persists the applied clock.
pub struct DataStore {
    db: Arc<DB>,
    ttl_enabled: bool,
    sync_writes: bool,
}

impl DataStore {
    /// Opens (creating if needed) the data store rooted at
    /// `paths.db_dir()`, with its WAL placed at `paths.db_wal_dir()`.
    ///
    /// Returns the store along with the receiving end of its background
    /// event channel; the caller (`StorageCore`) owns that receiver for the
    /// lifetime of the store.
    pub fn open(
        paths: &CorePaths,
        ttl_seconds: i64,
        sync_writes: bool,
    ) -> Result<(Self, UnboundedReceiver<DataStoreEvent>)> {
        Self::open_tuned(paths, ttl_seconds, sync_writes, None)
    }

    /// Same as `open`, but loads its base `Options` from `options_dir`
    /// (`CoreConfig::db_options_file`) instead of RocksDB's compiled-in
    /// defaults, when given.
    pub fn open_tuned(
        paths: &CorePaths,
        ttl_seconds: i64,
        sync_writes: bool,
        options_dir: Option<&std::path::Path>,
    ) -> Result<(Self, UnboundedReceiver<DataStoreEvent>)> {
        let dir = paths.db_dir();
        let wal_dir = paths.db_wal_dir();
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(&wal_dir)?;

        let ttl_enabled = ttl_seconds > 0;
        let ttl_nanos = if ttl_enabled {
            (ttl_seconds as u64).saturating_mul(1_000_000_000)
        } else {
            0
        };

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = Arc::new(StorageEventListener::new(tx));

        let mut data_opts = Options::default();
        if ttl_enabled {
            data_opts.set_compaction_filter("ttl-expiry", ttl::make_compaction_filter(ttl_nanos));
        }
        let data_cf = ColumnFamilyDescriptor::new(DATA_CF, data_opts);
        let meta_cf = ColumnFamilyDescriptor::new(META_CF, Options::default());

        let mut opts = crate::tuning::base_options(options_dir)?;
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_wal_dir(wal_dir.to_string_lossy().as_ref());
        opts.set_event_listener(listener);

        let db = DB::open_cf_descriptors(&opts, &dir, vec![data_cf, meta_cf])?;

        Ok((
            Self {
                db: Arc::new(db),
                ttl_enabled,
                sync_writes,
            },
            rx,
        ))
    }

    fn cf(&self, ns: Namespace) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(ns.cf_name())
            .ok_or_else(|| CoreError::Corrupt(format!("missing column family {}", ns.cf_name())))
    }

    /// Point read. Returns the logical value with any TTL suffix stripped.
    pub fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(ns)?;
        let stored = self.db.get_cf(cf, key)?;
        Ok(stored.map(|bytes| ttl::decode_from_storage(&bytes, self.ttl_enabled)))
    }

    /// Raw read of the meta namespace's reserved clock key, without TTL
    /// decoding — used internally when the caller wants the stored bytes
    /// verbatim (e.g. the checkpoint fidelity check, which re-derives the
    /// clock the same way a fresh open would).
    pub fn get_raw(&self, ns: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(ns)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    /// Snapshot-isolated, restartable, finite ordered scan over `[lo, hi)`
    /// (bounds adjustable via `include_lo`/`include_hi`).
    pub fn scan(
        &self,
        ns: Namespace,
        lo: Bound<Vec<u8>>,
        hi: Bound<Vec<u8>>,
    ) -> Result<DataStoreScan<'_>> {
        let cf = self.cf(ns)?;
        let snapshot = self.db.snapshot();

        let mut ro = ReadOptions::default();
        ro.set_snapshot(&snapshot);
        if let Some(lower) = lower_bound_bytes(&lo) {
            ro.set_iterate_lower_bound(lower);
        }
        if let Some(upper) = upper_bound_bytes(&hi) {
            ro.set_iterate_upper_bound(upper);
        }

        let iter = self
            .db
            .iterator_cf_opt(cf, ro, rocksdb::IteratorMode::Start);

        Ok(DataStoreScan {
            iter,
            _snapshot: snapshot,
            ttl_enabled: self.ttl_enabled,
        })
    }

    /// Atomically applies every op in `ops`: either all are durable, or
    /// none are.
    pub fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = RocksWriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    let cf = self.cf(namespace)?;
                    let stored = ttl::encode_for_storage(&value, self.ttl_enabled);
                    batch.put_cf(cf, key, stored);
                }
                BatchOp::Delete { namespace, key } => {
                    let cf = self.cf(namespace)?;
                    batch.delete_cf(cf, key);
                }
            }
        }
        let mut wo = rocksdb::WriteOptions::default();
        wo.set_sync(self.sync_writes);
        self.db.write_opt(batch, &wo)?;
        Ok(())
    }

    /// May under/over-report; backed by RocksDB's own live estimates.
    pub fn approximate_count(&self, ns: Namespace) -> Result<u64> {
        let cf = self.cf(ns)?;
        Ok(self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }

    /// May under/over-report; backed by RocksDB's own live estimates.
    pub fn approximate_size(&self, ns: Namespace) -> Result<u64> {
        let cf = self.cf(ns)?;
        Ok(self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-live-data-size")?
            .unwrap_or(0))
    }

    /// Hints background compaction on both namespaces.
    pub fn compact(&self) -> Result<()> {
        for ns in [Namespace::Data, Namespace::Meta] {
            let cf = self.cf(ns)?;
            self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    /// Forces all prior writes durable.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// The underlying handle, used by `CheckpointManager` to take RocksDB
    /// checkpoints.
    pub fn raw(&self) -> &DB {
        &self.db
    }

    pub fn ttl_enabled(&self) -> bool {
        self.ttl_enabled
    }
}

fn lower_bound_bytes(bound: &Bound<Vec<u8>>) -> Option<Vec<u8>> {
    match bound {
        Bound::Included(bytes) => Some(bytes.clone()),
        Bound::Excluded(bytes) => Some(exclusive_successor(bytes)),
        Bound::Unbounded => None,
    }
}

fn upper_bound_bytes(bound: &Bound<Vec<u8>>) -> Option<Vec<u8>> {
    match bound {
        Bound::Included(bytes) => Some(exclusive_successor(bytes)),
        Bound::Excluded(bytes) => Some(bytes.clone()),
        Bound::Unbounded => None,
    }
}

/// The lexicographically smallest byte string strictly greater than
/// `bytes` — appending a zero byte is always correct for this because any
/// string is strictly less than itself-plus-anything.
fn exclusive_successor(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out.push(0);
    out
}

/// A lazy, restartable, snapshot-isolated scan over one namespace.
pub struct DataStoreScan<'a> {
    iter: rocksdb::DBIteratorWithThreadMode<'a, DB>,
    _snapshot: rocksdb::Snapshot<'a>,
    ttl_enabled: bool,
}

impl<'a> Iterator for DataStoreScan<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.iter.next()?;
        Some(next.map_err(CoreError::from).map(|(key, value)| {
            let value = ttl::decode_from_storage(&value, self.ttl_enabled);
            (key.to_vec(), value)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path, ttl_seconds: i64) -> (DataStore, UnboundedReceiver<DataStoreEvent>) {
        let paths = CorePaths::new(dir);
        DataStore::open(&paths, ttl_seconds, true).unwrap()
    }

    #[test]
    fn batch_write_is_visible_after_return() {
        let dir = tempdir().unwrap();
        let (store, _rx) = open(dir.path(), 0);
        store
            .write_batch(vec![BatchOp::Put {
                namespace: Namespace::Data,
                key: b"k1".to_vec(),
                value: b"v1".to_vec(),
            }])
            .unwrap();
        assert_eq!(store.get(Namespace::Data, b"k1").unwrap().unwrap(), b"v1");
    }

    #[test]
    fn scan_respects_inclusive_exclusive_bounds() {
        let dir = tempdir().unwrap();
        let (store, _rx) = open(dir.path(), 0);
        let ops = (0..5u8)
            .map(|i| BatchOp::Put {
                namespace: Namespace::Data,
                key: vec![i],
                value: vec![i],
            })
            .collect();
        store.write_batch(ops).unwrap();

        let keys: Vec<u8> = store
            .scan(
                Namespace::Data,
                Bound::Included(vec![1]),
                Bound::Excluded(vec![4]),
            )
            .unwrap()
            .map(|entry| entry.unwrap().0[0])
            .collect();
        assert_eq!(keys, vec![1, 2, 3]);

        let keys_inclusive_hi: Vec<u8> = store
            .scan(
                Namespace::Data,
                Bound::Included(vec![1]),
                Bound::Included(vec![4]),
            )
            .unwrap()
            .map(|entry| entry.unwrap().0[0])
            .collect();
        assert_eq!(keys_inclusive_hi, vec![1, 2, 3, 4]);
    }

    #[test]
    fn meta_namespace_survives_ttl_round_trip() {
        let dir = tempdir().unwrap();
        let (store, _rx) = open(dir.path(), 1);
        store
            .write_batch(vec![BatchOp::Put {
                namespace: Namespace::Meta,
                key: crate::clock::CLOCK_K.to_vec(),
                value: crate::clock::encode_clock(5).to_vec(),
            }])
            .unwrap();
        let read = store.get(Namespace::Meta, crate::clock::CLOCK_K).unwrap().unwrap();
        assert_eq!(crate::clock::decode_clock(&read), Some(5));
    }
}
