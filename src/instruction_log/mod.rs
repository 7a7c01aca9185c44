//! Durable ordered map from logical clock to opaque instruction bytes.
//! Backed by a dedicated `rocksdb::DB`, distinct from the
//! data store, rooted at `<root>/instruction`.

use crate::clock::{decode_clock, encode_clock, CLOCK_K};
use crate::error::Result;
use crate::paths::CorePaths;
use rocksdb::{Options, WriteBatch, WriteOptions, DB};
use std::path::Path;

/// Durable, append-only, clock-ordered instruction log.
///
/// Every method that mutates state returns only after RocksDB has
/// acknowledged the write is in its own WAL; `flush()` additionally forces
/// an `fsync` so the caller can rely on durability across process crashes.
pub struct InstructionLog {
    db: DB,
    sync_writes: bool,
}

impl InstructionLog {
    /// Opens (creating if needed) the instruction log rooted at
    /// `paths.instruction_dir()`, with its WAL placed at
    /// `paths.instruction_wal_dir()`.
    pub fn open(paths: &CorePaths, sync_writes: bool) -> Result<Self> {
        Self::open_tuned(paths, sync_writes, None)
    }

    /// Same as `open`, but loads its base `Options` from `options_dir`
    /// (`CoreConfig::log_options_file`) instead of RocksDB's compiled-in
    /// defaults, when given.
    pub fn open_tuned(
        paths: &CorePaths,
        sync_writes: bool,
        options_dir: Option<&Path>,
    ) -> Result<Self> {
        Self::open_at(
            &paths.instruction_dir(),
            &paths.instruction_wal_dir(),
            sync_writes,
            options_dir,
        )
    }

    fn open_at(dir: &Path, wal_dir: &Path, sync_writes: bool, options_dir: Option<&Path>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        std::fs::create_dir_all(wal_dir)?;

        let mut opts = crate::tuning::base_options(options_dir)?;
        opts.create_if_missing(true);
        opts.set_wal_dir(wal_dir.to_string_lossy().as_ref());

        let db = DB::open(&opts, dir)?;
        Ok(Self { db, sync_writes })
    }

    fn write_opts(&self, force_sync: bool) -> WriteOptions {
        let mut wo = WriteOptions::default();
        wo.set_sync(self.sync_writes || force_sync);
        wo
    }

    /// Appends (or overwrites) the instruction stored at `clock`.
    pub fn put(&self, clock: u64, payload: &[u8]) -> Result<()> {
        self.db
            .put_opt(encode_clock(clock), payload, &self.write_opts(false))?;
        Ok(())
    }

    /// Returns the exact bytes previously `put` at `clock`, or `None`.
    pub fn get(&self, clock: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(encode_clock(clock))?)
    }

    /// Idempotent tombstone: removing an absent clock is not an error.
    pub fn delete(&self, clock: u64) -> Result<()> {
        self.db
            .delete_opt(encode_clock(clock), &self.write_opts(false))?;
        Ok(())
    }

    /// Removes every key in the half-open range `[lo, hi)`. A single
    /// physical range operation because keys are big-endian encoded, so
    /// lexical and numeric order coincide.
    pub fn delete_range(&self, lo: u64, hi: u64) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete_range(encode_clock(lo), encode_clock(hi));
        self.db.write_opt(batch, &self.write_opts(false))?;
        Ok(())
    }

    /// Reads the reserved `CLOCK_K` entry: the highest clock this core has
    /// *accepted* into the log (`tick`). Missing key reads as 0.
    pub fn read_tick(&self) -> Result<u64> {
        match self.db.get(CLOCK_K)? {
            Some(bytes) => Ok(decode_clock(&bytes).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Writes the reserved `CLOCK_K` entry.
    pub fn write_tick(&self, clock: u64) -> Result<()> {
        self.db
            .put_opt(CLOCK_K, encode_clock(clock), &self.write_opts(true))?;
        Ok(())
    }

    /// Forces every prior `put`/`delete` to be durable.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Every `(clock, payload)` pair with `clock` in the inclusive range
    /// `[lo, hi]`, in clock order. Used to compute the unapplied-instruction
    /// replay window on transition into `primary`.
    pub fn scan_range(&self, lo: u64, hi: u64) -> Result<Vec<(u64, Vec<u8>)>> {
        if lo > hi {
            return Ok(Vec::new());
        }
        let mut ro = rocksdb::ReadOptions::default();
        ro.set_iterate_lower_bound(encode_clock(lo));
        // upper bound is exclusive; `hi` is inclusive, so bump by one.
        if let Some(upper) = hi.checked_add(1) {
            ro.set_iterate_upper_bound(encode_clock(upper));
        }
        let iter = self.db.iterator_opt(rocksdb::IteratorMode::Start, ro);
        let mut out = Vec::new();
        for entry in iter {
            let (key, value) = entry?;
            if key.as_ref() == CLOCK_K {
                continue;
            }
            if key.len() != 8 {
                continue;
            }
            let mut clock_bytes = [0u8; 8];
            clock_bytes.copy_from_slice(&key);
            out.push((u64::from_be_bytes(clock_bytes), value.to_vec()));
        }
        Ok(out)
    }

    /// Hints background compaction over the full key range. Invoked
    /// periodically by `StorageCore`'s maintenance timer and also whenever
    /// `clear_clock` crosses a compaction stride.
    pub fn compact(&self) {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> InstructionLog {
        InstructionLog::open_at(&dir.join("instruction"), &dir.join("instruction/wal"), true, None)
            .unwrap()
    }

    #[test]
    fn put_get_round_trip() {
        let dir = tempdir().unwrap();
        let log = open(dir.path());
        log.put(1, b"alpha").unwrap();
        log.put(2, b"beta").unwrap();
        assert_eq!(log.get(1).unwrap().unwrap(), b"alpha");
        assert_eq!(log.get(2).unwrap().unwrap(), b"beta");
        assert_eq!(log.get(3).unwrap(), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let log = open(dir.path());
        log.put(7, b"x").unwrap();
        log.delete(7).unwrap();
        log.delete(7).unwrap();
        assert_eq!(log.get(7).unwrap(), None);
    }

    #[test]
    fn delete_range_is_half_open() {
        let dir = tempdir().unwrap();
        let log = open(dir.path());
        for clock in 0..10u64 {
            log.put(clock, b"v").unwrap();
        }
        log.delete_range(2, 5).unwrap();
        for clock in 2..5u64 {
            assert_eq!(log.get(clock).unwrap(), None);
        }
        assert!(log.get(1).unwrap().is_some());
        assert!(log.get(5).unwrap().is_some());
    }

    #[test]
    fn tick_round_trips_and_defaults_to_zero() {
        let dir = tempdir().unwrap();
        let log = open(dir.path());
        assert_eq!(log.read_tick().unwrap(), 0);
        log.write_tick(42).unwrap();
        assert_eq!(log.read_tick().unwrap(), 42);
    }
}
