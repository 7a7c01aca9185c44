//! Creates, names, enumerates, prunes, and restores from checkpoints.
//!
//! A checkpoint is a directory under `<root>/checkpoint/` holding a
//! self-consistent RocksDB checkpoint of the data store (data + meta column
//! families) as of some clock. Names embed a monotonic nanosecond
//! timestamp, so directory-name order is creation order, which is what
//! makes `list`/`latest` a plain sort instead of reading metadata back out
//! of each checkpoint.

use crate::clock::monotonic_nanos;
use crate::error::{CoreError, Result};
use crate::paths::CorePaths;
use rocksdb::checkpoint::Checkpoint;
use rocksdb::DB;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const LOCAL_PREFIX: &str = "local-";
pub const REMOTE_CHECKPOINT_NAME: &str = "remote-checkpoint";
const TMP_SUFFIX: &str = ".tmp";

/// Every RocksDB DB directory has a `CURRENT` file pointing at its active
/// manifest; `prepare_remote_checkpoint` creates an empty directory with
/// none, so its presence is what distinguishes a fully-streamed checkpoint
/// from one `receive_backup` staged but nothing (or not everything) was
/// ever written into.
fn has_db_marker(dir: &Path) -> bool {
    dir.join("CURRENT").is_file()
}

/// Manages the `<root>/checkpoint/` directory tree for one core.
pub struct CheckpointManager {
    dir: PathBuf,
    /// Suppresses `prune` while a transfer is streaming the latest
    /// checkpoint out. A simple mutex-protected bool, per
    /// "Shared resources".
    pinned: Mutex<bool>,
}

impl CheckpointManager {
    pub fn open(paths: &CorePaths) -> Result<Self> {
        std::fs::create_dir_all(paths.checkpoint_dir())?;
        Ok(Self {
            dir: paths.checkpoint_dir(),
            pinned: Mutex::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a new checkpoint directory named `<prefix><monotonic-nanos>`.
    /// Cheap: RocksDB checkpoints are hard-link based when source and
    /// destination share a filesystem.
    pub fn create(&self, db: &DB, prefix: &str) -> Result<String> {
        let name = format!("{prefix}{}", monotonic_nanos());
        let dest = self.dir.join(&name);
        let checkpoint = Checkpoint::new(db)?;
        checkpoint.create_checkpoint(&dest)?;
        Ok(name)
    }

    /// Directory-name order for every non-`.tmp` entry matching `prefix`,
    /// which equals creation order because names embed monotonic
    /// timestamps.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            if name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// The lexicographically largest non-`.tmp` name matching `prefix`.
    pub fn latest(&self, prefix: &str) -> Result<Option<String>> {
        Ok(self.list(prefix)?.pop())
    }

    /// Deletes all but the most recent `keep_count` checkpoints matching
    /// `prefix`, unless `pin()` is currently held.
    pub fn prune(&self, prefix: &str, keep_count: usize) -> Result<()> {
        if *self.pinned.lock().expect("checkpoint pin mutex poisoned") {
            return Ok(());
        }
        let names = self.list(prefix)?;
        if names.len() <= keep_count {
            return Ok(());
        }
        let to_remove = &names[..names.len() - keep_count];
        for name in to_remove {
            let path = self.dir.join(name);
            let tmp_path = self.dir.join(format!("{name}{TMP_SUFFIX}"));
            // Rename-then-delete so a half-deleted directory never looks
            // like a valid checkpoint to `list`/`latest`.
            std::fs::rename(&path, &tmp_path)?;
            std::fs::remove_dir_all(&tmp_path)?;
        }
        Ok(())
    }

    /// Holds (or releases) the prune suppression flag. `StorageCore` calls
    /// this around an outbound `transfer_to` so the checkpoint being
    /// streamed cannot be reaped mid-flight.
    pub fn set_pinned(&self, pinned: bool) {
        *self.pinned.lock().expect("checkpoint pin mutex poisoned") = pinned;
    }

    pub fn is_pinned(&self) -> bool {
        *self.pinned.lock().expect("checkpoint pin mutex poisoned")
    }

    pub fn remote_checkpoint_path(&self) -> PathBuf {
        self.dir.join(REMOTE_CHECKPOINT_NAME)
    }

    /// Recreates an empty `remote-checkpoint` directory, deleting any prior
    /// contents. This is the follower side of `receive_backup`.
    pub fn prepare_remote_checkpoint(&self) -> Result<PathBuf> {
        let path = self.remote_checkpoint_path();
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

/// Atomically swaps the staged `remote-checkpoint` in as the live data
/// directory. Assumes the caller has already closed both the live
/// `DataStore` and the `CheckpointManager`'s handle onto it; the caller
/// reopens both afterward.
pub fn swap_in_remote_checkpoint(paths: &CorePaths) -> Result<()> {
    let live = paths.db_dir();
    let remote = paths.remote_checkpoint_dir();
    if !remote.exists() {
        return Err(CoreError::Corrupt(
            "apply_backup called with no staged remote-checkpoint".to_string(),
        ));
    }
    if !has_db_marker(&remote) {
        return Err(CoreError::Corrupt(
            "apply_backup called with an empty or incomplete remote-checkpoint".to_string(),
        ));
    }

    let will_delete = paths.will_delete_soon(&format!("db-{}", monotonic_nanos()));
    if live.exists() {
        std::fs::rename(&live, &will_delete)?;
    }
    std::fs::rename(&remote, &live)?;
    if will_delete.exists() {
        std::fs::remove_dir_all(&will_delete)?;
    }
    Ok(())
}

/// Crash recovery for a process that died mid-swap: if the
/// live directory is missing and `remote-checkpoint` survived, finish the
/// rename; if the live directory is missing and a `will_delete_soon_*`
/// directory survived instead, put it back.
pub fn recover_from_crash(paths: &CorePaths) -> Result<()> {
    let live = paths.db_dir();
    if live.exists() {
        return Ok(());
    }

    let remote = paths.remote_checkpoint_dir();
    if remote.exists() {
        std::fs::rename(&remote, &live)?;
        return Ok(());
    }

    if let Some(leftover) = find_will_delete_soon(paths)? {
        std::fs::rename(&leftover, &live)?;
    }
    Ok(())
}

fn find_will_delete_soon(paths: &CorePaths) -> Result<Option<PathBuf>> {
    let root = paths.root();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && entry.file_name().to_string_lossy().starts_with("will_delete_soon_")
        {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}
