use std::path::{Path, PathBuf};

/// The on-disk layout rooted at one core's directory. Every subsystem asks
/// `CorePaths` for its directory rather than constructing paths inline, so
/// the layout only needs to be correct in one place.
#[derive(Debug, Clone)]
pub struct CorePaths {
    root: PathBuf,
}

impl CorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    pub fn db_wal_dir(&self) -> PathBuf {
        self.db_dir().join("wal")
    }

    pub fn instruction_dir(&self) -> PathBuf {
        self.root.join("instruction")
    }

    pub fn instruction_wal_dir(&self) -> PathBuf {
        self.instruction_dir().join("wal")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join("checkpoint")
    }

    pub fn remote_checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir().join("remote-checkpoint")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backup")
    }

    /// `will_delete_soon_<name>`, the transient name the apply-backup swap
    /// renames the live data directory to before replacing it. Kept next
    /// to `db_dir` (same parent) so the rename is a plain directory-entry
    /// rename, never a cross-filesystem copy.
    pub fn will_delete_soon(&self, name: &str) -> PathBuf {
        self.root.join(format!("will_delete_soon_{name}"))
    }

    /// Creates every directory this layout requires, idempotently.
    pub fn ensure_created(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.db_wal_dir())?;
        std::fs::create_dir_all(self.instruction_wal_dir())?;
        std::fs::create_dir_all(self.checkpoint_dir())?;
        std::fs::create_dir_all(self.backup_dir())?;
        Ok(())
    }
}
