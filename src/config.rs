use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration recognized by a core, deserializable straight
/// from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Filesystem root for this core's directory.
    pub db_path: PathBuf,
    /// Seconds before a data-namespace value is eligible for reclamation.
    /// `<= 0` disables TTL mode entirely.
    #[serde(default)]
    pub ttl_seconds: i64,
    /// fsync-per-batch on writes.
    #[serde(default = "default_true")]
    pub sync_writes: bool,
    /// Prefer hard-link checkpoints (checkpoint mode) over full-copy backup
    /// mode. Both satisfy the same external contract.
    #[serde(default = "default_true")]
    pub fast_snapshot: bool,
    /// Periodically emit storage statistics via tracing.
    #[serde(default)]
    pub open_statistics_collector: bool,
    /// Interval between statistics emissions, when enabled.
    #[serde(default = "default_statistics_interval")]
    pub statistics_callback_interval_seconds: u64,
    /// Optional directory holding a RocksDB `OPTIONS-<seq>` dump tuning the
    /// data-store instance (see `tuning::base_options`). Unset means the
    /// engine's defaults, tuned by `CoreConfig`'s own fields.
    #[serde(default)]
    pub db_options_file: Option<PathBuf>,
    /// Same as `db_options_file`, for the instruction-log instance.
    #[serde(default)]
    pub log_options_file: Option<PathBuf>,

    #[serde(default)]
    pub checkpoint: CheckpointPolicy,
    #[serde(default)]
    pub replication: ReplicationTimeouts,
    #[serde(default)]
    pub runner: RunnerPolicy,
}

impl CoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ttl_seconds: 0,
            sync_writes: true,
            fast_snapshot: true,
            open_statistics_collector: false,
            statistics_callback_interval_seconds: default_statistics_interval(),
            db_options_file: None,
            log_options_file: None,
            checkpoint: CheckpointPolicy::default(),
            replication: ReplicationTimeouts::default(),
            runner: RunnerPolicy::default(),
        }
    }

    pub fn ttl_enabled(&self) -> bool {
        self.ttl_seconds > 0
    }

    pub fn ttl_nanos(&self) -> u64 {
        if self.ttl_enabled() {
            (self.ttl_seconds as u64).saturating_mul(1_000_000_000)
        } else {
            0
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_statistics_interval() -> u64 {
    60
}

/// Governs when and how many checkpoints are retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// How many local checkpoints to retain on `prune` (`backup()` keeps 3).
    pub keep_count: usize,
    /// Create a checkpoint after every data-namespace flush completes.
    pub create_after_flush: bool,
    /// Create a checkpoint after every data-namespace compaction completes.
    pub create_after_compaction: bool,
    /// Coalescing delay, in milliseconds, the control-plane runner waits
    /// before acting on a flush/compaction notification.
    pub coalesce_delay_ms: u64,
    /// Instruction log entries are range-compacted every time the accepted
    /// clock crosses a multiple of this stride.
    pub instruction_compaction_stride: u64,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            keep_count: 3,
            create_after_flush: true,
            create_after_compaction: true,
            coalesce_delay_ms: 1_000,
            instruction_compaction_stride: 1_000_000,
        }
    }
}

/// Timeouts and chunking for the replication transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTimeouts {
    /// RPC timeout for `receive_backup` / `apply_backup`, in milliseconds.
    pub rpc_timeout_ms: u64,
    /// Maximum bytes read per chunk while streaming a checkpoint file.
    pub file_chunk_bytes: usize,
}

impl Default for ReplicationTimeouts {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 30_000,
            file_chunk_bytes: 64 * 1024,
        }
    }
}

/// Sizing for the control-plane task runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerPolicy {
    /// Bounded channel capacity; submitters never block past this.
    pub queue_capacity: usize,
}

impl Default for RunnerPolicy {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}
