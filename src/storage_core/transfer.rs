//! Transfer orchestration.

use crate::checkpoint::{self, CheckpointManager, LOCAL_PREFIX};
use crate::data_store::{DataStore, DataStoreEvent};
use crate::error::Result;
use crate::identity::CoreIdentity;
use crate::paths::CorePaths;
use crate::replication::{CancelSignal, ReplicationTransport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Primary-side happy path: a fresh local
/// checkpoint pinned for the duration of the transfer, every file in it
/// streamed to `follower`, then the follower told to swap it in.
pub async fn transfer_to(
    checkpoints: &CheckpointManager,
    data_store: &DataStore,
    transport: &dyn ReplicationTransport,
    follower: &CoreIdentity,
    cancel: CancelSignal,
) -> Result<()> {
    let name = checkpoints.create(data_store.raw(), LOCAL_PREFIX)?;
    checkpoints.set_pinned(true);
    let result = ship_checkpoint(checkpoints, &name, transport, follower, cancel).await;
    checkpoints.set_pinned(false);
    result
}

async fn ship_checkpoint(
    checkpoints: &CheckpointManager,
    name: &str,
    transport: &dyn ReplicationTransport,
    follower: &CoreIdentity,
    cancel: CancelSignal,
) -> Result<()> {
    transport.receive_backup(follower).await?;
    let checkpoint_dir = checkpoints.dir().join(name);
    for entry in walk_files(&checkpoint_dir)? {
        let relative = entry
            .strip_prefix(&checkpoint_dir)
            .expect("walked entry is under checkpoint_dir")
            .to_path_buf();
        transport
            .stream_file(follower, &entry, &relative, cancel.clone())
            .await?;
    }
    transport.apply_backup(follower).await
}

fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Follower-side atomic swap. Returns the reopened
/// store and its fresh event channel; the caller is responsible for
/// retiring whatever task was consuming the previous channel.
pub fn apply_backup_swap(
    paths: &CorePaths,
    old_store: Arc<DataStore>,
    ttl_seconds: i64,
    sync_writes: bool,
) -> Result<(DataStore, UnboundedReceiver<DataStoreEvent>)> {
    drop(old_store);
    checkpoint::swap_in_remote_checkpoint(paths)?;
    DataStore::open(paths, ttl_seconds, sync_writes)
}
