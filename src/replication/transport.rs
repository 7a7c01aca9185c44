//! The abstract replication capability injected into `StorageCore` at
//! construction.

use crate::error::Result;
use crate::identity::CoreIdentity;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Cooperative cancellation signal threaded through a `stream_file` call.
/// Checked between chunks rather than torn down by dropping a future, so a
/// cancelled transfer always leaves the receiver in a well-defined
/// (discardable) partial state.
pub type CancelSignal = watch::Receiver<bool>;

/// The two idempotent follower RPCs plus the one-shot file-streaming
/// primitive, abstracted over whatever channel actually carries them.
#[async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// Asks `target` to (re)create an empty `remote-checkpoint` staging
    /// directory and return its absolute path.
    async fn receive_backup(&self, target: &CoreIdentity) -> Result<PathBuf>;

    /// Asks `target` to atomically adopt its staged `remote-checkpoint` as
    /// its new Data Store.
    async fn apply_backup(&self, target: &CoreIdentity) -> Result<()>;

    /// Streams the single local file at `local_path` to `target`, to be
    /// written at `remote_relative_path` beneath the destination returned
    /// by a prior `receive_backup`. `cancel` is polled between chunks;
    /// observing `true` aborts the stream and returns `CoreError::Cancelled`.
    async fn stream_file(
        &self,
        target: &CoreIdentity,
        local_path: &Path,
        remote_relative_path: &Path,
        cancel: CancelSignal,
    ) -> Result<()>;
}
