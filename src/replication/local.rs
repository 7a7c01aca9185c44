//! In-process transport that talks directly to another `StorageCore`
//! handle. The default for same-machine multi-core deployments and for
//! tests that don't need real sockets.

use super::transport::{CancelSignal, ReplicationTransport};
use crate::error::{CoreError, Result};
use crate::identity::CoreIdentity;
use crate::storage_core::StorageCore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct LocalTransport {
    follower: Arc<StorageCore>,
}

impl LocalTransport {
    pub fn new(follower: Arc<StorageCore>) -> Self {
        Self { follower }
    }
}

#[async_trait]
impl ReplicationTransport for LocalTransport {
    async fn receive_backup(&self, _target: &CoreIdentity) -> Result<PathBuf> {
        self.follower.receive_backup().await
    }

    async fn apply_backup(&self, _target: &CoreIdentity) -> Result<()> {
        self.follower.apply_backup().await
    }

    async fn stream_file(
        &self,
        _target: &CoreIdentity,
        local_path: &Path,
        remote_relative_path: &Path,
        cancel: CancelSignal,
    ) -> Result<()> {
        if *cancel.borrow() {
            return Err(CoreError::Cancelled);
        }
        let dest = self
            .follower
            .paths()
            .remote_checkpoint_dir()
            .join(remote_relative_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if dest.exists() {
            std::fs::remove_file(&dest)?;
        }
        std::fs::copy(local_path, &dest)?;
        Ok(())
    }
}
