//! Background notifications from the data store.
//!
//! RocksDB calls these back from its own background threads, so the
//! listener only ever does one thing: translate the callback into an event
//! and push it onto an unbounded channel. Nothing that can block or fail
//! happens inside the callback itself.

use rocksdb::{BackgroundErrorReason, CompactionJobInfo, FlushJobInfo};
use tokio::sync::mpsc::UnboundedSender;

/// One data-store background notification.
#[derive(Debug, Clone)]
pub enum DataStoreEvent {
    FlushCompleted { namespace: String },
    CompactionCompleted { namespace: String },
    BackgroundError { reason: String, status: String },
}

/// Forwards RocksDB's `EventListener` callbacks onto a channel `StorageCore`
/// owns the receiving end of. This is the only background-error/flush/
/// compaction subscriber in the system.
pub struct StorageEventListener {
    sender: UnboundedSender<DataStoreEvent>,
}

impl StorageEventListener {
    pub fn new(sender: UnboundedSender<DataStoreEvent>) -> Self {
        Self { sender }
    }

    fn emit(&self, event: DataStoreEvent) {
        // A closed receiver means the core is shutting down; there is
        // nothing useful to do with the send failure here.
        let _ = self.sender.send(event);
    }
}

impl rocksdb::EventListener for StorageEventListener {
    fn on_flush_completed(&self, _db: &rocksdb::DB, job: &FlushJobInfo) {
        self.emit(DataStoreEvent::FlushCompleted {
            namespace: job.cf_name().to_string(),
        });
    }

    fn on_compaction_completed(&self, _db: &rocksdb::DB, job: &CompactionJobInfo) {
        self.emit(DataStoreEvent::CompactionCompleted {
            namespace: job.cf_name().to_string(),
        });
    }

    fn on_background_error(
        &self,
        reason: BackgroundErrorReason,
        result: &mut std::result::Result<(), rocksdb::Error>,
    ) {
        let status = match result {
            Ok(()) => "ok".to_string(),
            Err(err) => err.to_string(),
        };
        self.emit(DataStoreEvent::BackgroundError {
            reason: format!("{reason:?}"),
            status,
        });
    }
}
