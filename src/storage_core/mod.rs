//! `StorageCore`, the public facade of the crate: holds handles to all
//! four other subsystems, serializes control-plane work through a
//! single-producer task runner, drives clock advancement, and orchestrates
//! `transfer_to`.

mod role;
mod runner;
mod transfer;
mod writer;

pub use role::{Role, RoleEvent};
pub use writer::{Instruction, Writer};

use crate::checkpoint::{self, CheckpointManager, LOCAL_PREFIX};
use crate::clock::{decode_clock, encode_clock, CLOCK_K};
use crate::config::CoreConfig;
use crate::data_store::{BatchOp, DataStore, DataStoreEvent, Namespace, DATA_CF};
use crate::error::{CoreError, Result};
use crate::identity::CoreIdentity;
use crate::instruction_log::InstructionLog;
use crate::paths::CorePaths;
use crate::replication::{CancelSignal, ReplicationTransport};
use role::RoleState;
use runner::TaskRunner;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;

const INSTRUCTION_LOG_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct StorageCore {
    identity: CoreIdentity,
    config: CoreConfig,
    paths: CorePaths,
    instruction_log: InstructionLog,
    data_store: RwLock<Arc<DataStore>>,
    checkpoints: CheckpointManager,
    runner: TaskRunner,
    role: RoleState,
    transport: Arc<dyn ReplicationTransport>,
    event_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    maintenance_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    statistics_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    destroyed: AtomicBool,
    /// Held for read by every `flush` and for write by `set_role` whenever
    /// it transitions away from `Primary`, so a transition away from
    /// primary cannot return until every flush that observed `can_write()`
    /// has either committed or not yet started.
    flush_barrier: RwLock<()>,
    pending_replay: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl StorageCore {
    /// Opens (creating if needed) a core rooted at `config.db_path`,
    /// recovering from any crash mid-`apply_backup` first.
    pub async fn open(
        identity: CoreIdentity,
        config: CoreConfig,
        transport: Arc<dyn ReplicationTransport>,
    ) -> Result<Arc<Self>> {
        let paths = CorePaths::new(config.db_path.clone());
        paths.ensure_created()?;
        checkpoint::recover_from_crash(&paths)?;

        let instruction_log = InstructionLog::open_tuned(
            &paths,
            config.sync_writes,
            config.log_options_file.as_deref(),
        )?;
        let (data_store, rx) = DataStore::open_tuned(
            &paths,
            config.ttl_seconds,
            config.sync_writes,
            config.db_options_file.as_deref(),
        )?;
        let checkpoints = CheckpointManager::open(&paths)?;
        let runner = TaskRunner::new(config.runner.queue_capacity);

        let core = Arc::new(Self {
            identity,
            config,
            paths,
            instruction_log,
            data_store: RwLock::new(Arc::new(data_store)),
            checkpoints,
            runner,
            role: RoleState::new(),
            transport,
            event_task: Mutex::new(None),
            maintenance_task: Mutex::new(None),
            statistics_task: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            flush_barrier: RwLock::new(()),
            pending_replay: Mutex::new(Vec::new()),
        });
        Arc::clone(&core).spawn_event_wiring(rx);
        Arc::clone(&core).spawn_instruction_log_maintenance();
        if core.config.open_statistics_collector {
            Arc::clone(&core).spawn_statistics_collector();
        }
        Ok(core)
    }

    fn ensure_not_destroyed(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CoreError::Destroyed);
        }
        Ok(())
    }

    pub fn identity(&self) -> &CoreIdentity {
        &self.identity
    }

    pub fn paths(&self) -> &CorePaths {
        &self.paths
    }

    // -- reads -----------------------------------------------------------

    /// A read handle. Snapshot isolation comes from the Data Store's own
    /// scan primitive, so no locking is required beyond the brief read-lock
    /// needed to clone the current `Arc<DataStore>` (held only for the
    /// duration of `apply_backup`'s swap).
    pub async fn reader(&self) -> Arc<DataStore> {
        self.data_store.read().await.clone()
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.reader().await.get(Namespace::Data, key)
    }

    // -- writes ------------------------------------------------------------

    pub fn writer(&self, instruction: Instruction) -> Writer {
        Writer::new(instruction)
    }

    /// Atomic commit: the writer's batch plus
    /// `put(meta, CLOCK_K, encode(clock))`, written as one Data Store batch.
    ///
    /// Holds `flush_barrier` for read over the role check and the write
    /// itself, so a concurrent `set_role` transitioning away from `Primary`
    /// cannot return while this call is still in flight.
    pub async fn flush(&self, mut writer: Writer) -> Result<()> {
        self.ensure_not_destroyed()?;
        let _barrier = self.flush_barrier.read().await;
        if !self.role.current().can_write() {
            return Err(CoreError::Config(
                "flush called while core is not primary".to_string(),
            ));
        }
        let clock = writer.instruction().clock;
        writer.ops.push(BatchOp::Put {
            namespace: Namespace::Meta,
            key: CLOCK_K.to_vec(),
            value: encode_clock(clock).to_vec(),
        });
        self.reader().await.write_batch(writer.ops)?;
        Ok(())
    }

    // -- clock bookkeeping -------------------------------------------------

    /// Records that `clock` has been accepted into the instruction log.
    pub fn tick(&self, clock: u64) -> Result<()> {
        self.ensure_not_destroyed()?;
        self.instruction_log.write_tick(clock)
    }

    pub fn save_instruction(&self, clock: u64, payload: &[u8]) -> Result<()> {
        self.ensure_not_destroyed()?;
        self.instruction_log.put(clock, payload)
    }

    pub fn reappear_instruction(&self, clock: u64) -> Result<Option<Vec<u8>>> {
        self.instruction_log.get(clock)
    }

    /// Removes the logged instruction at `clock`; every time `clock` crosses
    /// a multiple of `instruction_compaction_stride` (default one million)
    /// also range-deletes `[0, clock)`.
    pub fn clear_clock(&self, clock: u64) -> Result<()> {
        self.ensure_not_destroyed()?;
        self.instruction_log.delete(clock)?;
        let stride = self.config.checkpoint.instruction_compaction_stride;
        if stride > 0 && clock > 0 && clock % stride == 0 {
            self.instruction_log.delete_range(0, clock)?;
            self.instruction_log.compact();
        }
        Ok(())
    }

    /// The highest clock durably applied to the data store. Missing key
    /// reads as 0.
    pub async fn clocked(&self) -> Result<u64> {
        let value = self.reader().await.get(Namespace::Meta, CLOCK_K)?;
        Ok(value.as_deref().and_then(decode_clock).unwrap_or(0))
    }

    /// The highest clock accepted into the instruction log.
    pub fn clock(&self) -> Result<u64> {
        self.instruction_log.read_tick()
    }

    pub async fn approximate_count(&self) -> Result<u64> {
        self.reader().await.approximate_count(Namespace::Data)
    }

    pub async fn approximate_size(&self) -> Result<u64> {
        self.reader().await.approximate_size(Namespace::Data)
    }

    // -- checkpoints / transfer ---------------------------------------------

    /// Creates a new local checkpoint and prunes to
    /// `config.checkpoint.keep_count`.
    pub async fn backup(&self) -> Result<()> {
        self.ensure_not_destroyed()?;
        let store = self.reader().await;
        self.checkpoints.create(store.raw(), LOCAL_PREFIX)?;
        self.checkpoints
            .prune(LOCAL_PREFIX, self.config.checkpoint.keep_count)?;
        Ok(())
    }

    /// Primary-side transfer.
    pub async fn transfer_to(&self, follower: &CoreIdentity, cancel: CancelSignal) -> Result<()> {
        self.ensure_not_destroyed()?;
        let store = self.reader().await;
        transfer::transfer_to(
            &self.checkpoints,
            &store,
            self.transport.as_ref(),
            follower,
            cancel,
        )
        .await
    }

    /// Follower-side entry point: (re)creates an empty `remote-checkpoint`
    /// staging directory and returns its absolute path.
    pub async fn receive_backup(&self) -> Result<std::path::PathBuf> {
        self.ensure_not_destroyed()?;
        self.checkpoints.prepare_remote_checkpoint()
    }

    /// Follower-side entry point: atomically adopts `remote-checkpoint` as
    /// the new Data Store. Fails cleanly
    /// if there is no staged checkpoint, so a second call after the first
    /// succeeded (and consumed `remote-checkpoint`) does not corrupt the
    /// result it already applied.
    pub async fn apply_backup(self: Arc<Self>) -> Result<()> {
        self.ensure_not_destroyed()?;
        let mut guard = self.data_store.write().await;
        let old = Arc::clone(&guard);
        let (new_store, new_rx) = transfer::apply_backup_swap(
            &self.paths,
            old,
            self.config.ttl_seconds,
            self.config.sync_writes,
        )?;
        *guard = Arc::new(new_store);
        drop(guard);
        Arc::clone(&self).spawn_event_wiring(new_rx);
        Ok(())
    }

    // -- role ---------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.role.current()
    }

    pub fn subscribe_role_events(&self) -> broadcast::Receiver<RoleEvent> {
        self.role.subscribe()
    }

    /// Drives the role transition table. Transitioning into
    /// `Primary` computes the unapplied-instruction replay window
    /// (`clocked() < clock <= tick()`); the caller drains it with
    /// `take_pending_replay`.
    ///
    /// Transitioning away from `Primary` first takes `flush_barrier` for
    /// write, which waits for every `flush` already past its role check to
    /// finish committing before the role actually flips. A caller that sees
    /// this return knows no write made under the old primacy is still in
    /// flight.
    pub async fn set_role(&self, new_role: Role) -> Result<RoleEvent> {
        self.ensure_not_destroyed()?;
        let leaving_primary = self.role.current() == Role::Primary && new_role != Role::Primary;
        let _barrier = if leaving_primary {
            Some(self.flush_barrier.write().await)
        } else {
            None
        };
        let tick = self.clock()?;
        let event = self.role.transition(new_role, tick);
        if matches!(event, RoleEvent::BecamePrimary { .. }) {
            let clocked = self.clocked().await?;
            if clocked < tick {
                let window = self.instruction_log.scan_range(clocked + 1, tick)?;
                *self.pending_replay.lock().expect("pending replay mutex poisoned") = window;
            }
        }
        Ok(event)
    }

    // -- shutdown -------------------------------------------------------------

    /// Closes the core for further operations. Background tasks are
    /// stopped; the on-disk directory is deliberately NOT deleted, since
    /// other handles may still have it open for a pending operation.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        if let Some(handle) = self
            .event_task
            .lock()
            .expect("event task mutex poisoned")
            .take()
        {
            handle.abort();
        }
        if let Some(handle) = self
            .maintenance_task
            .lock()
            .expect("maintenance task mutex poisoned")
            .take()
        {
            handle.abort();
        }
        if let Some(handle) = self
            .statistics_task
            .lock()
            .expect("statistics task mutex poisoned")
            .take()
        {
            handle.abort();
        }
    }

    // -- background event wiring ---------------------------------------------

    /// Consumes data-store background events: a flush completion
    /// coalesces for `coalesce_delay_ms`, flushes meta, then backs up; a
    /// compaction completion coalesces then backs up.
    fn spawn_event_wiring(self: Arc<Self>, mut rx: UnboundedReceiver<DataStoreEvent>) {
        let core = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    DataStoreEvent::FlushCompleted { namespace }
                        if namespace == DATA_CF && core.config.checkpoint.create_after_flush =>
                    {
                        let core = Arc::clone(&core);
                        let _ = core.runner.submit(async move {
                            tokio::time::sleep(std::time::Duration::from_millis(
                                core.config.checkpoint.coalesce_delay_ms,
                            ))
                            .await;
                            if let Err(err) = core.reader().await.flush() {
                                tracing::error!(error = %err, "meta flush after data flush failed");
                                return;
                            }
                            if let Err(err) = core.backup().await {
                                tracing::error!(error = %err, "backup after flush failed");
                            }
                        });
                    }
                    DataStoreEvent::CompactionCompleted { namespace }
                        if namespace == DATA_CF
                            && core.config.checkpoint.create_after_compaction =>
                    {
                        let core = Arc::clone(&core);
                        let _ = core.runner.submit(async move {
                            tokio::time::sleep(std::time::Duration::from_millis(
                                core.config.checkpoint.coalesce_delay_ms,
                            ))
                            .await;
                            if let Err(err) = core.backup().await {
                                tracing::error!(error = %err, "backup after compaction failed");
                            }
                        });
                    }
                    DataStoreEvent::BackgroundError { reason, status } => {
                        tracing::error!(%reason, %status, "data store background error");
                    }
                    _ => {}
                }
            }
        });

        let mut slot = self.event_task.lock().expect("event task mutex poisoned");
        if let Some(prior) = slot.take() {
            prior.abort();
        }
        *slot = Some(handle);
    }

    /// Periodically compacts the instruction log. The instruction log has
    /// no compaction filter of its own, so without this it only ever
    /// shrinks at `clear_clock`'s stride boundaries.
    fn spawn_instruction_log_maintenance(self: Arc<Self>) {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(INSTRUCTION_LOG_MAINTENANCE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.instruction_log.compact();
            }
        });
        *self
            .maintenance_task
            .lock()
            .expect("maintenance task mutex poisoned") = Some(handle);
    }

    /// When `open_statistics_collector` is set, emits a `tracing` event
    /// every `statistics_callback_interval_seconds` with the data store's
    /// approximate key count and size plus the instruction log's accepted
    /// and applied clocks.
    fn spawn_statistics_collector(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.statistics_callback_interval_seconds.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let count = self.approximate_count().await.unwrap_or(0);
                let size = self.approximate_size().await.unwrap_or(0);
                let tick = self.clock().unwrap_or(0);
                let clocked = self.clocked().await.unwrap_or(0);
                tracing::info!(
                    core = %self.identity.tag(),
                    approximate_count = count,
                    approximate_size = size,
                    tick,
                    clocked,
                    "storage core statistics"
                );
            }
        });
        *self
            .statistics_task
            .lock()
            .expect("statistics task mutex poisoned") = Some(handle);
    }

    /// The instructions with `clocked() < clock <= tick()` computed on the
    /// most recent transition into `Primary`, for the caller to replay.
    pub fn take_pending_replay(&self) -> Vec<(u64, Vec<u8>)> {
        std::mem::take(
            &mut *self
                .pending_replay
                .lock()
                .expect("pending replay mutex poisoned"),
        )
    }
}
