//! End-to-end coverage of `StorageCore`, exercised through the public
//! facade rather than any one subsystem in isolation.

use rangecore::replication::{LocalTransport, ReplicationTransport};
use rangecore::{CoreConfig, CoreIdentity, Instruction, Role, StorageCore};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::watch;

fn identity(label: &str) -> CoreIdentity {
    CoreIdentity::new("mpu-0", "core-0", label, "local")
}

async fn open_core(root: &std::path::Path) -> Arc<StorageCore> {
    open_core_with(root, CoreConfig::new(root))
}

async fn open_core_with(root: &std::path::Path, mut config: CoreConfig) -> Arc<StorageCore> {
    config.db_path = root.to_path_buf();
    StorageCore::open(identity("primary"), config, no_transport())
        .await
        .unwrap()
}

fn no_transport() -> Arc<dyn ReplicationTransport> {
    struct Unreachable;

    #[async_trait::async_trait]
    impl ReplicationTransport for Unreachable {
        async fn receive_backup(
            &self,
            _target: &CoreIdentity,
        ) -> rangecore::Result<std::path::PathBuf> {
            unreachable!("test never transfers through this handle")
        }
        async fn apply_backup(&self, _target: &CoreIdentity) -> rangecore::Result<()> {
            unreachable!("test never transfers through this handle")
        }
        async fn stream_file(
            &self,
            _target: &CoreIdentity,
            _local_path: &std::path::Path,
            _remote_relative_path: &std::path::Path,
            _cancel: rangecore::replication::CancelSignal,
        ) -> rangecore::Result<()> {
            unreachable!("test never transfers through this handle")
        }
    }

    Arc::new(Unreachable)
}

async fn put(core: &StorageCore, clock: u64, key: &str, value: &str) {
    core.set_role(Role::Primary).await.unwrap();
    core.save_instruction(clock, value.as_bytes()).unwrap();
    core.tick(clock).unwrap();
    let mut writer = core.writer(Instruction {
        clock,
        payload: value.as_bytes().to_vec(),
    });
    writer.put(key.as_bytes(), value.as_bytes());
    core.flush(writer).await.unwrap();
    core.clear_clock(clock).unwrap();
}

// The accepted clock (`clock()`) never decreases and always reflects
// the highest `tick` recorded.
#[tokio::test]
async fn clock_is_monotonic_and_durable() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;

    for clock in [1u64, 2, 5, 9] {
        put(&core, clock, "k", "v").await;
        assert_eq!(core.clock().unwrap(), clock);
    }
    assert_eq!(core.clocked().await.unwrap(), 9);
}

// A flush either lands the data write and the clock update together, or
// neither does. We can't inject a mid-batch crash here, but we can assert
// that after `flush` both halves are visible in the same read.
#[tokio::test]
async fn flush_commits_data_and_clock_atomically() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;

    put(&core, 3, "alpha", "beta").await;

    assert_eq!(core.get(b"alpha").await.unwrap().unwrap(), b"beta");
    assert_eq!(core.clocked().await.unwrap(), 3);
}

// Instructions round-trip through the log until explicitly cleared.
#[tokio::test]
async fn instruction_round_trips_until_cleared() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;

    core.set_role(Role::Primary).await.unwrap();
    core.save_instruction(11, b"payload").unwrap();
    core.tick(11).unwrap();
    assert_eq!(
        core.reappear_instruction(11).unwrap().unwrap(),
        b"payload".to_vec()
    );

    core.clear_clock(11).unwrap();
    assert_eq!(core.reappear_instruction(11).unwrap(), None);
}

// A write attempted while not primary is rejected outright.
#[tokio::test]
async fn flush_rejected_while_not_primary() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;

    let mut writer = core.writer(Instruction {
        clock: 1,
        payload: Vec::new(),
    });
    writer.put(b"k".to_vec(), b"v".to_vec());
    let err = core.flush(writer).await.unwrap_err();
    assert!(matches!(err, rangecore::CoreError::Config(_)));
}

// A flush already past its role check commits rather than being silently
// dropped by a transition away from Primary racing it.
#[tokio::test]
async fn flush_racing_loss_of_primary_still_commits() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;
    core.set_role(Role::Primary).await.unwrap();

    let flush_core = Arc::clone(&core);
    let flush_task = tokio::spawn(async move {
        let mut writer = flush_core.writer(Instruction {
            clock: 1,
            payload: Vec::new(),
        });
        writer.put(b"k".to_vec(), b"v".to_vec());
        flush_core.flush(writer).await
    });
    tokio::task::yield_now().await;

    core.set_role(Role::Back).await.unwrap();
    flush_task.await.unwrap().unwrap();

    assert_eq!(core.get(b"k").await.unwrap().unwrap(), b"v");
}

// Transitioning into primary past an untouched gap computes a replay window
// covering exactly the unapplied clocks.
#[tokio::test]
async fn becoming_primary_computes_replay_window() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;

    core.set_role(Role::Primary).await.unwrap();
    for clock in 1..=5u64 {
        core.save_instruction(clock, format!("v{clock}").as_bytes())
            .unwrap();
        core.tick(clock).unwrap();
    }
    // Only clock 1 and 2 were ever applied to the data store.
    for clock in 1..=2u64 {
        let mut writer = core.writer(Instruction {
            clock,
            payload: Vec::new(),
        });
        writer.put(format!("k{clock}").as_bytes(), b"v");
        core.flush(writer).await.unwrap();
    }

    core.set_role(Role::Back).await.unwrap();
    core.set_role(Role::Primary).await.unwrap();

    let window = core.take_pending_replay();
    let clocks: Vec<u64> = window.iter().map(|(clock, _)| *clock).collect();
    assert_eq!(clocks, vec![3, 4, 5]);

    // Draining is one-shot.
    assert!(core.take_pending_replay().is_empty());
}

// A checkpoint created via `backup()` preserves every key present at the
// time it was taken.
#[tokio::test]
async fn backup_creates_a_restorable_checkpoint() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;

    put(&core, 1, "k1", "v1").await;
    put(&core, 2, "k2", "v2").await;
    core.backup().await.unwrap();

    let checkpoints = core.paths().checkpoint_dir();
    let entries: Vec<_> = std::fs::read_dir(&checkpoints)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("local-"))
        .collect();
    assert_eq!(entries.len(), 1);
}

// Transferring a checkpoint to a follower and applying it is idempotent —
// a second `apply_backup` after the staging directory was already
// consumed fails cleanly instead of silently corrupting state.
#[tokio::test]
async fn transfer_to_follower_and_apply_is_idempotent() {
    let primary_dir = tempdir().unwrap();
    let follower_dir = tempdir().unwrap();

    let follower = open_core(follower_dir.path()).await;
    let primary_transport = Arc::new(LocalTransport::new(Arc::clone(&follower)));
    let primary = StorageCore::open(
        identity("primary"),
        CoreConfig::new(primary_dir.path()),
        primary_transport,
    )
    .await
    .unwrap();

    put(&primary, 1, "k1", "v1").await;
    put(&primary, 2, "k2", "v2").await;

    let (_tx, cancel) = watch::channel(false);
    let peer = identity("follower");
    primary.transfer_to(&peer, cancel).await.unwrap();

    assert_eq!(follower.get(b"k1").await.unwrap().unwrap(), b"v1");
    assert_eq!(follower.get(b"k2").await.unwrap().unwrap(), b"v2");
    assert_eq!(follower.clocked().await.unwrap(), 2);

    // Nothing is staged anymore; a stray second call must fail, not corrupt.
    assert!(follower.apply_backup().await.is_err());
    assert_eq!(follower.get(b"k1").await.unwrap().unwrap(), b"v1");
}

// `receive_backup` alone only (re)creates an empty `remote-checkpoint`
// staging directory; calling `apply_backup` before anything is streamed
// into it must fail instead of swapping in an empty store and silently
// discarding whatever the live directory held.
#[tokio::test]
async fn apply_backup_rejects_empty_remote_checkpoint() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;

    put(&core, 1, "k1", "v1").await;

    core.receive_backup().await.unwrap();
    assert!(core.apply_backup().await.is_err());
    assert_eq!(core.get(b"k1").await.unwrap().unwrap(), b"v1");
}

// A checkpoint pinned for an in-flight transfer survives a concurrent
// `backup()`'s prune.
#[tokio::test]
async fn pin_protects_checkpoint_during_transfer() {
    let primary_dir = tempdir().unwrap();
    let follower_dir = tempdir().unwrap();

    let follower = open_core(follower_dir.path()).await;
    let primary_transport = Arc::new(LocalTransport::new(Arc::clone(&follower)));
    let mut config = CoreConfig::new(primary_dir.path());
    config.checkpoint.keep_count = 0;
    let primary = StorageCore::open(identity("primary"), config, primary_transport)
        .await
        .unwrap();

    put(&primary, 1, "k1", "v1").await;

    let (_tx, cancel) = watch::channel(false);
    primary
        .transfer_to(&identity("follower"), cancel)
        .await
        .unwrap();

    // backup() with keep_count 0 would normally prune everything; the
    // transfer already released its pin by the time it returns, so this is
    // really just confirming transfer_to doesn't leave the pin stuck.
    primary.backup().await.unwrap();
    let remaining = std::fs::read_dir(primary.paths().checkpoint_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("local-"))
        .count();
    assert_eq!(remaining, 0);
}

// Scenario: a follower that crashes mid-swap recovers cleanly on reopen.
#[tokio::test]
async fn crash_mid_swap_recovers_on_reopen() {
    let follower_dir = tempdir().unwrap();
    let follower_root = follower_dir.path();

    {
        let follower = open_core(follower_root).await;
        put(&follower, 1, "k1", "v1").await;
        follower.destroy();
    }

    // Simulate a crash that happened after the live dir was renamed aside
    // but before the remote-checkpoint rename landed, by staging a
    // `will_delete_soon_*` directory ourselves.
    let paths = rangecore::CorePaths::new(follower_root);
    let live = paths.db_dir();
    let parked = paths.will_delete_soon("db-simulated");
    std::fs::rename(&live, &parked).unwrap();
    assert!(!live.exists());

    // Reopening runs recovery, which should put the live directory back.
    let recovered = open_core(follower_root).await;
    assert_eq!(recovered.get(b"k1").await.unwrap().unwrap(), b"v1");
}

// Role transitions broadcast the expected events to every subscriber.
#[tokio::test]
async fn role_transitions_broadcast_expected_events() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;
    let mut events = core.subscribe_role_events();

    core.tick(4).unwrap();
    let event = core.set_role(Role::Primary).await.unwrap();
    assert!(matches!(
        event,
        rangecore::RoleEvent::BecamePrimary { clock: 4 }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        rangecore::RoleEvent::BecamePrimary { clock: 4 }
    ));

    // Leaving Primary broadcasts LostPrimary as an intermediate step, then
    // the destination role's own event; the call itself returns the event
    // for the role the core actually landed in, not the intermediate one.
    let event = core.set_role(Role::Back).await.unwrap();
    assert!(matches!(event, rangecore::RoleEvent::BecameBack));
    assert!(matches!(
        events.recv().await.unwrap(),
        rangecore::RoleEvent::LostPrimary
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        rangecore::RoleEvent::BecameBack
    ));
}

// TTL mode expires data-namespace entries while leaving the meta clock
// readable (ttl suffix applies to meta too, but meta is never compacted
// away — see data_store::tests::meta_namespace_survives_ttl_round_trip for
// the unit-level guarantee this scenario depends on).
#[tokio::test]
async fn ttl_mode_round_trips_meta_clock() {
    let dir = tempdir().unwrap();
    let mut config = CoreConfig::new(dir.path());
    config.ttl_seconds = 3600;
    let core = open_core_with(dir.path(), config).await;

    put(&core, 1, "k1", "v1").await;
    assert_eq!(core.get(b"k1").await.unwrap().unwrap(), b"v1");
    assert_eq!(core.clocked().await.unwrap(), 1);
}

// A destroyed core fails every subsequent mutating call rather than
// quietly doing nothing.
#[tokio::test]
async fn destroyed_core_rejects_further_operations() {
    let dir = tempdir().unwrap();
    let core = open_core(dir.path()).await;
    core.destroy();

    let err = core.tick(1).unwrap_err();
    assert!(matches!(err, rangecore::CoreError::Destroyed));

    let err = core.backup().await.unwrap_err();
    assert!(matches!(err, rangecore::CoreError::Destroyed));
}
