//! Replicated per-core storage engine: a durable key-value store where
//! each "core" owns a key range, persists a monotonically increasing
//! logical clock alongside its data, records every mutation as a
//! replayable instruction, and synchronizes state to follower cores via
//! consistent on-disk snapshots transferred over the network.
//!
//! The crate is organized as five components (`instruction_log`,
//! `data_store`, `checkpoint`, `replication`, `storage_core`) behind the
//! `storage_core::StorageCore` facade, plus the ambient `error`, `clock`,
//! `identity`, `paths`, and `config` modules they share.

pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod data_store;
pub mod error;
pub mod identity;
pub mod instruction_log;
pub mod paths;
pub mod replication;
pub mod storage_core;
mod tuning;

pub use config::{CheckpointPolicy, CoreConfig, ReplicationTimeouts, RunnerPolicy};
pub use error::{CoreError, Result};
pub use identity::CoreIdentity;
pub use paths::CorePaths;
pub use storage_core::{Instruction, Role, RoleEvent, StorageCore, Writer};
