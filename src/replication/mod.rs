//! Replication Transport Adapter: the two follower RPCs
//! (`receive_backup`, `apply_backup`) plus the one-shot file-streaming
//! primitive, behind an `async_trait` injected into `StorageCore` at
//! construction rather than looked up from a global registry.

mod local;
mod tcp;
mod transport;

pub use local::LocalTransport;
pub use tcp::{serve, TcpTransport};
pub use transport::{CancelSignal, ReplicationTransport};
