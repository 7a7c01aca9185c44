use serde::{Deserialize, Serialize};

/// Identifies one core: which unit it belongs to, which key range it owns
/// within that unit, a human label for logging/thread-pool naming, and the
/// network location peers use to reach it.
///
/// Used to target replication RPCs and to name per-core thread pools and
/// log spans, never to look anything up from a global registry: every
/// subsystem that needs a peer core is handed one explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoreIdentity {
    pub mpu_id: String,
    pub core_id: String,
    pub label: String,
    pub network_location: String,
}

impl CoreIdentity {
    pub fn new(
        mpu_id: impl Into<String>,
        core_id: impl Into<String>,
        label: impl Into<String>,
        network_location: impl Into<String>,
    ) -> Self {
        Self {
            mpu_id: mpu_id.into(),
            core_id: core_id.into(),
            label: label.into(),
            network_location: network_location.into(),
        }
    }

    /// A short identifier suitable for tracing spans and thread names.
    pub fn tag(&self) -> String {
        format!("{}/{}", self.mpu_id, self.core_id)
    }
}

impl std::fmt::Display for CoreIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}@{})", self.tag(), self.label, self.network_location)
    }
}
