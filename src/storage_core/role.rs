//! Role state machine.
//!
//! Role changes are driven externally (by a cluster membership /
//! leader-election module this crate treats as an external collaborator)
//! and delivered to whoever subscribes on this core as a tagged variant
//! over a broadcast channel, rather than through listener objects.

use tokio::sync::broadcast;

/// `{idle -> primary -> (losing_primary) -> back|mirror -> primary -> ...}`.
/// Only `Primary` may accept writes; `Back` and `Mirror`
/// may serve reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Idle,
    Primary,
    Back,
    Mirror,
}

impl Role {
    pub fn can_write(self) -> bool {
        matches!(self, Role::Primary)
    }
}

/// One role transition notification. `BecamePrimary` carries the accept
/// clock (`tick`) at the moment of transition, since a subscriber
/// replaying unapplied instructions needs to know the upper bound of the
/// replay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleEvent {
    BecamePrimary { clock: u64 },
    BecameBack,
    BecameMirror,
    LostPrimary,
}

/// Broadcasts `RoleEvent`s to every subscriber; holds the current role so
/// late subscribers can ask `StorageCore::role()` without waiting for a
/// transition.
pub struct RoleState {
    current: std::sync::Mutex<Role>,
    sender: broadcast::Sender<RoleEvent>,
}

impl RoleState {
    pub fn new() -> Self {
        let (sender, _rx) = broadcast::channel(64);
        Self {
            current: std::sync::Mutex::new(Role::Idle),
            sender,
        }
    }

    pub fn current(&self) -> Role {
        *self.current.lock().expect("role mutex poisoned")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoleEvent> {
        self.sender.subscribe()
    }

    /// Records the transition and broadcasts its event(s). Leaving `Primary`
    /// for `Back`/`Mirror` broadcasts `LostPrimary` as an intermediate step
    /// before the destination role's own event, rather than replacing it: a
    /// subscriber that only sees `LostPrimary` would have no way to learn
    /// which role the core actually landed in. Returns the final, landed-in
    /// event so the caller can act on it synchronously too (e.g. trigger a
    /// replay) without needing its own subscription.
    pub fn transition(&self, new_role: Role, tick: u64) -> RoleEvent {
        let previous = {
            let mut current = self.current.lock().expect("role mutex poisoned");
            let previous = *current;
            *current = new_role;
            previous
        };

        let final_event = match (previous, new_role) {
            (_, Role::Primary) => RoleEvent::BecamePrimary { clock: tick },
            (_, Role::Back) => RoleEvent::BecameBack,
            (_, Role::Mirror) => RoleEvent::BecameMirror,
            (_, Role::Idle) => RoleEvent::LostPrimary,
        };

        // No active subscribers is not an error; the event is still the
        // return value callers act on directly.
        if previous == Role::Primary && matches!(new_role, Role::Back | Role::Mirror) {
            let _ = self.sender.send(RoleEvent::LostPrimary);
        }
        let _ = self.sender.send(final_event);
        final_event
    }
}

impl Default for RoleState {
    fn default() -> Self {
        Self::new()
    }
}
