//! Sync status shown to the user.

use crate::network::Connectivity;

/// Combined connectivity and sync status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    /// The last cycle failed as a whole; a retry is pending
    Error,
}

impl SyncState {
    /// Offline wins over everything, then an active cycle, then the last outcome.
    pub const fn resolve(connectivity: Connectivity, syncing: bool, last_cycle_failed: bool) -> Self {
        if !connectivity.is_online() {
            Self::Offline
        } else if syncing {
            Self::Syncing
        } else if last_cycle_failed {
            Self::Error
        } else {
            Self::Synced
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_takes_precedence() {
        assert_eq!(SyncState::resolve(Connectivity::Offline, true, true), SyncState::Offline);
        assert_eq!(SyncState::resolve(Connectivity::Online, true, true), SyncState::Syncing);
        assert_eq!(SyncState::resolve(Connectivity::Online, false, true), SyncState::Error);
        assert_eq!(SyncState::resolve(Connectivity::Online, false, false), SyncState::Synced);
    }
}
