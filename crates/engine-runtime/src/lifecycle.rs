use std::fmt;

/// Lifecycle of one synonym mapping as its manager sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Initializing,
    SyncEnqueued,
    InitialSync,
    Ready,
    ReadyUpdating,
    /// Broken source data. Still watched, so a fix heals the mapping.
    Invalid,
    Shutdown,
    Failed,
}

impl LifecycleState {
    /// No sync is ever scheduled again from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Shutdown | LifecycleState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::SyncEnqueued => "SYNC_ENQUEUED",
            LifecycleState::InitialSync => "INITIAL_SYNC",
            LifecycleState::Ready => "READY",
            LifecycleState::ReadyUpdating => "READY_UPDATING",
            LifecycleState::Invalid => "INVALID",
            LifecycleState::Shutdown => "SHUTDOWN",
            LifecycleState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
