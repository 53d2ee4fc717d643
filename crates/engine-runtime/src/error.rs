use engine_core::error::SyncError;
use model::core::identifiers::MappingId;
use thiserror::Error;

/// Common error type for all actors in the engine.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Mailbox closed")]
    MailboxClosed,
}

/// Why the dispatcher refused a sync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("synonym manager is shut down")]
    ShutDown,

    /// The mapping's queued sync was cancelled and has not been popped yet.
    #[error("synonym mapping {0} has been cancelled")]
    Cancelled(MappingId),

    #[error("synonym mapping {0} is already enqueued")]
    AlreadyScheduled(MappingId),
}

/// Final failure of a dispatched sync.
#[derive(Debug, Clone, Error)]
pub enum TaskFailure {
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The task panicked. Carries the panic message when it was a string.
    #[error("synonym sync panicked: {0}")]
    Panicked(String),
}

impl TaskFailure {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TaskFailure::Sync(e) if e.is_shutdown())
    }
}
