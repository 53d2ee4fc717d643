use crate::registry::SynonymStatus;
use model::core::mark::OperationTime;
use std::fmt;
use thiserror::Error;

/// Closed classification carried by every failed synonym sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    /// The source collection holds more documents than a mapping may have.
    FieldExceeded,
    /// A source document is malformed.
    Invalid,
    /// Cooperative cancellation.
    Shutdown,
    /// Retryable infrastructure hiccup.
    Transient,
    /// The source collection does not exist.
    Dropped,
    /// Anything unexpected; fatal to the mapping.
    Failed,
}

impl SyncErrorKind {
    pub const ALL: [SyncErrorKind; 6] = [
        SyncErrorKind::FieldExceeded,
        SyncErrorKind::Invalid,
        SyncErrorKind::Shutdown,
        SyncErrorKind::Transient,
        SyncErrorKind::Dropped,
        SyncErrorKind::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::FieldExceeded => "FIELD_EXCEEDED",
            SyncErrorKind::Invalid => "INVALID",
            SyncErrorKind::Shutdown => "SHUTDOWN",
            SyncErrorKind::Transient => "TRANSIENT",
            SyncErrorKind::Dropped => "DROPPED",
            SyncErrorKind::Failed => "FAILED",
        }
    }

    /// Whether a failure of this kind leaves a previously built artifact untouched.
    pub fn preserves_artifact(&self) -> bool {
        matches!(self, SyncErrorKind::Shutdown | SyncErrorKind::Transient)
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified synonym sync failure, optionally paired with the operation
/// time the failing sync had reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SyncError {
    kind: SyncErrorKind,
    message: String,
    operation_time: Option<OperationTime>,
}

impl SyncError {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation_time: None,
        }
    }

    pub fn shutdown() -> Self {
        Self::new(SyncErrorKind::Shutdown, "shutting down")
    }

    pub fn dropped() -> Self {
        Self::new(SyncErrorKind::Dropped, "collection dropped")
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Transient, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Invalid, message)
    }

    pub fn field_exceeded(count: usize, max: usize) -> Self {
        Self::new(
            SyncErrorKind::FieldExceeded,
            format!("Synonym document field limit exceeded: {count} > {max}"),
        )
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Failed, message)
    }

    /// Attaches an operation time unless the error already carries one.
    pub fn with_operation_time(mut self, operation_time: Option<OperationTime>) -> Self {
        if self.operation_time.is_none() {
            self.operation_time = operation_time;
        }
        self
    }

    pub fn kind(&self) -> SyncErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn operation_time(&self) -> Option<OperationTime> {
        self.operation_time
    }

    pub fn is_shutdown(&self) -> bool {
        self.kind == SyncErrorKind::Shutdown
    }
}

/// Backend error codes the sync engine reacts to.
pub mod codes {
    pub const HOST_UNREACHABLE: i32 = 6;
    pub const HOST_NOT_FOUND: i32 = 7;
    pub const NAMESPACE_NOT_FOUND: i32 = 26;
    pub const CURSOR_NOT_FOUND: i32 = 43;
    pub const STALE_SHARD_VERSION: i32 = 63;
    pub const SHARD_NOT_FOUND: i32 = 70;
    pub const NETWORK_TIMEOUT: i32 = 89;
    pub const SHUTDOWN_IN_PROGRESS: i32 = 91;
    pub const FAILED_TO_SATISFY_READ_PREFERENCE: i32 = 133;
    pub const CAPPED_POSITION_LOST: i32 = 136;
    pub const STALE_EPOCH: i32 = 150;
    pub const QUERY_PLAN_KILLED: i32 = 175;
    pub const PRIMARY_STEPPED_DOWN: i32 = 189;
    pub const RETRY_CHANGE_STREAM: i32 = 234;
    pub const EXCEEDED_TIME_LIMIT: i32 = 262;
    pub const CHANGE_STREAM_FATAL_ERROR: i32 = 280;
    pub const CHANGE_STREAM_HISTORY_LOST: i32 = 286;
    pub const SOCKET_EXCEPTION: i32 = 9001;
    pub const NOT_WRITABLE_PRIMARY: i32 = 10107;
    pub const INTERRUPTED_AT_SHUTDOWN: i32 = 11600;
    pub const INTERRUPTED_DUE_TO_REPL_STATE_CHANGE: i32 = 11602;
    pub const STALE_CONFIG: i32 = 13388;
    pub const NOT_PRIMARY_NO_SECONDARY_OK: i32 = 13435;
    pub const NOT_PRIMARY_OR_SECONDARY: i32 = 13436;

    /// Codes the driver would retry on its own.
    pub const RETRYABLE: &[i32] = &[
        HOST_UNREACHABLE,
        HOST_NOT_FOUND,
        STALE_SHARD_VERSION,
        NETWORK_TIMEOUT,
        SHUTDOWN_IN_PROGRESS,
        FAILED_TO_SATISFY_READ_PREFERENCE,
        STALE_EPOCH,
        PRIMARY_STEPPED_DOWN,
        RETRY_CHANGE_STREAM,
        EXCEEDED_TIME_LIMIT,
        SOCKET_EXCEPTION,
        NOT_WRITABLE_PRIMARY,
        INTERRUPTED_AT_SHUTDOWN,
        INTERRUPTED_DUE_TO_REPL_STATE_CHANGE,
        STALE_CONFIG,
        NOT_PRIMARY_NO_SECONDARY_OK,
        NOT_PRIMARY_OR_SECONDARY,
    ];

    /// Codes that leave the mapping intact but force a collection scan next.
    pub const RESCAN: &[i32] = &[
        CURSOR_NOT_FOUND,
        CAPPED_POSITION_LOST,
        CHANGE_STREAM_FATAL_ERROR,
        CHANGE_STREAM_HISTORY_LOST,
        QUERY_PLAN_KILLED,
        SHARD_NOT_FOUND,
    ];
}

/// Errors surfaced by a backend client or one of its cursors.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The server rejected a command.
    #[error("Command failed with code {code}: {message}")]
    Command { code: i32, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// A server response could not be decoded.
    #[error("Failed to decode server response: {0}")]
    Decode(String),

    /// A router could not resolve a shard. Seen while sharded clusters start up.
    #[error("No shard found: {0}")]
    NoShardFound(String),

    /// The cluster failed the pre-scan topology check.
    #[error("Cluster health check failed: {0}")]
    Unhealthy(String),

    #[error("Operation interrupted")]
    Interrupted,
}

impl BackendError {
    pub fn command(code: i32, message: impl Into<String>) -> Self {
        BackendError::Command {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            BackendError::Command { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors raised while building or reading synonym mappings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("failed to analyze string in synonym document: {0}")]
    InvalidDocument(String),

    #[error("failed to build synonym map")]
    Build(String),

    #[error("synonym mapping {0:?} does not exist")]
    UnknownMapping(String),

    #[error("synonym mapping {name:?} is not ready: {status}")]
    NotReady { name: String, status: SynonymStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn kinds_have_distinct_names() {
        let names: HashSet<_> = SyncErrorKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), SyncErrorKind::ALL.len());
    }

    #[test]
    fn only_shutdown_and_transient_preserve_artifacts() {
        let preserving: Vec<_> = SyncErrorKind::ALL
            .into_iter()
            .filter(SyncErrorKind::preserves_artifact)
            .collect();
        assert_eq!(
            preserving,
            vec![SyncErrorKind::Shutdown, SyncErrorKind::Transient]
        );
    }

    #[test]
    fn existing_operation_time_wins() {
        let first = OperationTime::new(10, 0);
        let second = OperationTime::new(20, 0);

        let err = SyncError::invalid("bad")
            .with_operation_time(Some(first))
            .with_operation_time(Some(second));
        assert_eq!(err.operation_time(), Some(first));

        let err = SyncError::dropped().with_operation_time(None);
        assert_eq!(err.operation_time(), None);
    }

    #[test]
    fn field_exceeded_message() {
        let err = SyncError::field_exceeded(6, 4);
        assert_eq!(err.kind(), SyncErrorKind::FieldExceeded);
        assert_eq!(err.to_string(), "Synonym document field limit exceeded: 6 > 4");
    }

    #[test]
    fn rescan_codes_are_not_retryable_codes() {
        for code in codes::RESCAN {
            assert!(!codes::RETRYABLE.contains(code));
        }
        assert!(!codes::RETRYABLE.contains(&codes::NAMESPACE_NOT_FOUND));
    }
}
