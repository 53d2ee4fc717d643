use crate::error::{BackendError, MappingError, SyncError, SyncErrorKind, codes};
use tracing::warn;

/// Kind of sync failure a backend error amounts to.
pub fn classify_backend_error(err: &BackendError) -> SyncErrorKind {
    match err {
        BackendError::Command { code, .. } => classify_code(*code),
        BackendError::Network(_) => SyncErrorKind::Transient,
        BackendError::Decode(_) => SyncErrorKind::Transient,
        BackendError::NoShardFound(_) => SyncErrorKind::Transient,
        BackendError::Unhealthy(_) => SyncErrorKind::Transient,
        BackendError::Interrupted => SyncErrorKind::Shutdown,
    }
}

pub fn classify_mapping_error(err: &MappingError) -> SyncErrorKind {
    match err {
        MappingError::InvalidDocument(_) => SyncErrorKind::Invalid,
        MappingError::Build(_) => SyncErrorKind::Transient,
        MappingError::UnknownMapping(_) => SyncErrorKind::Failed,
        MappingError::NotReady { .. } => SyncErrorKind::Transient,
    }
}

fn classify_code(code: i32) -> SyncErrorKind {
    if code == codes::NAMESPACE_NOT_FOUND {
        return SyncErrorKind::Dropped;
    }

    if codes::RETRYABLE.contains(&code) || codes::RESCAN.contains(&code) {
        return SyncErrorKind::Transient;
    }

    // Unrecognised codes are retried like the known transient ones.
    warn!(code, "unknown error code from backend");
    SyncErrorKind::Transient
}

impl From<BackendError> for SyncError {
    fn from(err: BackendError) -> Self {
        match classify_backend_error(&err) {
            SyncErrorKind::Shutdown => SyncError::shutdown(),
            SyncErrorKind::Dropped => SyncError::dropped(),
            kind => SyncError::new(kind, err.to_string()),
        }
    }
}

impl From<MappingError> for SyncError {
    fn from(err: MappingError) -> Self {
        match &err {
            MappingError::NotReady { .. } => SyncError::transient("Mapping not ready"),
            MappingError::Build(reason) => {
                warn!(reason = %reason, "synonym map build failed");
                SyncError::new(classify_mapping_error(&err), err.to_string())
            }
            _ => SyncError::new(classify_mapping_error(&err), err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SynonymStatus;

    #[test]
    fn namespace_not_found_is_dropped() {
        let err = SyncError::from(BackendError::command(codes::NAMESPACE_NOT_FOUND, "ns missing"));
        assert_eq!(err.kind(), SyncErrorKind::Dropped);
        assert_eq!(err.message(), "collection dropped");
    }

    #[test]
    fn rescan_and_retryable_codes_are_transient() {
        for code in codes::RESCAN.iter().chain(codes::RETRYABLE) {
            let err = BackendError::command(*code, "boom");
            assert_eq!(classify_backend_error(&err), SyncErrorKind::Transient, "code {code}");
        }
    }

    #[test]
    fn unknown_codes_are_transient() {
        let err = SyncError::from(BackendError::command(424242, "mystery"));
        assert_eq!(err.kind(), SyncErrorKind::Transient);
        assert_eq!(err.message(), "Command failed with code 424242: mystery");
    }

    #[test]
    fn interruption_is_shutdown() {
        assert!(SyncError::from(BackendError::Interrupted).is_shutdown());
    }

    #[test]
    fn sharded_startup_quirks_are_transient() {
        for err in [
            BackendError::NoShardFound("router".into()),
            BackendError::Decode("bad change event".into()),
            BackendError::Unhealthy("shard count mismatch".into()),
        ] {
            assert_eq!(classify_backend_error(&err), SyncErrorKind::Transient);
        }
    }

    #[test]
    fn mapping_errors() {
        let invalid = SyncError::from(MappingError::InvalidDocument(
            "\"synonyms\" is required".into(),
        ));
        assert_eq!(invalid.kind(), SyncErrorKind::Invalid);
        assert_eq!(
            invalid.message(),
            "failed to analyze string in synonym document: \"synonyms\" is required"
        );

        let build = SyncError::from(MappingError::Build("io".into()));
        assert_eq!(build.kind(), SyncErrorKind::Transient);
        assert_eq!(build.message(), "failed to build synonym map");

        let unknown = SyncError::from(MappingError::UnknownMapping("words".into()));
        assert_eq!(unknown.kind(), SyncErrorKind::Failed);

        let not_ready = SyncError::from(MappingError::NotReady {
            name: "words".into(),
            status: SynonymStatus::InitialSync,
        });
        assert_eq!(not_ready.kind(), SyncErrorKind::Transient);
        assert_eq!(not_ready.message(), "Mapping not ready");
    }
}
