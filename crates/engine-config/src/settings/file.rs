use crate::settings::{SettingsError, SyncSettings, SyncSettingsBuilder};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};
use tracing::info;

/// On-disk shape of the settings. Durations are given in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsFile {
    pub max_concurrent_syncs: Option<usize>,
    pub scheduling_delay_ms: Option<u64>,
    pub transient_backoff_ms: Option<u64>,
    pub max_docs_per_mapping: Option<usize>,
    pub scan_batch_size: Option<u32>,
    pub dispatcher_join_timeout_ms: Option<u64>,
    pub mailbox_capacity: Option<usize>,
}

impl From<SettingsFile> for SyncSettingsBuilder {
    fn from(file: SettingsFile) -> Self {
        SyncSettingsBuilder {
            max_concurrent_syncs: file.max_concurrent_syncs,
            scheduling_delay: file.scheduling_delay_ms.map(Duration::from_millis),
            transient_backoff: file.transient_backoff_ms.map(Duration::from_millis),
            max_docs_per_mapping: file.max_docs_per_mapping,
            scan_batch_size: file.scan_batch_size,
            dispatcher_join_timeout: file.dispatcher_join_timeout_ms.map(Duration::from_millis),
            mailbox_capacity: file.mailbox_capacity,
        }
    }
}

impl SyncSettingsBuilder {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let file: SettingsFile = serde_json::from_str(json)?;
        Ok(file.into())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loading synonym sync settings");
        Self::from_json_str(&content)
    }
}

impl SyncSettings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        SyncSettingsBuilder::from_json_str(json)?.build()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        SyncSettingsBuilder::from_file(path)?.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_json() {
        let settings = SyncSettings::from_json_str(
            r#"{
                "maxConcurrentSyncs": 3,
                "schedulingDelayMs": 250,
                "maxDocsPerMapping": 10000
            }"#,
        )
        .unwrap();

        assert_eq!(settings.max_concurrent_syncs(), 3);
        assert_eq!(settings.scheduling_delay, Duration::from_millis(250));
        assert_eq!(settings.transient_backoff, Duration::from_secs(30));
        assert_eq!(settings.max_docs_per_mapping, Some(10000));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = SyncSettings::from_json_str(r#"{"maxConcurentSyncs": 3}"#).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn test_validation_applies_to_files() {
        let err = SyncSettings::from_json_str(r#"{"maxConcurrentSyncs": 0}"#).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"transientBackoffMs": 1500, "scanBatchSize": 64}}"#).unwrap();

        let settings = SyncSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.transient_backoff, Duration::from_millis(1500));
        assert_eq!(settings.scan_batch_size, Some(64));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SyncSettings::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
