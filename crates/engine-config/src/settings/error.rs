use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating synonym sync settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A setting holds a value outside its allowed range.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// An environment variable could not be parsed.
    #[error("Invalid environment variable {key}={value:?}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },

    /// A `.env` file line is not `KEY=VALUE`.
    #[error("Invalid env file {path}: {reason} at line {line}")]
    MalformedEnvFile {
        path: PathBuf,
        line: usize,
        reason: &'static str,
    },

    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
