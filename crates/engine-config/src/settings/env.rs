use crate::settings::{SettingsError, SyncSettingsBuilder};
use std::{collections::HashMap, fs, path::Path, str::FromStr, time::Duration};
use tracing::debug;

pub const ENV_PREFIX: &str = "SYNONYM_SYNC_";

/// Settings overrides collected from the process environment and optional
/// `.env` files. Only `SYNONYM_SYNC_*` variables are kept.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    vars: HashMap<String, String>,
}

impl EnvOverrides {
    pub fn from_system() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars
                .into_iter()
                .filter(|(key, _)| key.starts_with(ENV_PREFIX))
                .collect(),
        }
    }

    /// Loads variables from a `.env` file. Values already present win.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(SettingsError::MalformedEnvFile {
                    path: path.to_path_buf(),
                    line: index + 1,
                    reason: "expected KEY=VALUE",
                });
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(SettingsError::MalformedEnvFile {
                    path: path.to_path_buf(),
                    line: index + 1,
                    reason: "empty key",
                });
            }

            if key.starts_with(ENV_PREFIX) {
                self.vars
                    .entry(key.to_string())
                    .or_insert_with(|| unquote(value).to_string());
            }
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(&format!("{ENV_PREFIX}{name}")).map(String::as_str)
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, SettingsError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.get(name) else {
            return Ok(None);
        };

        raw.trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| SettingsError::InvalidEnv {
                key: format!("{ENV_PREFIX}{name}"),
                value: raw.to_string(),
                reason: e.to_string(),
            })
    }

    fn parse_millis(&self, name: &str) -> Result<Option<Duration>, SettingsError> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_millis))
    }

    /// Overrides every field of `builder` that has a matching variable.
    pub fn apply(&self, builder: SyncSettingsBuilder) -> Result<SyncSettingsBuilder, SettingsError> {
        let overrides = SyncSettingsBuilder {
            max_concurrent_syncs: self.parse("MAX_CONCURRENT_SYNCS")?,
            scheduling_delay: self.parse_millis("SCHEDULING_DELAY_MS")?,
            transient_backoff: self.parse_millis("TRANSIENT_BACKOFF_MS")?,
            max_docs_per_mapping: self.parse("MAX_DOCS_PER_MAPPING")?,
            scan_batch_size: self.parse("SCAN_BATCH_SIZE")?,
            dispatcher_join_timeout: self.parse_millis("DISPATCHER_JOIN_TIMEOUT_MS")?,
            mailbox_capacity: self.parse("MAILBOX_CAPACITY")?,
        };

        debug!(count = self.vars.len(), "Applying synonym sync env overrides");
        Ok(overrides.or(builder))
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

impl SyncSettingsBuilder {
    pub fn with_env_overrides(self, env: &EnvOverrides) -> Result<Self, SettingsError> {
        env.apply(self)
    }
}
