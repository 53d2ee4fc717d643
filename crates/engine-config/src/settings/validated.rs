use crate::settings::error::SettingsError;
use std::{num::NonZeroUsize, time::Duration};

pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 1;
pub const DEFAULT_SCHEDULING_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_DISPATCHER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Immutable, validated configuration of the synonym sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Number of syncs the dispatcher runs at once
    pub max_concurrent_syncs: NonZeroUsize,
    /// Delay before polling the change stream of a current mapping, and
    /// before retrying an invalid one
    pub scheduling_delay: Duration,
    /// Delay before retrying after a transient failure
    pub transient_backoff: Duration,
    /// Upper bound on documents in one synonym source collection. Applied by
    /// every mapping manager's indexers, on top of any registry limit
    pub max_docs_per_mapping: Option<usize>,
    /// Batch size hint for scans and change streams
    pub scan_batch_size: Option<u32>,
    /// How long shutdown waits for the dispatcher loop to exit
    pub dispatcher_join_timeout: Duration,
    /// Mailbox size of each mapping manager
    pub mailbox_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_syncs: NonZeroUsize::MIN,
            scheduling_delay: DEFAULT_SCHEDULING_DELAY,
            transient_backoff: DEFAULT_TRANSIENT_BACKOFF,
            max_docs_per_mapping: None,
            scan_batch_size: None,
            dispatcher_join_timeout: DEFAULT_DISPATCHER_JOIN_TIMEOUT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl SyncSettings {
    pub fn builder() -> SyncSettingsBuilder {
        SyncSettingsBuilder::default()
    }

    pub fn from_builder(builder: SyncSettingsBuilder) -> Result<Self, SettingsError> {
        let max_concurrent_syncs = builder
            .max_concurrent_syncs
            .unwrap_or(DEFAULT_MAX_CONCURRENT_SYNCS);
        let max_concurrent_syncs =
            NonZeroUsize::new(max_concurrent_syncs).ok_or(SettingsError::InvalidValue {
                field: "max_concurrent_syncs",
                reason: "must be positive".to_string(),
            })?;

        if builder.max_docs_per_mapping == Some(0) {
            return Err(SettingsError::InvalidValue {
                field: "max_docs_per_mapping",
                reason: "must be positive when set".to_string(),
            });
        }

        if builder.scan_batch_size == Some(0) {
            return Err(SettingsError::InvalidValue {
                field: "scan_batch_size",
                reason: "must be positive when set".to_string(),
            });
        }

        let mailbox_capacity = builder.mailbox_capacity.unwrap_or(DEFAULT_MAILBOX_CAPACITY);
        if mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue {
                field: "mailbox_capacity",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            max_concurrent_syncs,
            scheduling_delay: builder.scheduling_delay.unwrap_or(DEFAULT_SCHEDULING_DELAY),
            transient_backoff: builder
                .transient_backoff
                .unwrap_or(DEFAULT_TRANSIENT_BACKOFF),
            max_docs_per_mapping: builder.max_docs_per_mapping,
            scan_batch_size: builder.scan_batch_size,
            dispatcher_join_timeout: builder
                .dispatcher_join_timeout
                .unwrap_or(DEFAULT_DISPATCHER_JOIN_TIMEOUT),
            mailbox_capacity,
        })
    }

    pub fn max_concurrent_syncs(&self) -> usize {
        self.max_concurrent_syncs.get()
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncSettingsBuilder {
    pub max_concurrent_syncs: Option<usize>,
    pub scheduling_delay: Option<Duration>,
    pub transient_backoff: Option<Duration>,
    pub max_docs_per_mapping: Option<usize>,
    pub scan_batch_size: Option<u32>,
    pub dispatcher_join_timeout: Option<Duration>,
    pub mailbox_capacity: Option<usize>,
}

impl SyncSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_syncs(mut self, max_concurrent_syncs: usize) -> Self {
        self.max_concurrent_syncs = Some(max_concurrent_syncs);
        self
    }

    pub fn scheduling_delay(mut self, scheduling_delay: Duration) -> Self {
        self.scheduling_delay = Some(scheduling_delay);
        self
    }

    pub fn transient_backoff(mut self, transient_backoff: Duration) -> Self {
        self.transient_backoff = Some(transient_backoff);
        self
    }

    pub fn max_docs_per_mapping(mut self, max_docs_per_mapping: usize) -> Self {
        self.max_docs_per_mapping = Some(max_docs_per_mapping);
        self
    }

    pub fn scan_batch_size(mut self, scan_batch_size: u32) -> Self {
        self.scan_batch_size = Some(scan_batch_size);
        self
    }

    pub fn dispatcher_join_timeout(mut self, dispatcher_join_timeout: Duration) -> Self {
        self.dispatcher_join_timeout = Some(dispatcher_join_timeout);
        self
    }

    pub fn mailbox_capacity(mut self, mailbox_capacity: usize) -> Self {
        self.mailbox_capacity = Some(mailbox_capacity);
        self
    }

    /// Fills every unset field from `other`.
    pub fn or(self, other: SyncSettingsBuilder) -> Self {
        Self {
            max_concurrent_syncs: self.max_concurrent_syncs.or(other.max_concurrent_syncs),
            scheduling_delay: self.scheduling_delay.or(other.scheduling_delay),
            transient_backoff: self.transient_backoff.or(other.transient_backoff),
            max_docs_per_mapping: self.max_docs_per_mapping.or(other.max_docs_per_mapping),
            scan_batch_size: self.scan_batch_size.or(other.scan_batch_size),
            dispatcher_join_timeout: self
                .dispatcher_join_timeout
                .or(other.dispatcher_join_timeout),
            mailbox_capacity: self.mailbox_capacity.or(other.mailbox_capacity),
        }
    }

    pub fn build(self) -> Result<SyncSettings, SettingsError> {
        SyncSettings::from_builder(self)
    }
}
