use crate::error::ModelError;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster time of a backend operation: seconds since the epoch plus an
/// ordinal distinguishing operations within the same second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationTime {
    seconds: u32,
    increment: u32,
}

impl OperationTime {
    pub const fn new(seconds: u32, increment: u32) -> Self {
        Self { seconds, increment }
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn wall_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(i64::from(self.seconds), 0).single()
    }
}

impl fmt::Display for OperationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.seconds, self.increment)
    }
}

/// Opaque change-stream position handed out by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken(Bytes);

impl ResumeToken {
    pub fn new(token: impl Into<Bytes>) -> Self {
        Self(token.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// How current a synonym mapping is known to be.
///
/// `Empty` means the position is unknown and the next sync has to be a full
/// collection scan. The two positional forms are mutually exclusive, and a
/// serialized record carrying both is rejected on decode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MarkRecord", into = "MarkRecord")]
pub enum HighWaterMark {
    #[default]
    Empty,
    OperationTime(OperationTime),
    ResumeToken(ResumeToken),
}

impl HighWaterMark {
    pub fn from_parts(
        operation_time: Option<OperationTime>,
        resume_token: Option<ResumeToken>,
    ) -> Result<Self, ModelError> {
        match (operation_time, resume_token) {
            (Some(_), Some(_)) => Err(ModelError::ConflictingHighWaterMark),
            (Some(time), None) => Ok(Self::OperationTime(time)),
            (None, Some(token)) => Ok(Self::ResumeToken(token)),
            (None, None) => Ok(Self::Empty),
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Empty)
    }

    pub fn operation_time(&self) -> Option<OperationTime> {
        match self {
            Self::OperationTime(time) => Some(*time),
            _ => None,
        }
    }

    pub fn resume_token(&self) -> Option<&ResumeToken> {
        match self {
            Self::ResumeToken(token) => Some(token),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ModelError> {
        bincode::serialize(self).map_err(ModelError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ModelError> {
        bincode::deserialize(bytes).map_err(ModelError::Decode)
    }
}

impl From<OperationTime> for HighWaterMark {
    fn from(time: OperationTime) -> Self {
        Self::OperationTime(time)
    }
}

impl From<ResumeToken> for HighWaterMark {
    fn from(token: ResumeToken) -> Self {
        Self::ResumeToken(token)
    }
}

impl fmt::Display for HighWaterMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::OperationTime(time) => write!(f, "operationTime={time}"),
            Self::ResumeToken(token) => write!(f, "resumeToken={token}"),
        }
    }
}

/// Wire shape of a high-water mark.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct MarkRecord {
    operation_time: Option<OperationTime>,
    resume_token: Option<ResumeToken>,
}

impl TryFrom<MarkRecord> for HighWaterMark {
    type Error = ModelError;

    fn try_from(record: MarkRecord) -> Result<Self, Self::Error> {
        HighWaterMark::from_parts(record.operation_time, record.resume_token)
    }
}

impl From<HighWaterMark> for MarkRecord {
    fn from(mark: HighWaterMark) -> Self {
        match mark {
            HighWaterMark::Empty => MarkRecord::default(),
            HighWaterMark::OperationTime(time) => MarkRecord {
                operation_time: Some(time),
                resume_token: None,
            },
            HighWaterMark::ResumeToken(token) => MarkRecord {
                operation_time: None,
                resume_token: Some(token),
            },
        }
    }
}
