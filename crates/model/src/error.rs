use thiserror::Error;

/// Errors raised while constructing or (de)serializing model values.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Both an operation time and a resume token were supplied.
    #[error("High-water mark cannot carry both an operation time and a resume token")]
    ConflictingHighWaterMark,

    #[error("Failed to encode high-water mark: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode high-water mark: {0}")]
    Decode(#[source] bincode::Error),
}
