//! Error types for the shared entity layer.

use thiserror::Error;

/// Errors raised while encoding or decoding archive payloads.
#[derive(Debug, Error)]
pub enum TypesError {
    /// bincode failed on one of the payload sections.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The payload bytes do not follow the section layout.
    #[error("malformed block payload: {0}")]
    MalformedPayload(&'static str),
}

impl From<bincode::Error> for TypesError {
    fn from(err: bincode::Error) -> Self {
        TypesError::Serialization(err.to_string())
    }
}
