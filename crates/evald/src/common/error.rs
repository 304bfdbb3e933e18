use std::time::Duration;

use thiserror::Error;

use crate::common::error::EvaldError::GenericError;

#[derive(Debug, Error)]
pub enum EvaldError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Unsupported problem '{0}'")]
    UnsupportedProblem(String),
    #[error("Cannot derive the next resource name: {0}")]
    MalformedResourceNames(String),
    #[error("Exclusivity was not obtained within {0:?}")]
    AcquireTimeout(Duration),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for EvaldError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for EvaldError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(format!("{error:?}"))
    }
}

impl From<String> for EvaldError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}
