use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WeaveClientError {
    #[error("Request Error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),

    #[error("HTTP Error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("URL Parse Error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Unexpected HTTP status: {0}")]
    StatusError(StatusCode),

    #[error("Chunk response ended before the 3 byte length header completed")]
    TruncatedChunkHeader,

    #[error("Chunk payload ended early: expected {expected} bytes, received {received}")]
    TruncatedChunkPayload { expected: u64, received: u64 },

    #[error("Chunk request idle for {0:?}")]
    ChunkTimeout(Duration),

    #[error("All data nodes exhausted fetching chunk at offset {offset}: {last_error}")]
    NodesExhausted { offset: u64, last_error: String },

    #[error("No data received before the inactivity window closed")]
    NoData,

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal Error: {0}")]
    InternalError(String),
}

impl WeaveClientError {
    /// The HTTP status behind this error, when there is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            WeaveClientError::StatusError(status) => Some(*status),
            WeaveClientError::ReqwestError(e) => e.status(),
            WeaveClientError::ReqwestMiddlewareError(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, WeaveClientError>;
