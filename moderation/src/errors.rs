use bundle_resolver::ResolveError;
use thiserror::Error;
use weave_client::WeaveClientError;

/// Failures inside the download pipeline. None of these escape the
/// orchestrator's public API; they exist to be classified into outcomes.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Client(#[from] WeaveClientError),

    #[error("Stored object size {stored} does not match the declared size {declared}")]
    SizeMismatch { declared: u64, stored: u64 },

    #[error("Object store error: {0}")]
    UploadError(String),

    #[error("Batch timeout expired before the record settled")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, DownloadError>;
