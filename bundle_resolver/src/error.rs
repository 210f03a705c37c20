use thiserror::Error;
use weave_client::WeaveClientError;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No ledger offset entry for {0}")]
    Undiscoverable(String),

    #[error("Ancestor transaction {0} not found on any metadata endpoint")]
    AncestorNotFound(String),

    #[error("Bundle format error: {0}")]
    BundleFormatError(String),

    /// Resolved boundaries off the chunk grid. Programming-error class;
    /// thrown rather than retried.
    #[error("Alignment violation: {0}")]
    AlignmentViolation(String),

    #[error("Range sanity violation: {0}")]
    RangeSanityViolation(String),

    #[error(transparent)]
    Client(#[from] WeaveClientError),
}

pub type Result<T> = std::result::Result<T, ResolveError>;
