use serde::{Deserialize, Serialize};

use crate::DownloadRecord;

/// Classified result of processing a single record. Errors never escape the
/// orchestrator; every path ends in one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OutcomeKind {
    /// Bytes were uploaded and the stored size matched the declared size.
    Queued,

    /// The sniffed content type is outside the accepted classes. Not an
    /// error: a policy classification.
    Rejected { content_type: String },

    /// The ledger has no offset entry for the record.
    NotFound,

    /// The source stream stalled before the minimum viable byte count.
    NoData,

    /// The batch wall-clock timeout fired before this record settled.
    Timeout,

    /// Any other failure, carrying the raw message for upstream retry.
    Error { message: String },
}

impl OutcomeKind {
    /// Stable identifier recorded in the data_reason field upstream.
    pub fn reason(&self) -> &'static str {
        match self {
            OutcomeKind::Queued => "queued",
            OutcomeKind::Rejected { .. } => "mimetype",
            OutcomeKind::NotFound => "404",
            OutcomeKind::NoData => "nodata",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::Error { .. } => "error",
        }
    }
}

/// Per-record result returned by the orchestrator, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub record: DownloadRecord,
    pub kind: OutcomeKind,
}

impl ProcessOutcome {
    pub fn queued(&self) -> bool {
        matches!(self.kind, OutcomeKind::Queued)
    }
}
