use serde::{Deserialize, Serialize};

use crate::ByteRange;

/// One record queued for retrieval and classification. The core reads the
/// identity and ancestry fields and writes the outcome fields; everything
/// else is owned by the calling batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Ledger id of the record (L1 transaction id or nested data-item id).
    pub id: String,

    /// Declared content type, if the poster supplied one.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Declared content size in bytes.
    pub content_size: u64,

    /// Direct parent bundle id; `None` for a first-class (L1) entry.
    #[serde(default)]
    pub parent: Option<String>,

    /// Bundle ancestry, outermost first, ending at the direct parent. Empty
    /// for L1 entries.
    #[serde(default)]
    pub ancestors: Vec<String>,

    /// Chunk-aligned weave range, filled in once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_range: Option<ByteRange>,
}

impl DownloadRecord {
    pub fn l1(id: impl Into<String>, content_type: Option<String>, content_size: u64) -> Self {
        Self {
            id: id.into(),
            content_type,
            content_size,
            parent: None,
            ancestors: Vec::new(),
            byte_range: None,
        }
    }

    pub fn nested(
        id: impl Into<String>,
        content_type: Option<String>,
        content_size: u64,
        ancestors: Vec<String>,
    ) -> Self {
        let parent = ancestors.last().cloned();
        Self {
            id: id.into(),
            content_type,
            content_size,
            parent,
            ancestors,
            byte_range: None,
        }
    }
}
