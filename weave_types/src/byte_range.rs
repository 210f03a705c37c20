use serde::{Deserialize, Serialize};

/// A region of the weave in the ledger's own offset convention: the byte at
/// `start` is *not* part of the range, the byte at `end` is. Ranges returned
/// by the resolver for post-epoch data land exactly on chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn span(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}]", self.start, self.end)
    }
}

/// The outcome of byte-range resolution for a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The record's bytes live at a known, chunk-aligned weave range.
    Resolved(ResolvedItem),

    /// The record is nested inside a legacy JSON (ANS-102) bundle; it has no
    /// byte-exact weave sub-range and must be fetched whole via a gateway.
    JsonBundle { bundle_id: String },

    /// The ledger has no offset entry for this record (404 on the target's
    /// own offset lookup). Non-retryable.
    Undiscoverable,
}

/// A fully resolved record location: the chunk-aligned range recorded for
/// moderation, plus the exact coordinates the streaming path needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedItem {
    /// Chunk-aligned range in the ledger convention (start exclusive).
    pub range: ByteRange,
    /// Absolute offset where streaming starts; equal to `range.start` for
    /// post-epoch data, the unaligned bound for clamped pre-epoch data.
    pub chunk_start: u64,
    /// Absolute offset of the item's own header (or of the raw data for an
    /// L1 record with no bundle envelope).
    pub data_start: u64,
    /// Absolute offset one past the item's last byte.
    pub data_end: u64,
    /// The item's declared size in bytes, header included for nested items.
    pub item_size: u64,
    /// Whether `data_start` points at an ANS-104 data-item header that must
    /// be stripped before the payload.
    pub nested: bool,
}

impl ResolvedItem {
    /// Total bytes the chunk stream must deliver for this item.
    pub fn stream_span(&self) -> u64 {
        self.data_end - self.chunk_start
    }
}
