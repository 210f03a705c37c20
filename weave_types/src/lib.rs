mod byte_range;
mod node;
mod outcome;
mod record;
mod tx;

pub use byte_range::{ByteRange, Resolution, ResolvedItem};
pub use node::{NodeCandidate, NodeStack};
pub use outcome::{OutcomeKind, ProcessOutcome};
pub use record::DownloadRecord;
pub use tx::{TxOffset, TxTag};

/// Size of one weave storage chunk. Nodes serve data chunk-by-chunk in units
/// of this size, except near a transaction's tail.
pub const CHUNK_SIZE: u64 = 256 * 1024;

/// Absolute weave offset before which chunk sizes were not uniform.
/// Ranges that begin before this offset are clamped rather than aligned.
pub const CHUNK_ALIGNMENT_EPOCH: u64 = 30_607_159_107_830;
