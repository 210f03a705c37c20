//! Binary bundle (ANS-104) structure parsers. Both parsers are incremental
//! over a byte prefix: callers feed what they have and are told how many
//! total bytes are needed before the structure completes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{ResolveError, Result};

/// The count field at the head of a bundle: 32 bytes, of which the first 8
/// carry the little-endian item count.
pub const COUNT_FIELD_LEN: usize = 32;

/// Per-item table entry: 32 byte little-endian size then 32 byte raw id.
pub const INDEX_ENTRY_LEN: usize = 64;

/// Sanity ceiling on the item count; a table above this is corrupt input,
/// not a bundle.
const MAX_ITEM_COUNT: u64 = 1 << 24;

/// Result of an incremental prefix parse.
#[derive(Debug)]
pub enum PrefixParse<T> {
    /// At least this many total prefix bytes are required to complete.
    NeedBytes(usize),
    Complete(T),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub id: [u8; 32],
    pub size: u64,
}

/// The offset table at the head of an ANS-104 bundle. Payload bytes are
/// never touched; this is purely the item directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleIndex {
    pub entries: Vec<BundleEntry>,
    pub header_len: u64,
}

impl BundleIndex {
    pub fn parse_prefix(bytes: &[u8]) -> Result<PrefixParse<BundleIndex>> {
        if bytes.len() < COUNT_FIELD_LEN {
            return Ok(PrefixParse::NeedBytes(COUNT_FIELD_LEN));
        }

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[..8]);
        let count = u64::from_le_bytes(count_bytes);
        if count > MAX_ITEM_COUNT {
            return Err(ResolveError::BundleFormatError(format!(
                "implausible bundle item count {count}"
            )));
        }

        let needed = COUNT_FIELD_LEN + (count as usize) * INDEX_ENTRY_LEN;
        if bytes.len() < needed {
            return Ok(PrefixParse::NeedBytes(needed));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let base = COUNT_FIELD_LEN + i * INDEX_ENTRY_LEN;
            let mut size_bytes = [0u8; 8];
            size_bytes.copy_from_slice(&bytes[base..base + 8]);
            let mut id = [0u8; 32];
            id.copy_from_slice(&bytes[base + 32..base + 64]);
            entries.push(BundleEntry {
                id,
                size: u64::from_le_bytes(size_bytes),
            });
        }

        Ok(PrefixParse::Complete(BundleIndex {
            entries,
            header_len: needed as u64,
        }))
    }

    /// Bundle-relative start of `target` (header table plus the sizes of
    /// every preceding item) and its declared size.
    pub fn locate(&self, target: &[u8; 32]) -> Option<(u64, u64)> {
        let mut at = self.header_len;
        for entry in &self.entries {
            if &entry.id == target {
                return Some((at, entry.size));
            }
            at += entry.size;
        }
        None
    }
}

/// Decode a textual item id into the raw 32 bytes used by bundle tables.
pub fn decode_item_id(id: &str) -> Result<[u8; 32]> {
    let raw = URL_SAFE_NO_PAD
        .decode(id)
        .map_err(|e| ResolveError::BundleFormatError(format!("item id {id:?} is not base64url: {e}")))?;
    raw.try_into()
        .map_err(|_| ResolveError::BundleFormatError(format!("item id {id:?} does not decode to 32 bytes")))
}

pub fn encode_item_id(id: &[u8; 32]) -> String {
    URL_SAFE_NO_PAD.encode(id)
}

/// Parsed envelope of one data item. Only the total header length matters
/// downstream; the signature itself is never verified here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataItemHeader {
    pub sig_type: u16,
    pub header_len: u64,
}

const SIG_TYPE_SECP256K1: u16 = 3;
const OWNER_LEN: usize = 512;

impl DataItemHeader {
    /// Walk the variable-width envelope: signature type, signature, owner,
    /// optional target and anchor behind presence flags, tag count, tag
    /// bytes. Returns how many total bytes are needed whenever the prefix
    /// ends inside a field.
    pub fn parse(bytes: &[u8]) -> PrefixParse<DataItemHeader> {
        if bytes.len() < 2 {
            return PrefixParse::NeedBytes(2);
        }
        let sig_type = u16::from_le_bytes([bytes[0], bytes[1]]);
        let sig_len = if sig_type == SIG_TYPE_SECP256K1 { 65 } else { 512 };

        let mut at = 2 + sig_len + OWNER_LEN;

        // target, then anchor: one presence byte each, 32 bytes if set
        for _ in 0..2 {
            if bytes.len() < at + 1 {
                return PrefixParse::NeedBytes(at + 1);
            }
            at += if bytes[at] == 1 { 33 } else { 1 };
        }

        // tag count (8 bytes, unused) then the byte length of the tag block
        if bytes.len() < at + 16 {
            return PrefixParse::NeedBytes(at + 16);
        }
        let mut tags_len_bytes = [0u8; 8];
        tags_len_bytes.copy_from_slice(&bytes[at + 8..at + 16]);
        let tags_len = u64::from_le_bytes(tags_len_bytes);

        PrefixParse::Complete(DataItemHeader {
            sig_type,
            header_len: (at + 16) as u64 + tags_len,
        })
    }
}
