use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Response of the ledger offset endpoint (`GET /tx/{id}/offset`). The
/// ledger serializes both fields as decimal strings. Deserialization rejects
/// entries whose size extends past the weave origin (`size > offset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTxOffset")]
pub struct TxOffset {
    /// Absolute weave offset of the transaction's *last* byte (inclusive).
    pub offset: u64,
    /// Size of the transaction's data in bytes.
    pub size: u64,
}

impl TxOffset {
    /// Offset of the byte before the transaction's first data byte, per the
    /// ledger's start-exclusive convention.
    pub fn start(&self) -> u64 {
        self.offset - self.size
    }
}

#[derive(Deserialize)]
struct RawTxOffset {
    #[serde(deserialize_with = "u64_from_string")]
    offset: u64,
    #[serde(deserialize_with = "u64_from_string")]
    size: u64,
}

impl TryFrom<RawTxOffset> for TxOffset {
    type Error = String;

    fn try_from(raw: RawTxOffset) -> Result<Self, Self::Error> {
        raw.offset
            .checked_sub(raw.size)
            .ok_or_else(|| format!("offset entry size {} extends past the end offset {}", raw.size, raw.offset))?;
        Ok(Self {
            offset: raw.offset,
            size: raw.size,
        })
    }
}

fn u64_from_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU64 {
        String(String),
        U64(u64),
    }

    match StringOrU64::deserialize(deserializer)? {
        StringOrU64::String(s) => s.parse().map_err(de::Error::custom),
        StringOrU64::U64(v) => Ok(v),
    }
}

/// A name/value tag attached to a ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTag {
    pub name: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_from_string_json() {
        let parsed: TxOffset = serde_json::from_str(r#"{"offset":"1000","size":"200"}"#).unwrap();
        assert_eq!(parsed.offset, 1000);
        assert_eq!(parsed.size, 200);
        assert_eq!(parsed.start(), 800);
    }

    #[test]
    fn test_offset_from_numeric_json() {
        let parsed: TxOffset = serde_json::from_str(r#"{"offset":1000,"size":200}"#).unwrap();
        assert_eq!(parsed.start(), 800);
    }

    #[test]
    fn test_offset_rejects_size_past_the_origin() {
        let result: Result<TxOffset, _> = serde_json::from_str(r#"{"offset":"100","size":"200"}"#);
        assert!(result.is_err());
    }
}
