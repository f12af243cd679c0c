//! Record data model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::hex_serde;

/// Size of a record token in bytes.
pub const TOKEN_SIZE: usize = 32;

/// Maximum number of metadata streams a record may carry; stream ids must be
/// strictly below this value.
pub const METADATA_STREAMS_MAX: u64 = 16;

/// Uniformly random identifier assigned to every record at creation.
/// Hex-encoded when used as a branch or directory name.
pub type Token = [u8; TOKEN_SIZE];

/// Record lifecycle status.
///
/// The status fully determines which tier a record resides in: `Unvetted`
/// and `UnvettedIteration` live in the staging tier, `Vetted`, `Censored`
/// and `Locked` belong to the publication lifecycle. The numeric values are
/// stable and appear verbatim in `recordmetadata.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum RecordStatus {
    Invalid = 0,
    Unvetted = 1,
    Vetted = 2,
    Censored = 3,
    UnvettedIteration = 4,
    Locked = 5,
}

impl From<RecordStatus> for u32 {
    fn from(s: RecordStatus) -> u32 {
        s as u32
    }
}

impl TryFrom<u32> for RecordStatus {
    type Error = String;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::Unvetted),
            2 => Ok(Self::Vetted),
            3 => Ok(Self::Censored),
            4 => Ok(Self::UnvettedIteration),
            5 => Ok(Self::Locked),
            other => Err(format!("unknown record status: {other}")),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Unvetted => "unvetted",
            Self::Vetted => "vetted",
            Self::Censored => "censored",
            Self::UnvettedIteration => "unvetted iteration",
            Self::Locked => "locked",
        };
        f.write_str(s)
    }
}

/// Persistent per-record metadata, stored as `recordmetadata.json` in the
/// record directory of either tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Version counter, bumped on every content or status mutation.
    pub version: u32,

    /// Current lifecycle status.
    pub status: RecordStatus,

    /// Merkle root over the SHA-256 digests of the record's current files.
    #[serde(with = "hex_serde::digest32")]
    pub merkle: [u8; 32],

    /// Unix timestamp of the last mutation.
    pub timestamp: i64,

    /// The record token.
    #[serde(with = "hex_serde::bytes")]
    pub token: Vec<u8>,
}

/// A labelled UTF-8 metadata stream attached to a record.
///
/// Stored on disk as `<id>.metadata.txt` (id zero-padded to two digits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataStream {
    pub id: u64,
    pub payload: String,
}

/// A named binary file in its transport form: base64 payload plus the
/// declared hex SHA-256 digest and MIME type. Validation decodes the payload
/// and checks both declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Basename; must equal its sanitized form and contain no separators.
    pub name: String,
    /// Declared MIME type; must match the detected type and the whitelist.
    pub mime: String,
    /// Declared hex-encoded SHA-256 of the decoded payload.
    pub digest: String,
    /// Base64-encoded payload.
    pub payload: String,
}

/// A complete record as returned by the read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub metadata: RecordMetadata,
    pub streams: Vec<MetadataStream>,
    pub files: Vec<File>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for v in 0u32..=5 {
            let status = RecordStatus::try_from(v).unwrap();
            assert_eq!(u32::from(status), v);
        }
        assert!(RecordStatus::try_from(6).is_err());
    }

    #[test]
    fn test_record_metadata_json_field_names() {
        let md = RecordMetadata {
            version: 1,
            status: RecordStatus::Unvetted,
            merkle: [0x11; 32],
            timestamp: 1700000000,
            token: vec![0x22; TOKEN_SIZE],
        };
        let json = serde_json::to_value(&md).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["status"], 1);
        assert_eq!(json["merkle"], "11".repeat(32));
        assert_eq!(json["timestamp"], 1700000000);
        assert_eq!(json["token"], "22".repeat(32));

        let back: RecordMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, md);
    }
}
