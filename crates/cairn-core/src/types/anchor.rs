//! Anchor data model: records of digest sets submitted to the timestamp
//! authority and the wire types the authority replies with.

use serde::{Deserialize, Serialize};

use crate::digest::hex_serde;

/// Whether an anchor has been confirmed in a chain transaction yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorState {
    Unverified,
    Verified,
}

/// A dropped anchor: the set of commit digests aggregated under one Merkle
/// root and handed to the timestamp authority.
///
/// Stored in the anchor state DB keyed by `anchor/<hex merkle>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// Unix timestamp at which the anchor was dropped.
    pub time: i64,

    /// Extended commit digests covered by this anchor, in commit order
    /// (newest first, as the log reports them).
    #[serde(with = "hex_serde::digest32_vec")]
    pub digests: Vec<[u8; 32]>,

    /// Commit subjects parallel to `digests`.
    pub messages: Vec<String>,

    /// Merkle root over `digests`; the anchor's identity.
    #[serde(with = "hex_serde::digest32")]
    pub merkle: [u8; 32],

    /// Confirmation state.
    pub state: AnchorState,
}

/// The most recently dropped anchor; the next delta range starts after
/// `last`. Stored in the anchor state DB under the `last` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastAnchor {
    /// Extended digest of the anchor commit itself.
    #[serde(with = "hex_serde::digest32")]
    pub last: [u8; 32],

    /// Merkle root of the anchor.
    #[serde(with = "hex_serde::digest32")]
    pub merkle: [u8; 32],

    /// Unix timestamp at which the anchor was dropped.
    pub time: i64,
}

/// Merkle roots submitted to the authority but not yet confirmed on chain.
/// Stored in the anchor state DB under the `unconfirmed` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnconfirmedAnchors {
    #[serde(with = "hex_serde::digest32_vec")]
    pub merkles: Vec<[u8; 32]>,
}

/// Chain inclusion details for a confirmed digest. A `chain_timestamp` of
/// zero means the authority has not seen enough confirmations yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInformation {
    pub chain_timestamp: i64,
    pub transaction: String,
}

/// Per-digest verification result codes reported by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum StampResult {
    Invalid = 0,
    Ok = 1,
    DoesNotExist = 2,
}

impl From<StampResult> for u32 {
    fn from(r: StampResult) -> u32 {
        r as u32
    }
}

impl TryFrom<u32> for StampResult {
    type Error = String;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::Ok),
            2 => Ok(Self::DoesNotExist),
            other => Err(format!("unknown stamp result: {other}")),
        }
    }
}

/// One digest's verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Hex-encoded digest this result is for.
    pub digest: String,
    pub result: StampResult,
    pub chain_information: ChainInformation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_record_json_roundtrip() {
        let record = AnchorRecord {
            time: 1700000000,
            digests: vec![[0x01; 32], [0x02; 32]],
            messages: vec!["Add record aa".into(), "Update record aa".into()],
            merkle: [0x03; 32],
            state: AnchorState::Unverified,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: AnchorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_chain_information_pending_default() {
        let info = ChainInformation::default();
        assert_eq!(info.chain_timestamp, 0);
        assert!(info.transaction.is_empty());
    }
}
