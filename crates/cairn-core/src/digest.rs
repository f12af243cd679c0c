//! Digest plumbing.
//!
//! Commit ids in the versioned store are 20 bytes; content digests are
//! SHA-256 (32 bytes). Whenever commit ids enter Merkle aggregation they are
//! zero-extended to 32 bytes so both digest kinds share a type, and
//! unextended again before being handed back to the store.

use sha2::{Digest, Sha256};

use crate::error::{CairnError, Result};

/// Size of a versioned-store commit id in bytes.
pub const COMMIT_DIGEST_SIZE: usize = 20;

/// Size of a SHA-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Zero-extend a 20-byte commit id to SHA-256 width.
pub fn extend_commit_digest(d: &[u8; COMMIT_DIGEST_SIZE]) -> [u8; DIGEST_SIZE] {
    let mut out = [0u8; DIGEST_SIZE];
    out[..COMMIT_DIGEST_SIZE].copy_from_slice(d);
    out
}

/// Strip the zero extension from an extended commit id.
///
/// Fails if the trailing bytes are not all zero, i.e. the digest was not
/// produced by [`extend_commit_digest`].
pub fn unextend_commit_digest(d: &[u8; DIGEST_SIZE]) -> Result<[u8; COMMIT_DIGEST_SIZE]> {
    if d[COMMIT_DIGEST_SIZE..].iter().any(|&b| b != 0) {
        return Err(CairnError::InvalidState(format!(
            "not an extended commit digest: {}",
            hex::encode(d)
        )));
    }
    let mut out = [0u8; COMMIT_DIGEST_SIZE];
    out.copy_from_slice(&d[..COMMIT_DIGEST_SIZE]);
    Ok(out)
}

/// Parse a 64-character hex string into a 32-byte digest.
pub fn parse_digest32(s: &str) -> Result<[u8; DIGEST_SIZE]> {
    let bytes = hex::decode(s)
        .map_err(|_| CairnError::InvalidState(format!("not a hex digest: {s}")))?;
    bytes
        .try_into()
        .map_err(|_| CairnError::InvalidState(format!("wrong digest length: {s}")))
}

/// Returns true if `s` is a 64-character hex string, the form every record
/// token takes when used as a branch or directory name.
///
/// Non-token names in repository listings (`master`, `anchors`, the audit
/// trail) all fail this test.
pub fn is_token_hex(s: &str) -> bool {
    s.len() == 2 * crate::types::TOKEN_SIZE && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Serde adapters encoding fixed and variable digests as hex strings.
pub mod hex_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// `[u8; 32]` as a 64-character hex string.
    pub mod digest32 {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
            hex::encode(v).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
            let s = String::deserialize(d)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("expected 32-byte digest"))
        }
    }

    /// `Option<[u8; 32]>` as an optional hex string.
    pub mod digest32_opt {
        use super::*;

        pub fn serialize<S: Serializer>(v: &Option<[u8; 32]>, s: S) -> Result<S::Ok, S::Error> {
            v.as_ref().map(hex::encode).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<[u8; 32]>, D::Error> {
            let s = Option::<String>::deserialize(d)?;
            match s {
                None => Ok(None),
                Some(s) => {
                    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                    let arr = bytes
                        .try_into()
                        .map_err(|_| serde::de::Error::custom("expected 32-byte digest"))?;
                    Ok(Some(arr))
                }
            }
        }
    }

    /// `Vec<[u8; 32]>` as a list of hex strings.
    pub mod digest32_vec {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[[u8; 32]], s: S) -> Result<S::Ok, S::Error> {
            v.iter()
                .map(hex::encode)
                .collect::<Vec<_>>()
                .serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<[u8; 32]>, D::Error> {
            let strings = Vec::<String>::deserialize(d)?;
            strings
                .into_iter()
                .map(|s| {
                    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                    bytes
                        .try_into()
                        .map_err(|_| serde::de::Error::custom("expected 32-byte digest"))
                })
                .collect()
        }
    }

    /// `Vec<u8>` as a hex string.
    pub mod bytes {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
            hex::encode(v).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
            let s = String::deserialize(d)?;
            hex::decode(&s).map_err(serde::de::Error::custom)
        }
    }
}
