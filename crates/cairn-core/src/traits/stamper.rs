//! The timestamp-authority capability.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::VerifyResult;

/// Client for an external timestamp authority.
///
/// Two implementations exist: an HTTP client speaking the authority's JSON
/// protocol, and a deterministic in-memory table for tests.
#[async_trait]
pub trait TimestampClient: Send + Sync {
    /// Submit a batch of digests for anchoring into the authority's next
    /// aggregation window.
    async fn timestamp(&self, digests: &[[u8; 32]]) -> Result<()>;

    /// Query the inclusion status of previously submitted digests, given as
    /// hex strings. A result with `chain_timestamp == 0` means the anchor is
    /// still pending.
    async fn verify(&self, digests: &[String]) -> Result<Vec<VerifyResult>>;
}
