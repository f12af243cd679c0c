//! Timestamp authority clients.
//!
//! The real client speaks the authority's JSON protocol over HTTP. The test
//! client replaces it with a deterministic in-memory table so the anchoring
//! pipeline can be exercised without a network or a chain.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cairn_core::error::{CairnError, Result};
use cairn_core::traits::TimestampClient;
use cairn_core::types::{ChainInformation, StampResult, VerifyResult};

/// Transaction id the test client reports for confirmed anchors.
pub const TEST_TX: &str = "TESTTX";

#[derive(Serialize)]
struct TimestampRequest {
    digests: Vec<String>,
}

#[derive(Deserialize)]
struct VerifyReply {
    digests: Vec<VerifyResult>,
}

/// HTTP client for a timestamp authority.
///
/// `POST <host>/timestamp` submits a digest batch; `POST <host>/verify`
/// returns per-digest results with chain information.
pub struct HttpStamper {
    host: String,
    client: reqwest::Client,
}

impl HttpStamper {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{route}", self.host.trim_end_matches('/'))
    }
}

#[async_trait]
impl TimestampClient for HttpStamper {
    async fn timestamp(&self, digests: &[[u8; 32]]) -> Result<()> {
        let request = TimestampRequest {
            digests: digests.iter().map(hex::encode).collect(),
        };
        let response = self
            .client
            .post(self.url("timestamp"))
            .json(&request)
            .send()
            .await
            .map_err(|e| CairnError::Stamper(format!("timestamp submit: {e}")))?;
        if !response.status().is_success() {
            return Err(CairnError::Stamper(format!(
                "timestamp submit: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn verify(&self, digests: &[String]) -> Result<Vec<VerifyResult>> {
        let request = TimestampRequest {
            digests: digests.to_vec(),
        };
        let response = self
            .client
            .post(self.url("verify"))
            .json(&request)
            .send()
            .await
            .map_err(|e| CairnError::Stamper(format!("verify: {e}")))?;
        if !response.status().is_success() {
            return Err(CairnError::Stamper(format!(
                "verify: HTTP {}",
                response.status()
            )));
        }
        let reply: VerifyReply = response
            .json()
            .await
            .map_err(|e| CairnError::Stamper(format!("verify decode: {e}")))?;
        Ok(reply.digests)
    }
}

/// Deterministic in-memory authority for tests.
///
/// Submitted digests start unconfirmed; [`TestStamper::confirm`] flips one
/// to confirmed, after which `verify` reports the fixed [`TEST_TX`]
/// transaction. Verifying a digest that was never submitted is an error.
#[derive(Default)]
pub struct TestStamper {
    anchors: Mutex<HashMap<String, bool>>,
}

impl TestStamper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a submitted digest as confirmed on chain.
    pub fn confirm(&self, digest: &str) -> Result<()> {
        let mut anchors = self.anchors.lock();
        match anchors.get_mut(digest) {
            Some(confirmed) => {
                *confirmed = true;
                Ok(())
            }
            None => Err(CairnError::Stamper(format!(
                "cannot confirm unknown digest: {digest}"
            ))),
        }
    }

    /// Number of digests submitted so far.
    pub fn submitted(&self) -> usize {
        self.anchors.lock().len()
    }
}

#[async_trait]
impl TimestampClient for TestStamper {
    async fn timestamp(&self, digests: &[[u8; 32]]) -> Result<()> {
        let mut anchors = self.anchors.lock();
        for digest in digests {
            anchors.entry(hex::encode(digest)).or_insert(false);
        }
        Ok(())
    }

    async fn verify(&self, digests: &[String]) -> Result<Vec<VerifyResult>> {
        let anchors = self.anchors.lock();
        digests
            .iter()
            .map(|digest| match anchors.get(digest) {
                None => Err(CairnError::Stamper(format!("unknown digest: {digest}"))),
                Some(false) => Ok(VerifyResult {
                    digest: digest.clone(),
                    result: StampResult::Ok,
                    chain_information: ChainInformation::default(),
                }),
                Some(true) => Ok(VerifyResult {
                    digest: digest.clone(),
                    result: StampResult::Ok,
                    chain_information: ChainInformation {
                        chain_timestamp: Utc::now().timestamp(),
                        transaction: TEST_TX.to_string(),
                    },
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submitted_digest_starts_pending() {
        let stamper = TestStamper::new();
        stamper.timestamp(&[[0x01; 32]]).await.unwrap();

        let results = stamper.verify(&["01".repeat(32)]).await.unwrap();
        assert_eq!(results[0].result, StampResult::Ok);
        assert_eq!(results[0].chain_information.chain_timestamp, 0);
    }

    #[tokio::test]
    async fn test_confirm_reports_test_tx() {
        let stamper = TestStamper::new();
        stamper.timestamp(&[[0x01; 32]]).await.unwrap();
        stamper.confirm(&"01".repeat(32)).unwrap();

        let results = stamper.verify(&["01".repeat(32)]).await.unwrap();
        assert_ne!(results[0].chain_information.chain_timestamp, 0);
        assert_eq!(results[0].chain_information.transaction, TEST_TX);
    }

    #[tokio::test]
    async fn test_unknown_digest_is_an_error() {
        let stamper = TestStamper::new();
        assert!(stamper.verify(&["02".repeat(32)]).await.is_err());
        assert!(stamper.confirm(&"02".repeat(32)).is_err());
    }
}
