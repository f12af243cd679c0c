//! Integrity checker.
//!
//! Walks the publication tier's full history, classifies anchor and
//! confirmation commits, finishes any confirmations history shows as
//! missing, and re-verifies every anchored commit digest against the
//! timestamp authority. Expensive; meant for boot time, not the request
//! path.

use std::collections::HashSet;

use cairn_core::digest::extend_commit_digest;
use cairn_core::error::{CairnError, Result};
use cairn_core::types::StampResult;
use cairn_dag::MASTER;

use crate::anchor::{match_anchor, match_confirmation};
use crate::db::CairnDb;

impl CairnDb {
    /// Verify the publication tier against the timestamp authority.
    ///
    /// # Errors
    ///
    /// `Corrupt` on duplicate commit digests in history or when any
    /// anchored digest fails authority verification.
    pub async fn fsck(&self) -> Result<()> {
        // Walk the log under the lock; the verification RPCs below run
        // without it, and finishing a confirmation retakes it.
        let entries = {
            let _guard = self.lock_plain()?;
            self.publication.checkout(MASTER)?;
            self.publication.log(None)?
        };

        let mut seen_anchor = false;
        let mut precious: HashSet<String> = HashSet::new();
        let mut confirmed_anchors: HashSet<String> = HashSet::new();
        let mut unconfirmed_from_history: Vec<String> = Vec::new();

        // Newest first: a confirmation always precedes its anchor in this
        // walk, so an anchor without a recorded confirmation is pending.
        for entry in entries {
            if let Some(merkle) = match_confirmation(&entry.subject) {
                confirmed_anchors.insert(hex::encode(merkle));
                continue;
            }
            if let Some(merkle) = match_anchor(&entry.subject) {
                seen_anchor = true;
                let merkle = hex::encode(merkle);
                if !confirmed_anchors.contains(&merkle) {
                    unconfirmed_from_history.push(merkle);
                }
                continue;
            }
            if !seen_anchor {
                // Above the newest anchor; not covered yet.
                continue;
            }
            let digest = hex::encode(extend_commit_digest(&entry.digest));
            if !precious.insert(digest.clone()) {
                return Err(CairnError::Corrupt(format!(
                    "duplicate commit digest: {digest}"
                )));
            }
        }

        if precious.is_empty() {
            tracing::info!("fsck: nothing to do");
            return Ok(());
        }

        tracing::info!("fsck: timestamp verification started");

        // Finish confirmations the chain has that history lacks.
        let mut confirmations = Vec::with_capacity(unconfirmed_from_history.len());
        for merkle in &unconfirmed_from_history {
            match self.verify_anchor(merkle).await {
                Ok(vr) if vr.chain_information.chain_timestamp == 0 => {
                    tracing::debug!("fsck: anchor {merkle} still pending");
                }
                Ok(vr) => confirmations.push(vr),
                Err(e) => tracing::error!("fsck: verify anchor {merkle}: {e}"),
            }
        }
        self.after_anchor_verify(&confirmations)?;

        // Every precious digest must verify in one batch.
        let digests: Vec<String> = precious.into_iter().collect();
        let results = self.stamper.verify(&digests).await?;
        let mut failed = false;
        for result in &results {
            if result.result != StampResult::Ok {
                failed = true;
                tracing::error!(
                    "fsck: digest {} failed verification: {:?}",
                    result.digest,
                    result.result
                );
            }
        }
        if failed {
            return Err(CairnError::Corrupt(
                "timestamp verification failed".to_string(),
            ));
        }

        tracing::info!("fsck: verified {} digests", results.len());
        Ok(())
    }
}
