//! Anchor engine.
//!
//! Periodically snapshots the publication tier's new commits, aggregates
//! their extended digests under a Merkle root, and submits the set to the
//! timestamp authority. A marker commit on `master` records the root; once
//! the authority reports chain inclusion, a confirmation commit records the
//! transaction and the audit trail advances.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use cairn_core::digest::{
    extend_commit_digest, parse_digest32, unextend_commit_digest,
};
use cairn_core::error::{CairnError, Result};
use cairn_core::merkle::merkle_root;
use cairn_core::traits::RepoEngine;
use cairn_core::types::{AnchorRecord, AnchorState, LastAnchor, VerifyResult};
use cairn_dag::MASTER;

use crate::db::CairnDb;

/// Subject-line marker of an anchor commit, followed by the merkle root.
pub const ANCHOR_MARKER: &str = "Anchor";

/// Subject-line marker of an anchor confirmation commit.
pub const ANCHOR_CONFIRMATION_MARKER: &str = "Anchor confirmation";

/// Human-readable append-only log of anchor events, kept in the publication
/// repository and committed alongside each anchor.
pub const AUDIT_TRAIL_FILENAME: &str = "anchor_audit_trail.txt";

/// Directory in the publication repository holding chain information for
/// each confirmed anchor, keyed by merkle root.
pub const ANCHORS_DIR: &str = "anchors";

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Anchor ([0-9a-f]{64})").expect("anchor marker regex"))
}

fn confirmation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Anchor confirmation ([0-9a-f]{64})")
            .expect("anchor confirmation marker regex")
    })
}

/// Extract the merkle root from an anchor commit subject.
pub(crate) fn match_anchor(subject: &str) -> Option<[u8; 32]> {
    let caps = anchor_re().captures(subject)?;
    parse_digest32(&caps[1]).ok()
}

/// Extract the merkle root from an anchor confirmation commit subject.
pub(crate) fn match_confirmation(subject: &str) -> Option<[u8; 32]> {
    let caps = confirmation_re().captures(subject)?;
    parse_digest32(&caps[1]).ok()
}

impl CairnDb {
    /// Commits on `repo`'s current branch since `last` (exclusive), newest
    /// first, with confirmation commits filtered out and the remaining
    /// digests zero-extended. Returns parallel digest and subject vectors
    /// plus the raw oneline log.
    pub(crate) fn delta_commits(
        &self,
        repo: &dyn RepoEngine,
        last: Option<[u8; 32]>,
    ) -> Result<(Vec<[u8; 32]>, Vec<String>, Vec<String>)> {
        let head = repo.last_commit_digest()?;
        let since = match last {
            None => None,
            Some(extended) => {
                let since = unextend_commit_digest(&extended)?;
                if since == head {
                    return Err(CairnError::NothingToDo);
                }
                Some(since)
            }
        };

        let entries = repo.log(since)?;
        let mut digests = Vec::with_capacity(entries.len());
        let mut messages = Vec::with_capacity(entries.len());
        let mut raw = Vec::with_capacity(entries.len());
        for entry in entries {
            raw.push(entry.oneline());
            if match_confirmation(&entry.subject).is_some() {
                continue;
            }
            digests.push(extend_commit_digest(&entry.digest));
            messages.push(entry.subject);
        }

        if digests.is_empty() {
            return Err(CairnError::NothingToDo);
        }
        Ok((digests, messages, raw))
    }

    /// Drop an anchor covering the publication tier's unanchored commits.
    ///
    /// Must be called with the lock held. Returns the merkle root of the
    /// new anchor, or `NothingToDo` when every commit is already covered.
    async fn anchor_publication(&self) -> Result<[u8; 32]> {
        self.publication.checkout(MASTER)?;
        tracing::info!("running fsck on publication repository");
        self.publication.fsck()?;

        let last = self.state.last_anchor()?;
        let (digests, messages, _raw) =
            self.delta_commits(self.publication.as_ref(), last.map(|l| l.last))?;

        // Build the audit block before aggregation; the Merkle computation
        // sorts the digests and that order is not what a reader wants.
        let mut commit_body = String::new();
        let mut audit_lines = Vec::with_capacity(digests.len());
        for (digest, message) in digests.iter().zip(&messages) {
            let line = format!("{} {}\n", hex::encode(digest), message);
            commit_body.push_str(&line);
            audit_lines.push(line);
        }

        let now = Utc::now().timestamp();
        let root = merkle_root(&digests);
        let record = AnchorRecord {
            time: now,
            digests: digests.clone(),
            messages,
            merkle: root,
            state: AnchorState::Unverified,
        };
        self.state.put_anchor(&record)?;
        let mut unconfirmed = self.state.unconfirmed()?;
        unconfirmed.merkles.push(root);
        self.state.put_unconfirmed(&unconfirmed)?;

        // Submit the individual digests and the root itself. The authority
        // aggregates under its own Merkle root, so the extra digest is free,
        // and the root is the key confirmations are looked up by.
        let mut submit = digests;
        submit.push(root);
        tracing::info!("anchoring publication repository");
        self.stamper.timestamp(&submit).await?;

        let message = format!("{} {}\n\n{}", ANCHOR_MARKER, hex::encode(root), commit_body);
        self.append_audit_trail(record.time, &root, &audit_lines)?;
        self.publication.add(Path::new(AUDIT_TRAIL_FILENAME))?;
        let head = self.publication.commit(&message)?;

        self.state.put_last(&LastAnchor {
            last: extend_commit_digest(&head),
            merkle: root,
            time: now,
        })?;

        Ok(root)
    }

    /// Anchor the publication tier, then fast-forward the staging tier so
    /// it sees the anchor commit. `NothingToDo` is success.
    pub async fn anchor_all(&self) -> Result<()> {
        tracing::info!("dropping anchor");
        let _guard = self.lock_checked()?;

        match self.anchor_publication().await {
            Ok(root) => {
                self.staging.checkout(MASTER)?;
                self.staging.pull(true)?;
                tracing::info!("dropping anchor complete: {}", hex::encode(root));
                Ok(())
            }
            Err(CairnError::NothingToDo) => {
                tracing::info!("anchoring: nothing to do");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the authority about one anchor. Sanity-checks the reply shape.
    pub(crate) async fn verify_anchor(&self, digest: &str) -> Result<VerifyResult> {
        let results = self.stamper.verify(&[digest.to_string()]).await?;
        let [result] = results.as_slice() else {
            return Err(CairnError::Stamper(format!(
                "unexpected number of verify results: {}",
                results.len()
            )));
        };
        if result.result != cairn_core::types::StampResult::Ok {
            return Err(CairnError::Stamper(format!(
                "unexpected verify result for {digest}: {:?}",
                result.result
            )));
        }
        Ok(result.clone())
    }

    /// Poll the unconfirmed set against the authority and write
    /// confirmations for every anchor that reached the chain. Runs without
    /// the lock until there are confirmations to commit.
    pub async fn check_anchors(&self) -> Result<()> {
        let unconfirmed = self.state.unconfirmed()?;
        if unconfirmed.merkles.is_empty() {
            return Ok(());
        }

        let mut confirmed = Vec::with_capacity(unconfirmed.merkles.len());
        for merkle in &unconfirmed.merkles {
            let digest = hex::encode(merkle);
            match self.verify_anchor(&digest).await {
                Ok(vr) if vr.chain_information.chain_timestamp == 0 => {
                    // Not enough confirmations yet; stays in the set.
                    tracing::debug!("anchor {digest} still pending");
                }
                Ok(vr) => confirmed.push(vr),
                Err(e) => tracing::error!("verify anchor {digest}: {e}"),
            }
        }

        self.after_anchor_verify(&confirmed)
    }

    /// Write the confirmation commit for every verified anchor: audit trail
    /// line, chain information under `anchors/<merkle>`, the marker commit,
    /// and the state DB bookkeeping. Takes the lock itself; in-flight
    /// confirmations complete even during shutdown.
    pub(crate) fn after_anchor_verify(&self, vrs: &[VerifyResult]) -> Result<()> {
        if vrs.is_empty() {
            return Ok(());
        }
        let _guard = self.lock_plain()?;

        self.publication.checkout(MASTER)?;
        for vr in vrs {
            let merkle = parse_digest32(&vr.digest)?;
            let tx_line = format!(
                "{} anchored in TX {}\n",
                vr.digest, vr.chain_information.transaction
            );
            self.append_audit_trail(
                vr.chain_information.chain_timestamp,
                &merkle,
                std::slice::from_ref(&tx_line),
            )?;
            self.publication.add(Path::new(AUDIT_TRAIL_FILENAME))?;

            let anchors_dir = self.publication.root().join(ANCHORS_DIR);
            fs::create_dir_all(&anchors_dir)?;
            let info = serde_json::to_vec(&vr.chain_information)
                .map_err(|e| CairnError::Serialization(e.to_string()))?;
            fs::write(anchors_dir.join(&vr.digest), info)?;
            self.publication
                .add(&Path::new(ANCHORS_DIR).join(&vr.digest))?;

            let message = format!(
                "{} {}\n\n{}",
                ANCHOR_CONFIRMATION_MARKER, vr.digest, tx_line
            );
            self.publication.commit(&message)?;

            let mut unconfirmed = self.state.unconfirmed()?;
            unconfirmed.merkles.retain(|m| m != &merkle);
            self.state.put_unconfirmed(&unconfirmed)?;
            if let Some(mut record) = self.state.anchor(&merkle)? {
                record.state = AnchorState::Verified;
                self.state.put_anchor(&record)?;
            }

            tracing::info!(
                "anchor {} confirmed in TX {}",
                vr.digest,
                vr.chain_information.transaction
            );
        }

        // Absorb the confirmation commits into the staging tier.
        self.staging.checkout(MASTER)?;
        self.staging.pull(true)
    }

    /// Append an entry to the audit trail: a header naming the merkle root
    /// followed by the given lines, every line prefixed with the timestamp.
    fn append_audit_trail(&self, ts: i64, merkle: &[u8; 32], lines: &[String]) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.publication.root().join(AUDIT_TRAIL_FILENAME))?;
        writeln!(f, "{ts}: --- Audit Trail Record {} ---", hex::encode(merkle))?;
        for line in lines {
            writeln!(f, "{ts}: {}", line.trim())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_marker_matches() {
        let root = "ab".repeat(32);
        let subject = format!("Anchor {root}");
        assert_eq!(match_anchor(&subject), Some([0xab; 32]));
        assert_eq!(match_confirmation(&subject), None);
    }

    #[test]
    fn test_confirmation_marker_matches() {
        let root = "cd".repeat(32);
        let subject = format!("Anchor confirmation {root}");
        assert_eq!(match_confirmation(&subject), Some([0xcd; 32]));
        // The plain anchor pattern must not fire on confirmations.
        assert_eq!(match_anchor(&subject), None);
    }

    #[test]
    fn test_markers_ignore_ordinary_subjects() {
        for subject in [
            "Add record aabb",
            "Update record status aabb published",
            "Anchor not-a-digest",
            "Anchored elsewhere",
        ] {
            assert_eq!(match_anchor(subject), None, "{subject}");
            assert_eq!(match_confirmation(subject), None, "{subject}");
        }
    }
}
