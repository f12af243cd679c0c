//! The versioned-store capability.
//!
//! A narrow interface over a content-addressed DAG-of-commits engine with
//! branches. The record store drives one instance per tier: a staging
//! repository carrying one branch per in-flight record, and a publication
//! repository whose `master` is the authoritative append-only history.
//!
//! Commit ids are 20 bytes; the anchoring pipeline zero-extends them to 32
//! bytes before mixing them with SHA-256 content digests (see
//! [`crate::digest`]).

use std::path::Path;

use crate::digest::COMMIT_DIGEST_SIZE;
use crate::error::Result;

/// One line of `log` output: a commit id and its subject line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub digest: [u8; COMMIT_DIGEST_SIZE],
    pub subject: String,
}

impl LogEntry {
    /// Render the entry the way the audit trail records it:
    /// `<digest_hex> <subject>`.
    pub fn oneline(&self) -> String {
        format!("{} {}", hex::encode(self.digest), self.subject)
    }
}

/// Operations every repository implementation must provide.
///
/// All paths handed to `add`/`remove` are relative to the repository root.
/// Constructors (`init`, `clone`) live on the concrete engine type; this
/// trait covers an opened repository only, which keeps it object safe.
pub trait RepoEngine: Send + Sync {
    /// Repository root directory (the working tree).
    fn root(&self) -> &Path;

    /// Switch the working tree to `branch`.
    fn checkout(&self, branch: &str) -> Result<()>;

    /// Create `name` at the current head and switch to it.
    fn new_branch(&self, name: &str) -> Result<()>;

    /// Delete branch `name`. Fails on the current branch.
    fn delete_branch(&self, name: &str) -> Result<()>;

    /// Stage `path` for the next commit.
    fn add(&self, path: &Path) -> Result<()>;

    /// Remove `path` from the working tree and stage the removal.
    fn remove(&self, path: &Path) -> Result<()>;

    /// Record the working tree as a new commit on the current branch.
    /// The first line of `message` is the commit subject.
    fn commit(&self, message: &str) -> Result<[u8; COMMIT_DIGEST_SIZE]>;

    /// Discard all uncommitted changes, restoring the working tree to the
    /// current head.
    fn stash(&self) -> Result<()>;

    /// Replay the commits unique to the current branch onto the head of
    /// `onto`; the current branch ref moves to the replayed head.
    fn rebase(&self, onto: &str) -> Result<()>;

    /// Copy the current branch's history into `remote` under `branch`.
    fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<()>;

    /// Fast-forward the current branch to its upstream counterpart.
    fn pull(&self, ff_only: bool) -> Result<()>;

    /// Whether the working tree differs from the current head.
    fn diff(&self) -> Result<bool>;

    /// Commit ids and subjects, newest first. With `since`, the range is
    /// `since..head` (exclusive of `since`); otherwise the full history.
    fn log(&self, since: Option<[u8; COMMIT_DIGEST_SIZE]>) -> Result<Vec<LogEntry>>;

    /// Re-verify every reachable object against its digest.
    fn fsck(&self) -> Result<()>;

    /// Commit id at the head of the current branch.
    fn last_commit_digest(&self) -> Result<[u8; COMMIT_DIGEST_SIZE]>;

    /// Name of the currently checked-out branch.
    fn current_branch(&self) -> Result<String>;

    /// All branch names.
    fn list_branches(&self) -> Result<Vec<String>>;
}
