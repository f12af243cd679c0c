//! Cairn core: traits and types for the cairn record store
//!
//! This crate defines the shared abstractions of a content-addressed,
//! append-only record store with external timestamp anchoring:
//! - Record and anchor data model (tokens, statuses, Merkle roots)
//! - Digest plumbing: 20-byte commit ids zero-extended to 32 bytes so they
//!   can be aggregated alongside SHA-256 content digests
//! - Merkle aggregation over digest sets
//! - The process-wide filesystem lock that serializes repository access
//! - The two capability seams: `RepoEngine` (versioned store) and
//!   `TimestampClient` (timestamp authority)

pub mod digest;
pub mod error;
pub mod lock_manager;
pub mod merkle;
pub mod traits;
pub mod types;

pub use digest::{
    extend_commit_digest, is_token_hex, parse_digest32, sha256, unextend_commit_digest,
    COMMIT_DIGEST_SIZE, DIGEST_SIZE,
};
pub use error::{CairnError, ContentErrorCode, Result};
pub use lock_manager::{LockGuard, LockManager, LOCK_DURATION, LOCK_FILENAME};
pub use merkle::merkle_root;
pub use traits::{LogEntry, RepoEngine, TimestampClient};
pub use types::{
    AnchorRecord, AnchorState, ChainInformation, File, LastAnchor, MetadataStream, Record,
    RecordMetadata, RecordStatus, StampResult, Token, UnconfirmedAnchors, VerifyResult,
    METADATA_STREAMS_MAX, TOKEN_SIZE,
};
