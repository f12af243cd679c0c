//! Cairn: a content-addressed, append-only record store with external
//! timestamp anchoring.
//!
//! Records (named binary files plus labelled metadata streams) live in a
//! two-tier repository model: a mutable staging tier holding one branch per
//! in-flight record, and a publication tier whose `master` is the immutable
//! public history. Status transitions promote records between tiers by
//! replaying their branch onto the publication `master`.
//!
//! The anchoring pipeline periodically aggregates all new publication-tier
//! commits under a Merkle root, submits the set to an external timestamp
//! authority, and later writes a confirmation commit naming the chain
//! transaction, so any historical state of the store can be proven to have
//! existed at a given time.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use cairn::{CairnConfig, CairnDb, HttpStamper};
//!
//! # #[tokio::main]
//! # async fn main() -> cairn::Result<()> {
//! let config = CairnConfig::new("./data").with_stamp_host("https://stamp.example.org");
//! let stamper = Arc::new(HttpStamper::new(config.stamp_host.clone()));
//! let (db, _tasks) = CairnDb::start(&config, stamper).await?;
//!
//! let files = vec![cairn::content::file_from_bytes("a.txt", b"hello\n")];
//! let md = db.new_record(&[], &files)?;
//! println!("created record {}", hex::encode(&md.token));
//! # Ok(())
//! # }
//! ```

pub mod anchor;
pub mod content;
pub mod db;
pub mod fsck;
pub mod record;
pub mod scheduler;
pub mod stamper;
pub mod statedb;

// Re-export the core surface.
pub use cairn_core::{
    error::{CairnError, ContentErrorCode, Result},
    lock_manager::{LockGuard, LockManager, LOCK_DURATION, LOCK_FILENAME},
    merkle::merkle_root,
    traits::{LogEntry, RepoEngine, TimestampClient},
    types::{
        AnchorRecord, AnchorState, ChainInformation, File, LastAnchor, MetadataStream, Record,
        RecordMetadata, RecordStatus, StampResult, Token, UnconfirmedAnchors, VerifyResult,
        METADATA_STREAMS_MAX, TOKEN_SIZE,
    },
};
pub use cairn_dag::{DagRepo, MASTER};

pub use anchor::{
    ANCHORS_DIR, ANCHOR_CONFIRMATION_MARKER, ANCHOR_MARKER, AUDIT_TRAIL_FILENAME,
};
pub use content::{detect_mime, file_from_bytes, mime_valid, SUPPORTED_MIME_TYPES};
pub use db::{
    CairnConfig, CairnDb, DEFAULT_ANCHOR_SCHEDULE, DEFAULT_WATCHER_INTERVAL, STATE_DB_FILENAME,
    UNVETTED_DIR, VETTED_DIR,
};
pub use record::{MD_FILENAME_SUFFIX, PAYLOAD_DIR, RECORD_METADATA_FILENAME};
pub use scheduler::spawn_background_tasks;
pub use stamper::{HttpStamper, TestStamper, TEST_TX};
pub use statedb::AnchorStateDb;
