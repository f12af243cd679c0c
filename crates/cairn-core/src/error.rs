use std::fmt;
use std::io;

use thiserror::Error;

use crate::types::RecordStatus;

/// Reason a submitted record payload failed content verification.
///
/// These codes are part of the client-visible surface; `ContentVerification`
/// errors carry one of them plus free-form context strings (usually the
/// offending filename or stream id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorCode {
    /// Metadata stream id is outside the configured maximum.
    InvalidMetadataId,
    /// Two metadata streams share an id.
    DuplicateMetadataId,
    /// Filename contains a path separator or does not survive sanitization.
    InvalidFilename,
    /// No files were provided.
    Empty,
    /// Two files share a basename, or a file collides with a deletion.
    DuplicateFilename,
    /// Declared digest is not valid hex or does not match the payload.
    InvalidFileDigest,
    /// Payload is not valid base64.
    InvalidBase64,
    /// Declared MIME type does not match the detected type.
    InvalidMimeType,
    /// Detected MIME type is not on the whitelist.
    UnsupportedMimeType,
    /// A file slated for deletion does not exist.
    FileNotFound,
}

impl fmt::Display for ContentErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidMetadataId => "invalid metadata stream id",
            Self::DuplicateMetadataId => "duplicate metadata stream id",
            Self::InvalidFilename => "invalid filename",
            Self::Empty => "empty record",
            Self::DuplicateFilename => "duplicate filename",
            Self::InvalidFileDigest => "invalid file digest",
            Self::InvalidBase64 => "invalid base64",
            Self::InvalidMimeType => "invalid MIME type",
            Self::UnsupportedMimeType => "unsupported MIME type",
            Self::FileNotFound => "file not found",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum CairnError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("content verification failed: {code}{}", format_context(.context))]
    ContentVerification {
        code: ContentErrorCode,
        context: Vec<String>,
    },

    #[error("invalid record status transition: {from} -> {to}")]
    StateTransition { from: RecordStatus, to: RecordStatus },

    #[error("record not found")]
    RecordNotFound,

    #[error("record is locked")]
    RecordLocked,

    #[error("no changes")]
    NoChanges,

    #[error("store is shutting down")]
    Shutdown,

    #[error("lock acquisition timed out after {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    #[error("versioned store error: {0}")]
    Repo(String),

    #[error("timestamp authority error: {0}")]
    Stamper(String),

    #[error("repository corrupt: {0}")]
    Corrupt(String),

    #[error("nothing to do")]
    NothingToDo,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("state database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CairnError>;

impl CairnError {
    /// Shorthand for a `ContentVerification` error with context strings.
    pub fn content(code: ContentErrorCode, context: &[&str]) -> Self {
        CairnError::ContentVerification {
            code,
            context: context.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn format_context(context: &[String]) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" ({})", context.join(", "))
    }
}
