pub mod anchor;
pub mod record;

pub use anchor::{
    AnchorRecord, AnchorState, ChainInformation, LastAnchor, StampResult, UnconfirmedAnchors,
    VerifyResult,
};
pub use record::{
    File, MetadataStream, Record, RecordMetadata, RecordStatus, Token, METADATA_STREAMS_MAX,
    TOKEN_SIZE,
};
