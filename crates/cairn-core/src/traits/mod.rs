pub mod repo;
pub mod stamper;

pub use repo::{LogEntry, RepoEngine};
pub use stamper::TimestampClient;
