pub mod config;
pub mod error;
pub mod types;

pub use error::{FilenError, FilenResult};
pub use types::{chunk_count, FileInfo, FileMetadata, ItemId, Node, NodeKind, CHUNK_SIZE};
