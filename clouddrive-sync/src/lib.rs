pub mod cache;
pub mod config;
mod error;
pub mod logging;
mod node;
mod ops;
mod sync;
mod tree;
mod upload;

pub use cache::{CacheError, CacheStore, Snapshot};
pub use config::SyncConfig;
pub use error::TreeError;
pub use node::{Node, NodeContent};
pub use ops::{ContentReader, FolderUploadSummary, UploadOutcome};
pub use sync::SyncSummary;
pub use tree::Tree;
pub use upload::UploadContent;
