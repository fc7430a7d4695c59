use clouddrive_core::DriveError;
use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("drive api error: {0}")]
    Drive(#[from] DriveError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed change record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("node not found: {0}")]
    NotFound(String),
    #[error("not a folder: {0}")]
    NotAFolder(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("cannot create a node under file {0}")]
    CannotCreateUnderFile(String),
    #[error("file already exists: {0}")]
    FileExists(String),
    #[error("a folder already exists at {0}")]
    FileExistsAndIsFolder(String),
    #[error("file already exists with different content: {0}")]
    FileExistsWithDifferentContent(String),
    #[error("no content to upload")]
    NoContent,
    #[error("change feed was reset, a full listing is required")]
    MustFetchFresh,
    #[error("full listing contains no root folder")]
    MissingRoot,
    #[error("failed to produce upload body: {0}")]
    UploadBody(#[source] std::io::Error),
    #[error("upload producer task failed: {0}")]
    UploadTask(#[from] tokio::task::JoinError),
}

impl TreeError {
    /// Errors that leave the tree unusable until a full listing is fetched.
    pub fn requires_fresh_fetch(&self) -> bool {
        matches!(self, TreeError::MustFetchFresh)
    }
}
