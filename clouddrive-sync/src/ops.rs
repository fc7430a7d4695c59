use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use clouddrive_core::{DriveClient, NewNode, NodePayload};
use futures_util::TryStreamExt;
use reqwest::Method;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::error::TreeError;
use crate::node::Node;
use crate::tree::{path_segments, Tree};
use crate::upload::{send_multipart, UploadContent};

/// Streaming body of a downloaded file.
pub type ContentReader = Pin<Box<dyn AsyncRead + Send>>;

const HASH_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Created,
    Overwritten,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderUploadSummary {
    pub created: usize,
    pub overwritten: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl Node {
    pub async fn download(&self, client: &DriveClient) -> Result<ContentReader, TreeError> {
        if !self.is_file() {
            return Err(TreeError::NotAFile(self.name.clone()));
        }
        let response = client.download_content(&self.id).await?;
        let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::pin(StreamReader::new(stream)))
    }

    pub async fn create_folder(&self, client: &DriveClient, name: &str) -> Result<Node, TreeError> {
        if !self.is_folder() {
            return Err(TreeError::NotAFolder(self.name.clone()));
        }
        let payload = client.create_node(&NewNode::folder(name, &self.id)).await?;
        Ok(Node::from_payload(&payload))
    }

    pub async fn upload<R>(
        &self,
        client: &DriveClient,
        name: &str,
        content: UploadContent<R>,
    ) -> Result<Node, TreeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if !self.is_folder() {
            return Err(TreeError::NotAFolder(self.name.clone()));
        }
        let metadata = serde_json::to_string(&NewNode::file(name, &self.id))?;
        let url = client.content_url("nodes?suppress=deduplication")?;
        let payload = send_multipart(client, Method::POST, url, Some(metadata), name, content).await?;
        Ok(Node::from_payload(&payload))
    }

    /// Replaces the content of this file and returns the refreshed metadata.
    pub async fn overwrite<R>(
        &self,
        client: &DriveClient,
        content: UploadContent<R>,
    ) -> Result<NodePayload, TreeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if !self.is_file() {
            return Err(TreeError::NotAFile(self.name.clone()));
        }
        let url = client.content_url(&format!("nodes/{}/content", self.id))?;
        send_multipart(client, Method::PUT, url, None, &self.name, content).await
    }

    pub async fn remove(&self, client: &DriveClient) -> Result<(), TreeError> {
        client.trash_node(&self.id).await?;
        Ok(())
    }
}

impl Tree {
    pub async fn create_folder(&mut self, parent_id: &str, name: &str) -> Result<&Node, TreeError> {
        let parent = self.resolve_by_id(parent_id)?;
        let mut created = parent.create_folder(&self.client, name).await?;
        created.parents.insert(parent_id.to_string());
        info!(id = %created.id, parent = parent_id, name, "created folder");
        let id = self.splice(created);
        self.resolve_by_id(&id)
    }

    /// Uploads a new file under `parent_id`. An empty reader fails with
    /// `NoContent` without touching the network.
    pub async fn upload<R>(&mut self, parent_id: &str, name: &str, reader: R) -> Result<&Node, TreeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let content = UploadContent::prepare(reader).await?;
        self.upload_content(parent_id, name, content).await
    }

    async fn upload_content<R>(
        &mut self,
        parent_id: &str,
        name: &str,
        content: UploadContent<R>,
    ) -> Result<&Node, TreeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let parent = self.resolve_by_id(parent_id)?;
        let mut created = parent.upload(&self.client, name, content).await?;
        created.parents.insert(parent_id.to_string());
        info!(id = %created.id, parent = parent_id, name, size = created.size(), "uploaded file");
        let id = self.splice(created);
        self.resolve_by_id(&id)
    }

    pub async fn overwrite<R>(&mut self, id: &str, reader: R) -> Result<&Node, TreeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let content = UploadContent::prepare(reader).await?;
        let node = self.resolve_by_id(id)?;
        let mut payload = node.overwrite(&self.client, content).await?;
        payload.id = id.to_string();
        self.reconcile(&payload);
        info!(id, version = ?payload.version, "overwrote file");
        self.resolve_by_id(id)
    }

    /// Trashes the node remotely, then unlinks it from every parent. The
    /// graph is untouched when the remote call fails.
    pub async fn remove_node(&mut self, id: &str) -> Result<(), TreeError> {
        let node = self.resolve_by_id(id)?;
        node.remove(&self.client).await?;
        info!(id, "moved node to trash");
        self.detach(id);
        Ok(())
    }

    pub async fn download(&self, id: &str) -> Result<ContentReader, TreeError> {
        self.resolve_by_id(id)?.download(&self.client).await
    }

    pub async fn download_path(&self, path: &str) -> Result<ContentReader, TreeError> {
        self.resolve(path)?.download(&self.client).await
    }

    /// Creates every missing folder along `path` and returns the last one.
    pub async fn ensure_folder_path(&mut self, path: &str) -> Result<&Node, TreeError> {
        let id = self.ensure_folder_id(path).await?;
        self.resolve_by_id(&id)
    }

    async fn ensure_folder_id(&mut self, path: &str) -> Result<String, TreeError> {
        let mut current = self.root()?.id.clone();
        let mut walked = String::new();
        let segments: Vec<&str> = path_segments(path).collect();
        for (index, segment) in segments.iter().copied().enumerate() {
            walked.push('/');
            walked.push_str(segment);
            let existing = self
                .find_child(&current, segment)
                .map(|child| (child.id.clone(), child.is_folder()));
            current = match existing {
                Some((id, true)) => id,
                Some((_, false)) if index + 1 == segments.len() => {
                    return Err(TreeError::NotAFolder(walked));
                }
                Some((_, false)) => return Err(TreeError::CannotCreateUnderFile(walked)),
                None => self.create_folder(&current, segment).await?.id.clone(),
            };
        }
        Ok(current)
    }

    /// Uploads `reader` as a new file at `path`, creating parent folders.
    pub async fn put<R>(&mut self, path: &str, reader: R) -> Result<&Node, TreeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        match self.resolve(path) {
            Ok(_) => return Err(TreeError::FileExists(path.to_string())),
            Err(TreeError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        let content = UploadContent::prepare(reader).await?;

        let mut segments: Vec<&str> = path_segments(path).collect();
        let Some(name) = segments.pop() else {
            return Err(TreeError::FileExists(path.to_string()));
        };
        let parent_id = self.ensure_folder_id(&segments.join("/")).await?;
        self.upload_content(&parent_id, name, content).await
    }

    /// Uploads one local file. Matching content is left alone; differing
    /// content is replaced only when `overwrite` is set.
    pub async fn upload_file(
        &mut self,
        local: &Path,
        remote: &str,
        overwrite: bool,
    ) -> Result<UploadOutcome, TreeError> {
        let existing = match self.resolve(remote) {
            Ok(node) => Some((node.id.clone(), node.is_folder(), node.md5().map(str::to_string))),
            Err(TreeError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        let Some((id, is_folder, remote_md5)) = existing else {
            let file = tokio::fs::File::open(local).await?;
            self.put(remote, file).await?;
            return Ok(UploadOutcome::Created);
        };
        if is_folder {
            return Err(TreeError::FileExistsAndIsFolder(remote.to_string()));
        }

        let local_md5 = file_md5(local).await?;
        if remote_md5.is_some_and(|md5| md5.eq_ignore_ascii_case(&local_md5)) {
            debug!(remote, md5 = %local_md5, "remote content already matches");
            return Ok(UploadOutcome::Unchanged);
        }
        if !overwrite {
            return Err(TreeError::FileExistsWithDifferentContent(remote.to_string()));
        }
        let file = tokio::fs::File::open(local).await?;
        self.overwrite(&id, file).await?;
        Ok(UploadOutcome::Overwritten)
    }

    /// Uploads the files of `local_dir` into `remote_dir`. Subdirectories are
    /// descended only when `recursive` is set; empty files are skipped.
    pub async fn upload_folder(
        &mut self,
        local_dir: &Path,
        remote_dir: &str,
        recursive: bool,
        overwrite: bool,
    ) -> Result<FolderUploadSummary, TreeError> {
        let mut summary = FolderUploadSummary::default();
        let mut pending: Vec<(PathBuf, String)> =
            vec![(local_dir.to_path_buf(), remote_dir.trim_end_matches('/').to_string())];

        while let Some((dir, remote)) = pending.pop() {
            let mut entries = Vec::new();
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                entries.push(entry);
            }
            entries.sort_by_key(|entry| entry.file_name());

            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let remote_path = format!("{remote}/{name}");
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if recursive {
                        pending.push((entry.path(), remote_path));
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                match self.upload_file(&entry.path(), &remote_path, overwrite).await {
                    Ok(UploadOutcome::Created) => summary.created += 1,
                    Ok(UploadOutcome::Overwritten) => summary.overwritten += 1,
                    Ok(UploadOutcome::Unchanged) => summary.unchanged += 1,
                    Err(TreeError::NoContent) => {
                        warn!(path = %entry.path().display(), "skipping empty file");
                        summary.skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        info!(
            created = summary.created,
            overwritten = summary.overwritten,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            "folder upload finished"
        );
        Ok(summary)
    }
}

async fn file_md5(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}
