use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::node::Node;

const CACHE_FORMAT_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cache encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("unsupported cache format version {0}")]
    Version(u32),
    #[error("inconsistent cache snapshot: {0}")]
    Inconsistent(String),
}

/// Serialized form of the tree: every node reachable from the root plus the
/// change feed checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: u32,
    pub checkpoint: String,
    pub root_id: String,
    pub nodes: Vec<Node>,
}

impl Snapshot {
    pub fn new(checkpoint: String, root_id: String, nodes: Vec<Node>) -> Self {
        Self {
            format: CACHE_FORMAT_VERSION,
            checkpoint,
            root_id,
            nodes,
        }
    }

    fn validate(&self) -> Result<(), CacheError> {
        if self.format != CACHE_FORMAT_VERSION {
            return Err(CacheError::Version(self.format));
        }
        let ids: HashSet<&str> = self.nodes.iter().map(|node| node.id.as_str()).collect();
        let root = self
            .nodes
            .iter()
            .find(|node| node.id == self.root_id)
            .ok_or_else(|| CacheError::Inconsistent(format!("root {} missing", self.root_id)))?;
        if !root.is_folder() || !root.parents.is_empty() {
            return Err(CacheError::Inconsistent(format!(
                "root {} is not a parentless folder",
                self.root_id
            )));
        }
        for node in &self.nodes {
            if let Some(child) = node.children().iter().find(|id| !ids.contains(id.as_str())) {
                return Err(CacheError::Inconsistent(format!(
                    "node {} references missing child {child}",
                    node.id
                )));
            }
        }
        Ok(())
    }
}

/// Single-file persistent store for tree snapshots.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the snapshot next to the target and renames it into place.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), CacheError> {
        let bytes = bincode::serialize(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            path = %self.path.display(),
            nodes = snapshot.nodes.len(),
            bytes = bytes.len(),
            "saved tree cache"
        );
        Ok(())
    }

    /// Any failure here is a cache miss for the caller.
    pub async fn load(&self) -> Result<Snapshot, CacheError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let snapshot: Snapshot = bincode::deserialize(&bytes)?;
        snapshot.validate()?;
        debug!(
            path = %self.path.display(),
            nodes = snapshot.nodes.len(),
            "loaded tree cache"
        );
        Ok(snapshot)
    }

    pub async fn remove(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed tree cache");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clouddrive_core::{ContentProperties, NodeKind, NodePayload};
    use time::OffsetDateTime;

    fn folder(id: &str, name: &str, parents: &[&str]) -> Node {
        Node::from_payload(&NodePayload {
            id: id.into(),
            name: Some(name.into()),
            kind: Some(NodeKind::Folder),
            parents: Some(parents.iter().map(|p| p.to_string()).collect()),
            ..NodePayload::default()
        })
    }

    fn sample() -> Snapshot {
        let mut root = folder("root", "", &[]);
        root.root = true;
        root.add_child("d1");
        let docs = folder("d1", "Docs", &["root"]);
        Snapshot::new("cp-7".into(), "root".into(), vec![root, docs])
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("nested").join("tree.cache"));

        store.save(&sample()).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.checkpoint, "cp-7");
        assert_eq!(loaded.root_id, "root");
        assert_eq!(loaded.nodes, sample().nodes);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn dated_nodes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("tree.cache"));
        let stamp = OffsetDateTime::from_unix_timestamp(1_704_103_200).unwrap();
        let mut snapshot = sample();
        let mut report = Node::from_payload(&NodePayload {
            id: "f1".into(),
            name: Some("report.pdf".into()),
            kind: Some(NodeKind::File),
            parents: Some(vec!["d1".into()]),
            creation_date: Some(stamp),
            modified_date: Some(stamp),
            content_properties: Some(ContentProperties {
                size: Some(42),
                md5: Some("abc".into()),
                content_date: Some(stamp),
                ..ContentProperties::default()
            }),
            ..NodePayload::default()
        });
        report.version = 3;
        snapshot.nodes[1].add_child("f1");
        snapshot.nodes.push(report);

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.nodes, snapshot.nodes);
        assert_eq!(loaded.nodes[2].content.content_date, Some(stamp));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("absent.cache"));

        assert!(matches!(store.load().await, Err(CacheError::Io(_))));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.cache");
        std::fs::write(&path, b"definitely not bincode").unwrap();

        assert!(CacheStore::new(path).load().await.is_err());
    }

    #[tokio::test]
    async fn dangling_child_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("tree.cache"));
        let mut snapshot = sample();
        snapshot.nodes[0].add_child("ghost");

        store.save(&snapshot).await.unwrap();

        assert!(matches!(
            store.load().await,
            Err(CacheError::Inconsistent(_))
        ));
    }

    #[tokio::test]
    async fn unknown_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("tree.cache"));
        let mut snapshot = sample();
        snapshot.format = 99;

        store.save(&snapshot).await.unwrap();

        assert!(matches!(store.load().await, Err(CacheError::Version(99))));
    }

    #[tokio::test]
    async fn remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("tree.cache"));

        store.remove().await.unwrap();
        store.save(&sample()).await.unwrap();
        store.remove().await.unwrap();

        assert!(!store.path().exists());
    }
}
