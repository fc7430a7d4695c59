use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use clouddrive_core::DriveClient;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Snapshot};
use crate::error::TreeError;
use crate::node::Node;
use crate::sync::SyncSummary;

/// In-memory mirror of the remote namespace.
///
/// Nodes are indexed by ID; parent/child links are ID sets and lists on the
/// nodes themselves. A node may have several parents.
pub struct Tree {
    pub(crate) client: DriveClient,
    pub(crate) cache: CacheStore,
    pub(crate) checkpoint: String,
    pub(crate) root_id: String,
    pub(crate) nodes: HashMap<String, Node>,
    pub(crate) stale: bool,
}

impl Tree {
    /// Loads the cached tree or fetches a full listing, catches up with the
    /// change feed and persists the result.
    pub async fn open(client: DriveClient, cache_file: impl Into<PathBuf>) -> Result<Self, TreeError> {
        let mut tree = Self::empty(client, CacheStore::new(cache_file));

        match tree.cache.load().await {
            Ok(snapshot) => {
                tree.install(snapshot);
                info!(
                    nodes = tree.nodes.len(),
                    checkpoint = %tree.checkpoint,
                    "restored tree from cache"
                );
            }
            Err(err) => {
                info!(error = %err, "tree cache unavailable, fetching full listing");
                tree.rebuild().await?;
            }
        }

        tree.refresh().await?;
        tree.save().await?;
        Ok(tree)
    }

    pub(crate) fn empty(client: DriveClient, cache: CacheStore) -> Self {
        Self {
            client,
            cache,
            checkpoint: String::new(),
            root_id: String::new(),
            nodes: HashMap::new(),
            stale: false,
        }
    }

    /// Syncs with the change feed. A reset discards the cache and rebuilds
    /// from a full listing once; a second reset is returned to the caller.
    pub async fn refresh(&mut self) -> Result<SyncSummary, TreeError> {
        match self.sync().await {
            Err(err) if err.requires_fresh_fetch() => {
                info!("change feed was reset, rebuilding from full listing");
                if let Err(err) = self.cache.remove().await {
                    warn!(error = %err, "failed to remove stale tree cache");
                }
                self.rebuild().await?;
                self.sync().await
            }
            other => other,
        }
    }

    /// Replaces the index with a full listing. Without a checkpoint one is
    /// taken first, so changes made while the listing is paged are replayed
    /// by the next sync.
    async fn rebuild(&mut self) -> Result<(), TreeError> {
        if self.checkpoint.is_empty() {
            self.fetch_checkpoint().await?;
        }
        self.fetch_fresh().await
    }

    /// Persists the tree. Consumes it; the tree must not be used afterwards.
    pub async fn close(self) -> Result<(), TreeError> {
        self.save().await
    }

    pub async fn save(&self) -> Result<(), TreeError> {
        self.ensure_fresh()?;
        self.cache.save(&self.snapshot()).await?;
        Ok(())
    }

    pub fn client(&self) -> &DriveClient {
        &self.client
    }

    pub fn checkpoint(&self) -> &str {
        &self.checkpoint
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Result<&Node, TreeError> {
        self.resolve_by_id(&self.root_id)
    }

    /// Case-insensitive path lookup. Empty segments are ignored, so `""`,
    /// `"/"` and `"//"` all name the root. Among same-named siblings the
    /// first in child order wins.
    pub fn resolve(&self, path: &str) -> Result<&Node, TreeError> {
        let mut current = self.root()?;
        for segment in path_segments(path) {
            current = self.find_child(&current.id, segment).ok_or_else(|| {
                debug!(path, segment, "path segment not found");
                TreeError::NotFound(path.to_string())
            })?;
        }
        Ok(current)
    }

    pub fn resolve_by_id(&self, id: &str) -> Result<&Node, TreeError> {
        self.ensure_fresh()?;
        self.nodes
            .get(id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))
    }

    pub fn children(&self, id: &str) -> Result<Vec<&Node>, TreeError> {
        let node = self.resolve_by_id(id)?;
        Ok(node
            .children()
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .collect())
    }

    /// Path of a node following its first parent. `None` for unknown nodes
    /// and nodes not connected to the root.
    pub fn path_of(&self, id: &str) -> Option<String> {
        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.nodes.get(id)?;
        while current.id != self.root_id {
            if !seen.insert(current.id.as_str()) {
                return None;
            }
            segments.push(current.name.as_str());
            let parent = current.parents.iter().next()?;
            current = self.nodes.get(parent)?;
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    pub(crate) fn find_child(&self, parent_id: &str, name: &str) -> Option<&Node> {
        let parent = self.nodes.get(parent_id)?;
        parent
            .children()
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|child| names_match(&child.name, name))
    }

    pub(crate) fn ensure_fresh(&self) -> Result<(), TreeError> {
        if self.stale {
            return Err(TreeError::MustFetchFresh);
        }
        Ok(())
    }

    pub(crate) fn link_child(&mut self, parent_id: &str, child_id: &str) {
        match self.nodes.get_mut(parent_id) {
            Some(parent) => {
                parent.add_child(child_id);
            }
            None => debug!(parent = parent_id, child = child_id, "parent not indexed, skipping link"),
        }
    }

    pub(crate) fn unlink_child(&mut self, parent_id: &str, child_id: &str) {
        match self.nodes.get_mut(parent_id) {
            Some(parent) => {
                parent.remove_child(child_id);
            }
            None => debug!(parent = parent_id, child = child_id, "parent not indexed, skipping unlink"),
        }
    }

    /// Inserts a node returned by a create or upload call and links it under
    /// all of its parents.
    pub(crate) fn splice(&mut self, mut node: Node) -> String {
        let id = node.id.clone();
        if let Some(existing) = self.nodes.remove(&id) {
            node.children = existing.children;
        }
        let parents: Vec<String> = node.parents.iter().cloned().collect();
        self.nodes.insert(id.clone(), node);
        for parent in &parents {
            self.link_child(parent, &id);
        }
        id
    }

    /// Detaches a node from every parent and drops it from the index along
    /// with every descendant left without a parent.
    pub(crate) fn detach(&mut self, id: &str) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        for parent in &node.parents {
            self.unlink_child(parent, id);
        }

        let mut pending = vec![(node.id, node.children)];
        while let Some((parent_id, children)) = pending.pop() {
            for child_id in children {
                let Some(child) = self.nodes.get_mut(&child_id) else {
                    continue;
                };
                child.parents.remove(&parent_id);
                if !child.parents.is_empty() {
                    continue;
                }
                if let Some(child) = self.nodes.remove(&child_id) {
                    debug!(id = %child.id, "dropping descendant of detached node");
                    pending.push((child.id, child.children));
                }
            }
        }
    }

    fn install(&mut self, snapshot: Snapshot) {
        self.checkpoint = snapshot.checkpoint;
        self.root_id = snapshot.root_id;
        self.nodes = snapshot
            .nodes
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();
        self.stale = false;
    }

    /// Collects every node reachable from the root, breadth first.
    pub(crate) fn snapshot(&self) -> Snapshot {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.root_id.as_str()]);
        let mut nodes = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            queue.extend(node.children().iter().map(String::as_str));
            nodes.push(node.clone());
        }
        let reachable: HashSet<String> = nodes.iter().map(|node| node.id.clone()).collect();
        for node in &mut nodes {
            node.children.retain(|child| reachable.contains(child));
        }
        Snapshot::new(self.checkpoint.clone(), self.root_id.clone(), nodes)
    }
}

pub(crate) fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn names_match(stored: &str, wanted: &str) -> bool {
    stored == wanted || stored.to_lowercase() == wanted.to_lowercase()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use clouddrive_core::{NodeKind, NodePayload, TokenProvider};

    pub(crate) fn node(id: &str, name: &str, kind: NodeKind, parents: &[&str]) -> Node {
        Node::from_payload(&NodePayload {
            id: id.into(),
            name: Some(name.into()),
            kind: Some(kind),
            parents: Some(parents.iter().map(|p| p.to_string()).collect()),
            ..NodePayload::default()
        })
    }

    pub(crate) fn folder(id: &str, name: &str, parents: &[&str]) -> Node {
        node(id, name, NodeKind::Folder, parents)
    }

    pub(crate) fn file(id: &str, name: &str, parents: &[&str]) -> Node {
        node(id, name, NodeKind::File, parents)
    }

    /// Builds a tree with a root folder `root` plus `nodes`, linked in the
    /// given order. No request is ever sent to the dummy endpoints.
    pub(crate) fn tree(nodes: Vec<Node>) -> Tree {
        let client = DriveClient::with_endpoints(
            "http://127.0.0.1:9/drive/v1/",
            "http://127.0.0.1:9/cdproxy/",
            TokenProvider::fixed("test-token"),
        )
        .unwrap();
        let mut tree = Tree::empty(client, CacheStore::new("unused.cache"));
        let mut root = folder("root", "", &[]);
        root.root = true;
        tree.root_id = root.id.clone();
        tree.nodes.insert(root.id.clone(), root);
        for node in nodes {
            tree.splice(node);
        }
        tree
    }
}
