use std::collections::{BTreeSet, HashMap};
use std::io;

use clouddrive_core::{ChangeRecord, ChangesRequest, NodePayload};
use futures_util::TryStreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::error::TreeError;
use crate::node::Node;
use crate::tree::Tree;

const LIST_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub records: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconciled {
    Updated,
    Removed,
    Missing,
}

impl Tree {
    /// Replaces the index with a full paginated listing. Non-available nodes
    /// are dropped; the root is the parentless folder with an empty name.
    pub async fn fetch_fresh(&mut self) -> Result<(), TreeError> {
        let mut payloads = Vec::new();
        let mut start_token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .client
                .list_nodes(LIST_PAGE_SIZE, start_token.as_deref())
                .await?;
            pages += 1;
            payloads.extend(page.data);
            start_token = page.next_token.filter(|token| !token.is_empty());
            if start_token.is_none() {
                break;
            }
        }

        let mut order = Vec::with_capacity(payloads.len());
        let mut nodes: HashMap<String, Node> = HashMap::with_capacity(payloads.len());
        for payload in &payloads {
            let node = Node::from_payload(payload);
            if !node.is_available() {
                continue;
            }
            if !nodes.contains_key(&node.id) {
                order.push(node.id.clone());
            }
            nodes.insert(node.id.clone(), node);
        }

        let mut root_id: Option<String> = None;
        for id in &order {
            let Some(node) = nodes.get(id) else {
                continue;
            };
            let parents: Vec<String> = node.parents.iter().cloned().collect();
            if node.name.is_empty() && node.is_folder() && parents.is_empty() {
                if root_id.is_none() {
                    root_id = Some(id.clone());
                } else {
                    warn!(root = ?root_id, other = %id, "ignoring second root candidate");
                }
            }
            for parent_id in &parents {
                if let Some(parent) = nodes.get_mut(parent_id) {
                    parent.add_child(id);
                }
            }
        }

        let root_id = root_id.ok_or(TreeError::MissingRoot)?;
        if let Some(root) = nodes.get_mut(&root_id) {
            root.root = true;
        }
        info!(nodes = nodes.len(), pages, "fetched full node listing");

        self.nodes = nodes;
        self.root_id = root_id;
        self.stale = false;
        Ok(())
    }

    /// Applies change records since the stored checkpoint.
    ///
    /// Checkpoints advance per record, so a failure part way through leaves
    /// the already applied records and their checkpoint in place.
    pub async fn sync(&mut self) -> Result<SyncSummary, TreeError> {
        self.ensure_fresh()?;
        let request = ChangesRequest::from_checkpoint(&self.checkpoint);
        let mut lines = feed_lines(self.client.changes(&request).await?);

        let mut summary = SyncSummary::default();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: ChangeRecord = serde_json::from_str(line)?;
            summary.records += 1;

            if let Some(checkpoint) = record.checkpoint.filter(|c| !c.is_empty()) {
                self.checkpoint = checkpoint;
            }
            if record.reset {
                warn!(checkpoint = %self.checkpoint, "change feed requested a reset");
                self.stale = true;
                return Err(TreeError::MustFetchFresh);
            }
            if record.end {
                break;
            }

            let applied = self.apply_changes(&record.nodes);
            summary.updated += applied.updated;
            summary.removed += applied.removed;
        }

        info!(
            records = summary.records,
            updated = summary.updated,
            removed = summary.removed,
            checkpoint = %self.checkpoint,
            "change feed applied"
        );
        Ok(summary)
    }

    /// Reads the current checkpoint off the feed without applying any node.
    /// A reset here is ignored; the full listing that follows covers it.
    pub(crate) async fn fetch_checkpoint(&mut self) -> Result<(), TreeError> {
        let request = ChangesRequest::from_checkpoint("");
        let mut lines = feed_lines(self.client.changes(&request).await?);
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: ChangeRecord = serde_json::from_str(line)?;
            if let Some(checkpoint) = record.checkpoint.filter(|c| !c.is_empty()) {
                self.checkpoint = checkpoint;
            }
            if record.end {
                break;
            }
        }
        debug!(checkpoint = %self.checkpoint, "took checkpoint before full listing");
        Ok(())
    }

    /// Seeds stubs for unseen IDs, then reconciles every payload in order.
    pub(crate) fn apply_changes(&mut self, payloads: &[NodePayload]) -> SyncSummary {
        for payload in payloads {
            if !self.nodes.contains_key(&payload.id) {
                self.nodes
                    .insert(payload.id.clone(), Node::stub(payload));
            }
        }

        let mut summary = SyncSummary::default();
        for payload in payloads {
            match self.reconcile(payload) {
                Reconciled::Updated => summary.updated += 1,
                Reconciled::Removed => summary.removed += 1,
                Reconciled::Missing => {}
            }
        }
        summary
    }

    /// Merges one payload into the stored node and rewires its parent links
    /// from the difference between the old and new parent sets.
    pub(crate) fn reconcile(&mut self, payload: &NodePayload) -> Reconciled {
        let Some(stored) = self.nodes.get(&payload.id) else {
            debug!(id = %payload.id, "reconcile target not indexed");
            return Reconciled::Missing;
        };
        let previous: BTreeSet<String> = stored.parents.clone();
        let mut updated = stored.clone();
        updated.apply(payload);
        let id = updated.id.clone();

        if !updated.is_available() {
            debug!(id = %id, name = %updated.name, status = ?updated.status, "node removed remotely");
            for parent in previous.union(&updated.parents) {
                self.unlink_child(parent, &id);
            }
            self.nodes.remove(&id);
            return Reconciled::Removed;
        }

        for parent in previous.difference(&updated.parents) {
            self.unlink_child(parent, &id);
        }
        for parent in updated.parents.difference(&previous) {
            self.link_child(parent, &id);
        }
        if let Some(slot) = self.nodes.get_mut(&id) {
            updated.children = std::mem::take(&mut slot.children);
            *slot = updated;
        }
        Reconciled::Updated
    }
}

fn feed_lines(response: reqwest::Response) -> Lines<impl AsyncBufRead + Unpin> {
    let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
    StreamReader::new(stream).lines()
}
