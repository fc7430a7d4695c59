use std::collections::BTreeSet;

use clouddrive_core::{ContentProperties, NodeKind, NodePayload, NodeStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

/// Content properties as kept in the tree and its cache. Dates use the
/// native `time` encoding so the snapshot stays decodable by `bincode`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeContent {
    pub version: Option<u64>,
    pub extension: Option<String>,
    pub size: Option<u64>,
    pub md5: Option<String>,
    pub content_type: Option<String>,
    pub content_date: Option<OffsetDateTime>,
}

impl NodeContent {
    /// Overlays the fields present in `wire`, leaving the rest untouched.
    pub fn merge(&mut self, wire: &ContentProperties) {
        if wire.version.is_some() {
            self.version = wire.version;
        }
        if wire.extension.is_some() {
            self.extension.clone_from(&wire.extension);
        }
        if wire.size.is_some() {
            self.size = wire.size;
        }
        if wire.md5.is_some() {
            self.md5.clone_from(&wire.md5);
        }
        if wire.content_type.is_some() {
            self.content_type.clone_from(&wire.content_type);
        }
        if wire.content_date.is_some() {
            self.content_date = wire.content_date;
        }
    }
}

/// One file or folder of the mirrored namespace.
///
/// Children are kept as an insertion-ordered list of IDs; the nodes
/// themselves live in the tree's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub parents: BTreeSet<String>,
    pub labels: Vec<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<OffsetDateTime>,
    pub modified_date: Option<OffsetDateTime>,
    pub version: u64,
    pub content: NodeContent,
    pub root: bool,
    pub(crate) children: Vec<String>,
}

impl Node {
    pub fn from_payload(payload: &NodePayload) -> Self {
        let mut node = Self {
            id: payload.id.clone(),
            name: String::new(),
            kind: NodeKind::default(),
            status: NodeStatus::default(),
            parents: BTreeSet::new(),
            labels: Vec::new(),
            created_by: None,
            creation_date: None,
            modified_date: None,
            version: 0,
            content: NodeContent::default(),
            root: false,
            children: Vec::new(),
        };
        node.apply(payload);
        node
    }

    /// Placeholder inserted while a change batch is applied. The parent set
    /// starts empty so every parent in the payload is seen as newly added.
    pub(crate) fn stub(payload: &NodePayload) -> Self {
        let mut node = Self::from_payload(payload);
        node.parents.clear();
        node
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_available(&self) -> bool {
        self.status == NodeStatus::Available
    }

    pub fn size(&self) -> u64 {
        self.content.size.unwrap_or(0)
    }

    pub fn md5(&self) -> Option<&str> {
        self.content.md5.as_deref()
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Appends `child_id` to the child list. Parents and the index are left
    /// to the caller.
    pub fn add_child(&mut self, child_id: &str) -> bool {
        if self.children.iter().any(|id| id == child_id) {
            debug!(parent = %self.id, child = %child_id, "child already linked");
            return false;
        }
        debug!(parent = %self.id, child = %child_id, "adding child");
        self.children.push(child_id.to_string());
        true
    }

    pub fn remove_child(&mut self, child_id: &str) -> bool {
        let before = self.children.len();
        self.children.retain(|id| id != child_id);
        let found = self.children.len() != before;
        debug!(parent = %self.id, child = %child_id, found, "removing child");
        found
    }

    /// Overlays the fields present on the wire. Identity and the child list
    /// are never touched.
    pub fn apply(&mut self, payload: &NodePayload) {
        if let Some(name) = &payload.name {
            self.name.clone_from(name);
        }
        if let Some(kind) = payload.kind {
            self.kind = kind;
        }
        if let Some(parents) = &payload.parents {
            self.parents = parents.iter().cloned().collect();
        }
        if let Some(status) = payload.status {
            self.status = status;
        }
        if let Some(labels) = &payload.labels {
            self.labels.clone_from(labels);
        }
        if payload.created_by.is_some() {
            self.created_by.clone_from(&payload.created_by);
        }
        if payload.creation_date.is_some() {
            self.creation_date = payload.creation_date;
        }
        if payload.modified_date.is_some() {
            self.modified_date = payload.modified_date;
        }
        if let Some(version) = payload.version {
            self.version = version;
        }
        if let Some(content) = &payload.content_properties {
            self.content.merge(content);
        }
    }
}
