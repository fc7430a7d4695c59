use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    #[default]
    File,
    Folder,
    /// Assets and any kind added later. Neither a file nor a folder.
    #[serde(other)]
    Other,
}

/// Server-side lifecycle of a node. Anything other than `Available` is
/// treated as removed by the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    #[default]
    Available,
    Trash,
    Purged,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentProperties {
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub content_date: Option<OffsetDateTime>,
}

/// A node as it appears on the wire. Every field except `id` is optional so a
/// change record can carry a partial update.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    #[serde(default, alias = "Parents", skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub creation_date: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub modified_date: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_properties: Option<ContentProperties>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListPage {
    #[serde(default)]
    pub next_token: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub data: Vec<NodePayload>,
}

/// One line of the newline-delimited change feed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    #[serde(default)]
    pub checkpoint: Option<String>,
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub end: bool,
    #[serde(default)]
    pub nodes: Vec<NodePayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_purged: Option<bool>,
}

impl ChangesRequest {
    /// An empty checkpoint asks for the smallest possible page so the server
    /// answers with a fresh checkpoint instead of a backlog.
    pub fn from_checkpoint(checkpoint: &str) -> Self {
        if checkpoint.is_empty() {
            Self {
                checkpoint: None,
                chunk_size: Some(1),
                max_nodes: Some(1),
                include_purged: None,
            }
        } else {
            Self {
                checkpoint: Some(checkpoint.to_string()),
                ..Self::default()
            }
        }
    }
}

/// Metadata sent when creating a folder or a file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewNode {
    pub name: String,
    pub kind: NodeKind,
    pub parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl NewNode {
    pub fn folder(name: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Folder,
            parents: vec![parent_id.into()],
            labels: Vec::new(),
        }
    }

    pub fn file(name: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
            parents: vec![parent_id.into()],
            labels: Vec::new(),
        }
    }
}
