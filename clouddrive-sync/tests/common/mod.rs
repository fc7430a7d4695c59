#![allow(dead_code)]

use clouddrive_core::{DriveClient, TokenProvider};
use clouddrive_sync::Tree;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn make_client(server: &MockServer) -> DriveClient {
    DriveClient::with_endpoints(
        &format!("{}/drive/v1/", server.uri()),
        &format!("{}/cdproxy/", server.uri()),
        TokenProvider::fixed("test-token"),
    )
    .unwrap()
}

pub fn folder(id: &str, name: &str, parents: &[&str]) -> Value {
    json!({
        "id": id,
        "name": name,
        "kind": "FOLDER",
        "parents": parents,
        "status": "AVAILABLE"
    })
}

pub fn file(id: &str, name: &str, parents: &[&str], md5: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "kind": "FILE",
        "parents": parents,
        "status": "AVAILABLE",
        "version": 1,
        "contentProperties": { "size": 5, "md5": md5 }
    })
}

/// Root, `/Docs` and `/Docs/a.txt` whose content is `hello`.
pub fn sample_listing() -> Vec<Value> {
    vec![
        folder("root", "", &[]),
        folder("d1", "Docs", &["root"]),
        file("f1", "a.txt", &["d1"], "5d41402abc4b2a76b9719d911017c592"),
    ]
}

pub fn ndjson(records: &[Value]) -> String {
    records
        .iter()
        .map(|record| format!("{record}\n"))
        .collect()
}

pub async fn mount_listing(server: &MockServer, nodes: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/drive/v1/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": nodes.len(),
            "data": nodes
        })))
        .mount(server)
        .await;
}

/// Answers the checkpoint-only request a tree makes before a full listing.
pub async fn mount_initial_checkpoint(server: &MockServer, checkpoint: &str) {
    Mock::given(method("POST"))
        .and(path("/drive/v1/changes"))
        .and(body_json(json!({ "chunkSize": 1, "maxNodes": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            json!({ "checkpoint": checkpoint, "nodes": [] }),
            json!({ "end": true }),
        ])))
        .with_priority(1)
        .mount(server)
        .await;
}

/// Cold start with no changes: checkpoint `cp-0` before the listing, then a
/// quiet pass that moves to `checkpoint`.
pub async fn mount_initial_changes(server: &MockServer, checkpoint: &str) {
    mount_initial_checkpoint(server, "cp-0").await;
    mount_changes_after(
        server,
        "cp-0",
        &[json!({ "checkpoint": checkpoint, "nodes": [] }), json!({ "end": true })],
    )
    .await;
}

pub async fn mount_changes_after(server: &MockServer, checkpoint: &str, records: &[Value]) {
    Mock::given(method("POST"))
        .and(path("/drive/v1/changes"))
        .and(body_json(json!({ "checkpoint": checkpoint })))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(records)))
        .mount(server)
        .await;
}

/// Opens a tree over `nodes` with checkpoint `cp-1`. Keep the directory alive
/// for as long as the tree.
pub async fn open_tree(server: &MockServer, nodes: Vec<Value>) -> (Tree, TempDir) {
    mount_listing(server, nodes).await;
    mount_initial_changes(server, "cp-1").await;
    let dir = tempfile::tempdir().unwrap();
    let tree = Tree::open(make_client(server), dir.path().join("nodes.cache"))
        .await
        .unwrap();
    (tree, dir)
}
