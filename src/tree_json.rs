//! Purpose: Shared JSON serializers for component trees and index entries.
//! Exports: `paths_json`, `tree_json`, `entries_json`.
//! Role: Keep CLI output envelopes consistent across `paths`, `inspect`, and `dump`.
//! Invariants: Stable key names/order; children appear in declaration order.
//! Invariants: Payload fields are emitted only for indexer nodes.

use std::fmt::Write as _;

use serde_json::{Map, Value, json};
use shardkeep::api::{Component, IndexView, Node, ValueKind};

pub(crate) fn paths_json(node: &Node) -> Value {
    let mut map = placement_json(node);
    if let Node::Compound(compound) = node {
        let children = compound.iter().map(paths_json).collect::<Vec<_>>();
        map.insert("components".to_string(), json!(children));
    }
    Value::Object(map)
}

pub(crate) fn tree_json(node: &Node) -> Value {
    let mut map = placement_json(node);
    map.insert("snapshot_exists".to_string(), json!(node.snapshot_path().exists()));
    map.insert("dirty".to_string(), json!(node.is_dirty()));
    if let Some(size) = node.size() {
        map.insert("size".to_string(), json!(size));
    }
    match node {
        Node::Vector(index) => {
            map.insert("dimension".to_string(), json!(index.dimension()));
            map.insert("metric".to_string(), json!(index.metric()));
        }
        Node::Compound(compound) => {
            let children = compound.iter().map(tree_json).collect::<Vec<_>>();
            map.insert("components".to_string(), json!(children));
        }
        Node::Meta(_) | Node::Binary(_) => {}
    }
    if !node.attributes().is_empty() {
        map.insert(
            "attributes".to_string(),
            Value::Object(node.attributes().clone()),
        );
    }
    Value::Object(map)
}

pub(crate) fn entries_json(view: &IndexView, limit: Option<usize>) -> Value {
    let entries = view
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|entry| match view.header().value_kind {
            ValueKind::F32 => json!({ "key": entry.key, "vector": entry.to_f32_vec() }),
            ValueKind::Bytes => {
                let mut map = Map::new();
                map.insert("key".to_string(), json!(entry.key));
                map.insert("len".to_string(), json!(entry.value.len()));
                map.insert("hex".to_string(), json!(hex(entry.value)));
                if let Ok(text) = std::str::from_utf8(entry.value) {
                    map.insert("utf8".to_string(), json!(text));
                }
                Value::Object(map)
            }
        })
        .collect::<Vec<_>>();
    json!({
        "total": view.len(),
        "entries": entries,
    })
}

fn placement_json(node: &Node) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("name".to_string(), json!(node.name()));
    map.insert("kind".to_string(), json!(node.kind()));
    map.insert("shard_id".to_string(), json!(node.shard_id()));
    map.insert(
        "workspace".to_string(),
        json!(node.current_workspace().display().to_string()),
    );
    map.insert(
        "snapshot".to_string(),
        json!(node.snapshot_path().display().to_string()),
    );
    if let Some(path) = node.payload_path() {
        map.insert("payload".to_string(), json!(path.display().to_string()));
    }
    map
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
