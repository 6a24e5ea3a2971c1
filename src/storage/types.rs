//! Core record types shared by the delta, segment and engine layers.

use serde::{Deserialize, Serialize};

/// Reserved metadata key carrying the source file an edge (or a batch of
/// enrichment edges) is scoped to. Parsed only at commit time; never
/// interpreted by point lookups or attribute search.
pub const FILE_CONTEXT_KEY: &str = "__file_context";

/// Prefix under which enrichment producers' synthetic file contexts live,
/// e.g. `__enrichment__/call-graph/src/foo.rs`.
pub const ENRICHMENT_PREFIX: &str = "__enrichment__";

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub numeric_id: u64,
    pub semantic_id: String,
    pub node_type: String,
    pub name: String,
    pub file: String,
    pub exported: bool,
    /// Opaque JSON-encoded metadata blob.
    pub metadata: String,
}

/// A directed graph edge between two numeric node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub edge_type: String,
    pub src: u64,
    pub dst: u64,
    /// Opaque JSON-encoded metadata blob. May carry `__file_context`.
    pub metadata: String,
}

impl EdgeRecord {
    /// The uniqueness key per invariant 2: (edge_type, src, dst).
    pub fn key(&self) -> (String, u64, u64) {
        (self.edge_type.clone(), self.src, self.dst)
    }

    /// Extracts the `__file_context` value from this edge's metadata, if
    /// present and the metadata parses as a JSON object.
    pub fn file_context(&self) -> Option<String> {
        extract_file_context(&self.metadata)
    }
}

/// Pulls `__file_context` out of an opaque metadata JSON blob.
pub fn extract_file_context(metadata: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(metadata).ok()?;
    value
        .get(FILE_CONTEXT_KEY)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Stamps `__file_context = context` into an opaque metadata JSON blob,
/// preserving any other keys already present. Used at commit time to
/// mark an enrichment producer's edges so a later surgical re-run can
/// find exactly them (spec §4.5, §9).
pub fn stamp_file_context(metadata: &str, context: &str) -> String {
    let mut value: serde_json::Value =
        serde_json::from_str(metadata).unwrap_or_else(|_| serde_json::json!({}));
    if !value.is_object() {
        value = serde_json::json!({});
    }
    value[FILE_CONTEXT_KEY] = serde_json::Value::String(context.to_string());
    value.to_string()
}

/// Builds the synthetic file path an enrichment producer's edges are
/// scoped under, so they can be surgically retracted without touching
/// source-analysis edges for the same file.
pub fn enrichment_file_context(producer: &str, source_file: &str) -> String {
    format!("{ENRICHMENT_PREFIX}/{producer}/{source_file}")
}

/// True if `file` names an enrichment-producer synthetic context rather
/// than a real source file.
pub fn is_enrichment_context(file: &str) -> bool {
    file.starts_with(ENRICHMENT_PREFIX)
}

/// True if a node's opaque metadata blob parses as a JSON object carrying
/// `key = value`. Backs `find_nodes_by_attribute(k, v)`, the
/// arbitrary-attribute query primitive RPC clients reach through
/// `FindNodes`'s `metadata_kv` field.
pub fn metadata_kv_matches(metadata: &str, key: &str, value: &str) -> bool {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(metadata) else {
        return false;
    };
    parsed.get(key).and_then(|v| v.as_str()) == Some(value)
}

/// Synthesizes the canonical semantic id for a node: `{type}:{name}@{file}`.
pub fn synthesize_semantic_id(node_type: &str, name: &str, file: &str) -> String {
    format!("{node_type}:{name}@{file}")
}

/// A single shard's changeset accumulated during an open batch, staged
/// before commit routes and applies it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitDelta {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    /// Distinct source files (or enrichment contexts) touched by this
    /// commit — drives the tombstone-scope resolution phase.
    pub changed_files: Vec<String>,
}

impl CommitDelta {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Per-segment summary persisted in the manifest and used for zone-map
/// style pruning before a segment is even mapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub segment_id: u64,
    pub shard_id: u16,
    pub node_count: usize,
    pub edge_count: usize,
    pub min_numeric_id: u64,
    pub max_numeric_id: u64,
    pub node_types: Vec<String>,
    pub files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_context_roundtrips() {
        let metadata = serde_json::json!({ "__file_context": "src/foo.rs", "x": 1 }).to_string();
        assert_eq!(extract_file_context(&metadata).as_deref(), Some("src/foo.rs"));
    }

    #[test]
    fn file_context_absent_returns_none() {
        let metadata = serde_json::json!({ "x": 1 }).to_string();
        assert_eq!(extract_file_context(&metadata), None);
    }

    #[test]
    fn stamp_file_context_preserves_other_keys() {
        let metadata = serde_json::json!({ "x": 1 }).to_string();
        let stamped = stamp_file_context(&metadata, "__enrichment__/linker/src/a.rs");
        assert_eq!(
            extract_file_context(&stamped).as_deref(),
            Some("__enrichment__/linker/src/a.rs")
        );
        let value: serde_json::Value = serde_json::from_str(&stamped).unwrap();
        assert_eq!(value["x"], 1);
    }

    #[test]
    fn stamp_file_context_handles_non_object_metadata() {
        let stamped = stamp_file_context("not json", "__enrichment__/linker/src/a.rs");
        assert_eq!(
            extract_file_context(&stamped).as_deref(),
            Some("__enrichment__/linker/src/a.rs")
        );
    }

    #[test]
    fn enrichment_context_is_recognized() {
        let ctx = enrichment_file_context("call-graph", "src/foo.rs");
        assert_eq!(ctx, "__enrichment__/call-graph/src/foo.rs");
        assert!(is_enrichment_context(&ctx));
        assert!(!is_enrichment_context("src/foo.rs"));
    }

    #[test]
    fn metadata_kv_matches_string_values_only() {
        let metadata = serde_json::json!({ "visibility": "public", "line": 12 }).to_string();
        assert!(metadata_kv_matches(&metadata, "visibility", "public"));
        assert!(!metadata_kv_matches(&metadata, "visibility", "private"));
        assert!(!metadata_kv_matches(&metadata, "line", "12"));
        assert!(!metadata_kv_matches("not json", "visibility", "public"));
    }

    #[test]
    fn semantic_id_format() {
        assert_eq!(
            synthesize_semantic_id("function", "main", "src/main.rs"),
            "function:main@src/main.rs"
        );
    }

    #[test]
    fn edge_key_matches_invariant() {
        let edge = EdgeRecord {
            edge_type: "calls".to_string(),
            src: 1,
            dst: 2,
            metadata: "{}".to_string(),
        };
        assert_eq!(edge.key(), ("calls".to_string(), 1, 2));
    }
}
