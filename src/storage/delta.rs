//! In-memory write buffer held by a shard between flushes.
//!
//! Nodes are keyed by numeric id and upserted in place (last write in a
//! given delta generation wins); edges are deduplicated by
//! `(edge_type, src, dst)` so repeated `AddEdge` calls for the same key
//! within an open batch do not produce duplicate rows at flush time.

use std::collections::{HashMap, HashSet};

use crate::storage::types::{EdgeRecord, NodeRecord};

#[derive(Debug, Default)]
pub struct WriteBuffer {
    nodes: HashMap<u64, NodeRecord>,
    edges: Vec<EdgeRecord>,
    edge_keys: HashSet<(String, u64, u64)>,
    semantic_index: HashMap<String, u64>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_node(&mut self, node: NodeRecord) {
        self.semantic_index
            .insert(node.semantic_id.clone(), node.numeric_id);
        self.nodes.insert(node.numeric_id, node);
    }

    /// Returns `false` if this exact `(edge_type, src, dst)` key is
    /// already present in the buffer (invariant 2: no duplicate edges).
    pub fn insert_edge(&mut self, edge: EdgeRecord) -> bool {
        let key = edge.key();
        if self.edge_keys.contains(&key) {
            return false;
        }
        self.edge_keys.insert(key);
        self.edges.push(edge);
        true
    }

    pub fn has_edge(&self, edge_type: &str, src: u64, dst: u64) -> bool {
        self.edge_keys
            .contains(&(edge_type.to_string(), src, dst))
    }

    /// Overwrites the metadata of an already-buffered edge in place: the
    /// same-commit "second insertion with the same key replaces the
    /// metadata of the first" rule (invariant 2), as opposed to the
    /// across-commit no-op rule enforced one level up by the shard.
    pub fn replace_edge(&mut self, edge: EdgeRecord) {
        let key = edge.key();
        if let Some(existing) = self.edges.iter_mut().find(|e| e.key() == key) {
            existing.metadata = edge.metadata;
        }
    }

    pub fn get_node(&self, numeric_id: u64) -> Option<&NodeRecord> {
        self.nodes.get(&numeric_id)
    }

    pub fn get_by_semantic_id(&self, semantic_id: &str) -> Option<&NodeRecord> {
        self.semantic_index
            .get(semantic_id)
            .and_then(|id| self.nodes.get(id))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.nodes.keys().copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[EdgeRecord] {
        &self.edges
    }

    pub fn outgoing(&self, src: u64) -> impl Iterator<Item = &EdgeRecord> {
        self.edges.iter().filter(move |e| e.src == src)
    }

    pub fn incoming(&self, dst: u64) -> impl Iterator<Item = &EdgeRecord> {
        self.edges.iter().filter(move |e| e.dst == dst)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Rough byte-size estimate used to trigger threshold-based flushing.
    pub fn approximate_byte_size(&self) -> usize {
        self.nodes
            .values()
            .map(|n| {
                n.semantic_id.len() + n.node_type.len() + n.name.len() + n.file.len()
                    + n.metadata.len() + 16
            })
            .sum::<usize>()
            + self
                .edges
                .iter()
                .map(|e| e.edge_type.len() + e.metadata.len() + 16)
                .sum::<usize>()
    }

    /// Drains the buffer's contents for flushing into a sealed segment,
    /// leaving the buffer empty.
    pub fn drain(&mut self) -> (Vec<NodeRecord>, Vec<EdgeRecord>) {
        self.semantic_index.clear();
        self.edge_keys.clear();
        (
            std::mem::take(&mut self.nodes).into_values().collect(),
            std::mem::take(&mut self.edges),
        )
    }

    /// Removes every edge whose `file` provenance (from metadata) is in
    /// `files`, used by tombstone application ahead of apply within the
    /// same still-buffered delta (rare: only relevant if a re-index of a
    /// file lands before the prior write for that file is flushed).
    pub fn retain_edges_not_in_files<F>(&mut self, mut file_of: F)
    where
        F: FnMut(&EdgeRecord) -> Option<String>,
    {
        self.edges.retain(|e| file_of(e).is_none());
        self.edge_keys = self
            .edges
            .iter()
            .map(|e| e.key())
            .collect();
    }
}
