//! Wire protocol: requests and responses exchanged as MessagePack
//! payloads behind a 4-byte big-endian length prefix (see
//! [`crate::rpc::server::read_message`] / `write_message`).

use serde::{Deserialize, Serialize};

use crate::storage::engine::Direction;
use crate::storage::types::{EdgeRecord, NodeRecord};

/// Wire-level mirror of [`Direction`], defaulting to `Both` so an older
/// client that omits the field keeps today's behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WireDirection {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl From<WireDirection> for Direction {
    fn from(direction: WireDirection) -> Self {
        match direction {
            WireDirection::Outgoing => Direction::Outgoing,
            WireDirection::Incoming => Direction::Incoming,
            WireDirection::Both => Direction::Both,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNode {
    pub numeric_id: u64,
    pub semantic_id: String,
    pub node_type: String,
    pub name: String,
    pub file: String,
    pub exported: bool,
    pub metadata: String,
}

impl From<&NodeRecord> for WireNode {
    fn from(node: &NodeRecord) -> Self {
        Self {
            numeric_id: node.numeric_id,
            semantic_id: node.semantic_id.clone(),
            node_type: node.node_type.clone(),
            name: node.name.clone(),
            file: node.file.clone(),
            exported: node.exported,
            metadata: node.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEdge {
    pub edge_type: String,
    pub src: u64,
    pub dst: u64,
    pub metadata: String,
}

impl From<&EdgeRecord> for WireEdge {
    fn from(edge: &EdgeRecord) -> Self {
        Self {
            edge_type: edge.edge_type.clone(),
            src: edge.src,
            dst: edge.dst,
            metadata: edge.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireShardStats {
    pub shard_id: u16,
    pub node_count: usize,
    pub edge_count: usize,
    pub segment_count: usize,
    pub write_buffer_nodes: usize,
    pub write_buffer_edges: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub generation: u64,
    pub shards: Vec<WireShardStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Hello {
        client_name: String,
        protocol_version: u32,
    },
    Ping,
    BeginBatch,
    AddNode {
        semantic_id: String,
        node_type: String,
        name: String,
        file: String,
        exported: bool,
        metadata: String,
    },
    AddEdge {
        edge_type: String,
        src_semantic_id: String,
        dst_semantic_id: String,
        metadata: String,
    },
    CommitBatch {
        changed_files: Vec<String>,
        /// Set by enrichment producers (spec §4.5) instead of
        /// `changed_files`: the synthetic `__enrichment__/{producer}/{file}`
        /// label that scopes this commit, so a later re-run of the same
        /// producer against the same file surgically replaces exactly
        /// these edges.
        #[serde(default)]
        file_context: Option<String>,
        /// Opaque client-supplied labels, logged but not interpreted by
        /// the engine.
        #[serde(default)]
        tags: Vec<String>,
        /// Opaque client-supplied correlation id for this commit, logged
        /// but not interpreted by the engine.
        #[serde(default)]
        request_id: Option<String>,
    },
    AbortBatch,
    GetNode {
        numeric_id: Option<u64>,
        semantic_id: Option<String>,
    },
    FindNodes {
        node_type: Option<String>,
        file: Option<String>,
        exported: Option<bool>,
        /// Matches against an arbitrary opaque-metadata key/value pair,
        /// exposing `find_nodes_by_attribute(k, v)` to RPC clients.
        #[serde(default)]
        metadata_kv: Option<(String, String)>,
    },
    Neighbors {
        numeric_id: u64,
        #[serde(default)]
        edge_types: Option<Vec<String>>,
        #[serde(default)]
        direction: WireDirection,
    },
    Bfs {
        numeric_id: u64,
        max_depth: usize,
        #[serde(default)]
        edge_filter: Option<Vec<String>>,
    },
    Stats,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Hello {
        server_version: String,
        protocol_version: u32,
    },
    Pong(WireStats),
    BatchStarted,
    NodeStaged,
    EdgeStaged,
    CommitResult {
        nodes_committed: usize,
        edges_committed: usize,
        edges_skipped: usize,
        tombstoned_nodes: usize,
        tombstoned_edges: usize,
    },
    BatchAborted,
    Node(Option<WireNode>),
    Nodes(Vec<WireNode>),
    Edges(Vec<WireEdge>),
    NodeIds(Vec<u64>),
    Stats(WireStats),
    ShuttingDown,
    Error {
        code: String,
        message: String,
    },
}

pub const PROTOCOL_VERSION: u32 = 1;
