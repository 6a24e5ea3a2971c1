//! A single shard: zero or more immutable sealed segments, an in-memory
//! write buffer for uncommitted-to-disk writes, and a tombstone set
//! marking logically-deleted rows in already-sealed segments.
//!
//! Point lookups and scans always consult the write buffer first (it
//! holds the newest data), then segments from newest to oldest, honoring
//! tombstones at every layer. This is what lets `count_live_nodes` stay
//! correct across repeated flush cycles: a row tombstoned in an old
//! segment and re-inserted in the delta is live again, counted once.

use std::collections::HashSet;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::storage::delta::WriteBuffer;
use crate::storage::segment::Segment;
use crate::storage::types::{extract_file_context, EdgeRecord, NodeRecord};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TombstoneData {
    nodes: HashSet<u64>,
    edges: HashSet<(String, u64, u64)>,
}

/// Result of sealing a shard's write buffer into a new segment.
pub struct FlushResult {
    pub segment_id: u64,
    pub node_count: usize,
    pub edge_count: usize,
}

/// What a `tombstone_file` call actually retracted.
pub struct TombstoneOutcome {
    pub node_ids: Vec<u64>,
    pub semantic_ids: Vec<String>,
    pub edge_keys: Vec<(String, u64, u64)>,
}

pub struct Shard {
    shard_id: u16,
    dir: PathBuf,
    segments: Vec<Segment>,
    segment_ids: Vec<u64>,
    delta: WriteBuffer,
    tombstones: TombstoneData,
    next_numeric_id: u64,
    next_segment_id: u64,
}

impl Shard {
    /// Creates a brand-new, empty shard directory.
    pub fn create(dir: &Path, shard_id: u16, start_numeric_id: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let shard = Self {
            shard_id,
            dir: dir.to_path_buf(),
            segments: Vec::new(),
            segment_ids: Vec::new(),
            delta: WriteBuffer::new(),
            tombstones: TombstoneData::default(),
            next_numeric_id: start_numeric_id,
            next_segment_id: 0,
        };
        shard.write_tombstones()?;
        Ok(shard)
    }

    /// Opens an existing shard, mapping every segment listed for it by
    /// the manifest (oldest first) and loading its tombstone set.
    pub fn open(dir: &Path, shard_id: u16, segment_ids: &[u64], start_numeric_id: u64) -> Result<Self> {
        let mut segments = Vec::with_capacity(segment_ids.len());
        for &id in segment_ids {
            let path = segment_path(dir, id);
            segments.push(Segment::open(&path)?);
        }

        let tombstones = Self::read_tombstones(dir)?;

        let next_segment_id = segment_ids.iter().copied().max().map(|m| m + 1).unwrap_or(0);

        Ok(Self {
            shard_id,
            dir: dir.to_path_buf(),
            segments,
            segment_ids: segment_ids.to_vec(),
            delta: WriteBuffer::new(),
            tombstones,
            next_numeric_id: start_numeric_id,
            next_segment_id,
        })
    }

    pub fn shard_id(&self) -> u16 {
        self.shard_id
    }

    pub fn segment_ids(&self) -> &[u64] {
        &self.segment_ids
    }

    pub fn next_numeric_id(&self) -> u64 {
        self.next_numeric_id
    }

    /// Allocates the next monotonic numeric id for this shard. Ids are
    /// never reused, even across restarts (the caller persists the
    /// returned high-watermark in the manifest before acknowledging the
    /// commit that used it).
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_numeric_id;
        self.next_numeric_id += 1;
        id
    }

    pub fn upsert_node(&mut self, node: NodeRecord) {
        self.tombstones.nodes.remove(&node.numeric_id);
        self.delta.upsert_node(node);
    }

    /// Inserts `edge`, honoring invariant 2's two-tiered uniqueness rule:
    /// a second insertion of the same `(type, src, dst)` key *within the
    /// still-open delta* (i.e. the same commit, since a commit flushes
    /// its deltas before returning) replaces the first's metadata; a
    /// second insertion whose prior occurrence already reached a sealed
    /// segment (an earlier, already-durable commit) is a silent no-op.
    /// Returns `false` only for that cross-commit no-op case.
    pub fn insert_edge(&mut self, edge: EdgeRecord) -> bool {
        let key = edge.key();
        if self.tombstones.edges.contains(&key) {
            self.tombstones.edges.remove(&key);
            return self.delta.insert_edge(edge);
        }
        if self.delta.has_edge(&key.0, key.1, key.2) {
            self.delta.replace_edge(edge);
            return true;
        }
        if self.edge_exists_in_segments(&key) {
            return false;
        }
        self.delta.insert_edge(edge)
    }

    fn edge_exists_in_segments(&self, key: &(String, u64, u64)) -> bool {
        self.segments.iter().rev().any(|segment| {
            segment.might_contain_edges_from(key.1)
                && segment
                    .edges()
                    .iter()
                    .any(|e| e.key() == *key)
        })
    }

    /// Resolves the file an edge's endpoint was recorded under, ignoring
    /// tombstone state — used to fall back to an edge's owning file when
    /// it carries no explicit `__file_context` stamp.
    fn raw_node_file(&self, numeric_id: u64) -> Option<String> {
        if let Some(node) = self.delta.get_node(numeric_id) {
            return Some(node.file.clone());
        }
        for segment in self.segments.iter().rev() {
            if let Some(node) = segment.get_node(numeric_id) {
                return Some(node.file.clone());
            }
        }
        None
    }

    /// Marks every currently-live node and edge whose file provenance
    /// equals `file` as tombstoned, across both sealed segments and the
    /// write buffer. Called before new data for the same file is
    /// applied, per the commit protocol's tombstone-before-apply phase.
    /// An edge's owning file is its `__file_context` stamp if present,
    /// else its `src` node's file, so ordinary (non-enrichment) edges
    /// are retracted on re-index just as enrichment edges are. Returns
    /// the semantic ids and edge keys actually retracted so the engine
    /// can retire its cross-shard index entries for them.
    pub fn tombstone_file(&mut self, file: &str) -> TombstoneOutcome {
        let doomed: Vec<(u64, String)> = self
            .delta
            .nodes()
            .filter(|n| n.file == file)
            .map(|n| (n.numeric_id, n.semantic_id.clone()))
            .chain(
                self.segments
                    .iter()
                    .flat_map(|s| s.nodes().iter())
                    .filter(|n| n.file == file)
                    .map(|n| (n.numeric_id, n.semantic_id.clone())),
            )
            .collect();

        for (id, _) in &doomed {
            self.tombstones.nodes.insert(*id);
        }

        let owning_file = |e: &EdgeRecord| e.file_context().or_else(|| self.raw_node_file(e.src));

        let doomed_edges: Vec<(String, u64, u64)> = self
            .delta
            .edges()
            .iter()
            .filter(|e| owning_file(e).as_deref() == Some(file))
            .map(|e| e.key())
            .chain(
                self.segments
                    .iter()
                    .flat_map(|s| s.edges().iter())
                    .filter(|e| owning_file(e).as_deref() == Some(file))
                    .map(|e| e.key()),
            )
            .collect();

        for key in &doomed_edges {
            self.tombstones.edges.insert(key.clone());
        }

        let doomed_edge_keys: HashSet<(String, u64, u64)> = doomed_edges.iter().cloned().collect();
        self.delta
            .retain_edges_not_in_files(|e| doomed_edge_keys.contains(&e.key()).then(|| file.to_string()));

        TombstoneOutcome {
            node_ids: doomed.iter().map(|(id, _)| *id).collect(),
            semantic_ids: doomed.into_iter().map(|(_, s)| s).collect(),
            edge_keys: doomed_edges,
        }
    }

    pub fn get_node(&self, numeric_id: u64) -> Option<&NodeRecord> {
        if self.tombstones.nodes.contains(&numeric_id) {
            return None;
        }
        if let Some(node) = self.delta.get_node(numeric_id) {
            return Some(node);
        }
        for segment in self.segments.iter().rev() {
            if let Some(node) = segment.get_node(numeric_id) {
                return Some(node);
            }
        }
        None
    }

    pub fn get_by_semantic_id(&self, semantic_id: &str) -> Option<&NodeRecord> {
        if let Some(node) = self.delta.get_by_semantic_id(semantic_id) {
            if !self.tombstones.nodes.contains(&node.numeric_id) {
                return Some(node);
            }
        }
        for segment in self.segments.iter().rev() {
            if let Some(node) = segment.nodes().iter().rev().find(|n| n.semantic_id == semantic_id) {
                if !self.tombstones.nodes.contains(&node.numeric_id) {
                    return Some(node);
                }
            }
        }
        None
    }

    /// Finds live nodes matching `predicate`, deduplicated by numeric id
    /// (newest write wins), pruning segments via the zone-map node-type
    /// hint when `node_type` is given.
    pub fn find_nodes<F>(&self, node_type: Option<&str>, predicate: F) -> Vec<NodeRecord>
    where
        F: Fn(&NodeRecord) -> bool,
    {
        let mut seen: HashSet<u64> = HashSet::new();
        let mut results = Vec::new();

        for node in self.delta.nodes() {
            if self.tombstones.nodes.contains(&node.numeric_id) {
                continue;
            }
            if predicate(node) && seen.insert(node.numeric_id) {
                results.push(node.clone());
            }
        }

        for segment in self.segments.iter().rev() {
            if let Some(node_type) = node_type {
                if !segment.might_have_node_type(node_type) {
                    continue;
                }
            }
            for node in segment.nodes().iter().rev() {
                if self.tombstones.nodes.contains(&node.numeric_id) {
                    continue;
                }
                if !seen.contains(&node.numeric_id) && predicate(node) {
                    seen.insert(node.numeric_id);
                    results.push(node.clone());
                }
            }
        }

        results
    }

    pub fn outgoing_edges(&self, src: u64) -> Vec<EdgeRecord> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for edge in self.delta.outgoing(src) {
            let key = edge.key();
            if !self.tombstones.edges.contains(&key) && seen.insert(key) {
                results.push(edge.clone());
            }
        }

        for segment in self.segments.iter().rev() {
            if !segment.might_contain_edges_from(src) {
                continue;
            }
            for edge in segment.edges().iter().filter(|e| e.src == src) {
                let key = edge.key();
                if !self.tombstones.edges.contains(&key) && seen.insert(key) {
                    results.push(edge.clone());
                }
            }
        }

        results
    }

    pub fn incoming_edges(&self, dst: u64) -> Vec<EdgeRecord> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for edge in self.delta.incoming(dst) {
            let key = edge.key();
            if !self.tombstones.edges.contains(&key) && seen.insert(key) {
                results.push(edge.clone());
            }
        }

        for segment in self.segments.iter().rev() {
            for edge in segment.edges().iter().filter(|e| e.dst == dst) {
                let key = edge.key();
                if !self.tombstones.edges.contains(&key) && seen.insert(key) {
                    results.push(edge.clone());
                }
            }
        }

        results
    }

    /// Deduplicated live node count: a node present in both a sealed
    /// segment and the delta (or in multiple segments) is counted once;
    /// tombstoned ids are never counted regardless of how many layers
    /// they appear in.
    pub fn count_live_nodes(&self) -> usize {
        let mut ids: HashSet<u64> = self.delta.node_ids().collect();
        for segment in &self.segments {
            ids.extend(segment.nodes().iter().map(|n| n.numeric_id));
        }
        ids.retain(|id| !self.tombstones.nodes.contains(id));
        ids.len()
    }

    pub fn count_live_edges(&self) -> usize {
        let mut keys: HashSet<(String, u64, u64)> = self.delta.edges().iter().map(|e| e.key()).collect();
        for segment in &self.segments {
            keys.extend(segment.edges().iter().map(|e| e.key()));
        }
        keys.retain(|key| !self.tombstones.edges.contains(key));
        keys.len()
    }

    /// Every live edge in this shard, deduplicated across the delta and
    /// sealed segments with tombstoned keys excluded. Used by index
    /// rebuilds that need to enumerate an enrichment shard's edges
    /// directly, since an enrichment shard holds no nodes of its own to
    /// walk outward from.
    pub fn live_edges(&self) -> Vec<EdgeRecord> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for edge in self.delta.edges() {
            let key = edge.key();
            if !self.tombstones.edges.contains(&key) && seen.insert(key) {
                results.push(edge.clone());
            }
        }

        for segment in &self.segments {
            for edge in segment.edges() {
                let key = edge.key();
                if !self.tombstones.edges.contains(&key) && seen.insert(key) {
                    results.push(edge.clone());
                }
            }
        }

        results
    }

    pub fn write_buffer_node_count(&self) -> usize {
        self.delta.node_count()
    }

    pub fn write_buffer_edge_count(&self) -> usize {
        self.delta.edge_count()
    }

    pub fn write_buffer_byte_size(&self) -> usize {
        self.delta.approximate_byte_size()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_dirty(&self) -> bool {
        !self.delta.is_empty()
    }

    /// Seals the current write buffer into a new on-disk segment. A
    /// no-op (returns `None`) if the buffer is empty.
    pub fn flush(&mut self) -> Result<Option<FlushResult>> {
        if self.delta.is_empty() {
            return Ok(None);
        }

        let segment_id = self.next_segment_id;
        self.next_segment_id += 1;

        let (nodes, edges) = self.delta.drain();
        let node_count = nodes.len();
        let edge_count = edges.len();

        let path = segment_path(&self.dir, segment_id);
        Segment::write(&path, nodes, edges)?;

        let segment = Segment::open(&path)?;
        self.segments.push(segment);
        self.segment_ids.push(segment_id);

        self.write_tombstones()?;

        Ok(Some(FlushResult {
            segment_id,
            node_count,
            edge_count,
        }))
    }

    fn tombstone_path(dir: &Path) -> PathBuf {
        dir.join("tombstones.bin")
    }

    fn write_tombstones(&self) -> Result<()> {
        let payload = bincode::serialize(&self.tombstones)?;
        let mut body = Vec::with_capacity(payload.len() + 8);
        body.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        body.extend_from_slice(&payload);
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_le_bytes());

        let path = Self::tombstone_path(&self.dir);
        let tmp_path = path.with_extension("bin.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn read_tombstones(dir: &Path) -> Result<TombstoneData> {
        let path = Self::tombstone_path(dir);
        if !path.exists() {
            return Ok(TombstoneData::default());
        }

        let bytes = fs::read(&path)?;
        if bytes.len() < 12 {
            return Err(GraphError::RecoveryFailure(format!(
                "tombstone file {} is truncated",
                path.display()
            )));
        }

        let len = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let crc_offset = 8 + len;
        if bytes.len() < crc_offset + 4 {
            return Err(GraphError::RecoveryFailure(format!(
                "tombstone file {} has inconsistent length header",
                path.display()
            )));
        }

        let body = &bytes[..crc_offset];
        let stored_crc = u32::from_le_bytes(bytes[crc_offset..crc_offset + 4].try_into().unwrap());
        let actual_crc = crc32fast::hash(body);
        if stored_crc != actual_crc {
            return Err(GraphError::RecoveryFailure(format!(
                "tombstone file {} failed CRC check, refusing to trust a partial write",
                path.display()
            )));
        }

        let payload = &bytes[8..crc_offset];
        Ok(bincode::deserialize(payload)?)
    }
}

fn segment_path(dir: &Path, segment_id: u64) -> PathBuf {
    dir.join(format!("{segment_id:010}.seg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, file: &str) -> NodeRecord {
        NodeRecord {
            numeric_id: id,
            semantic_id: format!("function:f{id}@{file}"),
            node_type: "function".to_string(),
            name: format!("f{id}"),
            file: file.to_string(),
            exported: false,
            metadata: "{}".to_string(),
        }
    }

    fn edge(edge_type: &str, src: u64, dst: u64, file: Option<&str>) -> EdgeRecord {
        let metadata = match file {
            Some(f) => serde_json::json!({ "__file_context": f }).to_string(),
            None => "{}".to_string(),
        };
        EdgeRecord {
            edge_type: edge_type.to_string(),
            src,
            dst,
            metadata,
        }
    }

    #[test]
    fn count_live_nodes_dedupes_across_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let mut shard = Shard::create(dir.path(), 0, 1).unwrap();

        shard.upsert_node(node(1, "a.rs"));
        shard.flush().unwrap();

        shard.upsert_node(node(2, "a.rs"));
        assert_eq!(shard.count_live_nodes(), 2);

        shard.flush().unwrap();
        assert_eq!(shard.count_live_nodes(), 2);
        assert_eq!(shard.segment_count(), 2);
    }

    #[test]
    fn tombstone_file_retracts_ordinary_edges_via_src_node_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut shard = Shard::create(dir.path(), 0, 1).unwrap();

        shard.upsert_node(node(1, "a.rs"));
        shard.upsert_node(node(2, "b.rs"));
        // No __file_context stamp: an ordinary commit never adds one.
        shard.insert_edge(edge("calls", 1, 2, None));
        shard.flush().unwrap();

        assert_eq!(shard.count_live_edges(), 1);

        shard.tombstone_file("a.rs");
        assert_eq!(shard.count_live_nodes(), 1, "b.rs's node must survive");
        assert_eq!(
            shard.count_live_edges(),
            0,
            "re-indexing a.rs must retract its outgoing edge even without a file-context stamp"
        );
        assert!(shard.outgoing_edges(1).is_empty());
    }

    #[test]
    fn tombstone_file_removes_live_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut shard = Shard::create(dir.path(), 0, 1).unwrap();

        shard.upsert_node(node(1, "a.rs"));
        shard.insert_edge(edge("calls", 1, 1, Some("a.rs")));
        shard.flush().unwrap();

        assert_eq!(shard.count_live_nodes(), 1);
        assert_eq!(shard.count_live_edges(), 1);

        shard.tombstone_file("a.rs");
        assert_eq!(shard.count_live_nodes(), 0);
        assert_eq!(shard.count_live_edges(), 0);
        assert!(shard.get_node(1).is_none());
    }

    #[test]
    fn reinsert_after_tombstone_is_live_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut shard = Shard::create(dir.path(), 0, 1).unwrap();

        shard.upsert_node(node(1, "a.rs"));
        shard.flush().unwrap();
        shard.tombstone_file("a.rs");
        assert_eq!(shard.count_live_nodes(), 0);

        shard.upsert_node(node(1, "a.rs"));
        assert_eq!(shard.count_live_nodes(), 1);
        assert!(shard.get_node(1).is_some());
    }

    #[test]
    fn duplicate_edge_is_rejected_across_segment_and_delta() {
        let dir = tempfile::tempdir().unwrap();
        let mut shard = Shard::create(dir.path(), 0, 1).unwrap();

        assert!(shard.insert_edge(edge("calls", 1, 2, None)));
        shard.flush().unwrap();

        assert!(!shard.insert_edge(edge("calls", 1, 2, None)));
        assert_eq!(shard.count_live_edges(), 1);
    }

    #[test]
    fn same_commit_duplicate_edge_replaces_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut shard = Shard::create(dir.path(), 0, 1).unwrap();

        assert!(shard.insert_edge(edge("calls", 1, 2, None)));
        let mut replacement = edge("calls", 1, 2, None);
        replacement.metadata = "{\"v\":2}".to_string();
        assert!(shard.insert_edge(replacement));

        assert_eq!(shard.count_live_edges(), 1);
        assert_eq!(
            shard.outgoing_edges(1)[0].metadata,
            "{\"v\":2}".to_string()
        );
    }

    #[test]
    fn tombstones_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut shard = Shard::create(dir.path(), 0, 1).unwrap();
            shard.upsert_node(node(1, "a.rs"));
            shard.flush().unwrap();
            shard.tombstone_file("a.rs");
        }

        let shard = Shard::open(dir.path(), 0, &[0], 2).unwrap();
        assert_eq!(shard.count_live_nodes(), 0);
        assert!(shard.get_node(1).is_none());
    }

    #[test]
    fn allocate_id_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut shard = Shard::create(dir.path(), 0, 100).unwrap();
        assert_eq!(shard.allocate_id(), 100);
        assert_eq!(shard.allocate_id(), 101);
        assert_eq!(shard.allocate_id(), 102);
    }
}
