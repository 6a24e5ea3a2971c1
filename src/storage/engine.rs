//! The multi-shard engine: owns every shard, the shard planners, and the
//! cross-shard indices rebuilt fresh from segments at every open. Write
//! traffic arrives as a whole batch and is applied through the seven-
//! phase commit protocol in [`Engine::commit_batch`]:
//!
//! 1. snapshot (the caller already holds the engine exclusively — see
//!    the RPC layer's `RwLock` — so this phase is a log marker only)
//! 2. resolve the changed scope: an enrichment commit's scope is its
//!    synthetic `__file_context` label, overriding `changed_files`;
//!    otherwise the scope is exactly `changed_files`
//! 2.5. validate every semantic-id conflict against the pre-mutation
//!    state, so a rejected commit never leaves a tombstone behind —
//!    phases 3-6 only run once no conflict can still occur
//! 3. tombstone every live row scoped to that file set, *before* any new
//!    row for the same scope is applied
//! 4. assign numeric ids and route nodes/edges to shards
//! 5. apply the routed rows to each shard's write buffer
//! 6. maintain the cross-shard indices
//! 7. persist: flush every touched shard to a sealed segment and
//!    atomically rewrite the manifest

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{GraphError, Result};
use crate::storage::manifest::{ManifestStore, ShardManifest};
use crate::storage::shard::Shard;
use crate::storage::shard_planner::ShardPlanner;
use crate::storage::types::{
    is_enrichment_context, stamp_file_context, EdgeRecord, NodeRecord,
};

/// A node staged for commit; numeric id is assigned during the commit's
/// "assign ids and route" phase, not when it is staged.
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub semantic_id: String,
    pub node_type: String,
    pub name: String,
    pub file: String,
    pub exported: bool,
    pub metadata: String,
}

/// An edge staged for commit, referencing its endpoints by semantic id
/// since the numeric ids of nodes added in the same batch don't exist
/// yet when the edge is staged.
#[derive(Debug, Clone)]
pub struct EdgeInput {
    pub edge_type: String,
    pub src_semantic_id: String,
    pub dst_semantic_id: String,
    pub metadata: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchInput {
    pub nodes: Vec<NodeInput>,
    pub edges: Vec<EdgeInput>,
    pub changed_files: Vec<String>,
    /// When set, this is an enrichment commit (spec §4.5): the scope
    /// becomes exactly this synthetic `__enrichment__/{producer}/{file}`
    /// label (overriding `changed_files`), and every new edge in this
    /// batch is routed to the enrichment shard for that label and
    /// stamped with it so a later re-run of the same producer/file can
    /// find exactly these edges again.
    pub file_context: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitSummary {
    pub nodes_committed: usize,
    pub edges_committed: usize,
    pub edges_skipped: usize,
    pub tombstoned_nodes: usize,
    pub tombstoned_edges: usize,
    pub shards_touched: Vec<u16>,
}

/// Which side of a node's adjacency `neighbors`/`bfs` traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone, Default)]
pub struct ShardStats {
    pub shard_id: u16,
    pub node_count: usize,
    pub edge_count: usize,
    pub segment_count: usize,
    pub write_buffer_nodes: usize,
    pub write_buffer_edges: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub shard_stats: Vec<ShardStats>,
    pub generation: u64,
}

/// Composes a globally-unique numeric id out of a shard id and that
/// shard's monotonic per-shard counter, so `numeric_id -> shard` is a
/// pure bit-decode rather than a persisted index that could drift.
fn compose_numeric_id(shard_id: u16, counter: u64) -> u64 {
    ((shard_id as u64) << 48) | (counter & 0x0000_FFFF_FFFF_FFFF)
}

fn shard_of_numeric_id(id: u64) -> u16 {
    (id >> 48) as u16
}

pub struct Engine {
    db_path: PathBuf,
    manifest_store: ManifestStore,
    shards: Vec<Shard>,
    enrichment_shards: Vec<Shard>,
    planner: ShardPlanner,
    enrichment_planner: ShardPlanner,
    semantic_index: HashMap<String, u64>,
    enrichment_node_index: HashMap<u64, HashSet<u16>>,
    generation: u64,
    flush_node_threshold: usize,
    flush_memory_threshold_bytes: usize,
}

impl Engine {
    /// Creates a brand-new, empty database at `db_path`.
    pub fn create(db_path: &Path, shard_count: u16, enrichment_shard_count: u16) -> Result<Self> {
        let manifest_store = ManifestStore::create(db_path, shard_count, enrichment_shard_count)?;

        let mut shards = Vec::with_capacity(shard_count as usize);
        for id in 0..shard_count {
            shards.push(Shard::create(&shard_dir(db_path, id), id, 1)?);
        }

        let mut enrichment_shards = Vec::with_capacity(enrichment_shard_count as usize);
        for id in 0..enrichment_shard_count {
            enrichment_shards.push(Shard::create(&enrichment_shard_dir(db_path, id), id, 1)?);
        }

        info!(shard_count, enrichment_shard_count, "created new database");

        Ok(Self {
            db_path: db_path.to_path_buf(),
            manifest_store,
            shards,
            enrichment_shards,
            planner: ShardPlanner::new(shard_count),
            enrichment_planner: ShardPlanner::new(enrichment_shard_count),
            semantic_index: HashMap::new(),
            enrichment_node_index: HashMap::new(),
            generation: 0,
            flush_node_threshold: 1,
            flush_memory_threshold_bytes: 1,
        })
    }

    /// Opens an existing database, mapping every segment listed by the
    /// manifest and rebuilding the cross-shard indices by scanning every
    /// live node and enrichment edge. Refuses to open (rather than
    /// attempt partial recovery) on any manifest or segment integrity
    /// failure.
    pub fn open(db_path: &Path) -> Result<Self> {
        let (manifest_store, document) = ManifestStore::open(db_path)?;

        let mut shards = Vec::with_capacity(document.shard_count as usize);
        for (&id, shard_manifest) in &document.shards {
            shards.push(Shard::open(
                &shard_dir(db_path, id),
                id,
                &shard_manifest.segment_ids,
                shard_manifest.next_numeric_id,
            )?);
        }
        shards.sort_by_key(|s| s.shard_id());

        let mut enrichment_shards = Vec::with_capacity(document.enrichment_shard_count as usize);
        for (&id, shard_manifest) in &document.enrichment_shards {
            enrichment_shards.push(Shard::open(
                &enrichment_shard_dir(db_path, id),
                id,
                &shard_manifest.segment_ids,
                shard_manifest.next_numeric_id,
            )?);
        }
        enrichment_shards.sort_by_key(|s| s.shard_id());

        let mut engine = Self {
            db_path: db_path.to_path_buf(),
            manifest_store,
            shards,
            enrichment_shards,
            planner: ShardPlanner::new(document.shard_count),
            enrichment_planner: ShardPlanner::new(document.enrichment_shard_count),
            semantic_index: HashMap::new(),
            enrichment_node_index: HashMap::new(),
            generation: document.generation,
            flush_node_threshold: 1,
            flush_memory_threshold_bytes: 1,
        };

        engine.rebuild_indices();
        info!(
            generation = engine.generation,
            shards = engine.shards.len(),
            "opened database"
        );
        Ok(engine)
    }

    pub fn create_or_open(
        db_path: &Path,
        shard_count_hint: u16,
        enrichment_shard_count_hint: u16,
    ) -> Result<Self> {
        if ManifestStore::exists(db_path) {
            Self::open(db_path)
        } else {
            Self::create(db_path, shard_count_hint, enrichment_shard_count_hint)
        }
    }

    /// Rebuilds `semantic_index` and `enrichment_node_index` from every
    /// shard's current live nodes/edges. Called at open and also exposed
    /// as a recovery entry point.
    pub fn rebuild_indices(&mut self) {
        self.semantic_index.clear();
        for shard in &self.shards {
            for node in shard.find_nodes(None, |_| true) {
                self.semantic_index.insert(node.semantic_id, node.numeric_id);
            }
        }

        self.enrichment_node_index.clear();
        for shard in &self.enrichment_shards {
            // An enrichment shard holds no nodes of its own (enrichment
            // commits add only edges, stamped into an existing ordinary
            // node's fan-out), so the index must be rebuilt from its
            // edges directly rather than by walking outward from nodes.
            for edge in shard.live_edges() {
                self.enrichment_node_index
                    .entry(edge.src)
                    .or_default()
                    .insert(shard.shard_id());
                self.enrichment_node_index
                    .entry(edge.dst)
                    .or_default()
                    .insert(shard.shard_id());
            }
        }
    }

    /// Configures the delta size at which a touched shard's write buffer
    /// is sealed into a new segment during phase 7 of a commit, rather
    /// than unconditionally on every commit regardless of size. The
    /// default of `1` for both thresholds makes every non-empty touched
    /// shard flush on every commit, matching this crate's existing
    /// durability guarantee unless a caller raises it.
    pub fn set_flush_thresholds(&mut self, node_threshold: usize, memory_threshold_bytes: usize) {
        self.flush_node_threshold = node_threshold.max(1);
        self.flush_memory_threshold_bytes = memory_threshold_bytes.max(1);
    }

    fn shard_mut(&mut self, id: u16) -> &mut Shard {
        &mut self.shards[id as usize]
    }

    fn enrichment_shard_mut(&mut self, id: u16) -> &mut Shard {
        &mut self.enrichment_shards[id as usize]
    }

    /// Resolves which shard actually owns data scoped to `file`: an
    /// enrichment synthetic context routes into the enrichment shard
    /// space, everything else routes through the ordinary planner.
    fn shard_for_file(&self, file: &str) -> (bool, u16) {
        if is_enrichment_context(file) {
            (true, self.enrichment_planner.plan(file))
        } else {
            (false, self.planner.plan(file))
        }
    }

    /// Runs the full seven-phase batch commit protocol.
    pub fn commit_batch(&mut self, input: BatchInput) -> Result<CommitSummary> {
        // Phase 1: snapshot. The RPC layer already serializes writers via
        // an exclusive lock, so there is no separate MVCC snapshot to
        // take for concurrency's sake; this phase exists as a log marker
        // for operational visibility into commit timing. Atomicity on
        // failure instead comes from validating every conflict in phase
        // 2.5 before phases 3-6 mutate anything, so there is nothing to
        // roll back. A phase-7 I/O failure is handled separately, by the
        // repeated-failure counter in the RPC server rather than a
        // rollback of already-durable writes.
        info!(
            nodes = input.nodes.len(),
            edges = input.edges.len(),
            "commit: snapshot phase"
        );

        // Phase 2: resolve changed scope. An enrichment commit's scope is
        // exactly its synthetic file-context label; `changed_files` is
        // ignored for it (spec §4.3 phase 2).
        let scope: HashSet<String> = match &input.file_context {
            Some(ctx) => std::iter::once(ctx.clone()).collect(),
            None => input.changed_files.iter().cloned().collect(),
        };

        // Phase 2.5: validate semantic-id conflicts against the
        // pre-mutation state, before phase 3 tombstones anything. A
        // conflict is only real if the existing node's file is outside
        // this commit's scope: an id whose owning file is being
        // re-indexed right now is about to be legitimately retracted in
        // phase 3, not collided with. Checking here instead of after
        // phase 3 has already mutated `semantic_index` means a rejected
        // commit never leaves tombstones behind — phases 2-6 have no
        // partial effects on failure.
        for node_input in &input.nodes {
            if let Some(&existing_id) = self.semantic_index.get(&node_input.semantic_id) {
                let existing_file = self.get_by_numeric_id(existing_id).map(|n| n.file.as_str());
                if !existing_file.is_some_and(|f| scope.contains(f)) {
                    return Err(GraphError::ConflictingSemanticId(node_input.semantic_id.clone()));
                }
            }
        }

        // Phase 3: tombstone, strictly before any new row for the same
        // scope is applied.
        let mut touched_shards: HashSet<(bool, u16)> = HashSet::new();
        let mut tombstoned_nodes = 0usize;
        let mut tombstoned_edges = 0usize;
        for file in &scope {
            let (is_enrichment, shard_id) = self.shard_for_file(file);
            let outcome = if is_enrichment {
                self.enrichment_shard_mut(shard_id).tombstone_file(file)
            } else {
                self.shard_mut(shard_id).tombstone_file(file)
            };
            tombstoned_nodes += outcome.node_ids.len();
            tombstoned_edges += outcome.edge_keys.len();
            for semantic_id in &outcome.semantic_ids {
                self.semantic_index.remove(semantic_id);
            }
            for node_id in &outcome.node_ids {
                self.enrichment_node_index.remove(node_id);
            }
            touched_shards.insert((is_enrichment, shard_id));
        }

        // Phase 4: assign ids and route. Nodes are deduplicated by
        // semantic id, keeping the last occurrence, so that two adds of
        // the same semantic id within one batch replace rather than both
        // landing on disk under distinct numeric ids (invariant 1).
        let mut assigned: HashMap<String, u64> = HashMap::new();
        let mut routed_nodes: HashMap<String, (u16, NodeRecord)> =
            HashMap::with_capacity(input.nodes.len());

        for node_input in &input.nodes {
            let (is_enrichment, shard_id) = self.shard_for_file(&node_input.file);
            let numeric_id = if is_enrichment {
                compose_numeric_id(shard_id, self.enrichment_shard_mut(shard_id).allocate_id())
            } else {
                compose_numeric_id(shard_id, self.shard_mut(shard_id).allocate_id())
            };

            assigned.insert(node_input.semantic_id.clone(), numeric_id);
            touched_shards.insert((is_enrichment, shard_id));

            routed_nodes.insert(
                node_input.semantic_id.clone(),
                (
                    shard_id,
                    NodeRecord {
                        numeric_id,
                        semantic_id: node_input.semantic_id.clone(),
                        node_type: node_input.node_type.clone(),
                        name: node_input.name.clone(),
                        file: node_input.file.clone(),
                        exported: node_input.exported,
                        metadata: node_input.metadata.clone(),
                    },
                ),
            );
        }

        let mut edges_skipped = 0usize;
        let mut routed_edges: Vec<(bool, u16, EdgeRecord)> = Vec::with_capacity(input.edges.len());

        for edge_input in &input.edges {
            let src = assigned
                .get(&edge_input.src_semantic_id)
                .copied()
                .or_else(|| self.semantic_index.get(&edge_input.src_semantic_id).copied());
            let dst = assigned
                .get(&edge_input.dst_semantic_id)
                .copied()
                .or_else(|| self.semantic_index.get(&edge_input.dst_semantic_id).copied());

            let (src, dst) = match (src, dst) {
                (Some(src), Some(dst)) => (src, dst),
                _ => {
                    warn!(
                        src = %edge_input.src_semantic_id,
                        dst = %edge_input.dst_semantic_id,
                        "skipping edge with unresolved endpoint"
                    );
                    edges_skipped += 1;
                    continue;
                }
            };

            // Phase 4 (edges): an enrichment commit routes every new
            // edge to the enrichment shard for its file-context and
            // stamps that context into the edge's metadata; an ordinary
            // commit routes by the shard of `edge.src`.
            let (is_enrichment, shard_id, metadata) = match &input.file_context {
                Some(ctx) => {
                    let (is_enrichment, shard_id) = self.shard_for_file(ctx);
                    (is_enrichment, shard_id, stamp_file_context(&edge_input.metadata, ctx))
                }
                None => (false, shard_of_numeric_id(src), edge_input.metadata.clone()),
            };

            touched_shards.insert((is_enrichment, shard_id));
            routed_edges.push((
                is_enrichment,
                shard_id,
                EdgeRecord {
                    edge_type: edge_input.edge_type.clone(),
                    src,
                    dst,
                    metadata,
                },
            ));
        }

        // Phase 5: apply to deltas.
        let nodes_committed = routed_nodes.len();
        for (_semantic_id, (shard_id, node)) in routed_nodes {
            self.shard_mut(shard_id).upsert_node(node);
        }

        let mut edges_committed = 0usize;
        let mut committed_enrichment_edges: Vec<(u16, u64, u64)> = Vec::new();
        for (is_enrichment, shard_id, edge) in routed_edges {
            let inserted = if is_enrichment {
                self.enrichment_shard_mut(shard_id).insert_edge(edge.clone())
            } else {
                self.shard_mut(shard_id).insert_edge(edge.clone())
            };
            if inserted {
                edges_committed += 1;
                if is_enrichment {
                    committed_enrichment_edges.push((shard_id, edge.src, edge.dst));
                }
            } else {
                edges_skipped += 1;
            }
        }

        // Phase 6: maintain cross-shard indices. `semantic_index` gets
        // every newly assigned numeric id; `enrichment_node_index` gets
        // every edge whose shard (the enrichment shard it was routed to)
        // differs from the shard that owns its src, so `outgoing_edges`/
        // `incoming_edges` know to fan out into that enrichment shard.
        for (semantic_id, numeric_id) in &assigned {
            self.semantic_index.insert(semantic_id.clone(), *numeric_id);
        }
        for (enrichment_shard_id, src, dst) in committed_enrichment_edges {
            self.enrichment_node_index
                .entry(src)
                .or_default()
                .insert(enrichment_shard_id);
            self.enrichment_node_index
                .entry(dst)
                .or_default()
                .insert(enrichment_shard_id);
        }

        // Phase 7: persist. A touched shard whose write buffer has
        // crossed `flush_node_threshold`/`flush_memory_threshold_bytes`
        // is sealed into a new segment; every touched shard's allocator
        // high-watermark is recorded either way, since numeric ids were
        // handed out in phase 4 regardless of whether a flush happens
        // this commit. The manifest is then rewritten atomically so its
        // generation always matches what the caller is told succeeded
        // (the per-commit-fsync durability model, §9).
        let mut shards_touched: Vec<u16> = Vec::new();
        let mut document = self.manifest_store.load()?;

        for (is_enrichment, shard_id) in &touched_shards {
            let crosses_threshold = if *is_enrichment {
                let shard = self.enrichment_shard_mut(*shard_id);
                shard.write_buffer_node_count() >= self.flush_node_threshold
                    || shard.write_buffer_byte_size() >= self.flush_memory_threshold_bytes
            } else {
                let shard = self.shard_mut(*shard_id);
                shard.write_buffer_node_count() >= self.flush_node_threshold
                    || shard.write_buffer_byte_size() >= self.flush_memory_threshold_bytes
            };

            let flush_result = if crosses_threshold {
                if *is_enrichment {
                    self.enrichment_shard_mut(*shard_id).flush()?
                } else {
                    self.shard_mut(*shard_id).flush()?
                }
            } else {
                None
            };

            if *is_enrichment {
                let shard = self.enrichment_shard_mut(*shard_id);
                let manifest_entry = document
                    .enrichment_shards
                    .entry(*shard_id)
                    .or_insert_with(ShardManifest::default);
                manifest_entry.segment_ids = shard.segment_ids().to_vec();
                manifest_entry.next_numeric_id = shard.next_numeric_id();
            } else {
                let shard = self.shard_mut(*shard_id);
                let manifest_entry = document
                    .shards
                    .entry(*shard_id)
                    .or_insert_with(ShardManifest::default);
                manifest_entry.segment_ids = shard.segment_ids().to_vec();
                manifest_entry.next_numeric_id = shard.next_numeric_id();
            }

            if flush_result.is_some() {
                shards_touched.push(*shard_id);
            }
        }

        let document = self.manifest_store.save_next_generation(document)?;
        self.generation = document.generation;

        info!(
            generation = self.generation,
            nodes_committed, edges_committed, edges_skipped, "commit: persisted"
        );

        Ok(CommitSummary {
            nodes_committed,
            edges_committed,
            edges_skipped,
            tombstoned_nodes,
            tombstoned_edges,
            shards_touched,
        })
    }

    /// Force-flushes every shard with a non-empty write buffer,
    /// regardless of the configured flush thresholds, and persists the
    /// manifest. Used by the clean-shutdown path so a restart never
    /// depends on an in-flight delta that a threshold held back from
    /// phase 7 surviving process exit.
    pub fn flush_all(&mut self) -> Result<()> {
        let mut document = self.manifest_store.load()?;

        for shard_id in 0..self.shards.len() as u16 {
            if self.shard_mut(shard_id).is_dirty() {
                self.shard_mut(shard_id).flush()?;
                let shard = self.shard_mut(shard_id);
                let entry = document.shards.entry(shard_id).or_insert_with(ShardManifest::default);
                entry.segment_ids = shard.segment_ids().to_vec();
                entry.next_numeric_id = shard.next_numeric_id();
            }
        }

        for shard_id in 0..self.enrichment_shards.len() as u16 {
            if self.enrichment_shard_mut(shard_id).is_dirty() {
                self.enrichment_shard_mut(shard_id).flush()?;
                let shard = self.enrichment_shard_mut(shard_id);
                let entry = document
                    .enrichment_shards
                    .entry(shard_id)
                    .or_insert_with(ShardManifest::default);
                entry.segment_ids = shard.segment_ids().to_vec();
                entry.next_numeric_id = shard.next_numeric_id();
            }
        }

        let document = self.manifest_store.save_next_generation(document)?;
        self.generation = document.generation;
        info!(generation = self.generation, "flush_all: all dirty shards sealed");
        Ok(())
    }

    pub fn get_by_numeric_id(&self, numeric_id: u64) -> Option<&NodeRecord> {
        let shard_id = shard_of_numeric_id(numeric_id);
        self.shards
            .get(shard_id as usize)
            .and_then(|s| s.get_node(numeric_id))
    }

    pub fn get_by_semantic_id(&self, semantic_id: &str) -> Option<&NodeRecord> {
        let numeric_id = *self.semantic_index.get(semantic_id)?;
        self.get_by_numeric_id(numeric_id)
    }

    pub fn find_nodes_by_type(&self, node_type: &str) -> Vec<NodeRecord> {
        self.shards
            .iter()
            .flat_map(|s| s.find_nodes(Some(node_type), |n| n.node_type == node_type))
            .collect()
    }

    pub fn find_nodes_by_attribute<F>(&self, predicate: F) -> Vec<NodeRecord>
    where
        F: Fn(&NodeRecord) -> bool + Copy,
    {
        self.shards
            .iter()
            .flat_map(|s| s.find_nodes(None, predicate))
            .collect()
    }

    pub fn outgoing_edges(&self, numeric_id: u64) -> Vec<EdgeRecord> {
        let shard_id = shard_of_numeric_id(numeric_id);
        let mut edges = self
            .shards
            .get(shard_id as usize)
            .map(|s| s.outgoing_edges(numeric_id))
            .unwrap_or_default();

        if let Some(shard_ids) = self.enrichment_node_index.get(&numeric_id) {
            for &enrichment_shard_id in shard_ids {
                if let Some(shard) = self.enrichment_shards.get(enrichment_shard_id as usize) {
                    edges.extend(shard.outgoing_edges(numeric_id));
                }
            }
        }
        edges
    }

    pub fn incoming_edges(&self, numeric_id: u64) -> Vec<EdgeRecord> {
        let shard_id = shard_of_numeric_id(numeric_id);
        let mut edges = self
            .shards
            .get(shard_id as usize)
            .map(|s| s.incoming_edges(numeric_id))
            .unwrap_or_default();

        if let Some(shard_ids) = self.enrichment_node_index.get(&numeric_id) {
            for &enrichment_shard_id in shard_ids {
                if let Some(shard) = self.enrichment_shards.get(enrichment_shard_id as usize) {
                    edges.extend(shard.incoming_edges(numeric_id));
                }
            }
        }
        edges
    }

    /// `neighbors(node_id, edge_types, direction)`: the edge-type filter,
    /// when given, restricts to edges whose `edge_type` is in the list;
    /// `direction` restricts which side of the adjacency is followed.
    pub fn neighbors(
        &self,
        numeric_id: u64,
        edge_types: Option<&[String]>,
        direction: Direction,
    ) -> Vec<u64> {
        let matches = |edge_type: &str| {
            edge_types.map_or(true, |allowed| allowed.iter().any(|t| t == edge_type))
        };

        let mut ids: HashSet<u64> = HashSet::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            ids.extend(
                self.outgoing_edges(numeric_id)
                    .into_iter()
                    .filter(|e| matches(&e.edge_type))
                    .map(|e| e.dst),
            );
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            ids.extend(
                self.incoming_edges(numeric_id)
                    .into_iter()
                    .filter(|e| matches(&e.edge_type))
                    .map(|e| e.src),
            );
        }
        ids.into_iter().collect()
    }

    /// Breadth-first traversal up to `max_depth` hops (0 returns only the
    /// start node if it exists), following edges in either direction.
    /// `edge_filter`, when given, restricts traversal to edges whose
    /// `edge_type` is in the list.
    pub fn bfs(&self, start: u64, max_depth: usize, edge_filter: Option<&[String]>) -> Vec<u64> {
        if self.get_by_numeric_id(start).is_none() {
            return Vec::new();
        }

        let mut visited: HashSet<u64> = HashSet::new();
        visited.insert(start);
        let mut frontier = vec![start];
        let mut order = vec![start];

        for _ in 0..max_depth {
            let mut next_frontier = Vec::new();
            for &node in &frontier {
                for neighbor in self.neighbors(node, edge_filter, Direction::Both) {
                    if visited.insert(neighbor) {
                        next_frontier.push(neighbor);
                        order.push(neighbor);
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        order
    }

    pub fn stats(&self) -> EngineStats {
        let shard_stats: Vec<ShardStats> = self
            .shards
            .iter()
            .map(|s| ShardStats {
                shard_id: s.shard_id(),
                node_count: s.count_live_nodes(),
                edge_count: s.count_live_edges(),
                segment_count: s.segment_count(),
                write_buffer_nodes: s.write_buffer_node_count(),
                write_buffer_edges: s.write_buffer_edge_count(),
            })
            .collect();

        EngineStats {
            total_nodes: shard_stats.iter().map(|s| s.node_count).sum(),
            total_edges: shard_stats.iter().map(|s| s.edge_count).sum(),
            shard_stats,
            generation: self.generation,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn shard_dir(db_path: &Path, shard_id: u16) -> PathBuf {
    db_path.join("shards").join(format!("{shard_id:05}"))
}

fn enrichment_shard_dir(db_path: &Path, shard_id: u16) -> PathBuf {
    db_path.join("enrichment_shards").join(format!("{shard_id:05}"))
}
