//! Immutable, mmap-backed segment files.
//!
//! A segment holds the nodes and edges sealed out of a shard's delta at
//! flush time, laid out as independent per-field columns rather than one
//! row-major blob, so a column can in principle be read without decoding
//! its neighbors. Layout on disk:
//!
//! ```text
//! [ 32-byte header ] [ column directory ] [ node columns ] [ edge columns ] [ footer ] [ 8-byte trailing magic ]
//! ```
//!
//! The header gives the footer's byte offset so the footer (bloom filter
//! plus zone-map sets) can be read without walking the column data, and a
//! record count used for sizing the bloom filter when a segment is
//! rewritten during a future compaction (not implemented here). The
//! column directory records each column's byte range within the data
//! block; `Segment::open` decodes every column independently and zips
//! them back into row form for the rest of the engine to consume.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::storage::bloom::BloomFilter;
use crate::storage::types::{EdgeRecord, NodeRecord};

const MAGIC: &[u8; 8] = b"RGDBSEG1";
const TRAILING_MAGIC: &[u8; 8] = b"RGDBEOF1";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 32;

/// Column order within the directory and the data block. Node columns
/// first, then edge columns, each independently bincode-encoded.
const COLUMN_COUNT: usize = 11;
const COL_NODE_NUMERIC_ID: usize = 0;
const COL_NODE_SEMANTIC_ID: usize = 1;
const COL_NODE_NODE_TYPE: usize = 2;
const COL_NODE_NAME: usize = 3;
const COL_NODE_FILE: usize = 4;
const COL_NODE_EXPORTED: usize = 5;
const COL_NODE_METADATA: usize = 6;
const COL_EDGE_EDGE_TYPE: usize = 7;
const COL_EDGE_SRC: usize = 8;
const COL_EDGE_DST: usize = 9;
const COL_EDGE_METADATA: usize = 10;

const DIRECTORY_LEN: usize = COLUMN_COUNT * 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentData {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentFooter {
    node_bloom: BloomFilter,
    edge_bloom: BloomFilter,
    node_types: Vec<String>,
    files: Vec<String>,
}

/// Builds the concatenated column region and its directory (byte offset
/// and length of each column, relative to the start of the region) from
/// a fully-materialized node/edge set.
fn encode_columns(nodes: &[NodeRecord], edges: &[EdgeRecord]) -> Result<(Vec<[u64; 2]>, Vec<u8>)> {
    let node_numeric_id: Vec<u64> = nodes.iter().map(|n| n.numeric_id).collect();
    let node_semantic_id: Vec<&str> = nodes.iter().map(|n| n.semantic_id.as_str()).collect();
    let node_node_type: Vec<&str> = nodes.iter().map(|n| n.node_type.as_str()).collect();
    let node_name: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    let node_file: Vec<&str> = nodes.iter().map(|n| n.file.as_str()).collect();
    let node_exported: Vec<bool> = nodes.iter().map(|n| n.exported).collect();
    let node_metadata: Vec<&str> = nodes.iter().map(|n| n.metadata.as_str()).collect();

    let edge_edge_type: Vec<&str> = edges.iter().map(|e| e.edge_type.as_str()).collect();
    let edge_src: Vec<u64> = edges.iter().map(|e| e.src).collect();
    let edge_dst: Vec<u64> = edges.iter().map(|e| e.dst).collect();
    let edge_metadata: Vec<&str> = edges.iter().map(|e| e.metadata.as_str()).collect();

    let encoded: [Vec<u8>; COLUMN_COUNT] = [
        bincode::serialize(&node_numeric_id)?,
        bincode::serialize(&node_semantic_id)?,
        bincode::serialize(&node_node_type)?,
        bincode::serialize(&node_name)?,
        bincode::serialize(&node_file)?,
        bincode::serialize(&node_exported)?,
        bincode::serialize(&node_metadata)?,
        bincode::serialize(&edge_edge_type)?,
        bincode::serialize(&edge_src)?,
        bincode::serialize(&edge_dst)?,
        bincode::serialize(&edge_metadata)?,
    ];

    let mut directory = Vec::with_capacity(COLUMN_COUNT);
    let mut region = Vec::new();
    for column in &encoded {
        directory.push([region.len() as u64, column.len() as u64]);
        region.extend_from_slice(column);
    }

    Ok((directory, region))
}

/// Decodes a single column's bytes back into an owned `Vec<T>`.
fn decode_column<T: for<'de> Deserialize<'de>>(region: &[u8], directory: &[[u64; 2]], column: usize) -> Result<Vec<T>> {
    let [offset, len] = directory[column];
    let (offset, len) = (offset as usize, len as usize);
    let slice = region
        .get(offset..offset + len)
        .ok_or_else(|| GraphError::InvalidFormat("segment column out of range".to_string()))?;
    Ok(bincode::deserialize(slice)?)
}

/// A sealed, read-only segment opened via mmap.
pub struct Segment {
    _mmap: Mmap,
    data: SegmentData,
    footer: SegmentFooter,
    pub node_count: usize,
    pub edge_count: usize,
}

impl Segment {
    /// Writes a new segment file from a fully-materialized set of nodes
    /// and edges, fsyncing before rename so a crash mid-write never
    /// leaves a partially-written file visible under its final name.
    pub fn write(path: &Path, nodes: Vec<NodeRecord>, edges: Vec<EdgeRecord>) -> Result<()> {
        let mut node_bloom = BloomFilter::with_capacity(nodes.len().max(1));
        node_bloom.insert_all(nodes.iter().map(|n| n.numeric_id));

        let mut edge_bloom = BloomFilter::with_capacity(edges.len().max(1));
        edge_bloom.insert_all(edges.iter().map(|e| e.src));

        let mut node_types: Vec<String> = nodes.iter().map(|n| n.node_type.clone()).collect();
        node_types.sort();
        node_types.dedup();

        let mut files: Vec<String> = nodes.iter().map(|n| n.file.clone()).collect();
        files.sort();
        files.dedup();

        let node_count = nodes.len();

        let (directory, column_region) = encode_columns(&nodes, &edges)?;
        let mut directory_bytes = Vec::with_capacity(DIRECTORY_LEN);
        for [offset, len] in &directory {
            directory_bytes.extend_from_slice(&offset.to_le_bytes());
            directory_bytes.extend_from_slice(&len.to_le_bytes());
        }

        let footer = SegmentFooter {
            node_bloom,
            edge_bloom,
            node_types,
            files,
        };
        let footer_bytes = bincode::serialize(&footer)?;

        let footer_offset = (HEADER_LEN + directory_bytes.len() + column_region.len()) as u64;

        let mut header = [0u8; HEADER_LEN];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[12..20].copy_from_slice(&footer_offset.to_le_bytes());
        header[20..28].copy_from_slice(&(node_count as u64).to_le_bytes());

        let tmp_path = path.with_extension("seg.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&header)?;
            file.write_all(&directory_bytes)?;
            file.write_all(&column_region)?;
            file.write_all(&footer_bytes)?;
            file.write_all(TRAILING_MAGIC)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;

        if let Some(dir) = path.parent() {
            if let Ok(dir_file) = File::open(dir) {
                let _ = dir_file.sync_all();
            }
        }

        Ok(())
    }

    /// Opens a sealed segment read-only via mmap, validating header and
    /// trailing magic before trusting the contents.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_LEN + TRAILING_MAGIC.len() {
            return Err(GraphError::InvalidFormat(format!(
                "segment {} too short",
                path.display()
            )));
        }

        if &mmap[0..8] != MAGIC {
            return Err(GraphError::InvalidFormat(format!(
                "segment {} has bad magic",
                path.display()
            )));
        }

        let version = u32::from_le_bytes(mmap[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(GraphError::InvalidFormat(format!(
                "segment {} has unsupported format version {version}",
                path.display()
            )));
        }

        let footer_offset = u64::from_le_bytes(mmap[12..20].try_into().unwrap()) as usize;
        let node_count_hdr = u64::from_le_bytes(mmap[20..28].try_into().unwrap()) as usize;

        let trailing_start = mmap.len() - TRAILING_MAGIC.len();
        if &mmap[trailing_start..] != TRAILING_MAGIC {
            return Err(GraphError::InvalidFormat(format!(
                "segment {} missing trailing magic (truncated write?)",
                path.display()
            )));
        }

        if footer_offset > trailing_start {
            return Err(GraphError::InvalidFormat(format!(
                "segment {} has out-of-range footer offset",
                path.display()
            )));
        }

        let directory_start = HEADER_LEN;
        let directory_end = directory_start + DIRECTORY_LEN;
        if directory_end > footer_offset {
            return Err(GraphError::InvalidFormat(format!(
                "segment {} column directory overruns footer",
                path.display()
            )));
        }
        let mut directory = [[0u64; 2]; COLUMN_COUNT];
        for (i, slot) in directory.iter_mut().enumerate() {
            let entry = &mmap[directory_start + i * 16..directory_start + (i + 1) * 16];
            slot[0] = u64::from_le_bytes(entry[0..8].try_into().unwrap());
            slot[1] = u64::from_le_bytes(entry[8..16].try_into().unwrap());
        }

        let column_region = &mmap[directory_end..footer_offset];

        let numeric_ids: Vec<u64> = decode_column(column_region, &directory, COL_NODE_NUMERIC_ID)?;
        let semantic_ids: Vec<String> = decode_column(column_region, &directory, COL_NODE_SEMANTIC_ID)?;
        let node_types: Vec<String> = decode_column(column_region, &directory, COL_NODE_NODE_TYPE)?;
        let names: Vec<String> = decode_column(column_region, &directory, COL_NODE_NAME)?;
        let node_files: Vec<String> = decode_column(column_region, &directory, COL_NODE_FILE)?;
        let exported: Vec<bool> = decode_column(column_region, &directory, COL_NODE_EXPORTED)?;
        let node_metadata: Vec<String> = decode_column(column_region, &directory, COL_NODE_METADATA)?;

        if numeric_ids.len() != node_count_hdr
            || semantic_ids.len() != node_count_hdr
            || node_types.len() != node_count_hdr
            || names.len() != node_count_hdr
            || node_files.len() != node_count_hdr
            || exported.len() != node_count_hdr
            || node_metadata.len() != node_count_hdr
        {
            return Err(GraphError::InvalidFormat(format!(
                "segment {} node count mismatch: header says {node_count_hdr}, columns disagree",
                path.display()
            )));
        }

        let nodes: Vec<NodeRecord> = (0..node_count_hdr)
            .map(|i| NodeRecord {
                numeric_id: numeric_ids[i],
                semantic_id: semantic_ids[i].clone(),
                node_type: node_types[i].clone(),
                name: names[i].clone(),
                file: node_files[i].clone(),
                exported: exported[i],
                metadata: node_metadata[i].clone(),
            })
            .collect();

        let edge_types: Vec<String> = decode_column(column_region, &directory, COL_EDGE_EDGE_TYPE)?;
        let edge_srcs: Vec<u64> = decode_column(column_region, &directory, COL_EDGE_SRC)?;
        let edge_dsts: Vec<u64> = decode_column(column_region, &directory, COL_EDGE_DST)?;
        let edge_metadata: Vec<String> = decode_column(column_region, &directory, COL_EDGE_METADATA)?;

        let edge_count_hdr = edge_srcs.len();
        if edge_types.len() != edge_count_hdr || edge_dsts.len() != edge_count_hdr || edge_metadata.len() != edge_count_hdr {
            return Err(GraphError::InvalidFormat(format!(
                "segment {} edge columns disagree on length",
                path.display()
            )));
        }

        let edges: Vec<EdgeRecord> = (0..edge_count_hdr)
            .map(|i| EdgeRecord {
                edge_type: edge_types[i].clone(),
                src: edge_srcs[i],
                dst: edge_dsts[i],
                metadata: edge_metadata[i].clone(),
            })
            .collect();

        let footer: SegmentFooter = bincode::deserialize(&mmap[footer_offset..trailing_start])?;

        let node_count = nodes.len();
        let edge_count = edges.len();
        let data = SegmentData { nodes, edges };

        Ok(Self {
            _mmap: mmap,
            data,
            footer,
            node_count,
            edge_count,
        })
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.data.nodes
    }

    pub fn edges(&self) -> &[EdgeRecord] {
        &self.data.edges
    }

    /// Negative lookup short-circuit: false means the id is definitely
    /// absent from this segment.
    pub fn might_contain_node(&self, numeric_id: u64) -> bool {
        self.footer.node_bloom.might_contain(numeric_id)
    }

    pub fn might_contain_edges_from(&self, src: u64) -> bool {
        self.footer.edge_bloom.might_contain(src)
    }

    /// Zone-map pruning: skip mapping/scanning a segment whose recorded
    /// node-type set can't possibly match.
    pub fn might_have_node_type(&self, node_type: &str) -> bool {
        self.footer.node_types.iter().any(|t| t == node_type)
    }

    pub fn might_have_file(&self, file: &str) -> bool {
        self.footer.files.iter().any(|f| f == file)
    }

    pub fn get_node(&self, numeric_id: u64) -> Option<&NodeRecord> {
        if !self.might_contain_node(numeric_id) {
            return None;
        }
        self.data.nodes.iter().rev().find(|n| n.numeric_id == numeric_id)
    }
}
