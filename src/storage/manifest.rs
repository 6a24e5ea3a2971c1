//! The manifest is the single on-disk source of truth for which
//! segments make up each shard and where numeric-id allocation has
//! gotten to. It is rewritten atomically (write to a temp file in the
//! same directory, fsync, rename, fsync the directory) so a crash mid-
//! write never leaves a torn manifest behind — the rename either lands
//! entirely or not at all.
//!
//! Cross-shard indices are never persisted: they are rebuilt from the
//! manifest's segment lists plus each shard's write buffer (empty after
//! a clean restart) on every open.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{GraphError, Result};

const MANIFEST_FILE: &str = "manifest.json";
const CURRENT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardManifest {
    pub segment_ids: Vec<u64>,
    pub next_numeric_id: u64,
}

impl Default for ShardManifest {
    fn default() -> Self {
        Self {
            segment_ids: Vec::new(),
            next_numeric_id: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub format_version: u32,
    pub generation: u64,
    pub shard_count: u16,
    pub enrichment_shard_count: u16,
    pub shards: BTreeMap<u16, ShardManifest>,
    pub enrichment_shards: BTreeMap<u16, ShardManifest>,
}

impl ManifestDocument {
    fn new(shard_count: u16, enrichment_shard_count: u16) -> Self {
        let shards = (0..shard_count)
            .map(|id| (id, ShardManifest::default()))
            .collect();
        let enrichment_shards = (0..enrichment_shard_count)
            .map(|id| (id, ShardManifest::default()))
            .collect();

        Self {
            format_version: CURRENT_FORMAT_VERSION,
            generation: 0,
            shard_count,
            enrichment_shard_count,
            shards,
            enrichment_shards,
        }
    }
}

pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    fn manifest_path(db_path: &Path) -> PathBuf {
        db_path.join(MANIFEST_FILE)
    }

    /// Creates a new manifest in `db_path`, failing if one already
    /// exists (callers should use `open` against an existing database).
    pub fn create(db_path: &Path, shard_count: u16, enrichment_shard_count: u16) -> Result<Self> {
        fs::create_dir_all(db_path)?;
        let path = Self::manifest_path(db_path);
        if path.exists() {
            return Err(GraphError::RecoveryFailure(format!(
                "manifest already exists at {}",
                path.display()
            )));
        }

        let store = Self { path };
        let document = ManifestDocument::new(shard_count, enrichment_shard_count);
        store.save(&document)?;
        Ok(store)
    }

    /// Opens the manifest at `db_path`. Refuses to proceed (rather than
    /// attempt partial recovery) if the file is missing, unreadable, or
    /// records a future format version.
    pub fn open(db_path: &Path) -> Result<(Self, ManifestDocument)> {
        let path = Self::manifest_path(db_path);
        let store = Self { path };
        let document = store.load()?;

        if document.format_version > CURRENT_FORMAT_VERSION {
            return Err(GraphError::RecoveryFailure(format!(
                "manifest format version {} is newer than supported version {}",
                document.format_version, CURRENT_FORMAT_VERSION
            )));
        }

        Ok((store, document))
    }

    pub fn exists(db_path: &Path) -> bool {
        Self::manifest_path(db_path).exists()
    }

    pub fn load(&self) -> Result<ManifestDocument> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            GraphError::RecoveryFailure(format!(
                "failed to read manifest {}: {e}",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            GraphError::RecoveryFailure(format!(
                "failed to parse manifest {}: {e}",
                self.path.display()
            ))
        })
    }

    /// Atomically rewrites the manifest: serialize to a temp file in the
    /// same directory, fsync it, rename over the old manifest, then
    /// fsync the containing directory so the rename itself is durable.
    pub fn save(&self, document: &ManifestDocument) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| GraphError::Fatal("manifest path has no parent directory".to_string()))?;

        let json = serde_json::to_string_pretty(document)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| GraphError::IoFailure(e.error))?;

        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }

        Ok(())
    }

    /// Persists `document` with its generation bumped, as every commit's
    /// final durability step does.
    pub fn save_next_generation(&self, mut document: ManifestDocument) -> Result<ManifestDocument> {
        document.generation += 1;
        self.save(&document)?;
        Ok(document)
    }
}
