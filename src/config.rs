//! Engine configuration.
//!
//! Holds exactly the knobs the engine recognizes (see spec §6):
//! `database_path`, `socket_path`, `flush_node_threshold`,
//! `flush_memory_threshold_bytes`, `shard_count_hint`,
//! `enrichment_shard_count_hint`, `log_level`. Compaction policy and
//! background threads are deliberately not modeled here — out of scope.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn default_flush_node_threshold() -> usize {
    10_000
}

fn default_flush_memory_threshold_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_shard_count_hint() -> u16 {
    8
}

fn default_enrichment_shard_count_hint() -> u16 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Engine configuration, loadable from a JSON file or built up by a CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the database (manifest + per-shard segments).
    pub database_path: PathBuf,

    /// Unix-domain socket path the RPC server binds.
    pub socket_path: PathBuf,

    /// Number of delta (write-buffer) entries at which a shard auto-flushes.
    #[serde(default = "default_flush_node_threshold")]
    pub flush_node_threshold: usize,

    /// Approximate delta byte size at which a shard auto-flushes.
    #[serde(default = "default_flush_memory_threshold_bytes")]
    pub flush_memory_threshold_bytes: usize,

    /// Number of analysis shards to create for a brand-new database.
    #[serde(default = "default_shard_count_hint")]
    pub shard_count_hint: u16,

    /// Number of distinct enrichment shards to spread producer/file
    /// file-contexts across (separate hash space from analysis shards).
    #[serde(default = "default_enrichment_shard_count_hint")]
    pub enrichment_shard_count_hint: u16,

    /// `tracing` filter directive, e.g. "info", "debug", "rgdb=trace".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl EngineConfig {
    /// Construct a config with every knob at its default except the two
    /// required paths.
    pub fn new(database_path: PathBuf, socket_path: PathBuf) -> Self {
        Self {
            database_path,
            socket_path,
            flush_node_threshold: default_flush_node_threshold(),
            flush_memory_threshold_bytes: default_flush_memory_threshold_bytes(),
            shard_count_hint: default_shard_count_hint(),
            enrichment_shard_count_hint: default_enrichment_shard_count_hint(),
            log_level: default_log_level(),
        }
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Parse configuration from `argv`-style CLI arguments, following the
    /// reference server's flag conventions.
    ///
    /// Usage: `<database_path> --socket <path> [--flush-node-threshold N]
    /// [--flush-memory-threshold-bytes N] [--shard-count-hint N]
    /// [--enrichment-shard-count-hint N] [--log-level LEVEL]`
    pub fn from_args(args: &[String]) -> std::result::Result<Self, String> {
        if args.is_empty() {
            return Err(
                "usage: rgdb-server <database_path> --socket <socket_path> [options]".to_string(),
            );
        }

        let database_path = PathBuf::from(&args[0]);
        let mut config = Self::new(database_path, PathBuf::from("/tmp/rgdb.sock"));

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--socket" => {
                    config.socket_path = PathBuf::from(next_arg(args, &mut i, "--socket")?);
                }
                "--flush-node-threshold" => {
                    config.flush_node_threshold = parse_arg(args, &mut i, "--flush-node-threshold")?;
                }
                "--flush-memory-threshold-bytes" => {
                    config.flush_memory_threshold_bytes =
                        parse_arg(args, &mut i, "--flush-memory-threshold-bytes")?;
                }
                "--shard-count-hint" => {
                    config.shard_count_hint = parse_arg(args, &mut i, "--shard-count-hint")?;
                }
                "--enrichment-shard-count-hint" => {
                    config.enrichment_shard_count_hint =
                        parse_arg(args, &mut i, "--enrichment-shard-count-hint")?;
                }
                "--log-level" => {
                    config.log_level = next_arg(args, &mut i, "--log-level")?.to_string();
                }
                other => {
                    return Err(format!("unrecognized argument: {other}"));
                }
            }
            i += 1;
        }

        Ok(config)
    }
}

fn next_arg<'a>(args: &'a [String], i: &mut usize, flag: &str) -> std::result::Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_arg<T: std::str::FromStr>(
    args: &[String],
    i: &mut usize,
    flag: &str,
) -> std::result::Result<T, String> {
    let raw = next_arg(args, i, flag)?;
    raw.parse()
        .map_err(|_| format!("{flag} expects a number, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::new(PathBuf::from("/tmp/db"), PathBuf::from("/tmp/db.sock"));
        assert_eq!(config.flush_node_threshold, 10_000);
        assert_eq!(config.shard_count_hint, 8);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn from_args_parses_flags() {
        let args: Vec<String> = vec![
            "/data/repo.gdb",
            "--socket",
            "/tmp/custom.sock",
            "--flush-node-threshold",
            "500",
            "--shard-count-hint",
            "16",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let config = EngineConfig::from_args(&args).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/data/repo.gdb"));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/custom.sock"));
        assert_eq!(config.flush_node_threshold, 500);
        assert_eq!(config.shard_count_hint, 16);
    }

    #[test]
    fn from_args_rejects_empty() {
        assert!(EngineConfig::from_args(&[]).is_err());
    }

    #[test]
    fn load_roundtrips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = EngineConfig::new(PathBuf::from("/data/db"), PathBuf::from("/tmp/s.sock"));
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.database_path, config.database_path);
        assert_eq!(loaded.flush_node_threshold, config.flush_node_threshold);
    }
}
