//! RGDB — disk-backed graph storage engine for repeated code-analysis
//! re-indexing.
//!
//! The crate is organized the way the engine itself is layered:
//! `storage` holds the segment/delta/shard/manifest/engine stack (the
//! sole subject of the specification this crate implements), `rpc`
//! fronts it with a Unix-domain-socket server, `config` loads the
//! knobs the engine recognizes, and `error` carries the error kinds
//! reported back to clients.

pub mod config;
pub mod error;
pub mod rpc;
pub mod storage;

pub use config::EngineConfig;
pub use error::{GraphError, Result};
pub use storage::engine::Engine;
