//! The RPC layer: wire protocol types, per-connection session state,
//! and the Unix-domain-socket server that fronts the engine.

pub mod protocol;
pub mod server;
pub mod session;
