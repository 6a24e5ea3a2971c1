//! `rgdb-server` — binds a Unix-domain socket over an `rgdb::Engine`
//! and serves clients until `Shutdown` or a termination signal.
//!
//! Usage: `rgdb-server <database_path> --socket <socket_path>
//! [--flush-node-threshold N] [--flush-memory-threshold-bytes N]
//! [--shard-count-hint N] [--enrichment-shard-count-hint N]
//! [--log-level LEVEL]`

use tracing_subscriber::EnvFilter;

use rgdb::config::EngineConfig;
use rgdb::rpc::server::Server;
use rgdb::storage::engine::Engine;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match EngineConfig::from_args(&args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("rgdb-server: {message}");
            std::process::exit(1);
        }
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default failed");

    let mut engine = match Engine::create_or_open(
        &config.database_path,
        config.shard_count_hint,
        config.enrichment_shard_count_hint,
    ) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "failed to open database, refusing to start");
            std::process::exit(1);
        }
    };
    engine.set_flush_thresholds(config.flush_node_threshold, config.flush_memory_threshold_bytes);

    let server = match Server::bind(&config.socket_path, engine) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind socket");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!(error = %e, "server exited with an error");
        std::process::exit(1);
    }
}
