//! Unix-domain-socket RPC server: one OS thread per accepted connection,
//! a shared engine behind an `RwLock` (readers take the read lock,
//! writers take the write lock so the commit protocol is observed
//! atomically), and a `signal-hook` thread that flushes and exits
//! cleanly on `SIGTERM`/`SIGINT`.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};

use crate::error::{GraphError, Result};
use crate::rpc::protocol::{Request, Response, WireNode, WireShardStats, WireStats, PROTOCOL_VERSION};
use crate::rpc::session::ClientSession;
use crate::storage::engine::{EdgeInput, Engine, EngineStats, NodeInput};
use crate::storage::types::metadata_kv_matches;

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Consecutive commit-time `IoFailure`s past which the server exits
/// rather than keep serving reads against a store that may have
/// diverged from what its clients believe was committed.
const MAX_CONSECUTIVE_IO_FAILURES: u64 = 5;

fn wire_stats(stats: EngineStats) -> WireStats {
    WireStats {
        total_nodes: stats.total_nodes,
        total_edges: stats.total_edges,
        generation: stats.generation,
        shards: stats
            .shard_stats
            .into_iter()
            .map(|s| WireShardStats {
                shard_id: s.shard_id,
                node_count: s.node_count,
                edge_count: s.edge_count,
                segment_count: s.segment_count,
                write_buffer_nodes: s.write_buffer_nodes,
                write_buffer_edges: s.write_buffer_edges,
            })
            .collect(),
    }
}

/// Reads one length-prefixed frame: a 4-byte big-endian length followed
/// by that many bytes of MessagePack payload. Returns `Ok(None)` on a
/// clean EOF (the client closed the connection between frames).
pub fn read_message(stream: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(GraphError::IoFailure(e)),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(GraphError::InvalidRequest(format!(
            "frame length {len} exceeds maximum {MAX_FRAME_LEN}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload)?;
    Ok(Some(payload))
}

pub fn write_message(stream: &mut impl Write, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    engine: Arc<RwLock<Engine>>,
    io_failure_streak: Arc<AtomicU64>,
}

impl Server {
    /// Binds the Unix-domain socket at `socket_path`, removing a stale
    /// socket file left behind by an unclean prior exit first.
    pub fn bind(socket_path: &Path, engine: Engine) -> Result<Self> {
        if socket_path.exists() {
            warn!(path = %socket_path.display(), "removing stale socket from a prior run");
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "listening");

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            engine: Arc::new(RwLock::new(engine)),
            io_failure_streak: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Accepts connections until a `Shutdown` request or a termination
    /// signal is received, then flushes every shard and removes the
    /// socket file before returning.
    pub fn run(self) -> Result<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let session_counter = Arc::new(AtomicU64::new(1));

        self.spawn_signal_handler(Arc::clone(&shutdown));

        self.listener
            .set_nonblocking(true)
            .map_err(GraphError::IoFailure)?;

        while !shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let engine = Arc::clone(&self.engine);
                    let shutdown = Arc::clone(&shutdown);
                    let io_failure_streak = Arc::clone(&self.io_failure_streak);
                    let session_id = session_counter.fetch_add(1, Ordering::SeqCst);
                    thread::spawn(move || {
                        if let Err(e) =
                            handle_client(stream, engine, session_id, shutdown, io_failure_streak)
                        {
                            warn!(session_id, error = %e, "client session ended with an error");
                        }
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(GraphError::IoFailure(e));
                }
            }
        }

        self.shutdown_cleanly()
    }

    fn spawn_signal_handler(&self, shutdown: Arc<AtomicBool>) {
        let mut signals = match Signals::new([SIGTERM, SIGINT]) {
            Ok(signals) => signals,
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                return;
            }
        };

        thread::spawn(move || {
            if signals.forever().next().is_some() {
                info!("received termination signal, shutting down");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    fn shutdown_cleanly(&self) -> Result<()> {
        {
            let mut engine = self
                .engine
                .write()
                .map_err(|_| GraphError::Fatal("engine lock poisoned during shutdown".to_string()))?;
            if let Err(e) = engine.flush_all() {
                error!(error = %e, "final flush during shutdown failed");
            }
        }

        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }

        info!("shutdown complete");
        Ok(())
    }
}

fn handle_client(
    mut stream: UnixStream,
    engine: Arc<RwLock<Engine>>,
    session_id: u64,
    shutdown: Arc<AtomicBool>,
    io_failure_streak: Arc<AtomicU64>,
) -> Result<()> {
    let mut session = ClientSession::new(session_id);
    info!(session_id, "client connected");

    loop {
        let payload = match read_message(&mut stream)? {
            Some(payload) => payload,
            None => {
                info!(session_id, "client disconnected");
                return Ok(());
            }
        };

        let request: Request = match rmp_serde::from_slice(&payload) {
            Ok(request) => request,
            Err(e) => {
                let response = Response::Error {
                    code: "INVALID_REQUEST".to_string(),
                    message: format!("malformed request: {e}"),
                };
                send(&mut stream, &response)?;
                continue;
            }
        };

        let is_shutdown = matches!(request, Request::Shutdown);
        let response = dispatch(request, &engine, &mut session, &io_failure_streak);
        send(&mut stream, &response)?;

        if io_failure_streak.load(Ordering::SeqCst) >= MAX_CONSECUTIVE_IO_FAILURES {
            error!(
                session_id,
                streak = MAX_CONSECUTIVE_IO_FAILURES,
                "repeated IO failures during commit, exiting rather than risk silent divergence"
            );
            std::process::exit(1);
        }

        if is_shutdown {
            shutdown.store(true, Ordering::SeqCst);
            return Ok(());
        }
    }
}

fn send(stream: &mut UnixStream, response: &Response) -> Result<()> {
    let payload = rmp_serde::to_vec(response)
        .map_err(|e| GraphError::Fatal(format!("failed to encode response: {e}")))?;
    write_message(stream, &payload)
}

fn dispatch(
    request: Request,
    engine: &Arc<RwLock<Engine>>,
    session: &mut ClientSession,
    io_failure_streak: &Arc<AtomicU64>,
) -> Response {
    match request {
        Request::Hello { client_name, protocol_version } => {
            session.client_name = Some(client_name);
            Response::Hello {
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                protocol_version: protocol_version.min(PROTOCOL_VERSION),
            }
        }
        Request::Ping => {
            let engine = match engine.read() {
                Ok(engine) => engine,
                Err(_) => return error_response(GraphError::Fatal("engine lock poisoned".to_string())),
            };
            Response::Pong(wire_stats(engine.stats()))
        }
        Request::BeginBatch => {
            session.begin_batch();
            Response::BatchStarted
        }
        Request::AddNode {
            semantic_id,
            node_type,
            name,
            file,
            exported,
            metadata,
        } => {
            let staged = session.stage_node(NodeInput {
                semantic_id,
                node_type,
                name,
                file,
                exported,
                metadata,
            });
            if staged {
                Response::NodeStaged
            } else {
                error_response(GraphError::BatchNotOpen)
            }
        }
        Request::AddEdge {
            edge_type,
            src_semantic_id,
            dst_semantic_id,
            metadata,
        } => {
            let staged = session.stage_edge(EdgeInput {
                edge_type,
                src_semantic_id,
                dst_semantic_id,
                metadata,
            });
            if staged {
                Response::EdgeStaged
            } else {
                error_response(GraphError::BatchNotOpen)
            }
        }
        Request::CommitBatch { changed_files, file_context, tags, request_id } => {
            info!(
                session_id = session.session_id,
                ?tags,
                request_id = request_id.as_deref().unwrap_or(""),
                "commit requested"
            );
            let batch = match session.take_batch(changed_files, file_context) {
                Some(batch) => batch,
                None => return error_response(GraphError::BatchNotOpen),
            };

            let mut engine = match engine.write() {
                Ok(engine) => engine,
                Err(_) => return error_response(GraphError::Fatal("engine lock poisoned".to_string())),
            };

            match engine.commit_batch(batch) {
                Ok(summary) => {
                    io_failure_streak.store(0, Ordering::SeqCst);
                    Response::CommitResult {
                        nodes_committed: summary.nodes_committed,
                        edges_committed: summary.edges_committed,
                        edges_skipped: summary.edges_skipped,
                        tombstoned_nodes: summary.tombstoned_nodes,
                        tombstoned_edges: summary.tombstoned_edges,
                    }
                }
                Err(e) => {
                    if e.is_io_class() {
                        io_failure_streak.fetch_add(1, Ordering::SeqCst);
                    } else {
                        io_failure_streak.store(0, Ordering::SeqCst);
                    }
                    error_response(e)
                }
            }
        }
        Request::AbortBatch => {
            session.abort_batch();
            Response::BatchAborted
        }
        Request::GetNode { numeric_id, semantic_id } => {
            let engine = match engine.read() {
                Ok(engine) => engine,
                Err(_) => return error_response(GraphError::Fatal("engine lock poisoned".to_string())),
            };

            let node = numeric_id
                .and_then(|id| engine.get_by_numeric_id(id))
                .or_else(|| semantic_id.as_deref().and_then(|id| engine.get_by_semantic_id(id)));

            Response::Node(node.map(WireNode::from))
        }
        Request::FindNodes { node_type, file, exported, metadata_kv } => {
            let engine = match engine.read() {
                Ok(engine) => engine,
                Err(_) => return error_response(GraphError::Fatal("engine lock poisoned".to_string())),
            };

            let nodes = engine.find_nodes_by_attribute(|n| {
                node_type.as_deref().map_or(true, |t| n.node_type == t)
                    && file.as_deref().map_or(true, |f| n.file == f)
                    && exported.map_or(true, |e| n.exported == e)
                    && metadata_kv
                        .as_ref()
                        .map_or(true, |(k, v)| metadata_kv_matches(&n.metadata, k, v))
            });

            Response::Nodes(nodes.iter().map(WireNode::from).collect())
        }
        Request::Neighbors { numeric_id, edge_types, direction } => {
            let engine = match engine.read() {
                Ok(engine) => engine,
                Err(_) => return error_response(GraphError::Fatal("engine lock poisoned".to_string())),
            };
            Response::NodeIds(engine.neighbors(numeric_id, edge_types.as_deref(), direction.into()))
        }
        Request::Bfs { numeric_id, max_depth, edge_filter } => {
            let engine = match engine.read() {
                Ok(engine) => engine,
                Err(_) => return error_response(GraphError::Fatal("engine lock poisoned".to_string())),
            };
            Response::NodeIds(engine.bfs(numeric_id, max_depth, edge_filter.as_deref()))
        }
        Request::Stats => {
            let engine = match engine.read() {
                Ok(engine) => engine,
                Err(_) => return error_response(GraphError::Fatal("engine lock poisoned".to_string())),
            };
            Response::Stats(wire_stats(engine.stats()))
        }
        Request::Shutdown => Response::ShuttingDown,
    }
}

fn error_response(error: GraphError) -> Response {
    Response::Error {
        code: error.code().to_string(),
        message: error.to_string(),
    }
}
