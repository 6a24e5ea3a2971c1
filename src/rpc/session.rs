//! Per-connection session state: protocol handshake status and the
//! batch currently being staged, if any. One `ClientSession` lives for
//! the lifetime of a single accepted connection.

use crate::storage::engine::{BatchInput, EdgeInput, NodeInput};

pub struct ClientSession {
    pub session_id: u64,
    pub client_name: Option<String>,
    pending: Option<BatchInput>,
}

impl ClientSession {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            client_name: None,
            pending: None,
        }
    }

    pub fn begin_batch(&mut self) {
        self.pending = Some(BatchInput::default());
    }

    pub fn has_open_batch(&self) -> bool {
        self.pending.is_some()
    }

    pub fn stage_node(&mut self, node: NodeInput) -> bool {
        match &mut self.pending {
            Some(batch) => {
                batch.nodes.push(node);
                true
            }
            None => false,
        }
    }

    pub fn stage_edge(&mut self, edge: EdgeInput) -> bool {
        match &mut self.pending {
            Some(batch) => {
                batch.edges.push(edge);
                true
            }
            None => false,
        }
    }

    /// Takes the staged batch (leaving no open batch), attaching the
    /// caller-declared changed file set and, for an enrichment commit,
    /// the file-context label passed with `CommitBatch`.
    pub fn take_batch(
        &mut self,
        changed_files: Vec<String>,
        file_context: Option<String>,
    ) -> Option<BatchInput> {
        let mut batch = self.pending.take()?;
        batch.changed_files = changed_files;
        batch.file_context = file_context;
        Some(batch)
    }

    pub fn abort_batch(&mut self) -> bool {
        self.pending.take().is_some()
    }
}
