//! Per-command execution context.
//!
//! One context is shared by every node of an execution tree. It carries
//! the configuration, the two collaborators and the registry through
//! which a dependent join hands its independent side's rows to the
//! dependent access nodes below it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use federa_buffer::BufferManager;
use federa_common::config::ExecutionConfig;
use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{BufferId, ProcessId, Schema};
use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::BufferCursor;
use crate::source::DataManager;

/// Rows published by a dependent join for its dependent side.
///
/// The registry entry does not own the buffer; the join side that
/// materialized it does, and unregisters it before removing it.
#[derive(Debug, Clone)]
pub struct DependentValueSource {
    /// Buffer holding the independent rows.
    pub buffer_id: BufferId,
    /// Schema of those rows.
    pub schema: Arc<Schema>,
}

/// Shared state of one command execution.
pub struct CommandContext {
    process_id: ProcessId,
    config: ExecutionConfig,
    buffer_manager: Arc<dyn BufferManager>,
    data_manager: Arc<dyn DataManager>,
    dependent_sources: Mutex<HashMap<String, DependentValueSource>>,
}

impl CommandContext {
    /// Creates a new context.
    pub fn new(
        process_id: ProcessId,
        config: ExecutionConfig,
        buffer_manager: Arc<dyn BufferManager>,
        data_manager: Arc<dyn DataManager>,
    ) -> Self {
        Self {
            process_id,
            config,
            buffer_manager,
            data_manager,
            dependent_sources: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a shared context.
    pub fn shared(
        process_id: ProcessId,
        config: ExecutionConfig,
        buffer_manager: Arc<dyn BufferManager>,
        data_manager: Arc<dyn DataManager>,
    ) -> Arc<Self> {
        Arc::new(Self::new(process_id, config, buffer_manager, data_manager))
    }

    /// Returns the id of the process this command belongs to.
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Returns the execution configuration.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Returns the buffer manager.
    pub fn buffer_manager(&self) -> &Arc<dyn BufferManager> {
        &self.buffer_manager
    }

    /// Returns the data manager.
    pub fn data_manager(&self) -> &Arc<dyn DataManager> {
        &self.data_manager
    }

    /// Rows per output batch.
    pub fn processor_batch_size(&self) -> usize {
        self.buffer_manager.processor_batch_size()
    }

    /// Publishes rows under `name` for dependent commands.
    pub fn register_dependent_source(
        &self,
        name: impl Into<String>,
        source: DependentValueSource,
    ) -> FederaResult<()> {
        let name = name.into();
        let mut sources = self.dependent_sources.lock();
        if sources.contains_key(&name) {
            return Err(FederaError::invariant(format!(
                "dependent source {name} registered twice"
            )));
        }
        debug!(source = %name, buffer_id = %source.buffer_id, "registered dependent source");
        sources.insert(name, source);
        Ok(())
    }

    /// Looks up a published source.
    pub fn dependent_source(&self, name: &str) -> Option<DependentValueSource> {
        self.dependent_sources.lock().get(name).cloned()
    }

    /// Opens a reader over a published source.
    pub fn dependent_cursor(&self, name: &str) -> FederaResult<BufferCursor> {
        let source = self.dependent_source(name).ok_or_else(|| {
            FederaError::component(format!("dependent source {name} is not available"))
        })?;
        Ok(BufferCursor::new(
            Arc::clone(&self.buffer_manager),
            source.buffer_id,
        ))
    }

    /// Withdraws a published source. Unknown names are ignored.
    pub fn remove_dependent_source(&self, name: &str) {
        if self.dependent_sources.lock().remove(name).is_some() {
            debug!(source = %name, "removed dependent source");
        }
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("process_id", &self.process_id)
            .field("config", &self.config)
            .field("dependent_sources", &self.dependent_sources.lock().len())
            .finish()
    }
}
