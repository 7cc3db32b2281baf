// In: src/engine/context.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::config::EngineConfig;
use crate::engine::plan::{check_same_layout, conform, MaterializationId, PlanKind, PlanNode};
use crate::engine::raw::RawCollection;
use crate::engine::storage::BlockStore;
use crate::error::tambakError;

/// An in-process, partitioned execution engine.
///
/// The engine owns the configuration, the block store and the id sequence for
/// plan nodes. Collection handles hold an `Arc` to it, so it lives as long as any
/// handle does; its spill directory is removed when the last handle goes away.
pub struct LocalEngine {
    config: Arc<EngineConfig>,
    store: BlockStore,
    next_id: AtomicU64,
}

impl LocalEngine {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, tambakError> {
        config.validate()?;
        let store = BlockStore::new(
            config.spill_dir.as_deref(),
            config.storage_memory_bytes,
            config.serialized_compression_level,
        );
        log::info!(
            "local engine started (parallelism = {}, shuffle partitions = {}, max task attempts = {})",
            config.default_parallelism,
            config.shuffle_partitions,
            config.task_max_attempts
        );
        Ok(Arc::new(Self {
            config: Arc::new(config),
            store,
            next_id: AtomicU64::new(1),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config)
    }

    pub(crate) fn store(&self) -> &BlockStore {
        &self.store
    }

    pub(crate) fn next_id(&self) -> MaterializationId {
        MaterializationId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Bytes currently retained in memory by persisted collections.
    pub fn storage_memory_used(&self) -> Result<usize, tambakError> {
        self.store.memory_used()
    }

    /// Registers in-memory data as a source collection, one partition per batch.
    ///
    /// An empty `partitions` vector yields a single empty partition. Every batch
    /// must share `schema`'s column layout.
    pub fn source(
        self: &Arc<Self>,
        schema: SchemaRef,
        partitions: Vec<RecordBatch>,
    ) -> Result<RawCollection, tambakError> {
        let partitions = if partitions.is_empty() {
            vec![RecordBatch::new_empty(schema.clone())]
        } else {
            partitions
                .iter()
                .map(|batch| {
                    check_same_layout("source", &schema, &batch.schema())?;
                    conform(batch, &schema)
                })
                .collect::<Result<Vec<_>, tambakError>>()?
        };
        let node = PlanNode {
            id: self.next_id(),
            schema,
            num_partitions: partitions.len(),
            kind: PlanKind::Source {
                partitions: Arc::new(partitions),
            },
        };
        Ok(RawCollection::new(Arc::clone(self), Arc::new(node)))
    }
}
