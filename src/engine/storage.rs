// In: src/engine/storage.rs

//! The block store: retention marks and retained partitions, keyed by
//! `MaterializationId`.
//!
//! Lifecycle of an entry:
//!
//!   Transient --mark(level)--> Marked (no blocks) --put--> Marked (blocks)
//!       ^                                                        |
//!       `------------------------release(blocking)---------------'
//!
//! Marking never computes anything. Blocks are written by the executor the next
//! time the materialization is evaluated. A materialization whose blocks are
//! incomplete (a memory-only block did not fit the budget) is recomputed in full on
//! its next use and stored again. The same holds for a retained block that can
//! no longer be read back: the entry keeps its mark, loses its blocks and the
//! lineage is recomputed.
//!
//! Every `put` takes a fresh generation number that is part of the spill file
//! names, so a background release of an older generation never touches the
//! files of a newer one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use arrow::record_batch::RecordBatch;
use hashbrown::HashMap;

use crate::engine::codec;
use crate::engine::plan::MaterializationId;
use crate::error::tambakError;
use crate::types::StorageLevel;

static STORE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Point-in-time view of a materialization's retention state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub id: MaterializationId,
    /// `StorageLevel::NONE` when the materialization is transient.
    pub level: StorageLevel,
    pub num_partitions: usize,
    /// Partitions currently held in memory or on disk.
    pub cached_partitions: usize,
    pub memory_bytes: usize,
    pub disk_bytes: u64,
}

enum Block {
    Deserialized { batch: RecordBatch, bytes: usize },
    Serialized(Vec<u8>),
    OnDisk { path: PathBuf, bytes: u64 },
}

impl Block {
    fn memory_bytes(&self) -> usize {
        match self {
            Block::Deserialized { bytes, .. } => *bytes,
            Block::Serialized(data) => data.len(),
            Block::OnDisk { .. } => 0,
        }
    }

    fn disk_bytes(&self) -> u64 {
        match self {
            Block::OnDisk { bytes, .. } => *bytes,
            _ => 0,
        }
    }

    fn read(&self) -> Result<RecordBatch, tambakError> {
        match self {
            Block::Deserialized { batch, .. } => Ok(batch.clone()),
            Block::Serialized(data) => codec::decode_block(data),
            Block::OnDisk { path, .. } => codec::decode_block(&std::fs::read(path)?),
        }
    }
}

struct Entry {
    level: StorageLevel,
    blocks: Vec<Option<Block>>,
}

impl Entry {
    fn is_complete(&self) -> bool {
        !self.blocks.is_empty() && self.blocks.iter().all(Option::is_some)
    }
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<MaterializationId, Entry>,
    memory_used: usize,
}

pub(crate) struct BlockStore {
    dir: PathBuf,
    memory_limit: usize,
    compression_level: i32,
    generation: AtomicU64,
    state: Mutex<StoreState>,
}

impl BlockStore {
    pub(crate) fn new(spill_dir: Option<&Path>, memory_limit: usize, compression_level: i32) -> Self {
        let store_id = STORE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let leaf = format!("tambak-blocks-{}-{}", std::process::id(), store_id);
        let dir = match spill_dir {
            Some(base) => base.join(leaf),
            None => std::env::temp_dir().join(leaf),
        };
        Self {
            dir,
            memory_limit,
            compression_level,
            generation: AtomicU64::new(0),
            state: Mutex::new(StoreState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, tambakError> {
        self.state
            .lock()
            .map_err(|_| tambakError::Storage("block store lock poisoned".to_string()))
    }

    /// Marks a materialization for retention.
    ///
    /// Re-marking with the level it already has is a no-op. Re-marking with a
    /// different level replaces the mark and discards blocks retained under the
    /// old level; they are rebuilt under the new level on the next evaluation.
    pub(crate) fn mark(&self, id: MaterializationId, level: StorageLevel) -> Result<(), tambakError> {
        if !level.is_valid() {
            return Err(tambakError::InvalidArgument(format!(
                "cannot persist {} with {}",
                id, level
            )));
        }
        let mut state = self.lock()?;
        let previous = match state.entries.get(&id) {
            Some(entry) if entry.level == level => return Ok(()),
            Some(entry) => Some(entry.level),
            None => None,
        };
        if let Some(old_level) = previous {
            log::warn!(
                "{} is already persisted with {}; switching to {} and dropping retained blocks",
                id,
                old_level.description(),
                level.description()
            );
            if let Some(entry) = state.entries.remove(&id) {
                let freed = release_accounting(&mut state, &entry);
                log::debug!("{} released {} in-memory bytes on re-mark", id, freed);
                drop_blocks(entry.blocks);
            }
        }
        state.entries.insert(
            id,
            Entry {
                level,
                blocks: Vec::new(),
            },
        );
        log::debug!("{} marked for retention with {}", id, level.description());
        Ok(())
    }

    pub(crate) fn level_of(&self, id: MaterializationId) -> Result<StorageLevel, tambakError> {
        Ok(self
            .lock()?
            .entries
            .get(&id)
            .map_or(StorageLevel::NONE, |entry| entry.level))
    }

    /// Returns the retained partitions if every one of them is available.
    ///
    /// A block that cannot be read back counts as a miss: the entry's blocks are
    /// dropped, its mark is kept, and `None` tells the caller to recompute.
    pub(crate) fn get(&self, id: MaterializationId) -> Result<Option<Vec<RecordBatch>>, tambakError> {
        let mut state = self.lock()?;
        let read = match state.entries.get(&id) {
            Some(entry) if entry.is_complete() => entry
                .blocks
                .iter()
                .flatten()
                .map(Block::read)
                .collect::<Result<Vec<_>, tambakError>>(),
            _ => return Ok(None),
        };
        match read {
            Ok(partitions) => {
                log::debug!("{} served {} partition(s) from the block store", id, partitions.len());
                Ok(Some(partitions))
            }
            Err(e) => {
                log::warn!("{} has an unreadable retained block ({}); recomputing", id, e);
                if let Some(entry) = state.entries.remove(&id) {
                    release_accounting(&mut state, &entry);
                    let level = entry.level;
                    drop_blocks(entry.blocks);
                    state.entries.insert(
                        id,
                        Entry {
                            level,
                            blocks: Vec::new(),
                        },
                    );
                }
                Ok(None)
            }
        }
    }

    /// Retains freshly computed partitions if the materialization is marked.
    pub(crate) fn put(&self, id: MaterializationId, partitions: &[RecordBatch]) -> Result<(), tambakError> {
        let mut state = self.lock()?;
        let level = match state.entries.get(&id) {
            Some(entry) if !entry.is_complete() => entry.level,
            _ => return Ok(()),
        };
        if let Some(entry) = state.entries.remove(&id) {
            release_accounting(&mut state, &entry);
            drop_blocks(entry.blocks);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut blocks = Vec::with_capacity(partitions.len());
        for (index, batch) in partitions.iter().enumerate() {
            let block = self.store_partition(&mut state, id, generation, index, batch, level)?;
            if block.is_none() {
                log::debug!(
                    "{} partition {} does not fit in the memory budget and was not retained",
                    id,
                    index
                );
            }
            blocks.push(block);
        }
        state.entries.insert(id, Entry { level, blocks });
        Ok(())
    }

    fn store_partition(
        &self,
        state: &mut StoreState,
        id: MaterializationId,
        generation: u64,
        index: usize,
        batch: &RecordBatch,
        level: StorageLevel,
    ) -> Result<Option<Block>, tambakError> {
        if level.use_memory() || level.use_off_heap() {
            let candidate = if level.deserialized() {
                Block::Deserialized {
                    batch: batch.clone(),
                    bytes: batch.get_array_memory_size(),
                }
            } else {
                Block::Serialized(codec::encode_block(batch, self.compression_level)?)
            };
            let needed = candidate.memory_bytes();
            if state.memory_used + needed <= self.memory_limit {
                state.memory_used += needed;
                return Ok(Some(candidate));
            }
        }
        if level.use_disk() {
            return self.write_to_disk(id, generation, index, batch).map(Some);
        }
        Ok(None)
    }

    fn write_to_disk(
        &self,
        id: MaterializationId,
        generation: u64,
        index: usize,
        batch: &RecordBatch,
    ) -> Result<Block, tambakError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "mat-{}-gen-{}-part-{}.blk",
            id.as_u64(),
            generation,
            index
        ));
        let bytes = codec::encode_block(batch, self.compression_level)?;
        std::fs::write(&path, &bytes)?;
        Ok(Block::OnDisk {
            path,
            bytes: bytes.len() as u64,
        })
    }

    /// Removes the retention mark and frees the blocks.
    ///
    /// With `blocking`, memory and spill files are released before this returns.
    /// Otherwise the entry is unmarked immediately and the blocks are freed on a
    /// background thread.
    pub(crate) fn release(&self, id: MaterializationId, blocking: bool) -> Result<(), tambakError> {
        let entry = {
            let mut state = self.lock()?;
            match state.entries.remove(&id) {
                Some(entry) => {
                    release_accounting(&mut state, &entry);
                    entry
                }
                None => return Ok(()),
            }
        };
        log::debug!("{} released (blocking = {})", id, blocking);
        if blocking {
            drop_blocks(entry.blocks);
        } else {
            std::thread::spawn(move || drop_blocks(entry.blocks));
        }
        Ok(())
    }

    pub(crate) fn info(
        &self,
        id: MaterializationId,
        num_partitions: usize,
    ) -> Result<StorageInfo, tambakError> {
        let state = self.lock()?;
        let mut info = StorageInfo {
            id,
            level: StorageLevel::NONE,
            num_partitions,
            cached_partitions: 0,
            memory_bytes: 0,
            disk_bytes: 0,
        };
        if let Some(entry) = state.entries.get(&id) {
            info.level = entry.level;
            for block in entry.blocks.iter().flatten() {
                info.cached_partitions += 1;
                info.memory_bytes += block.memory_bytes();
                info.disk_bytes += block.disk_bytes();
            }
        }
        Ok(info)
    }

    pub(crate) fn memory_used(&self) -> Result<usize, tambakError> {
        Ok(self.lock()?.memory_used)
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        if self.dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                log::warn!("could not remove spill directory {:?}: {}", self.dir, e);
            }
        }
    }
}

fn release_accounting(state: &mut StoreState, entry: &Entry) -> usize {
    let freed: usize = entry.blocks.iter().flatten().map(Block::memory_bytes).sum();
    state.memory_used = state.memory_used.saturating_sub(freed);
    freed
}

fn drop_blocks(blocks: Vec<Option<Block>>) {
    for block in blocks.into_iter().flatten() {
        if let Block::OnDisk { path, .. } = block {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("could not remove spilled block {:?}: {}", path, e);
            }
        }
    }
}
