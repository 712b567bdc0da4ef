//! Bounded LRU cache of dataset blocks shared by every open block file.
//!
//! Entries are keyed by `(file id, block index)` and keep a handle to the
//! [`BlockSource`] that produced them, so a capacity-driven eviction can hand
//! the buffer back to its owner for write-back no matter which file caused it.
//! One mutex serializes every lookup, load, eviction and flush; disk I/O for a
//! miss or a write-back happens while it is held.

#[cfg(test)]
mod cache_tests;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::{Result, anyhow, bail};
use lru::LruCache;
use tracing::{debug, error};

use crate::layout::sample::{BlockBuf, ByteOrder};
use crate::metrics::{self, EvictionOp};
use crate::retention::file::mapper::BlockPoint;

/// Default number of blocks held by [`BlockCache::shared`].
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

const SHARED_CAPACITY: NonZeroUsize = match NonZeroUsize::new(DEFAULT_CACHE_CAPACITY) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// BlockSource is the storage side of a cached block: it loads blocks on a miss
/// and decides what happens to a buffer when it leaves the cache.
pub trait BlockSource: Send + Sync {
    /// Process-unique identity used in cache keys.
    fn id(&self) -> u64;
    fn byte_order(&self) -> ByteOrder;
    fn is_writable(&self) -> bool;
    /// Load one block from storage.
    ///
    /// # Errors
    /// Returns an error if the block cannot be read at all.
    fn read_block(&self, block: usize) -> Result<BlockBuf>;
    /// Persist one block to storage.
    ///
    /// # Errors
    /// Returns an error if the block cannot be written in full.
    fn write_block(&self, block: usize, buf: &BlockBuf) -> Result<()>;

    /// Write-back policy applied when a buffer leaves the cache. Modified
    /// buffers of writable sources are persisted; everything else is dropped.
    ///
    /// # Returns
    /// Whether the buffer was written.
    ///
    /// # Errors
    /// Propagates a failed [`Self::write_block`].
    fn write_back(&self, block: usize, buf: &BlockBuf) -> Result<bool> {
        if self.is_writable() && buf.is_dirty() {
            self.write_block(block, buf)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub file_id: u64,
    pub block: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub used: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_backs: u64,
}

struct Entry {
    buf: BlockBuf,
    owner: Arc<dyn BlockSource>,
}

struct CacheState {
    lru: LruCache<BlockKey, Entry>,
    // Most recently resolved key. Always present in `lru` when set.
    active: Option<BlockKey>,
    hits: u64,
    misses: u64,
    evictions: u64,
    write_backs: u64,
}

pub struct BlockCache {
    state: Mutex<CacheState>,
    capacity: NonZeroUsize,
}

static SHARED_CACHE: OnceLock<Arc<BlockCache>> = OnceLock::new();

impl BlockCache {
    /// # Errors
    /// Returns an error if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or_else(|| anyhow!("cache capacity must be positive"))?;
        Ok(Self::with_capacity(capacity))
    }

    #[must_use]
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                lru: LruCache::new(capacity),
                active: None,
                hits: 0,
                misses: 0,
                evictions: 0,
                write_backs: 0,
            }),
            capacity,
        }
    }

    /// Process-wide cache of [`DEFAULT_CACHE_CAPACITY`] blocks, created on first use.
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED_CACHE.get_or_init(|| Arc::new(Self::with_capacity(SHARED_CAPACITY))))
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// # Errors
    /// Returns an error if the cache lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.lru.len())
    }

    /// # Errors
    /// Returns an error if the cache lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// # Errors
    /// Returns an error if the cache lock is poisoned.
    pub fn contains(&self, file_id: u64, block: usize) -> Result<bool> {
        Ok(self.lock()?.lru.contains(&BlockKey { file_id, block }))
    }

    /// # Errors
    /// Returns an error if the cache lock is poisoned.
    pub fn stats(&self) -> Result<CacheStats> {
        let state = self.lock()?;
        Ok(CacheStats {
            capacity: self.capacity(),
            used: state.lru.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            write_backs: state.write_backs,
        })
    }

    /// `get` returns a copy of one block, loading it through `owner` on a miss.
    ///
    /// # Errors
    /// Returns an error if the block cannot be loaded.
    pub fn get<S: BlockSource + 'static>(&self, owner: &Arc<S>, block: usize) -> Result<BlockBuf> {
        let mut state = self.lock()?;
        let entry = Self::resolve(&mut state, owner, block)?;
        Ok(entry.buf.clone())
    }

    /// `read` fetches a single sample. It is a batch of one.
    ///
    /// # Errors
    /// Returns an error if the block cannot be loaded or the offset is out of range.
    pub fn read<S: BlockSource + 'static>(&self, owner: &Arc<S>, at: BlockPoint) -> Result<f32> {
        let mut out = [0f32];
        self.read_many(owner, &[at], &mut out)?;
        Ok(out[0])
    }

    /// `write` stores a single sample. It is a batch of one.
    ///
    /// # Errors
    /// Returns an error if the owner is read-only, the block cannot be loaded,
    /// or the offset is out of range.
    pub fn write<S: BlockSource + 'static>(
        &self,
        owner: &Arc<S>,
        at: BlockPoint,
        value: f32,
    ) -> Result<()> {
        self.write_many(owner, &[at], &[value])
    }

    /// `read_many` fetches one sample per point, in order, under one lock.
    ///
    /// Consecutive points in the same block share one lookup.
    ///
    /// # Errors
    /// Returns an error if the slices differ in length, a block cannot be
    /// loaded, or an offset is out of range.
    pub fn read_many<S: BlockSource + 'static>(
        &self,
        owner: &Arc<S>,
        points: &[BlockPoint],
        out: &mut [f32],
    ) -> Result<()> {
        if points.len() != out.len() {
            bail!(
                "read_many: {} points but {} output slots",
                points.len(),
                out.len()
            );
        }
        let order = owner.byte_order();
        let mut state = self.lock()?;

        let mut i = 0;
        while i < points.len() {
            let block = points[i].block;
            let entry = Self::resolve(&mut state, owner, block)?;
            let samples = entry.buf.samples();
            while i < points.len() && points[i].block == block {
                let offset = points[i].offset;
                if offset >= samples {
                    bail!("offset {offset} outside block {block} of {samples} points");
                }
                out[i] = entry.buf.get_f32(offset, order);
                i += 1;
            }
        }
        Ok(())
    }

    /// `write_many` stores one sample per point, in order, under one lock.
    ///
    /// # Errors
    /// Returns an error if the owner is read-only, the slices differ in length,
    /// a block cannot be loaded, or an offset is out of range.
    pub fn write_many<S: BlockSource + 'static>(
        &self,
        owner: &Arc<S>,
        points: &[BlockPoint],
        values: &[f32],
    ) -> Result<()> {
        if !owner.is_writable() {
            bail!("file {} is read-only", owner.id());
        }
        if points.len() != values.len() {
            bail!(
                "write_many: {} points but {} values",
                points.len(),
                values.len()
            );
        }
        let order = owner.byte_order();
        let mut state = self.lock()?;

        let mut i = 0;
        while i < points.len() {
            let block = points[i].block;
            let entry = Self::resolve(&mut state, owner, block)?;
            let samples = entry.buf.samples();
            while i < points.len() && points[i].block == block {
                let offset = points[i].offset;
                if offset >= samples {
                    bail!("offset {offset} outside block {block} of {samples} points");
                }
                entry.buf.set_f32(offset, values[i], order);
                i += 1;
            }
        }
        Ok(())
    }

    /// `flush` writes back and drops every cached block of `owner`.
    ///
    /// Blocks whose write-back fails stay cached so a later flush can retry them.
    ///
    /// # Errors
    /// Returns the first write-back failure, after attempting every block.
    pub fn flush(&self, owner: &dyn BlockSource) -> Result<()> {
        let file_id = owner.id();
        let mut state = self.lock()?;

        let mut keys: Vec<BlockKey> = state
            .lru
            .iter()
            .filter(|(k, _)| k.file_id == file_id)
            .map(|(k, _)| *k)
            .collect();
        keys.sort_unstable_by_key(|k| k.block);

        let mut first_err = None;
        let mut written = 0u64;
        for key in &keys {
            let outcome = match state.lru.peek(key) {
                Some(entry) => entry.owner.write_back(key.block, &entry.buf),
                None => continue,
            };
            match outcome {
                Ok(wrote) => {
                    written += u64::from(wrote);
                    state.lru.pop(key);
                }
                Err(e) => {
                    error!(file_id, block = key.block, "flush write-back failed: {e:#}");
                    first_err.get_or_insert(e);
                }
            }
        }
        state.write_backs += written;
        if state.active.is_some_and(|k| k.file_id == file_id) {
            state.active = None;
        }
        debug!(file_id, blocks = keys.len(), written, "flushed file from cache");

        first_err.map_or(Ok(()), Err)
    }

    /// `discard` drops every cached block of `file_id` without writing anything.
    ///
    /// # Returns
    /// How many blocks were dropped.
    ///
    /// # Errors
    /// Returns an error if the cache lock is poisoned.
    pub fn discard(&self, file_id: u64) -> Result<usize> {
        let mut state = self.lock()?;
        let keys: Vec<BlockKey> = state
            .lru
            .iter()
            .filter(|(k, _)| k.file_id == file_id)
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            state.lru.pop(key);
        }
        if state.active.is_some_and(|k| k.file_id == file_id) {
            state.active = None;
        }
        Ok(keys.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("block cache lock poisoned"))
    }

    /// Find `block` of `owner`, loading it on a miss, and make it the active key.
    ///
    /// The active key is always the most recently used entry, so a repeat hit
    /// goes straight to its buffer without a membership check or promotion.
    fn resolve<'s, S: BlockSource + 'static>(
        state: &'s mut CacheState,
        owner: &Arc<S>,
        block: usize,
    ) -> Result<&'s mut Entry> {
        let key = BlockKey {
            file_id: owner.id(),
            block,
        };
        let missing = || anyhow!("block {block} of file {} missing from cache", key.file_id);

        if state.active == Some(key) {
            state.hits += 1;
            return state.lru.peek_mut(&key).ok_or_else(missing);
        }

        if state.lru.contains(&key) {
            state.hits += 1;
        } else {
            state.misses += 1;
            let buf = owner.read_block(block)?;
            let entry = Entry {
                buf,
                owner: Arc::clone(owner) as Arc<dyn BlockSource>,
            };
            if let Some((old_key, old)) = state.lru.push(key, entry) {
                Self::evict(state, old_key, &old);
            }
        }
        state.active = Some(key);
        // `get_mut` promotes a hit; a fresh push is already most recent.
        state.lru.get_mut(&key).ok_or_else(missing)
    }

    fn evict(state: &mut CacheState, key: BlockKey, entry: &Entry) {
        state.evictions += 1;
        if state.active == Some(key) {
            state.active = None;
        }
        let (written_back, failed) = match entry.owner.write_back(key.block, &entry.buf) {
            Ok(wrote) => (wrote, false),
            Err(e) => {
                error!(
                    file_id = key.file_id,
                    block = key.block,
                    "eviction write-back failed, block dropped: {e:#}"
                );
                (false, true)
            }
        };
        if written_back {
            state.write_backs += 1;
        }
        metrics::record_eviction(EvictionOp {
            file_id: key.file_id,
            block: key.block,
            written_back,
            error: failed,
        });
    }
}
