use super::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const BLOCK_POINTS: usize = 8;

struct MemSource {
    id: u64,
    writable: AtomicBool,
    fail_writes: AtomicBool,
    blocks: Mutex<HashMap<usize, Vec<u8>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemSource {
    fn new(id: u64, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            writable: AtomicBool::new(writable),
            fail_writes: AtomicBool::new(false),
            blocks: Mutex::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    fn stored(&self, block: usize, point: usize) -> f32 {
        let blocks = self.blocks.lock().unwrap();
        let bytes = blocks.get(&block).expect("block persisted");
        ByteOrder::Big.read_f32(&bytes[point * 4..point * 4 + 4])
    }
}

impl BlockSource for MemSource {
    fn id(&self) -> u64 {
        self.id
    }

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Big
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn read_block(&self, block: usize) -> Result<BlockBuf> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks.get(&block).map_or_else(
            || BlockBuf::zeroed(BLOCK_POINTS * 4),
            |b| BlockBuf::from_bytes(b.clone()),
        ))
    }

    fn write_block(&self, block: usize, buf: &BlockBuf) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated write failure");
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blocks
            .lock()
            .unwrap()
            .insert(block, buf.as_bytes().to_vec());
        Ok(())
    }
}

fn pt(block: usize, offset: usize) -> BlockPoint {
    BlockPoint { block, offset }
}

#[test]
fn zero_capacity_is_rejected() {
    assert!(BlockCache::new(0).is_err());
    assert_eq!(BlockCache::new(3).unwrap().capacity(), 3);
}

#[test]
fn shared_cache_is_a_single_instance() {
    let a = BlockCache::shared();
    let b = BlockCache::shared();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.capacity(), DEFAULT_CACHE_CAPACITY);
}

#[test]
fn miss_loads_once_then_hits() {
    let cache = BlockCache::new(4).unwrap();
    let src = MemSource::new(1, false);

    assert_eq!(cache.read(&src, pt(0, 1)).unwrap(), 0.0);
    assert_eq!(cache.read(&src, pt(0, 2)).unwrap(), 0.0);
    assert_eq!(cache.read(&src, pt(1, 0)).unwrap(), 0.0);
    assert_eq!(cache.read(&src, pt(0, 3)).unwrap(), 0.0);

    assert_eq!(src.reads.load(Ordering::SeqCst), 2);
    let stats = cache.stats().unwrap();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.used, 2);
    assert!(cache.contains(1, 0).unwrap());
    assert!(!cache.contains(1, 5).unwrap());
}

#[test]
fn repeat_hits_on_active_block_count_without_reloading() {
    let cache = BlockCache::new(2).unwrap();
    let src = MemSource::new(11, true);

    cache.write(&src, pt(0, 0), 5.0).unwrap();
    for offset in 0..BLOCK_POINTS {
        cache.read(&src, pt(0, offset)).unwrap();
    }
    assert_eq!(cache.read(&src, pt(0, 0)).unwrap(), 5.0);

    let stats = cache.stats().unwrap();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, BLOCK_POINTS as u64 + 1);
    assert_eq!(src.reads.load(Ordering::SeqCst), 1);
}

#[test]
fn hit_on_inactive_block_promotes_it() {
    let cache = BlockCache::new(2).unwrap();
    let src = MemSource::new(12, false);

    cache.read(&src, pt(0, 0)).unwrap();
    cache.read(&src, pt(1, 0)).unwrap();
    // Block 0 becomes most recent, so loading block 2 evicts block 1.
    cache.read(&src, pt(0, 1)).unwrap();
    cache.read(&src, pt(2, 0)).unwrap();

    assert!(cache.contains(12, 0).unwrap());
    assert!(!cache.contains(12, 1).unwrap());
    assert!(cache.contains(12, 2).unwrap());
}

#[test]
fn batched_write_then_read_roundtrip() {
    let cache = BlockCache::new(4).unwrap();
    let src = MemSource::new(2, true);

    let points = [pt(0, 0), pt(0, 1), pt(1, 7), pt(0, 2), pt(2, 3)];
    let values = [1.5, -2.0, 3.25, 4.0, 1e-3];
    cache.write_many(&src, &points, &values).unwrap();

    let mut out = [0f32; 5];
    cache.read_many(&src, &points, &mut out).unwrap();
    assert_eq!(out, values);
}

#[test]
fn eviction_writes_back_dirty_block_of_writable_source() {
    let cache = BlockCache::new(2).unwrap();
    let src = MemSource::new(3, true);

    cache.write(&src, pt(0, 4), 42.0).unwrap();
    cache.write(&src, pt(1, 0), 1.0).unwrap();
    cache.write(&src, pt(2, 0), 2.0).unwrap();

    assert!(!cache.contains(3, 0).unwrap(), "LRU block must be evicted");
    assert_eq!(src.stored(0, 4), 42.0);
    assert_eq!(cache.read(&src, pt(0, 4)).unwrap(), 42.0);

    let stats = cache.stats().unwrap();
    assert!(stats.evictions >= 1);
    assert!(stats.write_backs >= 1);
}

#[test]
fn read_only_source_is_never_written_on_eviction() {
    let cache = BlockCache::new(2).unwrap();
    let src = MemSource::new(4, false);

    for block in 0..10 {
        cache.read(&src, pt(block, 0)).unwrap();
    }
    assert_eq!(cache.stats().unwrap().evictions, 8);
    assert_eq!(src.writes.load(Ordering::SeqCst), 0);
}

#[test]
fn clean_blocks_are_dropped_without_writing() {
    let cache = BlockCache::new(1).unwrap();
    let src = MemSource::new(5, true);

    cache.read(&src, pt(0, 0)).unwrap();
    cache.read(&src, pt(1, 0)).unwrap();
    cache.read(&src, pt(2, 0)).unwrap();
    assert_eq!(src.writes.load(Ordering::SeqCst), 0);
}

#[test]
fn eviction_across_files_writes_to_the_owner() {
    let cache = BlockCache::new(1).unwrap();
    let a = MemSource::new(6, true);
    let b = MemSource::new(7, false);

    cache.write(&a, pt(3, 1), 9.5).unwrap();
    cache.read(&b, pt(0, 0)).unwrap();

    assert_eq!(a.writes.load(Ordering::SeqCst), 1);
    assert_eq!(a.stored(3, 1), 9.5);
    assert_eq!(b.writes.load(Ordering::SeqCst), 0);
}

#[test]
fn flush_persists_and_drops_only_that_file() {
    let cache = BlockCache::new(8).unwrap();
    let a = MemSource::new(8, true);
    let b = MemSource::new(9, true);

    cache.write(&a, pt(0, 0), 1.0).unwrap();
    cache.write(&a, pt(1, 0), 2.0).unwrap();
    cache.write(&b, pt(0, 0), 3.0).unwrap();

    cache.flush(a.as_ref()).unwrap();

    assert!(!cache.contains(8, 0).unwrap());
    assert!(!cache.contains(8, 1).unwrap());
    assert!(cache.contains(9, 0).unwrap());
    assert_eq!(a.stored(0, 0), 1.0);
    assert_eq!(a.stored(1, 0), 2.0);
    assert_eq!(b.writes.load(Ordering::SeqCst), 0);

    // Flushed blocks are gone, so reading one reloads it from the source.
    assert_eq!(cache.read(&a, pt(1, 0)).unwrap(), 2.0);
    assert_eq!(a.reads.load(Ordering::SeqCst), 3);
}

#[test]
fn failed_flush_keeps_blocks_for_retry() {
    let cache = BlockCache::new(4).unwrap();
    let src = MemSource::new(10, true);
    cache.write(&src, pt(0, 0), 5.0).unwrap();

    src.fail_writes.store(true, Ordering::SeqCst);
    assert!(cache.flush(src.as_ref()).is_err());
    assert!(cache.contains(10, 0).unwrap());

    src.fail_writes.store(false, Ordering::SeqCst);
    cache.flush(src.as_ref()).unwrap();
    assert!(!cache.contains(10, 0).unwrap());
    assert_eq!(src.stored(0, 0), 5.0);
}

#[test]
fn failed_eviction_write_back_drops_block() {
    let cache = BlockCache::new(1).unwrap();
    let src = MemSource::new(11, true);
    cache.write(&src, pt(0, 0), 5.0).unwrap();

    src.fail_writes.store(true, Ordering::SeqCst);
    cache.read(&src, pt(1, 0)).unwrap();

    assert!(!cache.contains(11, 0).unwrap());
    assert_eq!(cache.stats().unwrap().write_backs, 0);
    src.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(cache.read(&src, pt(0, 0)).unwrap(), 0.0);
}

#[test]
fn writes_to_read_only_source_are_refused() {
    let cache = BlockCache::new(2).unwrap();
    let src = MemSource::new(12, false);
    assert!(cache.write(&src, pt(0, 0), 1.0).is_err());
    assert!(cache.is_empty().unwrap());
}

#[test]
fn bad_batches_are_rejected() {
    let cache = BlockCache::new(2).unwrap();
    let src = MemSource::new(13, true);

    assert!(cache.read(&src, pt(0, BLOCK_POINTS)).is_err());
    assert!(cache.write_many(&src, &[pt(0, 0)], &[1.0, 2.0]).is_err());
    let mut out = [0f32; 1];
    assert!(cache.read_many(&src, &[], &mut out).is_err());
}

#[test]
fn get_returns_a_copy_of_the_block() {
    let cache = BlockCache::new(2).unwrap();
    let src = MemSource::new(14, true);
    cache.write(&src, pt(0, 2), 6.0).unwrap();

    let buf = cache.get(&src, 0).unwrap();
    assert_eq!(buf.samples(), BLOCK_POINTS);
    assert_eq!(buf.get_f32(2, ByteOrder::Big), 6.0);
}

#[test]
fn concurrent_batches_do_not_lose_updates() {
    let cache = Arc::new(BlockCache::new(3).unwrap());
    let src = MemSource::new(15, true);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let src = Arc::clone(&src);
            std::thread::spawn(move || {
                for block in 0..6 {
                    let points: Vec<_> = (0..2).map(|j| pt(block, t * 2 + j)).collect();
                    let values: Vec<f32> = points
                        .iter()
                        .map(|p| (p.block * 100 + p.offset) as f32)
                        .collect();
                    cache.write_many(&src, &points, &values).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    cache.flush(src.as_ref()).unwrap();
    for block in 0..6 {
        for offset in 0..BLOCK_POINTS {
            assert_eq!(src.stored(block, offset), (block * 100 + offset) as f32);
        }
    }
}
