//! Fixed-capacity LRU cache of decompressed blocks with buffer recycling.
//!
//! Lookups touch one block almost every time and the same hot blocks over
//! and over, so the cache keeps the last `capacity` decompressed blocks and
//! recycles their buffers through a free list instead of reallocating a
//! block-sized `Vec` per miss. Eviction order is exact LRU: a hash map from
//! block index to a slot in a slab, with the slots chained into an intrusive
//! doubly-linked recency list.
//!
//! One `Mutex` guards the map, the list and the free list. It is never held
//! across [`BlockReader::read_block`], so concurrent misses for different
//! blocks decompress in parallel. Two threads racing on the *same* block may
//! both decode it; the loser returns its buffer to the free list and adopts
//! the winner's entry. Read errors are returned to the caller and never
//! cached, so a later call retries.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Decompresses blocks by index into caller-provided buffers.
///
/// `read_block` fills `buf` from offset 0 and returns the byte count.
/// `Ok(0)` means "no usable block at this index": the entry is structurally
/// implausible (a stale or spurious index row) rather than failed. The cache
/// stores such blocks as empty, which makes the row inert without breaking
/// streams that span it. Real decode failures are errors.
pub trait BlockReader: Send + Sync {
    fn read_block(&self, block_index: usize, buf: &mut [u8]) -> io::Result<usize>;

    /// Number of known blocks; indexes at or past this are out of range.
    fn block_count(&self) -> usize;

    /// Maximum decompressed size of any block, and the size of every buffer
    /// handed to `read_block`.
    fn block_size(&self) -> usize;
}

/// One cached decompressed block.
///
/// The buffer is always `block_size` long; `len` marks the valid prefix.
/// Blocks are immutable once cached and shared via `Arc`, so an evicted
/// block stays readable for anyone still holding it.
#[derive(Debug)]
pub struct Block {
    index: usize,
    data: Vec<u8>,
    len: usize,
}

impl Block {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The decompressed bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot {
    key: usize,
    block: Arc<Block>,
    prev: usize,
    next: usize,
}

/// Map, recency list and free list, all behind the one cache mutex.
#[derive(Debug)]
struct LruState {
    /// block index → slot position in `slots`.
    map: HashMap<usize, usize>,
    slots: Vec<Slot>,
    /// Most recently used slot, or `NIL` when empty.
    head: usize,
    /// Least recently used slot, or `NIL` when empty.
    tail: usize,
    /// Full-size buffers recovered from evicted blocks.
    free_buffers: Vec<Vec<u8>>,
}

impl LruState {
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            NIL => self.head = next,
            p => self.slots[p].next = next,
        }
        match next {
            NIL => self.tail = prev,
            n => self.slots[n].prev = prev,
        }
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = NIL;
        self.slots[slot].next = self.head;
        match self.head {
            NIL => self.tail = slot,
            h => self.slots[h].prev = slot,
        }
        self.head = slot;
    }

    fn touch(&mut self, slot: usize) {
        if self.head != slot {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    /// Take a recycled buffer, or make a fresh full-size one.
    fn take_buffer(&mut self, block_size: usize) -> Vec<u8> {
        self.free_buffers
            .pop()
            .unwrap_or_else(|| vec![0u8; block_size])
    }

    /// Insert `block` at the front, evicting the tail first when full.
    /// The evicted block's buffer is recycled if nobody else holds it.
    fn insert(&mut self, capacity: usize, block: Arc<Block>) -> usize {
        let key = block.index;
        let slot = if self.map.len() == capacity {
            let victim = self.tail;
            self.unlink(victim);
            self.map.remove(&self.slots[victim].key);
            let evicted = std::mem::replace(
                &mut self.slots[victim],
                Slot {
                    key,
                    block,
                    prev: NIL,
                    next: NIL,
                },
            );
            if let Ok(owned) = Arc::try_unwrap(evicted.block) {
                self.free_buffers.push(owned.data);
            }
            victim
        } else {
            self.slots.push(Slot {
                key,
                block,
                prev: NIL,
                next: NIL,
            });
            self.slots.len() - 1
        };
        self.map.insert(key, slot);
        self.push_front(slot);
        slot
    }
}

/// Fixed-capacity LRU over a [`BlockReader`].
#[derive(Debug)]
pub struct BlockCache<R> {
    reader: R,
    capacity: usize,
    state: Mutex<LruState>,
}

impl<R: BlockReader> BlockCache<R> {
    /// A cache holding up to `capacity` decompressed blocks (at least one).
    pub fn new(reader: R, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(
            capacity,
            blocks = reader.block_count(),
            block_size = reader.block_size(),
            "block cache ready"
        );
        Self {
            reader,
            capacity,
            state: Mutex::new(LruState {
                map: HashMap::with_capacity(capacity),
                slots: Vec::with_capacity(capacity),
                head: NIL,
                tail: NIL,
                free_buffers: Vec::new(),
            }),
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// The block at `block_index`, decompressing on a miss. `None` when the
    /// index is out of range.
    pub fn block(&self, block_index: usize) -> io::Result<Option<Arc<Block>>> {
        if block_index >= self.reader.block_count() {
            return Ok(None);
        }
        let mut buf = {
            let mut state = self.state.lock().unwrap();
            if let Some(&slot) = state.map.get(&block_index) {
                state.touch(slot);
                return Ok(Some(Arc::clone(&state.slots[slot].block)));
            }
            state.take_buffer(self.reader.block_size())
        };

        // Decode outside the lock; a concurrent call for the same block may
        // beat us to the insert.
        let len = match self.reader.read_block(block_index, &mut buf) {
            Ok(len) => len,
            Err(e) => {
                self.state.lock().unwrap().free_buffers.push(buf);
                return Err(e);
            }
        };

        let mut state = self.state.lock().unwrap();
        if let Some(&slot) = state.map.get(&block_index) {
            state.free_buffers.push(buf);
            state.touch(slot);
            return Ok(Some(Arc::clone(&state.slots[slot].block)));
        }
        let block = Arc::new(Block {
            index: block_index,
            data: buf,
            len,
        });
        state.insert(self.capacity, Arc::clone(&block));
        Ok(Some(block))
    }

    /// A sequential reader over the decompressed byte stream, starting
    /// `start_byte_offset` bytes into block `block_index` and continuing
    /// through the following blocks until the last one is exhausted.
    pub fn stream_from(&self, block_index: usize, start_byte_offset: usize) -> BlockStream<'_, R> {
        BlockStream {
            cache: self,
            block_index,
            pos: start_byte_offset,
            done: false,
        }
    }
}

/// [`Read`] over consecutive decompressed blocks.
///
/// Each `read` call pulls the current block through the cache and copies out
/// of it, so the stream never pins a block between calls. Empty blocks (inert
/// index rows) are skipped.
pub struct BlockStream<'a, R> {
    cache: &'a BlockCache<R>,
    block_index: usize,
    pos: usize,
    done: bool,
}

impl<R: BlockReader> Read for BlockStream<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.done || out.is_empty() {
            return Ok(0);
        }
        loop {
            let Some(block) = self.cache.block(self.block_index)? else {
                self.done = true;
                return Ok(0);
            };
            let data = block.data();
            if self.pos >= data.len() {
                self.block_index += 1;
                self.pos = 0;
                continue;
            }
            let n = (data.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&data[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Blocks are `reads[i]` repeated to a fixed length; counts every
    /// `read_block` call.
    struct StubReader {
        blocks: Vec<Option<Vec<u8>>>,
        block_size: usize,
        calls: AtomicUsize,
        fail_once_at: Option<usize>,
        failed: AtomicUsize,
    }

    impl StubReader {
        fn new(blocks: Vec<Option<Vec<u8>>>, block_size: usize) -> Self {
            Self {
                blocks,
                block_size,
                calls: AtomicUsize::new(0),
                fail_once_at: None,
                failed: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl BlockReader for StubReader {
        fn read_block(&self, block_index: usize, buf: &mut [u8]) -> io::Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_once_at == Some(block_index)
                && self.failed.fetch_add(1, Ordering::SeqCst) == 0
            {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "boom"));
            }
            match &self.blocks[block_index] {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                None => Ok(0),
            }
        }

        fn block_count(&self) -> usize {
            self.blocks.len()
        }

        fn block_size(&self) -> usize {
            self.block_size
        }
    }

    fn cache_of(blocks: Vec<Option<Vec<u8>>>, capacity: usize) -> BlockCache<StubReader> {
        BlockCache::new(StubReader::new(blocks, 16), capacity)
    }

    #[test]
    fn hit_serves_cached_block_without_rereading() {
        let cache = cache_of(vec![Some(b"alpha".to_vec())], 2);
        for _ in 0..3 {
            let block = cache.block(0).unwrap().unwrap();
            assert_eq!(block.data(), b"alpha");
            assert_eq!(block.index(), 0);
        }
        assert_eq!(cache.reader().calls(), 1);
    }

    #[test]
    fn out_of_range_is_none() {
        let cache = cache_of(vec![Some(b"a".to_vec())], 2);
        assert!(cache.block(1).unwrap().is_none());
        assert!(cache.block(usize::MAX - 1).unwrap().is_none());
        assert_eq!(cache.reader().calls(), 0);
    }

    #[test]
    fn capacity_one_alternation_decodes_once_per_transition() {
        let cache = cache_of(vec![Some(b"a".to_vec()), Some(b"b".to_vec())], 1);
        for &index in &[0usize, 1, 0, 1, 0] {
            let block = cache.block(index).unwrap().unwrap();
            assert_eq!(block.index(), index);
        }
        // One decode per access: every switch is a miss under capacity 1.
        assert_eq!(cache.reader().calls(), 5);
        // Steady state holds one block and at most one spare buffer.
        let state = cache.state.lock().unwrap();
        assert_eq!(state.map.len(), 1);
        assert_eq!(state.free_buffers.len(), 1);
    }

    #[test]
    fn repeats_within_capacity_never_redecode() {
        let cache = cache_of(
            vec![Some(b"a".to_vec()), Some(b"b".to_vec()), Some(b"c".to_vec())],
            2,
        );
        for &index in &[0usize, 1, 0, 1, 1, 0] {
            cache.block(index).unwrap().unwrap();
        }
        assert_eq!(cache.reader().calls(), 2);
    }

    #[test]
    fn eviction_is_least_recently_used() {
        let cache = cache_of(
            vec![Some(b"a".to_vec()), Some(b"b".to_vec()), Some(b"c".to_vec())],
            2,
        );
        cache.block(0).unwrap();
        cache.block(1).unwrap();
        cache.block(0).unwrap(); // 0 now more recent than 1
        cache.block(2).unwrap(); // evicts 1
        assert_eq!(cache.reader().calls(), 3);
        cache.block(0).unwrap(); // still cached
        assert_eq!(cache.reader().calls(), 3);
        cache.block(1).unwrap(); // was evicted, decode again
        assert_eq!(cache.reader().calls(), 4);
    }

    #[test]
    fn evicted_buffer_is_recycled_not_reallocated() {
        let cache = cache_of(vec![Some(b"a".to_vec()), Some(b"b".to_vec())], 1);
        cache.block(0).unwrap();
        assert_eq!(cache.state.lock().unwrap().free_buffers.len(), 0);
        cache.block(1).unwrap();
        // Block 0's Arc was dropped above, so eviction reclaimed its buffer
        // and the miss for block 1 consumed it again.
        let state = cache.state.lock().unwrap();
        assert_eq!(state.free_buffers.len(), 1);
        assert_eq!(state.slots.len(), 1);
    }

    #[test]
    fn buffer_still_borrowed_is_dropped_not_recycled() {
        let cache = cache_of(vec![Some(b"a".to_vec()), Some(b"b".to_vec())], 1);
        let held = cache.block(0).unwrap().unwrap();
        cache.block(1).unwrap();
        // The evicted block is still held here, so its buffer could not be
        // reclaimed; the miss allocated a fresh one.
        assert_eq!(cache.state.lock().unwrap().free_buffers.len(), 0);
        assert_eq!(held.data(), b"a");
    }

    #[test]
    fn read_error_propagates_and_is_not_cached() {
        let mut reader = StubReader::new(vec![Some(b"ok".to_vec())], 16);
        reader.fail_once_at = Some(0);
        let cache = BlockCache::new(reader, 1);

        let err = cache.block(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        // The failed attempt's buffer went back to the free list.
        assert_eq!(cache.state.lock().unwrap().free_buffers.len(), 1);

        let block = cache.block(0).unwrap().unwrap();
        assert_eq!(block.data(), b"ok");
        assert_eq!(cache.reader().calls(), 2);
    }

    #[test]
    fn empty_block_is_cached_and_inert() {
        let cache = cache_of(vec![Some(b"aa".to_vec()), None, Some(b"cc".to_vec())], 3);
        let empty = cache.block(1).unwrap().unwrap();
        assert!(empty.is_empty());
        cache.block(1).unwrap();
        assert_eq!(cache.reader().calls(), 1);

        // Streams skip the empty block as if it were not there.
        let mut all = Vec::new();
        cache.stream_from(0, 0).read_to_end(&mut all).unwrap();
        assert_eq!(all, b"aacc");
    }

    #[test]
    fn stream_spans_blocks_from_an_offset() {
        let cache = cache_of(vec![Some(b"abc".to_vec()), Some(b"def".to_vec())], 2);
        let mut out = Vec::new();
        cache.stream_from(0, 1).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"bcdef");

        out.clear();
        cache.stream_from(1, 2).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"f");
    }

    #[test]
    fn stream_past_last_block_is_empty() {
        let cache = cache_of(vec![Some(b"abc".to_vec())], 2);
        let mut out = Vec::new();
        cache.stream_from(7, 0).read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn concurrent_readers_see_consistent_blocks() {
        let blocks: Vec<Option<Vec<u8>>> = (0..8u8)
            .map(|i| Some(vec![b'a' + i; (i as usize % 3) + 1]))
            .collect();
        let expected: Vec<Vec<u8>> = blocks.iter().map(|b| b.clone().unwrap()).collect();
        let cache = cache_of(blocks, 2);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let cache = &cache;
                let expected = &expected;
                scope.spawn(move || {
                    for round in 0..200usize {
                        let index = (round * 3 + t) % expected.len();
                        let block = cache.block(index).unwrap().unwrap();
                        assert_eq!(block.data(), expected[index].as_slice());
                    }
                });
            }
        });

        // Duplicate decodes on races are fine; lost buffers are not.
        let state = cache.state.lock().unwrap();
        assert_eq!(state.map.len(), 2);
        assert!(state.free_buffers.len() <= 4 + 2);
    }
}
