//! Side buffers.
//!
//! Fixed-size scratch buffers used as the destination when a reader skips
//! forward through an entry's decompressed bytes. Since those bytes are
//! valid output, keeping them (with their position metadata) lets later
//! reads be served by a memcpy instead of a fresh decompression walk. In
//! particular, kernel readahead can deliver logically consecutive reads in
//! swapped order even on a single-threaded mount; the side buffer filled
//! while serving the first request satisfies the second.

/// Number of side buffers.
pub const SIDE_BUFFER_COUNT: usize = 8;

/// Size of each side buffer. 128 KiB matches the largest read size the
/// kernel passes through FUSE on common configurations.
pub const SIDE_BUFFER_SIZE: usize = 128 * 1024;

/// Slot reserved as the decompressed-discard sink during the indexing pass.
/// It is written raw, never committed, so it can never produce a stale hit.
pub const SINK_BUFFER: usize = 1;

#[derive(Debug, Default)]
struct SideBufferMeta {
    /// `(entry index, offset within entry, valid length)`; `None` while the
    /// buffer holds nothing usable.
    range: Option<(u64, u64, usize)>,
    lru_priority: u64,
}

impl SideBufferMeta {
    fn contains(&self, index: u64, offset: u64, len: usize) -> bool {
        match self.range {
            Some((own_index, own_offset, own_len)) => {
                own_index == index
                    && own_offset <= offset
                    && own_len as u64 >= (offset - own_offset) + len as u64
            }
            None => false,
        }
    }
}

/// A fixed pool of side buffers with LRU metadata.
#[derive(Debug)]
pub struct SideBufferPool {
    data: Vec<Vec<u8>>,
    meta: Vec<SideBufferMeta>,
    next_lru_priority: u64,
}

impl Default for SideBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SideBufferPool {
    pub fn new() -> SideBufferPool {
        SideBufferPool {
            data: (0..SIDE_BUFFER_COUNT)
                .map(|_| vec![0u8; SIDE_BUFFER_SIZE])
                .collect(),
            meta: (0..SIDE_BUFFER_COUNT)
                .map(|_| SideBufferMeta::default())
                .collect(),
            next_lru_priority: 0,
        }
    }

    /// Returns the least recently used buffer, marked invalid so it cannot
    /// be chosen again (by either `acquire` or `lookup`) until committed.
    pub fn acquire(&mut self) -> usize {
        let mut oldest = 0;
        for i in 1..SIDE_BUFFER_COUNT {
            if self.meta[i].lru_priority < self.meta[oldest].lru_priority {
                oldest = i;
            }
        }
        self.meta[oldest].range = None;
        self.meta[oldest].lru_priority = u64::MAX;
        oldest
    }

    /// The backing bytes of buffer `i`.
    pub fn buffer_mut(&mut self, i: usize) -> &mut [u8] {
        &mut self.data[i]
    }

    /// The reserved indexing-pass discard sink.
    pub fn sink_mut(&mut self) -> &mut [u8] {
        &mut self.data[SINK_BUFFER]
    }

    /// Records that bytes `offset..offset + length` of entry `index` now sit
    /// at the start of buffer `i`.
    pub fn commit(&mut self, i: usize, index: u64, offset: u64, length: usize) {
        self.next_lru_priority += 1;
        self.meta[i].range = Some((index, offset, length));
        self.meta[i].lru_priority = self.next_lru_priority;
    }

    /// Marks buffer `i` unusable and first in line for reuse.
    pub fn invalidate(&mut self, i: usize) {
        self.meta[i].range = None;
        self.meta[i].lru_priority = 0;
    }

    /// Serves `dst` from cache if some buffer covers
    /// `[offset, offset + dst.len())` of entry `index`. Prefers the longest
    /// covering buffer and bumps its priority.
    pub fn read_into(&mut self, index: u64, offset: u64, dst: &mut [u8]) -> bool {
        let mut best: Option<(usize, usize)> = None;
        for (i, meta) in self.meta.iter().enumerate() {
            if meta.contains(index, offset, dst.len()) {
                let len = meta.range.expect("contains implies range").2;
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((i, len));
                }
            }
        }
        let Some((i, _)) = best else {
            return false;
        };
        self.next_lru_priority += 1;
        self.meta[i].lru_priority = self.next_lru_priority;
        let start = (offset - self.meta[i].range.expect("hit").1) as usize;
        dst.copy_from_slice(&self.data[i][start..start + dst.len()]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(pool: &mut SideBufferPool, i: usize, byte: u8, index: u64, offset: u64, len: usize) {
        pool.buffer_mut(i)[..len].fill(byte);
        pool.commit(i, index, offset, len);
    }

    #[test]
    fn lookup_misses_on_empty_pool() {
        let mut pool = SideBufferPool::new();
        let mut dst = [0u8; 4];
        assert!(!pool.read_into(0, 0, &mut dst));
    }

    #[test]
    fn lookup_hits_a_covering_buffer() {
        let mut pool = SideBufferPool::new();
        let i = pool.acquire();
        fill(&mut pool, i, 0xAB, 7, 100, 50);

        let mut dst = [0u8; 10];
        assert!(pool.read_into(7, 120, &mut dst));
        assert_eq!(dst, [0xAB; 10]);

        // Wrong entry, earlier offset, or overhanging end: all misses.
        assert!(!pool.read_into(8, 120, &mut dst));
        assert!(!pool.read_into(7, 95, &mut dst));
        assert!(!pool.read_into(7, 145, &mut dst));
    }

    #[test]
    fn lookup_prefers_the_longest_covering_buffer() {
        let mut pool = SideBufferPool::new();
        let a = pool.acquire();
        fill(&mut pool, a, 0x11, 1, 0, 16);
        let b = pool.acquire();
        fill(&mut pool, b, 0x22, 1, 0, 64);

        let mut dst = [0u8; 8];
        assert!(pool.read_into(1, 4, &mut dst));
        assert_eq!(dst, [0x22; 8]);
    }

    #[test]
    fn acquire_evicts_least_recently_used() {
        let mut pool = SideBufferPool::new();
        let mut slots = Vec::new();
        for n in 0..SIDE_BUFFER_COUNT {
            let i = pool.acquire();
            fill(&mut pool, i, n as u8, n as u64, 0, 8);
            slots.push(i);
        }
        // Touch slot 0's contents so slot 1 becomes the oldest.
        let mut dst = [0u8; 8];
        assert!(pool.read_into(0, 0, &mut dst));

        let victim = pool.acquire();
        assert_eq!(victim, slots[1]);

        // The victim is invalid until committed, even for its old range.
        assert!(!pool.read_into(1, 0, &mut dst));
        // And it is not picked again by the next acquire.
        assert_ne!(pool.acquire(), victim);
    }

    #[test]
    fn invalidate_clears_and_prioritises_reuse() {
        let mut pool = SideBufferPool::new();
        for n in 0..SIDE_BUFFER_COUNT {
            let i = pool.acquire();
            fill(&mut pool, i, 0, n as u64 + 10, 0, 8);
        }
        let i = pool.acquire();
        fill(&mut pool, i, 0, 99, 0, 8);
        pool.invalidate(i);

        let mut dst = [0u8; 8];
        assert!(!pool.read_into(99, 0, &mut dst));
        assert_eq!(pool.acquire(), i);
    }

    #[test]
    fn overlapping_ranges_are_permitted() {
        let mut pool = SideBufferPool::new();
        let a = pool.acquire();
        fill(&mut pool, a, 0x11, 5, 0, 32);
        let b = pool.acquire();
        fill(&mut pool, b, 0x22, 5, 16, 32);

        // Only the second buffer covers 16..48 fully.
        let mut dst = [0u8; 32];
        assert!(pool.read_into(5, 16, &mut dst));
        assert_eq!(dst, [0x22; 32]);
    }
}
