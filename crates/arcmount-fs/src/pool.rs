//! Reader pool.
//!
//! The decoders are streaming, not random access: a reader can serve any
//! entry index at or after its current one, but never an earlier one. If
//! files are opened at entry indices 60, 40 and then 50, a naive
//! open-decode-free cycle walks 60 + 40 + 50 = 150 headers; keeping warm
//! readers in an LRU cache walks 60 + 40 + 10 = 110, because the reader
//! parked at 40 can be advanced to 50. When every file of an archive is
//! read in natural order the total work becomes linear instead of
//! quadratic.
//!
//! Eligibility is purely by numeric entry index, not pathname.

use std::sync::Arc;

use arcmount_format::{ArchiveSpec, Result};

use crate::reader::Reader;

/// Number of warm readers kept across file opens.
pub const SAVED_READER_COUNT: usize = 8;

struct Slot {
    reader: Option<Reader>,
    lru_priority: u64,
}

/// An LRU cache of warm readers, selected by closest-position-below.
pub struct ReaderPool {
    spec: Arc<ArchiveSpec>,
    slots: Vec<Slot>,
    next_lru_priority: u64,
}

impl ReaderPool {
    pub fn new(spec: Arc<ArchiveSpec>) -> ReaderPool {
        ReaderPool {
            spec,
            slots: (0..SAVED_READER_COUNT)
                .map(|_| Slot {
                    reader: None,
                    lru_priority: 0,
                })
                .collect(),
            next_lru_priority: 0,
        }
    }

    /// Returns a reader positioned at the start of the `want`th entry.
    ///
    /// Among saved readers whose `(index, offset)` is at most `(want, 0)`,
    /// the closest one from below is taken and advanced; with none
    /// eligible a fresh decoder is constructed. A reader that fails to
    /// advance is dropped, not returned to the pool.
    pub fn acquire(&mut self, want: u64) -> Result<Reader> {
        let mut best: Option<(usize, (u64, u64))> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(reader) = &slot.reader else {
                continue;
            };
            let Some(index) = reader.index() else {
                continue;
            };
            let position = (index, reader.offset());
            if position <= (want, 0) && best.map_or(true, |(_, b)| position > b) {
                best = Some((i, position));
            }
        }

        let mut reader = match best {
            Some((i, _)) => {
                self.slots[i].lru_priority = 0;
                self.slots[i].reader.take().expect("selected slot is full")
            }
            None => Reader::new(self.spec.clone())?,
        };
        reader.advance_index(want)?;
        Ok(reader)
    }

    /// Stores `reader` in the least recently used slot, evicting whatever
    /// is there.
    pub fn release(&mut self, reader: Reader) {
        let mut oldest = 0;
        for i in 1..self.slots.len() {
            if self.slots[i].lru_priority < self.slots[oldest].lru_priority {
                oldest = i;
            }
        }
        self.next_lru_priority += 1;
        self.slots[oldest] = Slot {
            reader: Some(reader),
            lru_priority: self.next_lru_priority,
        };
    }

    /// Number of occupied slots.
    pub fn saved_count(&self) -> usize {
        self.slots.iter().filter(|s| s.reader.is_some()).count()
    }
}
