//! Forward-only entry streams.
//!
//! An [`EntryStream`] walks an archive's entries in header order and streams
//! the decompressed body of the current entry. It can only move forward:
//! once `next_entry` advances past an entry, the only way back is a fresh
//! stream. The mount engine's reader pool amortises that cost.

mod raw;
mod tar;
mod zip;

use std::io::Read;

pub use raw::RawStream;
pub use tar::TarStream;
pub use zip::ZipStream;

use crate::detect::Classification;
use crate::{ArchiveSource, ArchiveSpec, EntryMeta, Result};

/// A forward-only decoder over an archive, positioned at one entry.
pub enum EntryStream {
    /// Zero-length input; yields no entries.
    Empty,
    /// Streaming tar walker, optionally behind a decompression filter.
    Tar(TarStream),
    /// Zip central-directory walker with per-entry body streams.
    Zip(ZipStream),
    /// Single synthetic entry over a compressed stream.
    Raw(RawStream),
}

impl EntryStream {
    /// Opens a stream over `source` according to the spec's classification.
    pub fn open(spec: &ArchiveSpec, source: Box<dyn ArchiveSource>) -> Result<EntryStream> {
        Ok(match spec.classification {
            Classification::Empty => EntryStream::Empty,
            Classification::Tar(filter) => EntryStream::Tar(TarStream::open(filter, source)?),
            Classification::Zip => EntryStream::Zip(ZipStream::open(spec, source)?),
            Classification::Raw(filter) => EntryStream::Raw(RawStream::open(filter, source)?),
        })
    }

    /// Advances to the next entry and returns its metadata, or `None` at the
    /// end of the archive. Any unread remainder of the current entry's body
    /// is skipped.
    pub fn next_entry(&mut self) -> Result<Option<EntryMeta>> {
        match self {
            EntryStream::Empty => Ok(None),
            EntryStream::Tar(s) => s.next_entry(),
            EntryStream::Zip(s) => s.next_entry(),
            EntryStream::Raw(s) => s.next_entry(),
        }
    }

    /// Reads from the current entry's decompressed body. Returns 0 at the
    /// end of the entry. May return fewer bytes than requested.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            EntryStream::Empty => Ok(0),
            EntryStream::Tar(s) => s.read_body(buf),
            EntryStream::Zip(s) => s.read_body(buf),
            EntryStream::Raw(s) => s.read_body(buf),
        }
    }

    /// Reads the rest of the current entry's body into `out`, capped at
    /// `limit` bytes. Used for symlink targets.
    pub(crate) fn read_body_capped(
        reader: &mut dyn Read,
        limit: usize,
    ) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 512];
        while out.len() < limit {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let take = n.min(limit - out.len());
            out.extend_from_slice(&buf[..take]);
            if take < n {
                break;
            }
        }
        Ok(out)
    }
}
