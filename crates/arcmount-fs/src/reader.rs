//! Positioned readers.
//!
//! A [`Reader`] bundles a forward-only entry stream with its position: the
//! entry index it currently points at and the byte offset reached inside
//! that entry's decompressed contents. Positions only move forward; to go
//! backwards the caller swaps in a different reader (see the pool).

use std::sync::Arc;

use arcmount_format::redact::{redact, redacted_path};
use arcmount_format::{ArchiveSpec, EntryStream, Error, Result};
use log::error;

use crate::side_buffer::{SideBufferPool, SIDE_BUFFER_SIZE};

/// A decoder positioned at `(entry index, offset within entry)`.
pub struct Reader {
    spec: Arc<ArchiveSpec>,
    stream: EntryStream,
    index: Option<u64>,
    offset: u64,
}

impl Reader {
    /// Opens a fresh decoder over the archive, positioned before the first
    /// entry.
    pub fn new(spec: Arc<ArchiveSpec>) -> Result<Reader> {
        let source = spec.open_source()?;
        let stream = EntryStream::open(&spec, Box::new(source))?;
        Ok(Reader {
            spec,
            stream,
            index: None,
            offset: 0,
        })
    }

    /// The entry index this reader is positioned at, if it has reached one.
    pub fn index(&self) -> Option<u64> {
        self.index
    }

    /// Byte offset within the current entry's decompressed contents.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Walks forward until positioned at the `want`th entry, resetting the
    /// offset to zero on each advance. Reaching the end of the archive
    /// first means the file changed on disk after indexing.
    pub fn advance_index(&mut self, want: u64) -> Result<()> {
        while self.index.map_or(true, |i| i < want) {
            match self.stream.next_entry() {
                Ok(Some(meta)) => {
                    self.index = Some(meta.index);
                    self.offset = 0;
                }
                Ok(None) => {
                    error!("inconsistent archive {}", redacted_path(&self.spec.path));
                    return Err(Error::InconsistentArchive(
                        "archive ended before an indexed entry".into(),
                    ));
                }
                Err(e) => {
                    error!(
                        "invalid archive {}: {}",
                        redacted_path(&self.spec.path),
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Walks forward until positioned at the `want`th offset, decompressing
    /// the skipped bytes into a side buffer.
    ///
    /// The first chunk is sized so that the *last* chunk is a full buffer:
    /// advancing 260 KiB with 128 KiB buffers reads 4 + 128 + 128, not
    /// 128 + 128 + 4. The final committed window then ends exactly at
    /// `want`, maximising the chance that the upcoming read hits it.
    pub fn advance_offset(
        &mut self,
        buffers: &mut SideBufferPool,
        want: u64,
        pathname: &str,
    ) -> Result<()> {
        if want < self.offset {
            // We can't walk backwards.
            return Err(Error::InconsistentArchive(
                "backward seek on a forward-only reader".into(),
            ));
        }
        if want == self.offset {
            return Ok(());
        }

        let sb = buffers.acquire();
        while want > self.offset {
            let chunk_start = self.offset;
            let mut len = (want - chunk_start) as usize;
            if len > SIDE_BUFFER_SIZE {
                len %= SIDE_BUFFER_SIZE;
                if len == 0 {
                    len = SIDE_BUFFER_SIZE;
                }
            }

            let filled = {
                let buf = &mut buffers.buffer_mut(sb)[..len];
                self.read(buf, pathname)
            };
            match filled {
                Ok(n) if n > 0 => buffers.commit(sb, self.index.unwrap_or(0), chunk_start, n),
                Ok(_) => {
                    buffers.invalidate(sb);
                    return Err(Error::InvalidArchiveContents(
                        "entry ended before the requested offset".into(),
                    ));
                }
                Err(e) => {
                    buffers.invalidate(sb);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Copies decompressed bytes into `dst`, filling it unless the entry
    /// ends first, and advances the offset. A decoder handing back more
    /// than was asked for indicates memory-unsafe corruption, so the
    /// process aborts rather than continue.
    pub fn read(&mut self, dst: &mut [u8], pathname: &str) -> Result<usize> {
        let mut total = 0;
        while total < dst.len() {
            let n = match self.stream.read(&mut dst[total..]) {
                Ok(n) => n,
                Err(e) => {
                    error!(
                        "could not serve {} from {}: {}",
                        redact(pathname),
                        redacted_path(&self.spec.path),
                        e
                    );
                    return Err(e);
                }
            };
            if n == 0 {
                break;
            }
            if n > dst.len() - total {
                error!(
                    "too much data serving {} from {}",
                    redact(pathname),
                    redacted_path(&self.spec.path),
                );
                std::process::abort();
            }
            total += n;
        }
        self.offset += total as u64;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn fixture_tar(dir: &std::path::Path, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("fixture.tar");
        let file = std::fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().flush().unwrap();
        path
    }

    fn reader_for(path: &std::path::Path) -> Reader {
        let spec = Arc::new(ArchiveSpec::probe(path, None).unwrap());
        Reader::new(spec).unwrap()
    }

    #[test]
    fn advance_index_walks_forward_and_resets_offset() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = fixture_tar(dir.path(), &[("a", b"aaaa"), ("b", b"bbbb"), ("c", b"cccc")]);
        let mut reader = reader_for(&path);

        reader.advance_index(1).unwrap();
        assert_eq!(reader.index(), Some(1));
        assert_eq!(reader.offset(), 0);

        let mut buf = [0u8; 2];
        reader.read(&mut buf, "/b").unwrap();
        assert_eq!(&buf, b"bb");
        assert_eq!(reader.offset(), 2);

        reader.advance_index(2).unwrap();
        assert_eq!(reader.index(), Some(2));
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn advance_index_past_the_end_is_inconsistent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = fixture_tar(dir.path(), &[("a", b"aaaa")]);
        let mut reader = reader_for(&path);
        assert!(matches!(
            reader.advance_index(5),
            Err(Error::InconsistentArchive(_))
        ));
    }

    #[test]
    fn advance_offset_commits_the_skipped_window() {
        let dir = tempfile::TempDir::new().unwrap();
        let body: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let path = fixture_tar(dir.path(), &[("big", &body)]);
        let mut reader = reader_for(&path);
        let mut buffers = SideBufferPool::new();

        reader.advance_index(0).unwrap();
        reader.advance_offset(&mut buffers, 10_000, "/big").unwrap();
        assert_eq!(reader.offset(), 10_000);

        // The skipped window is now cache; a read before the current
        // offset can be served from it.
        let mut dst = [0u8; 100];
        assert!(buffers.read_into(0, 9_000, &mut dst));
        assert_eq!(dst[..], body[9_000..9_100]);

        let mut tail = [0u8; 100];
        reader.read(&mut tail, "/big").unwrap();
        assert_eq!(tail[..], body[10_000..10_100]);
    }

    #[test]
    fn advance_offset_first_chunk_is_the_remainder() {
        let dir = tempfile::TempDir::new().unwrap();
        let body = vec![9u8; SIDE_BUFFER_SIZE * 2 + 4096 + 64];
        let path = fixture_tar(dir.path(), &[("big", &body)]);
        let mut reader = reader_for(&path);
        let mut buffers = SideBufferPool::new();

        reader.advance_index(0).unwrap();
        let want = (SIDE_BUFFER_SIZE * 2 + 4096) as u64;
        reader.advance_offset(&mut buffers, want, "/big").unwrap();
        assert_eq!(reader.offset(), want);

        // The last committed chunk must span the full buffer right below
        // `want`, so a read just before it hits.
        let mut dst = [0u8; SIDE_BUFFER_SIZE];
        assert!(buffers.read_into(0, want - SIDE_BUFFER_SIZE as u64, &mut dst));
    }

    #[test]
    fn advance_offset_backwards_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = fixture_tar(dir.path(), &[("a", b"0123456789")]);
        let mut reader = reader_for(&path);
        let mut buffers = SideBufferPool::new();

        reader.advance_index(0).unwrap();
        reader.advance_offset(&mut buffers, 6, "/a").unwrap();
        assert!(reader.advance_offset(&mut buffers, 3, "/a").is_err());
    }
}
