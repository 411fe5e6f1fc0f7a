//! Raw (single compressed stream) walker.
//!
//! A raw archive has no entry list; the whole file is one compressed stream
//! presented as an implicit archive containing one file. The compression
//! format does not record the original file's name, so the entry is named
//! with the literal placeholder `data`; the tree layer substitutes the
//! archive's inner name during normalisation. The decompressed size is
//! unknown until the stream has been decoded to the end.

use std::io::Read;

use crate::detect::Filter;
use crate::filter;
use crate::{ArchiveSource, EntryKind, EntryMeta, Error, Result};

pub struct RawStream {
    decoder: Box<dyn Read + Send>,
    yielded: bool,
}

impl RawStream {
    pub fn open(filter: Filter, source: Box<dyn ArchiveSource>) -> Result<RawStream> {
        Ok(RawStream {
            decoder: filter::decoder(filter, Box::new(source))?,
            yielded: false,
        })
    }

    pub fn next_entry(&mut self) -> Result<Option<EntryMeta>> {
        if self.yielded {
            return Ok(None);
        }
        self.yielded = true;
        Ok(Some(EntryMeta {
            index: 0,
            pathname: "data".to_string(),
            size: None,
            mtime: 0,
            mode: libc::S_IFREG | 0o644,
            kind: EntryKind::File,
            link_target: None,
        }))
    }

    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.yielded {
            return Ok(0);
        }
        self.decoder
            .read(buf)
            .map_err(|e| Error::InvalidArchiveContents(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn yields_one_entry_named_data_with_unknown_size() {
        let mut enc =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"abc").unwrap();
        let compressed = enc.finish().unwrap();

        let mut stream =
            RawStream::open(Filter::Gzip, Box::new(Cursor::new(compressed))).unwrap();
        let meta = stream.next_entry().unwrap().unwrap();
        assert_eq!(meta.pathname, "data");
        assert_eq!(meta.index, 0);
        assert_eq!(meta.size, None);
        assert_eq!(meta.kind, EntryKind::File);

        let mut out = Vec::new();
        let mut buf = [0u8; 8];
        loop {
            let n = stream.read_body(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"abc");
        assert!(stream.next_entry().unwrap().is_none());
    }

    #[test]
    fn truncated_stream_reports_contents_error() {
        let mut enc =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&[7u8; 4096]).unwrap();
        let mut compressed = enc.finish().unwrap();
        compressed.truncate(compressed.len() / 2);

        let mut stream =
            RawStream::open(Filter::Gzip, Box::new(Cursor::new(compressed))).unwrap();
        stream.next_entry().unwrap().unwrap();
        let mut sink = [0u8; 512];
        let result = loop {
            match stream.read_body(&mut sink) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) => break Err(e),
            }
        };
        assert!(matches!(result, Err(Error::InvalidArchiveContents(_))));
    }
}
