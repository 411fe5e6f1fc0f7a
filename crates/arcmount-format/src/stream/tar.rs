//! Streaming tar walker.
//!
//! Drives the raw 512-byte block protocol directly over the (possibly
//! filtered) byte stream so the decoder state can live across filesystem
//! callbacks. Header fields are parsed through `tar::Header`, which handles
//! the octal and base-256 numeric encodings. Understood variants: v7, ustar
//! and GNU headers, GNU long name/link records, and the PAX `path`,
//! `linkpath`, `size` and `mtime` overrides. Sparse entries are reported as
//! special files and skipped by the indexer.

use std::io::{self, Read};

use tar::EntryType;

use crate::detect::Filter;
use crate::filter;
use crate::{ArchiveSource, EntryKind, EntryMeta, Error, Result};

const BLOCK_SIZE: u64 = 512;

/// Upper bound for PAX records and GNU long-name bodies.
const META_BODY_MAX: u64 = 1024 * 1024;

#[derive(Default)]
struct PaxOverrides {
    path: Option<String>,
    link_path: Option<String>,
    size: Option<u64>,
    mtime: Option<i64>,
}

pub struct TarStream {
    input: Box<dyn Read + Send>,
    next_index: u64,
    /// Unread bytes of the current entry's body.
    remaining: u64,
    /// Zero padding after the current entry's body.
    padding: u64,
    done: bool,
}

impl TarStream {
    pub fn open(filter: Option<Filter>, source: Box<dyn ArchiveSource>) -> Result<TarStream> {
        let input: Box<dyn Read + Send> = match filter {
            Some(f) => filter::decoder(f, Box::new(source))?,
            None => Box::new(source),
        };
        Ok(TarStream {
            input,
            next_index: 0,
            remaining: 0,
            padding: 0,
            done: false,
        })
    }

    pub fn next_entry(&mut self) -> Result<Option<EntryMeta>> {
        if self.done {
            return Ok(None);
        }
        self.discard(self.remaining + self.padding)?;
        self.remaining = 0;
        self.padding = 0;

        let mut long_name: Option<Vec<u8>> = None;
        let mut long_link: Option<Vec<u8>> = None;
        let mut pax = PaxOverrides::default();

        loop {
            let mut block = [0u8; BLOCK_SIZE as usize];
            if !self.read_block(&mut block)? {
                self.done = true;
                return Ok(None);
            }
            if block.iter().all(|&b| b == 0) {
                // End-of-archive marker.
                self.done = true;
                return Ok(None);
            }

            verify_checksum(&block)?;

            let mut header = tar::Header::new_old();
            header.as_mut_bytes().copy_from_slice(&block);

            let header_size = header
                .entry_size()
                .map_err(|e| Error::InvalidArchiveContents(format!("bad size field: {e}")))?;

            match header.entry_type() {
                EntryType::GNULongName => {
                    long_name = Some(self.read_meta_body(header_size)?);
                    continue;
                }
                EntryType::GNULongLink => {
                    long_link = Some(self.read_meta_body(header_size)?);
                    continue;
                }
                EntryType::XHeader => {
                    let body = self.read_meta_body(header_size)?;
                    parse_pax(&body, &mut pax);
                    continue;
                }
                EntryType::XGlobalHeader => {
                    self.discard(header_size + padding_after(header_size))?;
                    continue;
                }
                _ => {}
            }

            let name_bytes = match long_name.take() {
                Some(bytes) => bytes,
                None => header.path_bytes().into_owned(),
            };
            let mut pathname = lossy_string(&name_bytes);
            if let Some(p) = pax.path.take() {
                pathname = p;
            }

            let mut link_target = long_link
                .take()
                .map(|bytes| lossy_string(&bytes))
                .or_else(|| {
                    header
                        .link_name_bytes()
                        .map(|bytes| lossy_string(&bytes))
                });
            if let Some(p) = pax.link_path.take() {
                link_target = Some(p);
            }

            let body_size = pax.size.take().unwrap_or(header_size);
            let mtime = match pax.mtime.take() {
                Some(t) => t,
                None => header.mtime().unwrap_or(0) as i64,
            };
            let perm = header.mode().unwrap_or(0);

            let entry_type = header.entry_type();
            let mut kind = match entry_type {
                EntryType::Directory => EntryKind::Directory,
                EntryType::Symlink => EntryKind::Symlink,
                EntryType::Link => EntryKind::Hardlink,
                EntryType::Char => EntryKind::Special("character device"),
                EntryType::Block => EntryKind::Special("block device"),
                EntryType::Fifo => EntryKind::Special("fifo"),
                EntryType::GNUSparse => EntryKind::Special("sparse file"),
                _ => EntryKind::File,
            };
            // Pre-ustar archives mark directories with a trailing slash.
            if kind == EntryKind::File && pathname.ends_with('/') {
                kind = EntryKind::Directory;
            }

            let type_bits = match kind {
                EntryKind::Directory => libc::S_IFDIR,
                EntryKind::Symlink => libc::S_IFLNK,
                _ => libc::S_IFREG,
            };

            self.remaining = body_size;
            self.padding = padding_after(body_size);

            let index = self.next_index;
            self.next_index += 1;

            return Ok(Some(EntryMeta {
                index,
                pathname,
                size: Some(body_size),
                mtime,
                mode: (perm & 0o7777) | type_bits,
                kind,
                link_target: link_target.filter(|t| !t.is_empty()),
            }));
        }
    }

    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining as usize);
        let n = self.input.read(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::InvalidArchiveContents(
                "unexpected end of archive in entry body".into(),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    /// Reads one header block. Returns false on a clean end of stream.
    fn read_block(&mut self, block: &mut [u8; BLOCK_SIZE as usize]) -> Result<bool> {
        let mut total = 0;
        while total < block.len() {
            let n = self.input.read(&mut block[total..])?;
            if n == 0 {
                if total == 0 {
                    return Ok(false);
                }
                return Err(Error::InvalidArchiveContents(
                    "truncated tar header".into(),
                ));
            }
            total += n;
        }
        Ok(true)
    }

    /// Reads the body of a metadata record (PAX, GNU long name) and its
    /// padding, with a sanity cap.
    fn read_meta_body(&mut self, size: u64) -> Result<Vec<u8>> {
        if size > META_BODY_MAX {
            return Err(Error::InvalidArchiveContents(format!(
                "oversized tar metadata record ({size} bytes)"
            )));
        }
        let mut body = vec![0u8; size as usize];
        self.input.read_exact(&mut body).map_err(|_| {
            Error::InvalidArchiveContents("truncated tar metadata record".into())
        })?;
        self.discard(padding_after(size))?;
        // Trailing NUL terminators are part of the field, not the value.
        while body.last() == Some(&0) {
            body.pop();
        }
        Ok(body)
    }

    fn discard(&mut self, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let copied = io::copy(&mut (&mut self.input).take(count), &mut io::sink())?;
        if copied < count {
            return Err(Error::InvalidArchiveContents(
                "unexpected end of archive".into(),
            ));
        }
        Ok(())
    }
}

fn padding_after(size: u64) -> u64 {
    (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE
}

fn lossy_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Validates a header block against its stored checksum. Both the unsigned
/// summation and the historical signed variant are accepted.
fn verify_checksum(block: &[u8; BLOCK_SIZE as usize]) -> Result<()> {
    let stored = {
        let text: String = block[148..156]
            .iter()
            .take_while(|&&b| b != 0 && b != b' ')
            .map(|&b| b as char)
            .collect();
        u32::from_str_radix(text.trim(), 8).map_err(|_| {
            Error::InvalidArchiveContents("unparseable tar header checksum".into())
        })?
    };

    let mut unsigned: u32 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        let v = if (148..156).contains(&i) { b' ' } else { b };
        unsigned = unsigned.wrapping_add(v as u32);
        signed += v as i8 as i64;
    }

    if stored == unsigned || i64::from(stored) == signed {
        Ok(())
    } else {
        Err(Error::InvalidArchiveContents(
            "tar header checksum mismatch".into(),
        ))
    }
}

/// Applies the records of one PAX extended header.
///
/// Each record is `"<len> <key>=<value>\n"` where `len` counts the whole
/// record including the length digits and the newline. Unknown keys are
/// ignored.
fn parse_pax(body: &[u8], pax: &mut PaxOverrides) {
    let mut rest = body;
    while !rest.is_empty() {
        let Some(space) = rest.iter().position(|&b| b == b' ') else {
            return;
        };
        let Ok(len) = std::str::from_utf8(&rest[..space])
            .unwrap_or("")
            .parse::<usize>()
        else {
            return;
        };
        if len <= space + 1 || len > rest.len() {
            return;
        }
        let record = &rest[space + 1..len];
        rest = &rest[len..];

        let record = match record.last() {
            Some(b'\n') => &record[..record.len() - 1],
            _ => record,
        };
        let Some(eq) = record.iter().position(|&b| b == b'=') else {
            continue;
        };
        let key = &record[..eq];
        let value = String::from_utf8_lossy(&record[eq + 1..]).into_owned();
        match key {
            b"path" => pax.path = Some(value),
            b"linkpath" => pax.link_path = Some(value),
            b"size" => pax.size = value.parse().ok(),
            b"mtime" => pax.mtime = value.parse::<f64>().ok().map(|t| t as i64),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn open_bytes(data: Vec<u8>) -> TarStream {
        TarStream::open(None, Box::new(Cursor::new(data))).unwrap()
    }

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_500_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn walks_entries_in_order_with_indices() {
        let data = build_tar(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let mut stream = open_bytes(data);

        let a = stream.next_entry().unwrap().unwrap();
        assert_eq!(a.index, 0);
        assert_eq!(a.pathname, "a.txt");
        assert_eq!(a.size, Some(5));
        assert_eq!(a.mtime, 1_500_000_000);
        assert_eq!(a.kind, EntryKind::File);

        let b = stream.next_entry().unwrap().unwrap();
        assert_eq!(b.index, 1);
        assert_eq!(b.pathname, "b.txt");

        assert!(stream.next_entry().unwrap().is_none());
    }

    #[test]
    fn reads_bodies_and_skips_unread_remainders() {
        let data = build_tar(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let mut stream = open_bytes(data);

        stream.next_entry().unwrap().unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(stream.read_body(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"al");

        // Move on with three body bytes unread.
        let b = stream.next_entry().unwrap().unwrap();
        assert_eq!(b.pathname, "b.txt");
        let mut body = Vec::new();
        let mut chunk = [0u8; 16];
        loop {
            let n = stream.read_body(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(body, b"beta");
    }

    #[test]
    fn long_names_survive() {
        let long = "deeply/".repeat(30) + "leaf.txt";
        let data = build_tar(&[(long.as_str(), b"x")]);
        let mut stream = open_bytes(data);
        let meta = stream.next_entry().unwrap().unwrap();
        assert_eq!(meta.pathname, long);
        // The long-name record must not consume an entry index.
        assert_eq!(meta.index, 0);
    }

    #[test]
    fn symlinks_carry_their_target() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_cksum();
        builder
            .append_link(&mut header, "link", "target/file")
            .unwrap();
        let mut stream = open_bytes(builder.into_inner().unwrap());

        let meta = stream.next_entry().unwrap().unwrap();
        assert_eq!(meta.kind, EntryKind::Symlink);
        assert_eq!(meta.link_target.as_deref(), Some("target/file"));
        assert_eq!(meta.mode & libc::S_IFMT, libc::S_IFLNK);
    }

    #[test]
    fn directories_and_specials_are_classified() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();
        builder.append_data(&mut dir, "dir/", &b""[..]).unwrap();

        let mut fifo = tar::Header::new_gnu();
        fifo.set_entry_type(EntryType::Fifo);
        fifo.set_size(0);
        fifo.set_mode(0o644);
        fifo.set_cksum();
        builder.append_data(&mut fifo, "pipe", &b""[..]).unwrap();

        let mut stream = open_bytes(builder.into_inner().unwrap());
        assert_eq!(
            stream.next_entry().unwrap().unwrap().kind,
            EntryKind::Directory
        );
        assert_eq!(
            stream.next_entry().unwrap().unwrap().kind,
            EntryKind::Special("fifo")
        );
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let mut data = build_tar(&[("a.txt", b"alpha")]);
        data[150] ^= 0x55;
        let mut stream = open_bytes(data);
        assert!(stream.next_entry().is_err());
    }

    fn pax_record(key: &str, value: &str) -> Vec<u8> {
        let payload = format!("{key}={value}\n");
        // The length field counts itself; iterating on the digit count
        // settles within two rounds.
        let mut len = payload.len();
        loop {
            let total = len.to_string().len() + 1 + payload.len();
            if total == len {
                break;
            }
            len = total;
        }
        format!("{len} {payload}").into_bytes()
    }

    #[test]
    fn pax_records_parse() {
        let mut body = pax_record("path", "some/other/name.txt");
        body.extend_from_slice(&pax_record("mtime", "1234567890.5"));
        body.extend_from_slice(&pax_record("comment", "ignored"));

        let mut pax = PaxOverrides::default();
        parse_pax(&body, &mut pax);
        assert_eq!(pax.path.as_deref(), Some("some/other/name.txt"));
        assert_eq!(pax.mtime, Some(1234567890));
        assert_eq!(pax.size, None);
    }
}
