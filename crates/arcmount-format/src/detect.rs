//! Archive classification by file signature.
//!
//! The mount engine needs to know, before the indexing pass starts, whether
//! the file is a cooked container (tar, zip), a raw compressed stream (gz,
//! bz2, xz, zst) or neither. Detection goes by magic bytes, never by file
//! extension: for a compressed input the outer filter is sniffed first and
//! the decompressed head is then probed for a tar signature, so `foo.tar.gz`
//! classifies as a cooked tar while `foo.txt.gz` classifies as raw.

use std::io::{Read, Seek, SeekFrom};

use crate::{Error, Result};

/// A stream compression filter wrapped around the archive proper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// gzip (RFC 1952), possibly multi-member.
    Gzip,
    /// bzip2, possibly multi-stream.
    Bzip2,
    /// XZ container, possibly multi-stream.
    Xz,
    /// Zstandard frames.
    Zstd,
}

impl Filter {
    /// Human-readable filter name for log messages.
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Gzip => "gzip",
            Filter::Bzip2 => "bzip2",
            Filter::Xz => "xz",
            Filter::Zstd => "zstd",
        }
    }
}

/// What kind of archive the probe decided the file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A zero-length file. Mounts as a root-only filesystem.
    Empty,
    /// A zip container.
    Zip,
    /// A tar stream, optionally behind a compression filter.
    Tar(Option<Filter>),
    /// A single compressed stream with no entry list. The sole entry is
    /// synthesised. The filter is always a real one: a file with no
    /// recognised filter is refused rather than mounted as arbitrary bytes.
    Raw(Filter),
}

impl Classification {
    /// True for raw (single synthetic entry) archives.
    pub fn is_raw(&self) -> bool {
        matches!(self, Classification::Raw(_))
    }
}

const TAR_BLOCK_SIZE: usize = 512;

fn sniff_filter(prefix: &[u8]) -> Option<Filter> {
    if prefix.starts_with(&[0x1f, 0x8b]) {
        Some(Filter::Gzip)
    } else if prefix.len() >= 4
        && prefix.starts_with(b"BZh")
        && prefix[3].is_ascii_digit()
        && prefix[3] != b'0'
    {
        Some(Filter::Bzip2)
    } else if prefix.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
        Some(Filter::Xz)
    } else if prefix.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        Some(Filter::Zstd)
    } else {
        None
    }
}

fn is_zip(prefix: &[u8]) -> bool {
    prefix.starts_with(b"PK\x03\x04")
        || prefix.starts_with(b"PK\x05\x06")
        || prefix.starts_with(b"PK\x07\x08")
}

/// Validates the stored checksum of a tar header block. Covers pre-POSIX
/// archives whose headers carry no `ustar` magic. Both the unsigned and the
/// historical signed summation are accepted.
fn tar_checksum_ok(block: &[u8]) -> bool {
    if block.len() < TAR_BLOCK_SIZE {
        return false;
    }

    let stored = {
        let field = &block[148..156];
        let text: String = field
            .iter()
            .take_while(|&&b| b != 0 && b != b' ')
            .map(|&b| b as char)
            .collect();
        match u32::from_str_radix(text.trim(), 8) {
            Ok(v) => v,
            Err(_) => return false,
        }
    };

    let mut unsigned: u32 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in block[..TAR_BLOCK_SIZE].iter().enumerate() {
        let v = if (148..156).contains(&i) { b' ' } else { b };
        unsigned = unsigned.wrapping_add(v as u32);
        signed += v as i8 as i64;
    }

    stored == unsigned || i64::from(stored) == signed
}

/// Whether a decompressed head looks like the start of a tar stream.
///
/// An all-zero first block is accepted too: it is the end-of-archive marker
/// of an empty tar.
fn looks_like_tar(head: &[u8]) -> bool {
    if head.len() < TAR_BLOCK_SIZE {
        return false;
    }
    if head[..TAR_BLOCK_SIZE].iter().all(|&b| b == 0) {
        return true;
    }
    if &head[257..262] == b"ustar" {
        return true;
    }
    tar_checksum_ok(head)
}

/// Classifies the archive behind `source`.
///
/// Reads the head of the file (and, for filtered input, the head of the
/// decompressed stream) and rewinds `source` to the start before returning.
/// A file that is neither a recognised container nor a compressed stream is
/// refused with [`Error::InvalidRawArchive`]: we do not mount arbitrary
/// binary data. Recognised-but-undecodable families (7z, rar) are refused
/// with [`Error::UnsupportedFormat`].
pub fn classify<S: Read + Seek + Send>(source: &mut S) -> Result<Classification> {
    source.seek(SeekFrom::Start(0))?;
    let mut prefix = [0u8; TAR_BLOCK_SIZE];
    let got = read_head(source, &mut prefix)?;
    let prefix = &prefix[..got];

    if prefix.is_empty() {
        return Ok(Classification::Empty);
    }

    if is_zip(prefix) {
        source.seek(SeekFrom::Start(0))?;
        return Ok(Classification::Zip);
    }

    if let Some(filter) = sniff_filter(prefix) {
        source.seek(SeekFrom::Start(0))?;
        let inner_is_tar = {
            let mut head = [0u8; TAR_BLOCK_SIZE];
            match crate::filter::decoder(filter, Box::new(source.by_ref())) {
                // A corrupt stream still classifies by its magic; the
                // failure surfaces later with a contents error.
                Ok(mut decoder) => match read_head(&mut decoder, &mut head) {
                    Ok(n) => looks_like_tar(&head[..n]),
                    Err(_) => false,
                },
                Err(_) => false,
            }
        };
        source.seek(SeekFrom::Start(0))?;
        return Ok(if inner_is_tar {
            Classification::Tar(Some(filter))
        } else {
            Classification::Raw(filter)
        });
    }

    if looks_like_tar(prefix) {
        source.seek(SeekFrom::Start(0))?;
        return Ok(Classification::Tar(None));
    }

    if prefix.starts_with(&[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c]) {
        return Err(Error::UnsupportedFormat("7z"));
    }
    if prefix.starts_with(b"Rar!") {
        return Err(Error::UnsupportedFormat("rar"));
    }

    Err(Error::InvalidRawArchive)
}

/// Reads up to `buf.len()` bytes, tolerating short reads and EOF.
fn read_head<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
