//! Zip walker.
//!
//! Entry metadata comes from the central directory, parsed by the `zip`
//! crate. Bodies are streamed independently so that decompression state can
//! survive across filesystem callbacks: for each entry a fresh handle on the
//! archive file is positioned at the entry's data and wrapped in the
//! decryption and decompression layers. Traditional PKWARE (ZipCrypto)
//! encryption is decrypted in-process; AES and strong encryption are
//! reported as unsupported schemes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::{ArchiveSource, ArchiveSpec, EntryKind, EntryMeta, Error, Result};

use super::EntryStream;

#[cfg(test)]
use zip::unstable::write::FileOptionsExt;

const LOCAL_HEADER_LEN: usize = 30;
const LOCAL_HEADER_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const ZIPCRYPTO_HEADER_LEN: u64 = 12;
const SYMLINK_TARGET_MAX: usize = 4096;

/// Compression method ids from the zip specification, as stored in the
/// local file header.
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const METHOD_BZIP2: u16 = 12;
const METHOD_ZSTD: u16 = 93;
const METHOD_AES: u16 = 99;

/// General purpose bit flags.
const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_STRONG_ENCRYPTION: u16 = 1 << 6;

struct ZipEntry {
    name: String,
    size: u64,
    compressed_size: u64,
    crc32: u32,
    mtime: i64,
    mode: u32,
    kind: EntryKind,
    header_start: u64,
    data_start: u64,
}

pub struct ZipStream {
    realpath: PathBuf,
    password: Option<String>,
    entries: Vec<ZipEntry>,
    cursor: Option<usize>,
    body: Option<Box<dyn Read + Send>>,
}

impl ZipStream {
    pub fn open(spec: &ArchiveSpec, source: Box<dyn ArchiveSource>) -> Result<ZipStream> {
        let mut archive = zip::ZipArchive::new(source)
            .map_err(|e| Error::InvalidArchiveHeader(e.to_string()))?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive
                .by_index_raw(i)
                .map_err(|e| Error::InvalidArchiveHeader(e.to_string()))?;

            let unix_mode = file.unix_mode();
            let kind = if file.is_dir() {
                EntryKind::Directory
            } else if unix_mode
                .is_some_and(|m| m & libc::S_IFMT == libc::S_IFLNK)
            {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };

            let mode = match unix_mode {
                Some(m) if m & libc::S_IFMT != 0 => m,
                Some(m) => m | type_bits(kind),
                None => default_mode(kind),
            };

            entries.push(ZipEntry {
                name: file.name().to_string(),
                size: file.size(),
                compressed_size: file.compressed_size(),
                crc32: file.crc32(),
                mtime: datetime_to_unix(file.last_modified()),
                mode,
                kind,
                header_start: file.header_start(),
                data_start: file.data_start(),
            });
        }

        Ok(ZipStream {
            realpath: spec.realpath.clone(),
            password: spec.password.clone(),
            entries,
            cursor: None,
            body: None,
        })
    }

    pub fn next_entry(&mut self) -> Result<Option<EntryMeta>> {
        self.body = None;
        let next = match self.cursor {
            Some(i) => i + 1,
            None => 0,
        };
        if next >= self.entries.len() {
            self.cursor = Some(self.entries.len());
            return Ok(None);
        }
        self.cursor = Some(next);

        let link_target = if self.entries[next].kind == EntryKind::Symlink {
            let mut body = self.open_body(next)?;
            let bytes = EntryStream::read_body_capped(&mut body, SYMLINK_TARGET_MAX)?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            None
        };

        let entry = &self.entries[next];
        Ok(Some(EntryMeta {
            index: next as u64,
            pathname: entry.name.clone(),
            size: Some(entry.size),
            mtime: entry.mtime,
            mode: entry.mode,
            kind: entry.kind,
            link_target: link_target.filter(|t| !t.is_empty()),
        }))
    }

    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(cursor) = self.cursor.filter(|&c| c < self.entries.len()) else {
            return Ok(0);
        };
        if self.body.is_none() {
            self.body = Some(self.open_body(cursor)?);
        }
        let n = self.body.as_mut().expect("body just opened").read(buf)?;
        Ok(n)
    }

    /// Builds the owned decode chain for one entry's body: file handle →
    /// compressed-size limit → optional ZipCrypto layer → decompressor.
    fn open_body(&self, index: usize) -> Result<Box<dyn Read + Send>> {
        let entry = &self.entries[index];
        let mut file = File::open(&self.realpath)?;

        file.seek(SeekFrom::Start(entry.header_start))?;
        let mut header = [0u8; LOCAL_HEADER_LEN];
        file.read_exact(&mut header)?;
        if header[..4] != LOCAL_HEADER_MAGIC {
            return Err(Error::InvalidArchiveContents(
                "bad local file header signature".into(),
            ));
        }
        let flags = u16::from_le_bytes([header[6], header[7]]);
        let method = u16::from_le_bytes([header[8], header[9]]);
        let dos_time = u16::from_le_bytes([header[10], header[11]]);

        file.seek(SeekFrom::Start(entry.data_start))?;
        let mut raw: Box<dyn Read + Send> = Box::new(file.take(entry.compressed_size));

        if flags & FLAG_ENCRYPTED != 0 {
            if method == METHOD_AES {
                return Err(Error::PassphraseNotSupported("AES encryption"));
            }
            if flags & FLAG_STRONG_ENCRYPTION != 0 {
                return Err(Error::PassphraseNotSupported("strong encryption"));
            }
            let password = self
                .password
                .as_ref()
                .ok_or(Error::PassphraseRequired)?;
            // The check byte is the CRC high byte, but writers that stream
            // (data descriptor set) record the DOS time high byte instead,
            // and some seekable writers do the same. Accept either.
            let checks = [(entry.crc32 >> 24) as u8, (dos_time >> 8) as u8];
            raw = Box::new(ZipCryptoReader::new(raw, password.as_bytes(), &checks)?);
        }

        Ok(match method {
            METHOD_STORED => raw,
            METHOD_DEFLATED => Box::new(flate2::read::DeflateDecoder::new(raw)),
            METHOD_BZIP2 => Box::new(bzip2::read::BzDecoder::new(raw)),
            METHOD_ZSTD => Box::new(zstd::stream::read::Decoder::new(raw)?),
            other => {
                return Err(Error::InvalidArchiveContents(format!(
                    "unsupported zip compression method {other}"
                )))
            }
        })
    }
}

fn type_bits(kind: EntryKind) -> u32 {
    match kind {
        EntryKind::Directory => libc::S_IFDIR,
        EntryKind::Symlink => libc::S_IFLNK,
        _ => libc::S_IFREG,
    }
}

fn default_mode(kind: EntryKind) -> u32 {
    match kind {
        EntryKind::Directory => libc::S_IFDIR | 0o755,
        EntryKind::Symlink => libc::S_IFLNK | 0o777,
        _ => libc::S_IFREG | 0o644,
    }
}

fn datetime_to_unix(dt: zip::DateTime) -> i64 {
    chrono::NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)
        .and_then(|date| {
            date.and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)
        })
        .map(|naive| naive.and_utc().timestamp())
        .unwrap_or(0)
}

// ---- Traditional PKWARE decryption

/// CRC-32 table (polynomial 0xEDB88320), as used by the ZipCrypto key
/// schedule.
const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn crc32_step(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8)
}

struct ZipCryptoKeys {
    keys: [u32; 3],
}

impl ZipCryptoKeys {
    fn new(password: &[u8]) -> Self {
        let mut state = ZipCryptoKeys {
            keys: [0x1234_5678, 0x2345_6789, 0x3456_7890],
        };
        for &b in password {
            state.update(b);
        }
        state
    }

    fn update(&mut self, plain: u8) {
        self.keys[0] = crc32_step(self.keys[0], plain);
        self.keys[1] = self.keys[1]
            .wrapping_add(self.keys[0] & 0xff)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.keys[2] = crc32_step(self.keys[2], (self.keys[1] >> 24) as u8);
    }

    fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let tmp = (self.keys[2] | 2) as u16;
        let plain = cipher ^ (tmp.wrapping_mul(tmp ^ 1) >> 8) as u8;
        self.update(plain);
        plain
    }
}

/// Decrypting reader for traditional PKWARE encryption. Consumes and
/// verifies the 12-byte encryption header on construction.
struct ZipCryptoReader<R> {
    inner: R,
    keys: ZipCryptoKeys,
}

impl<R: Read> ZipCryptoReader<R> {
    fn new(mut inner: R, password: &[u8], checks: &[u8]) -> Result<Self> {
        let mut keys = ZipCryptoKeys::new(password);
        let mut header = [0u8; ZIPCRYPTO_HEADER_LEN as usize];
        inner.read_exact(&mut header)?;
        for b in &mut header {
            *b = keys.decrypt_byte(*b);
        }
        if !checks.contains(&header[11]) {
            return Err(Error::PassphraseIncorrect);
        }
        Ok(ZipCryptoReader { inner, keys })
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        for b in &mut buf[..n] {
            *b = self.keys.decrypt_byte(*b);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use zip::write::FileOptions;

    fn spec_for(path: &Path, password: Option<&str>) -> ArchiveSpec {
        ArchiveSpec::probe(path, password.map(|p| p.to_string())).unwrap()
    }

    fn open_stream(spec: &ArchiveSpec) -> ZipStream {
        let source = spec.open_source().unwrap();
        ZipStream::open(spec, Box::new(source)).unwrap()
    }

    fn read_all(stream: &mut ZipStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = stream.read_body(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    fn write_basic_zip(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);

        let stored: FileOptions<()> =
            FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated: FileOptions<()> =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        writer.add_directory::<_, ()>("docs", FileOptions::default()).unwrap();
        writer.start_file("docs/a.txt", stored).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.start_file("docs/b.txt", deflated).unwrap();
        writer.write_all(&b"b".repeat(2000)).unwrap();
        writer
            .add_symlink::<_, _, ()>("docs/link", "a.txt", FileOptions::default())
            .unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn walks_central_directory_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("basic.zip");
        write_basic_zip(&path);
        let spec = spec_for(&path, None);
        let mut stream = open_stream(&spec);

        let docs = stream.next_entry().unwrap().unwrap();
        assert_eq!(docs.kind, EntryKind::Directory);
        assert_eq!(docs.index, 0);

        let a = stream.next_entry().unwrap().unwrap();
        assert_eq!(a.pathname, "docs/a.txt");
        assert_eq!(a.size, Some(6));
        assert_eq!(read_all(&mut stream), b"hello\n");

        let b = stream.next_entry().unwrap().unwrap();
        assert_eq!(b.pathname, "docs/b.txt");
        assert_eq!(read_all(&mut stream), b"b".repeat(2000));

        let link = stream.next_entry().unwrap().unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.link_target.as_deref(), Some("a.txt"));

        assert!(stream.next_entry().unwrap().is_none());
    }

    #[test]
    fn body_reopens_per_entry_and_partial_reads_do_not_leak() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("basic.zip");
        write_basic_zip(&path);
        let spec = spec_for(&path, None);
        let mut stream = open_stream(&spec);

        stream.next_entry().unwrap(); // docs/
        stream.next_entry().unwrap(); // a.txt
        let mut two = [0u8; 2];
        assert_eq!(stream.read_body(&mut two).unwrap(), 2);
        assert_eq!(&two, b"he");

        let b = stream.next_entry().unwrap().unwrap();
        assert_eq!(b.pathname, "docs/b.txt");
        assert_eq!(read_all(&mut stream).len(), 2000);
    }

    fn write_encrypted_zip(path: &Path, password: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: FileOptions<()> = FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .with_deprecated_encryption(password.as_bytes());
        writer.start_file("secret.txt", options).unwrap();
        writer.write_all(b"top secret contents").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn zipcrypto_decrypts_with_the_right_password() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("enc.zip");
        write_encrypted_zip(&path, "letmein");
        let spec = spec_for(&path, Some("letmein"));
        let mut stream = open_stream(&spec);

        let meta = stream.next_entry().unwrap().unwrap();
        assert_eq!(meta.pathname, "secret.txt");
        assert_eq!(read_all(&mut stream), b"top secret contents");
    }

    #[test]
    fn zipcrypto_missing_password_is_required() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("enc.zip");
        write_encrypted_zip(&path, "letmein");
        let spec = spec_for(&path, None);
        let mut stream = open_stream(&spec);

        stream.next_entry().unwrap().unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            stream.read_body(&mut buf),
            Err(Error::PassphraseRequired)
        ));
    }

    #[test]
    fn zipcrypto_wrong_password_is_incorrect() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("enc.zip");
        write_encrypted_zip(&path, "letmein");
        let spec = spec_for(&path, Some("wrong"));
        let mut stream = open_stream(&spec);

        stream.next_entry().unwrap().unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            stream.read_body(&mut buf),
            Err(Error::PassphraseIncorrect)
        ));
    }
}
