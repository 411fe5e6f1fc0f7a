use std::io::Write;
use std::path::{Path, PathBuf};

use arcmount_format::{ArchiveSpec, Classification, EntryKind, EntryStream, Error, Filter};
use tempfile::TempDir;

fn write_tar_gz(dir: &Path) -> PathBuf {
    let path = dir.join("bundle.tar.gz");
    let file = std::fs::File::create(&path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (name, data) in [("dir/c", "cc"), ("dir/a", "aa"), ("dir/b", "bb")] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o640);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder
            .append_data(&mut header, name, data.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn open(spec: &ArchiveSpec) -> EntryStream {
    EntryStream::open(spec, Box::new(spec.open_source().unwrap())).unwrap()
}

fn drain(stream: &mut EntryStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 96];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn tar_gz_classifies_and_streams_in_archive_order() {
    let dir = TempDir::new().unwrap();
    let path = write_tar_gz(dir.path());
    let spec = ArchiveSpec::probe(&path, None).unwrap();
    assert_eq!(spec.classification, Classification::Tar(Some(Filter::Gzip)));
    assert_eq!(spec.inner_name, "bundle.tar");
    assert!(!spec.is_raw());

    let mut stream = open(&spec);
    let names: Vec<String> = std::iter::from_fn(|| stream.next_entry().unwrap())
        .map(|m| m.pathname)
        .collect();
    assert_eq!(names, ["dir/c", "dir/a", "dir/b"]);
}

#[test]
fn tar_gz_bodies_decode_across_entry_skips() {
    let dir = TempDir::new().unwrap();
    let path = write_tar_gz(dir.path());
    let spec = ArchiveSpec::probe(&path, None).unwrap();

    let mut stream = open(&spec);
    stream.next_entry().unwrap().unwrap(); // dir/c, body unread
    let a = stream.next_entry().unwrap().unwrap();
    assert_eq!(a.pathname, "dir/a");
    assert_eq!(drain(&mut stream), b"aa");
    let b = stream.next_entry().unwrap().unwrap();
    assert_eq!(b.pathname, "dir/b");
    assert_eq!(drain(&mut stream), b"bb");
    assert!(stream.next_entry().unwrap().is_none());
}

#[test]
fn raw_gzip_exposes_a_single_data_entry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("foo.txt.gz");
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(b"abc").unwrap();
    encoder.finish().unwrap();

    let spec = ArchiveSpec::probe(&path, None).unwrap();
    assert_eq!(spec.classification, Classification::Raw(Filter::Gzip));
    assert_eq!(spec.inner_name, "foo.txt");
    assert!(spec.is_raw());

    let mut stream = open(&spec);
    let meta = stream.next_entry().unwrap().unwrap();
    assert_eq!(meta.pathname, "data");
    assert_eq!(meta.size, None);
    assert_eq!(meta.kind, EntryKind::File);
    assert_eq!(drain(&mut stream), b"abc");
}

#[test]
fn plain_binary_file_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("noise.bin");
    std::fs::write(&path, [0x42u8; 4096]).unwrap();

    let err = ArchiveSpec::probe(&path, None).unwrap_err();
    assert!(matches!(err, Error::InvalidRawArchive));
    assert_eq!(err.exit_code(), 30);
}

#[test]
fn missing_file_cannot_be_opened() {
    let dir = TempDir::new().unwrap();
    let err = ArchiveSpec::probe(&dir.path().join("absent.tar"), None).unwrap_err();
    assert!(matches!(err, Error::CannotOpenArchive(_)));
    assert_eq!(err.exit_code(), 11);
}

#[test]
fn empty_file_mounts_as_an_empty_archive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.tar");
    std::fs::write(&path, b"").unwrap();

    let spec = ArchiveSpec::probe(&path, None).unwrap();
    assert_eq!(spec.classification, Classification::Empty);
    let mut stream = open(&spec);
    assert!(stream.next_entry().unwrap().is_none());
}
