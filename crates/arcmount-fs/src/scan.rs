//! The indexing pass.
//!
//! Mounting starts with a single walk over the whole archive that builds
//! the directory tree. The walk is split in two stages so the process can
//! report a meaningful exit code before entering the event loop:
//!
//! - [`probe`] resolves and classifies the file, skips leading directory
//!   entries, and checks that the first file body is actually decodable,
//!   which is where a missing or wrong passphrase surfaces. Passphrase
//!   prompting happens here, at most once.
//! - [`Scanner::finish`] resumes from the entry the probe stopped at and
//!   inserts every usable entry into the tree, measuring sizes the format
//!   does not record by decompressing into the discard sink.
//!
//! The pass fails atomically: no partial tree is ever exposed to a mount.

use std::sync::Arc;

use arcmount_format::redact::{redact, redacted_path};
use arcmount_format::{
    password, ArchiveSpec, CountingReader, EntryKind, EntryMeta, EntryStream, Error, Progress,
    Result,
};
use log::{error, warn};

use crate::side_buffer::SideBufferPool;
use crate::tree::{normalize_pathname, Tree};

/// Configuration for the indexing pass.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// The archive file, as named by the user.
    pub archive: std::path::PathBuf,
    /// A passphrase supplied up front, bypassing the prompt.
    pub password: Option<String>,
    /// Whether an encrypted archive may prompt on standard input.
    pub prompt_for_password: bool,
    /// Suppresses progress reporting.
    pub quiet: bool,
}

/// Everything the serving phase needs: the finished tree, the archive
/// description the readers decode from, and the side buffers that were
/// already warmed up as the indexing scratch space.
#[derive(Debug)]
pub struct Mount {
    pub spec: Arc<ArchiveSpec>,
    pub tree: Tree,
    pub buffers: SideBufferPool,
}

/// An archive that passed the probe, ready for the tree-building stage.
pub struct Scanner {
    spec: ArchiveSpec,
    stream: EntryStream,
    first: Option<EntryMeta>,
    buffers: SideBufferPool,
}

/// Stage 1: classify the archive and verify the first entry is decodable.
pub fn probe(options: &ScanOptions) -> Result<Scanner> {
    let mut spec =
        ArchiveSpec::probe(&options.archive, options.password.clone()).map_err(|e| {
            error!("{}: {}", redacted_path(&options.archive), e);
            e
        })?;
    let mut prompted = false;
    loop {
        match probe_stream(&spec, options.quiet) {
            Ok((stream, first, buffers)) => {
                return Ok(Scanner {
                    spec,
                    stream,
                    first,
                    buffers,
                })
            }
            Err(Error::PassphraseRequired) if options.prompt_for_password && !prompted => {
                prompted = true;
                match password::read_passphrase_from_stdin() {
                    Some(passphrase) => spec.password = Some(passphrase),
                    None => return Err(Error::PassphraseRequired),
                }
            }
            Err(e) => {
                error!("{}: {}", redacted_path(&spec.path), e);
                return Err(e);
            }
        }
    }
}

fn probe_stream(
    spec: &ArchiveSpec,
    quiet: bool,
) -> Result<(EntryStream, Option<EntryMeta>, SideBufferPool)> {
    let mut buffers = SideBufferPool::new();
    let file = spec.open_source()?;
    let source = CountingReader::new(file, Progress::new(spec.file_size, quiet));
    let mut stream = EntryStream::open(spec, Box::new(source))?;

    // Skip leading directory entries; they are synthesised from leaf
    // pathnames, never read from headers.
    let first = loop {
        match stream.next_entry().map_err(header_error)? {
            None => break None,
            Some(meta) if meta.kind == EntryKind::Directory => continue,
            Some(meta) => break Some(meta),
        }
    };

    // Reading one byte of the first body reveals whether a passphrase is
    // needed before the mount point is even created. Raw archives skip
    // this: their classification already guarantees a decodable filter.
    if first.is_some() && !spec.is_raw() {
        let sink = buffers.sink_mut();
        stream.read(&mut sink[..1]).map_err(contents_error)?;
    }

    Ok((stream, first, buffers))
}

/// Failures while walking headers in the probe map to the header exit code.
fn header_error(e: Error) -> Error {
    match e {
        Error::InvalidArchiveContents(m) => Error::InvalidArchiveHeader(m),
        Error::Io(io) => Error::InvalidArchiveHeader(io.to_string()),
        other => other,
    }
}

/// Failures while reading a body in the probe map to the contents exit
/// code, except the passphrase classifications, which stay what they are.
fn contents_error(e: Error) -> Error {
    match e {
        Error::PassphraseRequired
        | Error::PassphraseIncorrect
        | Error::PassphraseNotSupported(_) => e,
        Error::Io(io) => Error::InvalidArchiveContents(io.to_string()),
        other => other,
    }
}

impl Scanner {
    /// Stage 2: build the tree, resuming from the entry the probe stopped
    /// at without re-reading it.
    pub fn finish(mut self) -> Result<Mount> {
        let mut tree = Tree::new();
        let mut current = self.first.take();
        while let Some(meta) = current {
            self.insert(&mut tree, meta)?;
            current = self.stream.next_entry()?;
        }

        let Scanner {
            spec,
            stream,
            buffers,
            ..
        } = self;
        // Closes the indexing file descriptor and finishes the progress
        // report.
        drop(stream);

        Ok(Mount {
            spec: Arc::new(spec),
            tree,
            buffers,
        })
    }

    fn insert(&mut self, tree: &mut Tree, meta: EntryMeta) -> Result<()> {
        match meta.kind {
            EntryKind::Directory => return Ok(()),
            EntryKind::Hardlink => {
                warn!(
                    "hard link in {}: {}",
                    redacted_path(&self.spec.path),
                    redact(&meta.pathname)
                );
                return Ok(());
            }
            EntryKind::Special(what) => {
                error!(
                    "irregular file type ({what}) in {}: {}",
                    redacted_path(&self.spec.path),
                    redact(&meta.pathname)
                );
                return Ok(());
            }
            EntryKind::File | EntryKind::Symlink => {}
        }

        let Some(pathname) =
            normalize_pathname(&meta.pathname, self.spec.is_raw(), &self.spec.inner_name)
        else {
            error!(
                "archive entry in {} has invalid pathname: {}",
                redacted_path(&self.spec.path),
                redact(&meta.pathname)
            );
            return Ok(());
        };

        let symlink = meta.link_target.unwrap_or_default();
        if meta.kind == EntryKind::Symlink && symlink.is_empty() {
            error!(
                "empty link in {}: {}",
                redacted_path(&self.spec.path),
                redact(&pathname)
            );
            return Ok(());
        }

        let size = match meta.size {
            Some(size) => size,
            // The format doesn't record the decompressed size; decode the
            // whole entry into the discard sink to measure it.
            None => {
                let mut total: u64 = 0;
                loop {
                    let sink = self.buffers.sink_mut();
                    let n = match self.stream.read(sink) {
                        Ok(n) => n,
                        Err(e) => {
                            error!(
                                "could not decompress {}: {}",
                                redacted_path(&self.spec.path),
                                e
                            );
                            return Err(contents_error(e));
                        }
                    };
                    if n == 0 {
                        break;
                    }
                    total += n as u64;
                }
                total
            }
        };

        tree.insert_leaf(&pathname, &symlink, meta.index, size, meta.mtime, meta.mode);
        Ok(())
    }
}
