//! # arcmount-format
//!
//! Archive and compressed-stream decoding for arcmount.
//!
//! This crate is the decoder half of the mount engine. It provides:
//! - Classification of archive files by signature (cooked tar/zip versus
//!   raw compressed streams)
//! - Forward-only entry streams over tar, zip and raw inputs
//! - Traditional PKWARE (ZipCrypto) decryption
//! - A counting byte source that feeds the indexing progress reporter
//! - Passphrase input and pathname redaction for logs
//! - The error taxonomy and its mapping to process exit codes
//!
//! Decoders only move forward. Random access on top of them is the mount
//! engine's job (see `arcmount-fs`), which pools warm streams and caches
//! decode windows to avoid re-decompressing from the start of an entry.
//!
//! ## Example
//!
//! ```ignore
//! use arcmount_format::{ArchiveSpec, EntryStream};
//!
//! let spec = ArchiveSpec::probe("example.tar.gz".as_ref(), None)?;
//! let mut stream = EntryStream::open(&spec, Box::new(spec.open_source()?))?;
//! while let Some(entry) = stream.next_entry()? {
//!     println!("{} ({:?} bytes)", entry.pathname, entry.size);
//! }
//! ```

mod archive;
mod detect;
mod entry;
mod error;
mod filter;
pub mod password;
pub mod redact;
mod source;
mod stream;

pub use archive::{inner_name, ArchiveSpec};
pub use detect::{Classification, Filter};
pub use entry::{EntryKind, EntryMeta};
pub use error::{exit_code, Error, Result};
pub use source::{ArchiveSource, CountingReader, Progress};
pub use stream::EntryStream;
