//! # arcmount-fs
//!
//! Mount engine for arcmount: serves a read-only view of an archive as a
//! FUSE filesystem.
//!
//! This crate provides:
//! - The in-memory directory tree built by the one-shot indexing pass
//! - Side buffers that turn short backward seeks and reordered sequential
//!   reads into byte copies
//! - Positioned readers over the forward-only decoders, pooled in an LRU
//!   cache with closest-position-below selection
//! - The `fuser` adapter binding all of it to kernel callbacks
//!
//! The serving model is single-threaded and cooperative: one slow read
//! stalls the mount, but no state ever needs a lock.
//!
//! ## Example
//!
//! ```ignore
//! use arcmount_fs::scan::{self, ScanOptions};
//! use arcmount_fs::fuse::{self, ArchiveFuseFs};
//!
//! let scanner = scan::probe(&ScanOptions {
//!     archive: "example.tar.gz".into(),
//!     password: None,
//!     prompt_for_password: true,
//!     quiet: false,
//! })?;
//! let mount = scanner.finish()?;
//! let fs = ArchiveFuseFs::new(mount, None, None);
//! fuse::mount(fs, "/mnt/example".as_ref(), Vec::new())?;
//! ```

pub mod fuse;
pub mod pool;
pub mod reader;
pub mod scan;
pub mod side_buffer;
pub mod tree;

// Re-export the decoder crate's surface for convenience.
pub use arcmount_format::{
    exit_code, inner_name, ArchiveSpec, Classification, EntryKind, Error, Filter, Result,
};
