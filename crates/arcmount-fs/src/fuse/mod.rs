//! FUSE adapter for mounted archives.
//!
//! Binds the directory tree, reader pool and side buffers to the kernel's
//! filesystem callbacks. The session is served on a single thread: side
//! buffer acquisition and reader swapping are not atomic, and serialising
//! every callback is what makes them safe without a lock over every read.

mod adapter;

pub use adapter::ArchiveFuseFs;

use fuser::MountOption;

/// Mount options every archive mount gets, plus the caller's extras.
///
/// The filesystem is read-only by construction; telling the kernel keeps
/// write attempts from ever reaching the adapter.
pub fn mount_options(extra: Vec<MountOption>) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::RO,
        MountOption::FSName("arcmount".to_string()),
        MountOption::Subtype("arcmount".to_string()),
    ];
    options.extend(extra);
    options
}

/// Mounts the filesystem at `mount_point` and serves callbacks until it is
/// unmounted. Blocks the calling thread; callbacks run on it, one at a
/// time.
pub fn mount(
    fs: ArchiveFuseFs,
    mount_point: &std::path::Path,
    extra: Vec<MountOption>,
) -> std::io::Result<()> {
    fuser::mount2(fs, mount_point, &mount_options(extra))
}
