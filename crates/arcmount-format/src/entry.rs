/// What kind of object an archive entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory. Never inserted into the tree directly; directories are
    /// synthesised from leaf pathnames.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Hard link to another entry. Not representable in a read-only mount.
    Hardlink,
    /// Block/character device, fifo, socket or other special file.
    Special(&'static str),
}

/// Metadata for one archive entry, as read from its header.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    /// Zero-based position in the archive's header stream. Every header
    /// consumes an index, directories included.
    pub index: u64,
    /// Pathname as recorded in the archive, decoded as UTF-8 with lossy
    /// fallback. Not yet validated or normalised.
    pub pathname: String,
    /// Decompressed size, when the format records it. Raw streams do not;
    /// their size is discovered by decompressing the whole entry.
    pub size: Option<u64>,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// POSIX file type and permission bits.
    pub mode: u32,
    /// Entry kind, derived from the type and mode fields.
    pub kind: EntryKind,
    /// Symlink target, for symlink entries that record one.
    pub link_target: Option<String>,
}
