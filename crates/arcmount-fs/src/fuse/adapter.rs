//! `fuser::Filesystem` implementation.
//!
//! The filesystem logic lives in inherent methods that return plain data or
//! a negated errno, so it can be exercised without a kernel mount; the
//! trait impl is a thin shim that converts to fuser reply objects. Inodes
//! are arena ids shifted by one, so the root node is `FUSE_ROOT_ID`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use libc::{c_int, EACCES, EINVAL, EIO, EISDIR, ENOENT, ENOLINK, ENOTDIR};
use log::{debug, trace, warn};

use crate::pool::ReaderPool;
use crate::reader::Reader;
use crate::scan::Mount;
use crate::tree::{NodeId, BLOCK_SIZE};

/// Time-to-live for cached attributes. The tree never changes while
/// mounted, so any value works; one second keeps the kernel chatty enough
/// to notice unmounts promptly.
const TTL: Duration = Duration::from_secs(1);

const NAME_MAX: u32 = 255;

struct OpenFile {
    reader: Reader,
}

/// FUSE filesystem over an indexed archive.
pub struct ArchiveFuseFs {
    mount: Mount,
    pool: ReaderPool,
    open_files: HashMap<u64, OpenFile>,
    next_fh: u64,
    uid: u32,
    gid: u32,
}

impl ArchiveFuseFs {
    /// Builds the serving state around a finished indexing pass. Reported
    /// ownership defaults to the mounting user unless overridden.
    pub fn new(mount: Mount, uid: Option<u32>, gid: Option<u32>) -> Self {
        let pool = ReaderPool::new(mount.spec.clone());
        let uid = uid.unwrap_or_else(|| unsafe { libc::getuid() });
        let gid = gid.unwrap_or_else(|| unsafe { libc::getgid() });
        ArchiveFuseFs {
            mount,
            pool,
            open_files: HashMap::new(),
            next_fh: 1,
            uid,
            gid,
        }
    }

    fn node_id(&self, ino: u64) -> Option<NodeId> {
        let id = ino.checked_sub(1)? as usize;
        (id < self.mount.tree.len()).then_some(id)
    }

    fn file_type(mode: u32) -> FileType {
        match mode & libc::S_IFMT {
            libc::S_IFDIR => FileType::Directory,
            libc::S_IFLNK => FileType::Symlink,
            _ => FileType::RegularFile,
        }
    }

    fn system_time(mtime: i64) -> SystemTime {
        if mtime >= 0 {
            UNIX_EPOCH + Duration::from_secs(mtime as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs(mtime.unsigned_abs())
        }
    }

    fn attr(&self, id: NodeId) -> FileAttr {
        let node = self.mount.tree.node(id);
        let mtime = Self::system_time(node.mtime);
        FileAttr {
            ino: id as u64 + 1,
            size: node.size,
            blocks: node.block_count(),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: Self::file_type(node.mode),
            perm: (node.mode & 0o7777) as u16,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    /// Resolves `name` under the directory `parent_ino`.
    pub fn lookup_node(&self, parent_ino: u64, name: &str) -> Result<NodeId, c_int> {
        let parent = self.node_id(parent_ino).ok_or(ENOENT)?;
        if !self.mount.tree.node(parent).is_dir() {
            return Err(ENOTDIR);
        }
        self.mount.tree.child_by_name(parent, name).ok_or(ENOENT)
    }

    pub fn getattr_node(&self, ino: u64) -> Result<FileAttr, c_int> {
        let id = self.node_id(ino).ok_or(ENOENT)?;
        Ok(self.attr(id))
    }

    pub fn readlink_node(&self, ino: u64) -> Result<Vec<u8>, c_int> {
        let id = self.node_id(ino).ok_or(ENOENT)?;
        let node = self.mount.tree.node(id);
        if node.symlink.is_empty() {
            return Err(ENOLINK);
        }
        Ok(node.symlink.clone().into_bytes())
    }

    /// Opens a file node read-only, acquiring a reader positioned at its
    /// entry. Returns the file handle the reader is stashed under.
    pub fn open_node(&mut self, ino: u64, flags: i32) -> Result<u64, c_int> {
        let id = self.node_id(ino).ok_or(ENOENT)?;
        let node = self.mount.tree.node(id);
        if node.is_dir() {
            return Err(EISDIR);
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(EACCES);
        }
        let index = node.index.ok_or(EIO)?;
        let reader = self.pool.acquire(index).map_err(|_| EIO)?;

        let fh = self.next_fh;
        self.next_fh += 1;
        self.open_files.insert(fh, OpenFile { reader });
        Ok(fh)
    }

    /// Serves a positional read through the handle's reader.
    pub fn read_at(&mut self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>, c_int> {
        if offset < 0 || size as u64 > i32::MAX as u64 {
            return Err(EINVAL);
        }
        let offset = offset as u64;

        let file = self.open_files.get_mut(&fh).ok_or(EIO)?;
        let index = file.reader.index().ok_or(EIO)?;
        let id = self.mount.tree.by_index(index).ok_or(EIO)?;
        let node = self.mount.tree.node(id);

        if offset >= node.size {
            return Ok(Vec::new());
        }
        let len = (size as u64).min(node.size - offset) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut dst = vec![0u8; len];

        if self.mount.buffers.read_into(index, offset, &mut dst) {
            return Ok(dst);
        }

        // The decoder can't seek backwards. Swap in a reader acquired for
        // the same entry; the one we hand back may still be the best
        // starting point for a sibling pread.
        if offset < file.reader.offset() {
            let fresh = self.pool.acquire(index).map_err(|_| EIO)?;
            let previous = std::mem::replace(&mut file.reader, fresh);
            self.pool.release(previous);
        }

        let pathname = &self.mount.tree.node(id).rel_name;
        file.reader
            .advance_offset(&mut self.mount.buffers, offset, pathname)
            .map_err(|_| EIO)?;
        let n = file
            .reader
            .read(&mut dst, pathname)
            .map_err(|_| EIO)?;
        dst.truncate(n);
        Ok(dst)
    }

    /// Returns the handle's reader to the pool.
    pub fn close(&mut self, fh: u64) -> Result<(), c_int> {
        let file = self.open_files.remove(&fh).ok_or(EIO)?;
        self.pool.release(file.reader);
        Ok(())
    }

    /// Directory listing: `.`, `..`, then the children in insertion order.
    pub fn dir_entries(&self, ino: u64) -> Result<Vec<(u64, FileType, String)>, c_int> {
        let id = self.node_id(ino).ok_or(ENOENT)?;
        let node = self.mount.tree.node(id);
        if !node.is_dir() {
            return Err(ENOTDIR);
        }
        let parent_ino = node.parent.map_or(ino, |p| p as u64 + 1);

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for &child in &node.children {
            entries.push((
                child as u64 + 1,
                Self::file_type(self.mount.tree.node(child).mode),
                self.mount.tree.node(child).rel_name.clone(),
            ));
        }
        Ok(entries)
    }

    /// `(total blocks, total inodes)` for statfs.
    pub fn statfs_data(&self) -> (u64, u64) {
        (
            self.mount.tree.block_count(),
            self.mount.tree.len() as u64,
        )
    }
}

impl Filesystem for ArchiveFuseFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_string_lossy();
        trace!("lookup(parent={parent}, name={name})");
        match self.lookup_node(parent, &name) {
            Ok(id) => reply.entry(&TTL, &self.attr(id), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!("getattr(ino={ino})");
        match self.getattr_node(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!("readlink(ino={ino})");
        match self.readlink_node(ino) {
            Ok(target) => reply.data(&target),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!("open(ino={ino}, flags={flags:#x})");
        match self.open_node(ino, flags) {
            // The mount is immutable, so the kernel may keep pages cached
            // across opens.
            Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_KEEP_CACHE),
            Err(errno) => {
                debug!("open(ino={ino}): errno {errno}");
                reply.error(errno);
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!("read(ino={ino}, fh={fh}, offset={offset}, size={size})");
        match self.read_at(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => {
                warn!("read(ino={ino}, offset={offset}): errno {errno}");
                reply.error(errno);
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!("release(ino={ino}, fh={fh})");
        match self.close(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!("readdir(ino={ino}, offset={offset})");
        let entries = match self.dir_entries(ino) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        for (i, (child_ino, kind, name)) in
            entries.into_iter().enumerate().skip(offset as usize)
        {
            // A full reply buffer is not an error; the kernel resumes from
            // the offset it got.
            if reply.add(child_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        trace!("statfs");
        let (blocks, files) = self.statfs_data();
        reply.statfs(
            blocks,
            0,
            0,
            files,
            0,
            BLOCK_SIZE as u32,
            NAME_MAX,
            BLOCK_SIZE as u32,
        );
    }
}
