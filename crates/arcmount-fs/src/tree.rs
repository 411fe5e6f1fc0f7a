//! In-memory directory tree.
//!
//! The whole namespace is built during the indexing pass and never changes
//! afterwards. Nodes live in an arena; tree links are arena indices and each
//! directory keeps its children in insertion order, which is also the order
//! `readdir` reports them in. Directories are never inserted directly: they
//! are synthesised from the leaf pathnames that pass through them.

use std::collections::HashMap;

use arcmount_format::redact::redact;
use log::warn;

/// The filesystem block size used for size and block accounting.
pub const BLOCK_SIZE: u64 = 512;

/// Index of a node in the tree's arena.
pub type NodeId = usize;

/// The root directory's node id. Its fuser inode is `ROOT + 1`.
pub const ROOT: NodeId = 0;

/// One directory, regular file or symlink in the virtual filesystem.
#[derive(Debug)]
pub struct Node {
    /// Last pathname fragment; empty only for the root.
    pub rel_name: String,
    /// Symlink target; empty iff this is not a symlink.
    pub symlink: String,
    /// Entry index within the archive. `None` for synthesised directories
    /// and the root.
    pub index: Option<u64>,
    /// File size in bytes. For directories, 512 bytes per direct child.
    pub size: u64,
    /// Modification time. A directory's mtime is the newest of its
    /// descendants'.
    pub mtime: i64,
    /// POSIX type and permission bits. Directory permissions accumulate
    /// read/execute bits from their descendants.
    pub mode: u32,
    pub parent: Option<NodeId>,
    /// Children in insertion order.
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }

    /// Number of 512-byte blocks this node's size occupies.
    pub fn block_count(&self) -> u64 {
        (self.size + BLOCK_SIZE - 1) / BLOCK_SIZE
    }
}

/// The arena, the pathname namespace and the positional index.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    by_path: HashMap<String, NodeId>,
    by_index: Vec<Option<NodeId>>,
    block_count: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree containing only the root directory.
    pub fn new() -> Tree {
        let root = Node {
            rel_name: String::new(),
            symlink: String::new(),
            index: None,
            size: 0,
            mtime: 0,
            mode: libc::S_IFDIR,
            parent: None,
            children: Vec::new(),
        };
        let mut by_path = HashMap::new();
        by_path.insert("/".to_string(), ROOT);
        Tree {
            nodes: vec![root],
            by_path,
            by_index: Vec::new(),
            block_count: 1,
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the root always exists
    }

    /// Total 512-byte blocks accounted to the filesystem.
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Looks a node up by absolute pathname (`/` for the root).
    pub fn lookup(&self, pathname: &str) -> Option<NodeId> {
        self.by_path.get(pathname).copied()
    }

    /// Looks a leaf up by its entry index within the archive.
    pub fn by_index(&self, index: u64) -> Option<NodeId> {
        self.by_index.get(index as usize).copied().flatten()
    }

    /// Finds a direct child of `dir` by name.
    pub fn child_by_name(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[dir]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].rel_name == name)
    }

    fn add_child(&mut self, parent: NodeId, child: NodeId) {
        // One 512-byte pseudo-block per directory entry.
        self.nodes[parent].size += BLOCK_SIZE;
        self.nodes[parent].children.push(child);
        self.nodes[child].parent = Some(parent);
    }

    /// Inserts a leaf (regular file or symlink), creating the intermediate
    /// directories its pathname implies.
    ///
    /// `pathname` must already be normalised (absolute, validated). Name
    /// collisions keep the first occupant: a second leaf at the same path,
    /// or a leaf whose path crosses an existing non-directory, is dropped
    /// with a warning.
    pub fn insert_leaf(
        &mut self,
        pathname: &str,
        symlink: &str,
        index: u64,
        size: u64,
        mtime: i64,
        mode: u32,
    ) {
        let Some(rest) = pathname.strip_prefix('/') else {
            return;
        };
        if rest.is_empty() {
            return;
        }

        let rx_bits = mode & 0o555;
        let r_bits = rx_bits & 0o444;
        let branch_mode = rx_bits | (r_bits >> 2) | libc::S_IFDIR;
        let leaf_mode = rx_bits
            | if symlink.is_empty() {
                libc::S_IFREG
            } else {
                libc::S_IFLNK
            };

        let mut parent = ROOT;
        let mut abs = String::with_capacity(pathname.len());
        let fragments: Vec<&str> = rest.split('/').collect();

        for (i, fragment) in fragments.iter().enumerate() {
            // A directory's mtime is the newest of its leaves'; its mode
            // accumulates the read/execute bits of everything below it.
            if self.nodes[parent].mtime < mtime {
                self.nodes[parent].mtime = mtime;
            }
            self.nodes[parent].mode |= branch_mode;

            abs.push('/');
            abs.push_str(fragment);
            let terminal = i + 1 == fragments.len();

            if terminal {
                if self.by_path.contains_key(abs.as_str()) {
                    warn!("name collision: {}", redact(&abs));
                    return;
                }
                let id = self.nodes.len();
                self.nodes.push(Node {
                    rel_name: fragment.to_string(),
                    symlink: symlink.to_string(),
                    index: Some(index),
                    size,
                    mtime,
                    mode: leaf_mode,
                    parent: None,
                    children: Vec::new(),
                });
                self.by_path.insert(abs.clone(), id);
                self.add_child(parent, id);
                self.block_count += self.nodes[id].block_count() + 1;
                self.record_index(index, id);
                return;
            }

            match self.by_path.get(abs.as_str()) {
                Some(&existing) => {
                    if !self.nodes[existing].is_dir() {
                        warn!("name collision: {}", redact(&abs));
                        return;
                    }
                    parent = existing;
                }
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(Node {
                        rel_name: fragment.to_string(),
                        symlink: String::new(),
                        index: None,
                        size: 0,
                        mtime,
                        mode: branch_mode,
                        parent: None,
                        children: Vec::new(),
                    });
                    self.by_path.insert(abs.clone(), id);
                    self.add_child(parent, id);
                    self.block_count += 1;
                    parent = id;
                }
            }
        }
    }

    fn record_index(&mut self, index: u64, id: NodeId) {
        let index = index as usize;
        debug_assert!(self.by_index.len() <= index);
        while self.by_index.len() < index {
            self.by_index.push(None);
        }
        if self.by_index.len() == index {
            self.by_index.push(Some(id));
        }
    }
}

/// Whether every `/`-separated fragment of `p` is a usable name: none may
/// be empty, `.` or `..`, apart from a leading `/` or `./`.
fn valid_pathname(p: &str) -> bool {
    let rest = p
        .strip_prefix("./")
        .or_else(|| p.strip_prefix('/'))
        .unwrap_or(p);
    !rest.is_empty()
        && rest
            .split('/')
            .all(|fragment| !fragment.is_empty() && fragment != "." && fragment != "..")
}

/// Validates an entry's pathname and returns its absolute form.
///
/// For raw archives, the decoder's `data` placeholder is replaced by the
/// archive's inner name. Returns `None` for unusable names; the caller logs
/// the rejection.
pub fn normalize_pathname(raw: &str, is_raw_archive: bool, inner_name: &str) -> Option<String> {
    let name = if is_raw_archive && raw == "data" && !inner_name.is_empty() {
        inner_name
    } else {
        raw
    };

    if !valid_pathname(name) {
        return None;
    }

    if let Some(rest) = name.strip_prefix("./") {
        Some(format!("/{rest}"))
    } else if name.starts_with('/') {
        Some(name.to_string())
    } else {
        Some(format!("/{name}"))
    }
}
