//! In-memory directory tree exchanged with the codec
//!
//! [`Tree`] is what [`compress`](crate::compress) consumes and what
//! [`decompress_to_tree`](crate::decompress_to_tree) produces. Other sinks
//! (a directory on disk, an index) implement [`TreeBuilder`] and receive
//! one callback per decoded node instead.

use crate::directory::compare_names;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

/// FILETIME ticks per second
const TICKS_PER_SEC: u64 = 10_000_000;

/// Windows FILETIME: 100 ns ticks since 1601-01-01 UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(u64);

impl FileTime {
    /// Wrap a raw tick count
    pub const fn from_raw(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Raw tick count
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Convert from a system time, clamping to the representable range
    pub fn from_system_time(time: SystemTime) -> Self {
        let offset = FILETIME_UNIX_OFFSET_SECS * TICKS_PER_SEC;
        let ticks = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => offset.saturating_add(duration_ticks(after)),
            Err(before) => offset.saturating_sub(duration_ticks(before.duration())),
        };
        Self(ticks)
    }

    /// Convert to a system time
    pub fn to_system_time(self) -> SystemTime {
        let offset = FILETIME_UNIX_OFFSET_SECS * TICKS_PER_SEC;
        let since = |ticks: u64| {
            Duration::new(ticks / TICKS_PER_SEC, ((ticks % TICKS_PER_SEC) * 100) as u32)
        };
        if self.0 >= offset {
            UNIX_EPOCH + since(self.0 - offset)
        } else {
            UNIX_EPOCH - since(offset - self.0)
        }
    }

    /// `None` for the zero "not set" value
    pub fn non_zero(ticks: u64) -> Option<Self> {
        (ticks != 0).then_some(Self(ticks))
    }
}

fn duration_ticks(d: Duration) -> u64 {
    d.as_secs()
        .saturating_mul(TICKS_PER_SEC)
        .saturating_add(u64::from(d.subsec_nanos() / 100))
}

/// Folder with ordered children
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Folder {
    /// Folder name
    pub name: String,
    /// Children in insertion order
    pub children: Vec<Node>,
    /// Creation time, if known
    pub created: Option<FileTime>,
    /// Modification time, if known
    pub modified: Option<FileTime>,
}

/// File with its full payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct File {
    /// File name
    pub name: String,
    /// File contents
    pub data: Vec<u8>,
}

/// A folder or a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Folder node
    Folder(Folder),
    /// File node
    File(File),
}

impl Node {
    /// Node name
    pub fn name(&self) -> &str {
        match self {
            Self::Folder(folder) => &folder.name,
            Self::File(file) => &file.name,
        }
    }
}

impl File {
    /// Create a file
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl Folder {
    /// Create an empty folder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a file (builder form)
    pub fn with_file(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.add_file(name, data);
        self
    }

    /// Add a sub-folder (builder form)
    pub fn with_folder(mut self, folder: Folder) -> Self {
        self.add_folder(folder);
        self
    }

    /// Set both timestamps (builder form)
    pub fn with_times(mut self, created: Option<FileTime>, modified: Option<FileTime>) -> Self {
        self.created = created;
        self.modified = modified;
        self
    }

    /// Append a file
    pub fn add_file(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.children.push(Node::File(File::new(name, data)));
    }

    /// Append a sub-folder
    pub fn add_folder(&mut self, folder: Folder) {
        self.children.push(Node::Folder(folder));
    }

    /// Child by exact name
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|node| node.name() == name)
    }

    /// Number of files below this folder
    pub fn file_count(&self) -> usize {
        self.children
            .iter()
            .map(|node| match node {
                Node::Folder(folder) => folder.file_count(),
                Node::File(_) => 1,
            })
            .sum()
    }

    fn canonicalize(&mut self) {
        self.children.sort_by_cached_key(|node| SortKey(node.name().encode_utf16().collect()));
        for node in &mut self.children {
            if let Node::Folder(folder) = node {
                folder.canonicalize();
            }
        }
    }
}

/// Sort key applying directory name order
#[derive(PartialEq, Eq)]
struct SortKey(Vec<u16>);

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        compare_names(&self.0, &other.0)
    }
}

/// Whole tree, rooted at an unnamed folder
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    /// Root folder; its name is not stored
    pub root: Folder,
}

impl Tree {
    /// Empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level file (builder form)
    pub fn with_file(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.root.add_file(name, data);
        self
    }

    /// Add a top-level folder (builder form)
    pub fn with_folder(mut self, folder: Folder) -> Self {
        self.root.add_folder(folder);
        self
    }

    /// Sort every folder's children into directory order
    ///
    /// Decoded trees come back in this order, so comparing a tree with its
    /// round-tripped copy needs both sides canonicalized.
    pub fn canonicalize(&mut self) {
        self.root.canonicalize();
    }

    /// Canonicalized copy
    pub fn canonical(&self) -> Self {
        let mut tree = self.clone();
        tree.canonicalize();
        tree
    }

    fn folder_mut(&mut self, path: &[String]) -> io::Result<&mut Folder> {
        let mut folder = &mut self.root;
        for name in path {
            folder = folder
                .children
                .iter_mut()
                .find_map(|node| match node {
                    Node::Folder(child) if child.name == *name => Some(child),
                    _ => None,
                })
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("parent folder '{name}' not found"),
                    )
                })?;
        }
        Ok(folder)
    }
}

/// Sink for decoded nodes
///
/// `path` lists the names from the root down to the node itself; the root
/// folder has an empty path. Parents are always announced before their
/// children.
pub trait TreeBuilder {
    /// A folder, with its timestamps when the container recorded them
    fn add_folder(
        &mut self,
        path: &[String],
        created: Option<FileTime>,
        modified: Option<FileTime>,
    ) -> io::Result<()>;

    /// A file and its complete payload
    fn add_file(&mut self, path: &[String], data: &[u8]) -> io::Result<()>;
}

impl TreeBuilder for Tree {
    fn add_folder(
        &mut self,
        path: &[String],
        created: Option<FileTime>,
        modified: Option<FileTime>,
    ) -> io::Result<()> {
        let Some((name, parent)) = path.split_last() else {
            self.root.created = created;
            self.root.modified = modified;
            return Ok(());
        };
        let folder = Folder::new(name.as_str()).with_times(created, modified);
        self.folder_mut(parent)?.add_folder(folder);
        Ok(())
    }

    fn add_file(&mut self, path: &[String], data: &[u8]) -> io::Result<()> {
        let Some((name, parent)) = path.split_last() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file path is empty",
            ));
        };
        self.folder_mut(parent)?.add_file(name.as_str(), data.to_vec());
        Ok(())
    }
}
