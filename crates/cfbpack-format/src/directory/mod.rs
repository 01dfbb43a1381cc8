//! Directory: the persisted hierarchy of storages and streams
//!
//! Entries live in a flat arena addressed by entry id; id 0 is the root
//! storage. The children of each storage form a red-black tree threaded
//! through the entries' `left`/`right` links, with the storage's `child`
//! link pointing at the tree root. Tree-parent links are kept in memory
//! only, they are not part of the on-disk record.

mod entry;
mod name;

pub use entry::{
    Color, DIR_ENTRY_SIZE, DirEntry, MAXREGSID, NOSTREAM, ObjectType, ROOT_ENTRY_NAME,
};
pub use name::{MAX_NAME_UNITS, compare_names, encode_name};

use crate::error::{CfbError, CfbResult};
use crate::sector::SectorLayout;
use std::cmp::Ordering;
use tracing::debug;

/// Id of the root storage entry
pub const ROOT_ID: u32 = 0;

/// Directory arena with red-black sibling trees
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<DirEntry>,
    names: Vec<String>,
    tree_parents: Vec<u32>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    /// Directory holding only the root storage
    pub fn new() -> Self {
        Self {
            entries: vec![DirEntry::root()],
            names: vec![ROOT_ENTRY_NAME.to_string()],
            tree_parents: vec![NOSTREAM],
        }
    }

    /// Number of entries, root included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the root entry is always present
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in id order
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// One entry by id
    pub fn entry(&self, id: u32) -> Option<&DirEntry> {
        self.entries.get(id as usize)
    }

    /// Decoded name of an entry
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Kind of an entry
    pub fn kind(&self, id: u32) -> Option<ObjectType> {
        self.entry(id).and_then(DirEntry::kind)
    }

    /// Insert a new entry under `parent`
    ///
    /// The name is validated and compared against the existing siblings;
    /// the sibling tree is rebalanced before returning.
    pub fn insert(&mut self, parent: u32, name: &str, kind: ObjectType) -> CfbResult<u32> {
        self.require_storage(parent)?;
        if !matches!(kind, ObjectType::Storage | ObjectType::Stream) {
            return Err(CfbError::InvalidDirectoryEntry {
                entry: parent,
                reason: format!("cannot insert {kind:?} entry"),
            });
        }
        let units = encode_name(name)?;

        let mut tree_parent = NOSTREAM;
        let mut go_left = false;
        let mut current = self.entries[parent as usize].child;
        while current != NOSTREAM {
            tree_parent = current;
            match compare_names(&units, self.entries[current as usize].name_units()) {
                Ordering::Less => {
                    go_left = true;
                    current = self.entries[current as usize].left;
                }
                Ordering::Greater => {
                    go_left = false;
                    current = self.entries[current as usize].right;
                }
                Ordering::Equal => {
                    return Err(CfbError::DuplicateName {
                        parent,
                        name: name.to_string(),
                    });
                }
            }
        }

        if self.entries.len() > MAXREGSID as usize {
            return Err(CfbError::TooLarge {
                what: "directory entry count",
                size: self.entries.len() as u64 + 1,
                limit: u64::from(MAXREGSID) + 1,
            });
        }
        let id = self.entries.len() as u32;

        let mut entry = DirEntry::new(&units, kind);
        entry.color = Color::Red as u8;
        self.entries.push(entry);
        self.names.push(name.to_string());
        self.tree_parents.push(tree_parent);

        if tree_parent == NOSTREAM {
            self.entries[parent as usize].child = id;
        } else if go_left {
            self.entries[tree_parent as usize].left = id;
        } else {
            self.entries[tree_parent as usize].right = id;
        }

        self.fix_after_insert(parent, id);
        Ok(id)
    }

    /// Find a child of `parent` by name
    pub fn lookup(&self, parent: u32, name: &str) -> CfbResult<u32> {
        self.require_storage(parent)?;
        let units: Vec<u16> = name.encode_utf16().collect();

        let mut current = self.entries[parent as usize].child;
        while current != NOSTREAM {
            let entry = &self.entries[current as usize];
            match compare_names(&units, entry.name_units()) {
                Ordering::Less => current = entry.left,
                Ordering::Greater => current = entry.right,
                Ordering::Equal => return Ok(current),
            }
        }
        Err(CfbError::NotFound(name.to_string()))
    }

    /// Child ids of `parent` in directory order
    pub fn children(&self, parent: u32) -> CfbResult<Vec<u32>> {
        self.require_storage(parent)?;

        let mut ordered = Vec::new();
        let mut stack = Vec::new();
        let mut current = self.entries[parent as usize].child;
        while current != NOSTREAM || !stack.is_empty() {
            while current != NOSTREAM {
                stack.push(current);
                current = self.entries[current as usize].left;
            }
            if let Some(id) = stack.pop() {
                ordered.push(id);
                current = self.entries[id as usize].right;
            }
        }
        Ok(ordered)
    }

    /// Names and kinds of the children of `parent` in directory order
    pub fn list_children(&self, parent: u32) -> CfbResult<Vec<(String, ObjectType)>> {
        Ok(self
            .children(parent)?
            .into_iter()
            .map(|id| {
                let kind = self.kind(id).unwrap_or(ObjectType::Unused);
                (self.names[id as usize].clone(), kind)
            })
            .collect())
    }

    /// Rebuild a directory from parsed entries
    ///
    /// Walks every sibling tree reachable from the root, rejecting links out
    /// of range, entries reachable twice, streams with children and names
    /// that do not decode. Unreachable entries are kept but never visited.
    pub fn from_entries(entries: Vec<DirEntry>) -> CfbResult<Self> {
        let count = entries.len();
        let root = entries
            .first()
            .ok_or_else(|| CfbError::InvalidDirectoryEntry {
                entry: ROOT_ID,
                reason: "directory is empty".to_string(),
            })?;
        if root.kind() != Some(ObjectType::Root) {
            return Err(CfbError::InvalidDirectoryEntry {
                entry: ROOT_ID,
                reason: format!("entry 0 has type {}, expected root", root.object_type),
            });
        }

        let mut names = vec![String::new(); count];
        let mut tree_parents = vec![NOSTREAM; count];
        let mut visited = vec![false; count];
        visited[0] = true;
        names[0] = root.decode_name(ROOT_ID)?;

        let check_link = |from: u32, to: u32| -> CfbResult<()> {
            if to as usize >= count {
                return Err(CfbError::InvalidDirectoryEntry {
                    entry: from,
                    reason: format!("link to entry {to} out of range ({count} entries)"),
                });
            }
            Ok(())
        };

        let mut storages = vec![ROOT_ID];
        while let Some(storage) = storages.pop() {
            let first = entries[storage as usize].child;
            if first == NOSTREAM {
                continue;
            }
            check_link(storage, first)?;

            let mut pending = vec![(first, NOSTREAM)];
            while let Some((id, tree_parent)) = pending.pop() {
                if visited[id as usize] {
                    return Err(CfbError::DirectoryCycle(id));
                }
                visited[id as usize] = true;
                tree_parents[id as usize] = tree_parent;

                let entry = &entries[id as usize];
                match entry.kind() {
                    Some(ObjectType::Storage) => storages.push(id),
                    Some(ObjectType::Stream) => {
                        if entry.child != NOSTREAM {
                            return Err(CfbError::InvalidDirectoryEntry {
                                entry: id,
                                reason: "stream has children".to_string(),
                            });
                        }
                    }
                    _ => {
                        return Err(CfbError::InvalidDirectoryEntry {
                            entry: id,
                            reason: format!("unexpected object type {}", entry.object_type),
                        });
                    }
                }
                names[id as usize] = entry.decode_name(id)?;

                for link in [entry.left, entry.right] {
                    if link != NOSTREAM {
                        check_link(id, link)?;
                        pending.push((link, id));
                    }
                }
            }
        }

        let reachable = visited.iter().filter(|&&v| v).count();
        debug!(entries = count, reachable, "loaded directory");

        Ok(Self {
            entries,
            names,
            tree_parents,
        })
    }

    /// Verify ordering and red-black invariants of every sibling tree
    pub fn check_tree(&self) -> CfbResult<()> {
        let mut storages = vec![ROOT_ID];
        while let Some(storage) = storages.pop() {
            let children = self.children(storage)?;
            let violation = |entry: u32, reason: &str| CfbError::InvalidDirectoryEntry {
                entry,
                reason: reason.to_string(),
            };

            let tree_root = self.entries[storage as usize].child;
            if tree_root != NOSTREAM && self.entries[tree_root as usize].is_red() {
                return Err(violation(tree_root, "sibling tree root is red"));
            }

            for pair in children.windows(2) {
                let (a, b) = (&self.entries[pair[0] as usize], &self.entries[pair[1] as usize]);
                if compare_names(a.name_units(), b.name_units()) != Ordering::Less {
                    return Err(violation(pair[1], "siblings out of order"));
                }
            }

            let mut black_height = None;
            for &id in &children {
                let entry = &self.entries[id as usize];
                if entry.is_red() {
                    let parent = self.tree_parents[id as usize];
                    if parent != NOSTREAM && self.entries[parent as usize].is_red() {
                        return Err(violation(id, "red entry has a red parent"));
                    }
                }
                if entry.left == NOSTREAM || entry.right == NOSTREAM {
                    let height = self.black_depth(id);
                    if *black_height.get_or_insert(height) != height {
                        return Err(violation(id, "unequal black height"));
                    }
                }
                if entry.kind() == Some(ObjectType::Storage) {
                    storages.push(id);
                }
            }
        }
        Ok(())
    }

    /// Serialize all entries, padded with unused entries to whole sectors
    pub fn to_bytes(&self, layout: SectorLayout) -> CfbResult<Vec<u8>> {
        let per_sector = layout.sector_size() / DIR_ENTRY_SIZE;
        let padded = self.entries.len().div_ceil(per_sector) * per_sector;
        let mut out = Vec::with_capacity(padded * DIR_ENTRY_SIZE);

        for entry in &self.entries {
            entry.write_to(&mut out)?;
        }
        let unused = DirEntry::unused();
        for _ in self.entries.len()..padded {
            unused.write_to(&mut out)?;
        }
        Ok(out)
    }

    /// Record where a stream's payload lives
    pub(crate) fn set_stream(&mut self, id: u32, start_sector: u32, size: u64) {
        if let Some(entry) = self.entries.get_mut(id as usize) {
            entry.start_sector = start_sector;
            entry.stream_size = size;
        }
    }

    /// Record storage timestamps
    pub(crate) fn set_times(&mut self, id: u32, created: u64, modified: u64) {
        if let Some(entry) = self.entries.get_mut(id as usize) {
            entry.created = created;
            entry.modified = modified;
        }
    }

    fn require_storage(&self, id: u32) -> CfbResult<()> {
        match self.kind(id) {
            Some(kind) if kind.is_storage() => Ok(()),
            Some(_) => Err(CfbError::NotAStorage(id)),
            None => Err(CfbError::NotFound(format!("entry {id}"))),
        }
    }

    /// Black entries on the path from `id` up to its tree root
    fn black_depth(&self, mut id: u32) -> usize {
        let mut depth = 0;
        while id != NOSTREAM {
            if !self.entries[id as usize].is_red() {
                depth += 1;
            }
            id = self.tree_parents[id as usize];
        }
        depth
    }

    fn is_red(&self, id: u32) -> bool {
        id != NOSTREAM && self.entries[id as usize].is_red()
    }

    fn set_color(&mut self, id: u32, color: Color) {
        self.entries[id as usize].color = color as u8;
    }

    fn left(&self, id: u32) -> u32 {
        self.entries[id as usize].left
    }

    fn right(&self, id: u32) -> u32 {
        self.entries[id as usize].right
    }

    fn parent(&self, id: u32) -> u32 {
        self.tree_parents[id as usize]
    }

    fn fix_after_insert(&mut self, storage: u32, mut node: u32) {
        while self.is_red(self.parent(node)) {
            let parent = self.parent(node);
            // A red parent is never the tree root, so the grandparent exists
            let grandparent = self.parent(parent);

            if parent == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if self.is_red(uncle) {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                } else {
                    if node == self.right(parent) {
                        node = parent;
                        self.rotate_left(storage, node);
                    }
                    let parent = self.parent(node);
                    let grandparent = self.parent(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_right(storage, grandparent);
                }
            } else {
                let uncle = self.left(grandparent);
                if self.is_red(uncle) {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                } else {
                    if node == self.left(parent) {
                        node = parent;
                        self.rotate_right(storage, node);
                    }
                    let parent = self.parent(node);
                    let grandparent = self.parent(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_left(storage, grandparent);
                }
            }
        }

        let root = self.entries[storage as usize].child;
        self.set_color(root, Color::Black);
    }

    fn rotate_left(&mut self, storage: u32, x: u32) {
        let y = self.right(x);
        let y_left = self.left(y);

        self.entries[x as usize].right = y_left;
        if y_left != NOSTREAM {
            self.tree_parents[y_left as usize] = x;
        }
        self.replace_in_parent(storage, x, y);
        self.entries[y as usize].left = x;
        self.tree_parents[x as usize] = y;
    }

    fn rotate_right(&mut self, storage: u32, x: u32) {
        let y = self.left(x);
        let y_right = self.right(y);

        self.entries[x as usize].left = y_right;
        if y_right != NOSTREAM {
            self.tree_parents[y_right as usize] = x;
        }
        self.replace_in_parent(storage, x, y);
        self.entries[y as usize].right = x;
        self.tree_parents[x as usize] = y;
    }

    /// Put `new` where `old` hangs off its tree parent (or the storage)
    fn replace_in_parent(&mut self, storage: u32, old: u32, new: u32) {
        let parent = self.parent(old);
        self.tree_parents[new as usize] = parent;
        if parent == NOSTREAM {
            self.entries[storage as usize].child = new;
        } else if self.left(parent) == old {
            self.entries[parent as usize].left = new;
        } else {
            self.entries[parent as usize].right = new;
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sector::CfbVersion;
    use pretty_assertions::assert_eq;

    fn names(dir: &Directory, parent: u32) -> Vec<String> {
        dir.list_children(parent)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut dir = Directory::new();
        let docs = dir.insert(ROOT_ID, "docs", ObjectType::Storage).unwrap();
        let file = dir.insert(docs, "a.txt", ObjectType::Stream).unwrap();

        assert_eq!(dir.lookup(ROOT_ID, "docs").unwrap(), docs);
        assert_eq!(dir.lookup(docs, "A.TXT").unwrap(), file);
        assert!(matches!(
            dir.lookup(docs, "b.txt"),
            Err(CfbError::NotFound(_))
        ));
        assert_eq!(dir.kind(file), Some(ObjectType::Stream));
    }

    #[test]
    fn test_children_listed_in_directory_order() {
        let mut dir = Directory::new();
        for name in ["zeta", "b", "Alpha", "aa", "c"] {
            dir.insert(ROOT_ID, name, ObjectType::Stream).unwrap();
        }
        assert_eq!(names(&dir, ROOT_ID), vec!["b", "c", "aa", "zeta", "Alpha"]);
    }

    #[test]
    fn test_case_insensitive_duplicate_rejected() {
        let mut dir = Directory::new();
        dir.insert(ROOT_ID, "Readme", ObjectType::Stream).unwrap();
        let err = dir
            .insert(ROOT_ID, "README", ObjectType::Storage)
            .unwrap_err();
        assert!(matches!(err, CfbError::DuplicateName { parent: 0, .. }));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_insert_under_stream_rejected() {
        let mut dir = Directory::new();
        let file = dir.insert(ROOT_ID, "f", ObjectType::Stream).unwrap();
        assert!(matches!(
            dir.insert(file, "g", ObjectType::Stream),
            Err(CfbError::NotAStorage(id)) if id == file
        ));
        assert!(matches!(
            dir.children(file),
            Err(CfbError::NotAStorage(_))
        ));
    }

    #[test]
    fn test_sequential_inserts_stay_balanced() {
        let mut dir = Directory::new();
        for i in 0..200 {
            dir.insert(ROOT_ID, &format!("s{i:04}"), ObjectType::Stream)
                .unwrap();
            dir.check_tree().unwrap();
        }
        let listed = names(&dir, ROOT_ID);
        let mut sorted = listed.clone();
        sorted.sort();
        assert_eq!(listed, sorted);

        // 200 nodes fit in a red-black tree of height at most 2*log2(201)
        let max_depth = (0..dir.len() as u32)
            .skip(1)
            .map(|mut id| {
                let mut depth = 0;
                while id != NOSTREAM {
                    depth += 1;
                    id = dir.parent(id);
                }
                depth
            })
            .max()
            .unwrap();
        assert!(max_depth <= 16, "depth {max_depth}");
    }

    #[test]
    fn test_to_bytes_pads_with_unused_entries() {
        let mut dir = Directory::new();
        dir.insert(ROOT_ID, "a", ObjectType::Stream).unwrap();
        let bytes = dir.to_bytes(CfbVersion::V3.layout()).unwrap();
        assert_eq!(bytes.len(), 512);

        let parsed = DirEntry::parse_all(&bytes).unwrap();
        assert_eq!(parsed[2], DirEntry::unused());
        assert_eq!(parsed[0].child, 1);
    }

    #[test]
    fn test_from_entries_round_trip() {
        let mut dir = Directory::new();
        let sub = dir.insert(ROOT_ID, "sub", ObjectType::Storage).unwrap();
        for name in ["x", "y", "z", "w"] {
            dir.insert(sub, name, ObjectType::Stream).unwrap();
        }
        let bytes = dir.to_bytes(CfbVersion::V3.layout()).unwrap();

        let loaded = Directory::from_entries(DirEntry::parse_all(&bytes).unwrap()).unwrap();
        assert_eq!(names(&loaded, sub), vec!["w", "x", "y", "z"]);
        assert_eq!(loaded.lookup(ROOT_ID, "SUB").unwrap(), sub);
        loaded.check_tree().unwrap();
    }

    #[test]
    fn test_from_entries_detects_cycle() {
        let mut dir = Directory::new();
        let a = dir.insert(ROOT_ID, "a", ObjectType::Stream).unwrap();
        let mut entries = dir.entries().to_vec();
        entries[a as usize].left = a;
        assert!(matches!(
            Directory::from_entries(entries),
            Err(CfbError::DirectoryCycle(id)) if id == a
        ));
    }

    #[test]
    fn test_from_entries_rejects_bad_links() {
        let mut entries = Directory::new().entries().to_vec();
        entries[0].child = 7;
        let err = Directory::from_entries(entries).unwrap_err();
        assert!(err.is_corruption());

        let mut dir = Directory::new();
        let a = dir.insert(ROOT_ID, "a", ObjectType::Stream).unwrap();
        let mut entries = dir.entries().to_vec();
        entries[a as usize].child = 0;
        assert!(matches!(
            Directory::from_entries(entries),
            Err(CfbError::InvalidDirectoryEntry { entry, .. }) if entry == a
        ));
    }

    #[test]
    fn test_from_entries_requires_root_first() {
        let entries = vec![DirEntry::unused()];
        assert!(Directory::from_entries(entries).is_err());
        assert!(Directory::from_entries(Vec::new()).is_err());
    }

    #[test]
    fn test_check_tree_reports_red_root() {
        let mut dir = Directory::new();
        let a = dir.insert(ROOT_ID, "a", ObjectType::Stream).unwrap();
        dir.set_color(a, Color::Red);
        assert!(dir.check_tree().is_err());
    }
}
