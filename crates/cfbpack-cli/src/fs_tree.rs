//! Mapping between on-disk directories and container trees

use crate::error::FsTreeError;
use cfbpack_format::{FileTime, Tree, TreeBuilder};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Load `dir` and everything below it into a [`Tree`]
///
/// Symbolic links are not followed and are skipped along with other
/// special files. With `preserve_times`, folder creation and modification
/// times are carried into the tree.
pub fn load_tree(dir: &Path, preserve_times: bool) -> Result<Tree, FsTreeError> {
    let mut tree = Tree::new();
    if preserve_times {
        let (created, modified) = folder_times(dir)?;
        add(tree.add_folder(&[], created, modified), dir)?;
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;
        let path = relative_components(dir, entry.path())?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let (created, modified) = if preserve_times {
                folder_times(entry.path())?
            } else {
                (None, None)
            };
            add(tree.add_folder(&path, created, modified), entry.path())?;
        } else if file_type.is_file() {
            let data = fs::read(entry.path()).map_err(|source| FsTreeError::Read {
                path: entry.path().to_path_buf(),
                source,
            })?;
            add(tree.add_file(&path, &data), entry.path())?;
        } else {
            warn!(path = %entry.path().display(), "skipping special file");
        }
    }

    debug!(
        root = %dir.display(),
        files = tree.root.file_count(),
        "loaded directory"
    );
    Ok(tree)
}

fn add(result: io::Result<()>, path: &Path) -> Result<(), FsTreeError> {
    result.map_err(|source| FsTreeError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn relative_components(root: &Path, path: &Path) -> Result<Vec<String>, FsTreeError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| FsTreeError::NonUtf8Name(path.to_path_buf()))?;
    relative
        .iter()
        .map(|part| {
            part.to_str()
                .map(str::to_string)
                .ok_or_else(|| FsTreeError::NonUtf8Name(path.to_path_buf()))
        })
        .collect()
}

fn folder_times(path: &Path) -> Result<(Option<FileTime>, Option<FileTime>), FsTreeError> {
    let metadata = fs::metadata(path).map_err(|source| FsTreeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    // Not every platform reports a creation time
    let created = metadata.created().ok().map(FileTime::from_system_time);
    let modified = metadata.modified().ok().map(FileTime::from_system_time);
    Ok((created, modified))
}

/// [`TreeBuilder`] that materializes a decoded container under a directory
///
/// Existing folders are reused and existing files overwritten. Names that
/// could escape the destination (`.`, `..`, separators, drive prefixes)
/// are refused.
#[derive(Debug)]
pub struct DiskTreeWriter {
    root: PathBuf,
    files: usize,
    bytes: u64,
}

impl DiskTreeWriter {
    /// Writer rooted at `root`, created on the first callback if missing
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: 0,
            bytes: 0,
        }
    }

    /// Destination directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files written so far
    pub fn files_written(&self) -> usize {
        self.files
    }

    /// Payload bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    fn resolve(&self, path: &[String]) -> io::Result<PathBuf> {
        let mut target = self.root.clone();
        for name in path {
            check_component(name)?;
            target.push(name);
        }
        Ok(target)
    }
}

fn check_component(name: &str) -> io::Result<()> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal || name.contains(['/', '\\', '\0']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing unsafe entry name {name:?}"),
        ));
    }
    Ok(())
}

impl TreeBuilder for DiskTreeWriter {
    fn add_folder(
        &mut self,
        path: &[String],
        _created: Option<FileTime>,
        _modified: Option<FileTime>,
    ) -> io::Result<()> {
        let target = self.resolve(path)?;
        fs::create_dir_all(&target)
    }

    fn add_file(&mut self, path: &[String], data: &[u8]) -> io::Result<()> {
        if path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file entry has an empty path",
            ));
        }
        let target = self.resolve(path)?;
        fs::write(&target, data)?;
        self.files += 1;
        self.bytes += data.len() as u64;
        Ok(())
    }
}
