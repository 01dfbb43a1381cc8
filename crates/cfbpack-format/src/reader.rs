//! Container reader: parses a CFB byte buffer and extracts stream payloads

use crate::directory::{DirEntry, Directory, ObjectType, ROOT_ID};
use crate::error::{CfbError, CfbResult};
use crate::fat::{AllocationTable, FatSectorLocator};
use crate::header::CfbHeader;
use crate::minifat::MiniStream;
use crate::options::CfbOptions;
use crate::sector::{CfbVersion, MINI_SECTOR_SIZE, MINI_STREAM_CUTOFF, SectorLayout, SectorView};
use crate::tree::{FileTime, Tree, TreeBuilder};
use std::io::Read;
use tracing::{debug, info};

/// Parsed container with its allocation tables and directory
#[derive(Debug, Clone)]
pub struct ContainerReader {
    data: Vec<u8>,
    header: CfbHeader,
    version: CfbVersion,
    fat: AllocationTable,
    directory: Directory,
    mini: MiniStream,
}

impl ContainerReader {
    /// Read a whole container from `reader`, bounded by the configured size limit
    pub fn from_reader<R: Read>(reader: R, options: &CfbOptions) -> CfbResult<Self> {
        let limit = options.max_container_size;
        let mut data = Vec::new();
        reader.take(limit.saturating_add(1)).read_to_end(&mut data)?;
        if data.len() as u64 > limit {
            return Err(CfbError::TooLarge {
                what: "container",
                size: data.len() as u64,
                limit,
            });
        }
        Self::from_bytes(data)
    }

    /// Parse a container held in memory
    pub fn from_bytes(data: Vec<u8>) -> CfbResult<Self> {
        let header = CfbHeader::parse(&data)?;
        let version = header.version()?;
        let layout = header.layout();
        let view = SectorView::new(&data, layout);

        let fat = FatSectorLocator::new(&header, view)
            .load_fat()
            .map_err(|err| dangling("FAT", err))?;
        debug!(
            version = version.major_version(),
            sectors = view.sector_count(),
            fat_entries = fat.len(),
            "loaded FAT"
        );

        let directory_chain = fat.chain(header.first_directory_sector)?;
        if directory_chain.is_empty() {
            return Err(CfbError::InvalidDirectoryEntry {
                entry: ROOT_ID,
                reason: "container has no directory sectors".to_string(),
            });
        }
        let directory_bytes = view
            .read_chain(&directory_chain, directory_chain.len() * layout.sector_size())
            .map_err(|err| dangling("directory", err))?;
        let directory = Directory::from_entries(DirEntry::parse_all(&directory_bytes)?)?;

        let mini_fat_chain = fat.chain(header.first_mini_fat_sector)?;
        let mini_fat_bytes = view
            .read_chain(&mini_fat_chain, mini_fat_chain.len() * layout.sector_size())
            .map_err(|err| dangling("MiniFAT", err))?;
        let mini_fat = AllocationTable::from_bytes(&mini_fat_bytes);

        let root = &directory.entries()[ROOT_ID as usize];
        let mini_size = stream_size(version, root);
        let mini_data = if mini_size == 0 {
            Vec::new()
        } else {
            let chain = fat.chain(root.start_sector)?;
            check_chain_len(ROOT_ID, chain.len(), layout.sector_size(), mini_size)?;
            view.read_chain(&chain, to_usize(mini_size)?)
                .map_err(|err| dangling("mini stream", err))?
        };
        let mini = MiniStream::from_parts(mini_fat, mini_data);

        Ok(Self {
            data,
            header,
            version,
            fat,
            directory,
            mini,
        })
    }

    /// Parsed header
    pub fn header(&self) -> &CfbHeader {
        &self.header
    }

    /// Container version
    pub fn version(&self) -> CfbVersion {
        self.version
    }

    /// Regular FAT
    pub fn fat(&self) -> &AllocationTable {
        &self.fat
    }

    /// Directory tree
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// MiniFAT and mini stream contents
    pub fn mini_stream(&self) -> &MiniStream {
        &self.mini
    }

    /// Payload of one stream entry
    ///
    /// The chain must hold exactly as many sectors (or mini sectors) as the
    /// recorded size needs.
    pub fn read_stream(&self, id: u32) -> CfbResult<Vec<u8>> {
        let entry = self
            .directory
            .entry(id)
            .filter(|entry| entry.kind() == Some(ObjectType::Stream))
            .ok_or_else(|| CfbError::NotFound(format!("stream entry {id}")))?;

        let size = stream_size(self.version, entry);
        if size == 0 {
            return Ok(Vec::new());
        }
        let len = to_usize(size)?;

        if size < u64::from(MINI_STREAM_CUTOFF) {
            let chain = self.mini.table().chain(entry.start_sector)?;
            check_chain_len(id, chain.len(), MINI_SECTOR_SIZE, size)?;
            self.mini.read_chain(&chain, len)
        } else {
            let chain = self.fat.chain(entry.start_sector)?;
            check_chain_len(id, chain.len(), self.layout().sector_size(), size)?;
            SectorView::new(&self.data, self.layout())
                .read_chain(&chain, len)
                .map_err(|err| dangling(&format!("entry {id}"), err))
        }
    }

    /// Replay the hierarchy into `builder`, parents before children
    ///
    /// Every stream is read and checked before the first callback, so a
    /// corrupt container leaves `builder` untouched.
    pub fn walk<B: TreeBuilder + ?Sized>(&self, builder: &mut B) -> CfbResult<()> {
        let nodes = self.decode_nodes()?;
        let (mut folders, mut files) = (0usize, 0usize);

        for (path, node) in &nodes {
            match node {
                Decoded::Folder { created, modified } => {
                    builder.add_folder(path, *created, *modified)?;
                    if !path.is_empty() {
                        folders += 1;
                    }
                }
                Decoded::File(payload) => {
                    builder.add_file(path, payload)?;
                    files += 1;
                }
            }
        }

        info!(folders, files, "decoded container");
        Ok(())
    }

    /// Decode into an owned tree
    pub fn to_tree(&self) -> CfbResult<Tree> {
        let mut tree = Tree::new();
        self.walk(&mut tree)?;
        Ok(tree)
    }

    /// Pre-order list of every node with its payload, root first
    fn decode_nodes(&self) -> CfbResult<Vec<(Vec<String>, Decoded)>> {
        let root = &self.directory.entries()[ROOT_ID as usize];
        let mut nodes = vec![(Vec::new(), Decoded::folder(root))];

        let mut pending: Vec<(u32, Vec<String>)> = self
            .child_paths(ROOT_ID, &[])?
            .into_iter()
            .rev()
            .collect();

        while let Some((id, path)) = pending.pop() {
            let entry = &self.directory.entries()[id as usize];
            if entry.kind() == Some(ObjectType::Storage) {
                pending.extend(self.child_paths(id, &path)?.into_iter().rev());
                nodes.push((path, Decoded::folder(entry)));
            } else {
                let payload = self.read_stream(id)?;
                nodes.push((path, Decoded::File(payload)));
            }
        }
        Ok(nodes)
    }

    fn layout(&self) -> SectorLayout {
        self.header.layout()
    }

    fn child_paths(&self, parent: u32, path: &[String]) -> CfbResult<Vec<(u32, Vec<String>)>> {
        Ok(self
            .directory
            .children(parent)?
            .into_iter()
            .map(|id| {
                let mut child = path.to_vec();
                child.push(self.directory.name(id).unwrap_or_default().to_string());
                (id, child)
            })
            .collect())
    }
}

/// Node decoded ahead of replay
#[derive(Debug)]
enum Decoded {
    Folder {
        created: Option<FileTime>,
        modified: Option<FileTime>,
    },
    File(Vec<u8>),
}

impl Decoded {
    fn folder(entry: &DirEntry) -> Self {
        Self::Folder {
            created: FileTime::non_zero(entry.created),
            modified: FileTime::non_zero(entry.modified),
        }
    }
}

/// Reclassify a read past the physical end as a dangling chain of `owner`
fn dangling(owner: &str, err: CfbError) -> CfbError {
    match err {
        CfbError::SectorOutOfRange { sector, count } => CfbError::DanglingSector {
            owner: owner.to_string(),
            sector,
            count,
        },
        other => other,
    }
}

/// Recorded stream size; version 3 only defines the low 32 bits
fn stream_size(version: CfbVersion, entry: &DirEntry) -> u64 {
    match version {
        CfbVersion::V3 => entry.stream_size & u64::from(u32::MAX),
        CfbVersion::V4 => entry.stream_size,
    }
}

fn check_chain_len(entry: u32, chain_len: usize, unit: usize, size: u64) -> CfbResult<()> {
    let expected = size.div_ceil(unit as u64);
    if chain_len as u64 != expected {
        return Err(CfbError::StreamSizeMismatch {
            entry,
            expected: size,
            actual: chain_len as u64 * unit as u64,
        });
    }
    Ok(())
}

fn to_usize(size: u64) -> CfbResult<usize> {
    usize::try_from(size).map_err(|_| CfbError::TooLarge {
        what: "stream",
        size,
        limit: usize::MAX as u64,
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sector::ENDOFCHAIN;
    use crate::tree::Folder;
    use crate::writer::ContainerWriter;
    use pretty_assertions::assert_eq;

    fn build(tree: &Tree) -> Vec<u8> {
        ContainerWriter::new(tree, CfbOptions::default())
            .build()
            .expect("tree should build")
    }

    #[test]
    fn test_reads_streams_by_id() {
        let tree = Tree::new()
            .with_file("tiny", b"abc".to_vec())
            .with_file("big", vec![9u8; 6000]);
        let reader = ContainerReader::from_bytes(build(&tree)).unwrap();

        let tiny = reader.directory().lookup(ROOT_ID, "tiny").unwrap();
        let big = reader.directory().lookup(ROOT_ID, "big").unwrap();
        assert_eq!(reader.read_stream(tiny).unwrap(), b"abc");
        assert_eq!(reader.read_stream(big).unwrap(), vec![9u8; 6000]);
        assert!(matches!(
            reader.read_stream(ROOT_ID),
            Err(CfbError::NotFound(_))
        ));
    }

    struct Recorder(Vec<String>);

    impl TreeBuilder for Recorder {
        fn add_folder(
            &mut self,
            path: &[String],
            _: Option<FileTime>,
            _: Option<FileTime>,
        ) -> std::io::Result<()> {
            self.0.push(format!("D {}", path.join("/")));
            Ok(())
        }
        fn add_file(&mut self, path: &[String], data: &[u8]) -> std::io::Result<()> {
            self.0.push(format!("F {} {}", path.join("/"), data.len()));
            Ok(())
        }
    }

    #[test]
    fn test_walk_is_parent_first() {
        let tree = Tree::new()
            .with_folder(Folder::new("dir").with_file("x", vec![1; 5]))
            .with_file("y", Vec::new());
        let reader = ContainerReader::from_bytes(build(&tree)).unwrap();
        let mut recorder = Recorder(Vec::new());
        reader.walk(&mut recorder).unwrap();

        assert_eq!(recorder.0, vec!["D ", "F y 0", "D dir", "F dir/x 5"]);
    }

    #[test]
    fn test_corrupt_later_stream_emits_nothing() {
        let tree = Tree::new()
            .with_file("a", vec![1; 10])
            .with_file("zz", vec![2; 5000]);
        let mut bytes = build(&tree);

        // Loop the last sector of "zz" back to its first
        let reader = ContainerReader::from_bytes(bytes.clone()).unwrap();
        let id = reader.directory().lookup(ROOT_ID, "zz").unwrap();
        let start = reader.directory().entry(id).unwrap().start_sector;
        let last = *reader.fat().chain(start).unwrap().last().unwrap();
        let layout = CfbVersion::V3.layout();
        let offset = layout.offset(reader.header().difat[0]) as usize + 4 * last as usize;
        bytes[offset..offset + 4].copy_from_slice(&start.to_le_bytes());

        let reader = ContainerReader::from_bytes(bytes).unwrap();
        let mut recorder = Recorder(Vec::new());
        let err = reader.walk(&mut recorder).unwrap_err();
        assert!(err.is_corruption(), "got {err:?}");
        assert_eq!(recorder.0, Vec::<String>::new());
    }

    #[test]
    fn test_stream_past_end_is_dangling() {
        let tree = Tree::new().with_file("big", vec![3u8; 20_000]);
        let mut bytes = build(&tree);
        bytes.truncate(bytes.len() - 2048);

        let reader = ContainerReader::from_bytes(bytes).unwrap();
        let err = reader.read_stream(1).unwrap_err();
        assert!(
            matches!(&err, CfbError::DanglingSector { owner, .. } if owner.as_str() == "entry 1"),
            "got {err:?}"
        );
        assert!(err.is_corruption());
    }

    #[test]
    fn test_empty_stream_ignores_start_sector() {
        let tree = Tree::new().with_file("empty", Vec::new());
        let reader = ContainerReader::from_bytes(build(&tree)).unwrap();
        let id = reader.directory().lookup(ROOT_ID, "empty").unwrap();
        assert_eq!(reader.directory().entry(id).unwrap().start_sector, ENDOFCHAIN);
        assert!(reader.read_stream(id).unwrap().is_empty());
    }

    #[test]
    fn test_size_mismatch_is_corruption() {
        let tree = Tree::new().with_file("big", vec![1u8; 5000]);
        let mut bytes = build(&tree);

        // Record a size for entry 1 that its chain cannot hold
        let reader = ContainerReader::from_bytes(bytes.clone()).unwrap();
        let dir_sector = reader.header().first_directory_sector;
        let offset = CfbVersion::V3.layout().offset(dir_sector) as usize + 128 + 0x78;
        bytes[offset..offset + 8].copy_from_slice(&9000u64.to_le_bytes());

        let reader = ContainerReader::from_bytes(bytes).unwrap();
        let err = reader.read_stream(1).unwrap_err();
        assert!(matches!(err, CfbError::StreamSizeMismatch { entry: 1, .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_v3_size_uses_low_32_bits() {
        let mut entry = DirEntry::unused();
        entry.stream_size = 0x0000_0001_0000_0010;
        assert_eq!(stream_size(CfbVersion::V3, &entry), 0x10);
        assert_eq!(stream_size(CfbVersion::V4, &entry), 0x0000_0001_0000_0010);
    }

    #[test]
    fn test_limit_applies_to_input() {
        let bytes = build(&Tree::new());
        let options = CfbOptions::default().with_max_container_size(1000);
        assert!(matches!(
            ContainerReader::from_reader(bytes.as_slice(), &options),
            Err(CfbError::TooLarge { .. })
        ));
        assert!(ContainerReader::from_reader(bytes.as_slice(), &CfbOptions::default()).is_ok());
    }
}
