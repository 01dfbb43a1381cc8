//! Container writer: plans the sector layout for a tree and emits the bytes
//!
//! Layout policy, fixed so output is reproducible:
//!
//! 1. Entry ids follow a depth-first pre-order walk, root first, children in
//!    input order. Every name is validated during this walk, before any
//!    sector is allocated.
//! 2. Streams below the mini cutoff go to the mini stream, the rest to the
//!    regular FAT, both in traversal order.
//! 3. FAT and DIFAT sector counts are found by iterating until stable, since
//!    the FAT also has to describe its own sectors.
//! 4. Sectors are assigned in emission order: FAT, DIFAT, MiniFAT,
//!    directory, mini stream, then each regular stream.

use crate::directory::{Directory, ObjectType, ROOT_ID};
use crate::error::{CfbError, CfbResult};
use crate::fat::{AllocationTable, FatSectorLocator};
use crate::header::CfbHeader;
use crate::minifat::MiniStream;
use crate::options::CfbOptions;
use crate::sector::{
    CfbVersion, DIFSECT, ENDOFCHAIN, FATSECT, HEADER_SIZE, MAXREGSECT, MINI_STREAM_CUTOFF,
    SectorLayout,
};
use crate::tree::{Node, Tree};
use std::io::Write;
use tracing::{debug, trace};

/// Stream payload bound to its directory entry
#[derive(Debug, Clone, Copy)]
struct PlannedStream<'t> {
    entry: u32,
    data: &'t [u8],
}

/// Sector counts of every region except the FAT and DIFAT
#[derive(Debug, Clone, Copy, Default)]
struct RegionSizes {
    mini_fat: usize,
    directory: usize,
    mini_stream: usize,
    streams: usize,
}

impl RegionSizes {
    fn data_sectors(&self) -> usize {
        self.mini_fat + self.directory + self.mini_stream + self.streams
    }
}

/// Builds a CFB container from a borrowed tree
#[derive(Debug, Clone, Copy)]
pub struct ContainerWriter<'t> {
    tree: &'t Tree,
    options: CfbOptions,
}

impl<'t> ContainerWriter<'t> {
    /// Create a writer for `tree`
    pub fn new(tree: &'t Tree, options: CfbOptions) -> Self {
        Self { tree, options }
    }

    /// Build the complete container in memory
    pub fn build(&self) -> CfbResult<Vec<u8>> {
        let version = self.options.version;
        let layout = version.layout();
        let (mut directory, streams) = self.plan_directory()?;

        let mut mini = MiniStream::new();
        let mut regular = Vec::new();
        for stream in streams {
            if stream.data.len() < MINI_STREAM_CUTOFF as usize {
                let start = mini.push_stream(stream.data)?;
                directory.set_stream(stream.entry, start, stream.data.len() as u64);
            } else {
                regular.push(stream);
            }
        }

        let per_dir_sector = layout.sector_size() / crate::directory::DIR_ENTRY_SIZE;
        let sizes = RegionSizes {
            mini_fat: mini.table().sector_count(layout),
            directory: directory.len().div_ceil(per_dir_sector),
            mini_stream: sector_count(layout, mini.data().len()),
            streams: regular
                .iter()
                .map(|s| sector_count(layout, s.data.len()))
                .sum(),
        };
        let (fat_sectors, difat_sectors) = size_fat(sizes.data_sectors(), layout);
        let total = fat_sectors + difat_sectors + sizes.data_sectors();
        self.check_limits(total, layout)?;

        debug!(
            entries = directory.len(),
            mini_sectors = mini.table().len(),
            regular_streams = regular.len(),
            fat_sectors,
            difat_sectors,
            total_sectors = total,
            "planned container layout"
        );

        let mut fat = AllocationTable::new();
        let fat_ids = fat.reserve(fat_sectors, FATSECT)?;
        let difat_ids = fat.reserve(difat_sectors, DIFSECT)?;
        let mini_fat_start = fat.allocate(sizes.mini_fat)?;
        let directory_start = fat.allocate(sizes.directory)?;
        let mini_stream_start = fat.allocate(sizes.mini_stream)?;
        directory.set_stream(ROOT_ID, mini_stream_start, mini.data().len() as u64);

        let mut regular_starts = Vec::with_capacity(regular.len());
        for stream in &regular {
            let start = fat.allocate(sector_count(layout, stream.data.len()))?;
            directory.set_stream(stream.entry, start, stream.data.len() as u64);
            regular_starts.push(start);
        }

        let (inline_difat, difat_bytes) = FatSectorLocator::encode(&fat_ids, &difat_ids, layout);
        let mut header = CfbHeader::new(version);
        header.num_fat_sectors = fat_sectors as u32;
        header.first_directory_sector = directory_start;
        if version == CfbVersion::V4 {
            header.num_directory_sectors = sizes.directory as u32;
        }
        header.first_mini_fat_sector = mini_fat_start;
        header.num_mini_fat_sectors = sizes.mini_fat as u32;
        header.first_difat_sector = difat_ids.first().copied().unwrap_or(ENDOFCHAIN);
        header.num_difat_sectors = difat_sectors as u32;
        header.difat = inline_difat;

        let mut out = vec![0u8; (total + 1) * layout.sector_size()];
        out[..HEADER_SIZE].copy_from_slice(&header.to_bytes()?);

        let mut emitter = SectorEmitter {
            out: &mut out,
            layout,
            fat: &fat,
        };
        emitter.place_ids(&fat_ids, &fat.to_bytes(layout));
        emitter.place_ids(&difat_ids, &difat_bytes);
        emitter.place_chain(mini_fat_start, &mini.table().to_bytes(layout))?;
        emitter.place_chain(directory_start, &directory.to_bytes(layout)?)?;
        emitter.place_chain(mini_stream_start, mini.data())?;
        for (stream, &start) in regular.iter().zip(&regular_starts) {
            emitter.place_chain(start, stream.data)?;
        }

        Ok(out)
    }

    /// Build the container and write it with a single `write_all`
    pub fn write_to<W: Write>(&self, mut writer: W) -> CfbResult<u64> {
        let bytes = self.build()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(bytes.len() as u64)
    }

    /// Assign entry ids in pre-order and collect stream payloads
    fn plan_directory(&self) -> CfbResult<(Directory, Vec<PlannedStream<'t>>)> {
        let tree: &'t Tree = self.tree;
        let root = &tree.root;
        let mut directory = Directory::new();
        directory.set_times(
            ROOT_ID,
            root.created.map_or(0, |t| t.raw()),
            root.modified.map_or(0, |t| t.raw()),
        );

        let mut streams = Vec::new();
        let mut pending: Vec<(u32, &'t Node)> =
            root.children.iter().rev().map(|node| (ROOT_ID, node)).collect();

        while let Some((parent, node)) = pending.pop() {
            match node {
                Node::Folder(folder) => {
                    let id = directory.insert(parent, &folder.name, ObjectType::Storage)?;
                    directory.set_times(
                        id,
                        folder.created.map_or(0, |t| t.raw()),
                        folder.modified.map_or(0, |t| t.raw()),
                    );
                    pending.extend(folder.children.iter().rev().map(|child| (id, child)));
                }
                Node::File(file) => {
                    self.check_stream_size(&file.name, file.data.len())?;
                    let id = directory.insert(parent, &file.name, ObjectType::Stream)?;
                    streams.push(PlannedStream {
                        entry: id,
                        data: &file.data,
                    });
                }
            }
        }
        Ok((directory, streams))
    }

    fn check_stream_size(&self, name: &str, len: usize) -> CfbResult<()> {
        let len = len as u64;
        if self.options.version == CfbVersion::V3 && len > u64::from(u32::MAX) {
            trace!(name, len, "stream exceeds version 3 size field");
            return Err(CfbError::TooLarge {
                what: "version 3 stream",
                size: len,
                limit: u64::from(u32::MAX),
            });
        }
        Ok(())
    }

    fn check_limits(&self, total_sectors: usize, layout: SectorLayout) -> CfbResult<()> {
        if total_sectors > MAXREGSECT as usize + 1 {
            return Err(CfbError::TooLarge {
                what: "sector count",
                size: total_sectors as u64,
                limit: u64::from(MAXREGSECT) + 1,
            });
        }
        let container_size = (total_sectors as u64 + 1) * layout.sector_size() as u64;
        if container_size > self.options.max_container_size {
            return Err(CfbError::TooLarge {
                what: "container",
                size: container_size,
                limit: self.options.max_container_size,
            });
        }
        usize::try_from(container_size).map_err(|_| CfbError::TooLarge {
            what: "container",
            size: container_size,
            limit: usize::MAX as u64,
        })?;
        Ok(())
    }
}

/// Find FAT and DIFAT sector counts covering `data_sectors` plus themselves
fn size_fat(data_sectors: usize, layout: SectorLayout) -> (usize, usize) {
    let per_sector = layout.entries_per_sector();
    let (mut fat, mut difat) = (0, 0);
    loop {
        let total = fat + difat + data_sectors;
        let needed_fat = total.div_ceil(per_sector);
        let needed_difat = FatSectorLocator::difat_sectors_for(needed_fat, layout);
        if needed_fat == fat && needed_difat == difat {
            return (fat, difat);
        }
        fat = needed_fat;
        difat = needed_difat;
    }
}

fn sector_count(layout: SectorLayout, len: usize) -> usize {
    len.div_ceil(layout.sector_size())
}

/// Copies region bytes into their sectors of the output buffer
struct SectorEmitter<'a> {
    out: &'a mut [u8],
    layout: SectorLayout,
    fat: &'a AllocationTable,
}

impl SectorEmitter<'_> {
    fn place_chain(&mut self, start: u32, bytes: &[u8]) -> CfbResult<()> {
        let chain = self.fat.chain(start)?;
        self.place_ids(&chain, bytes);
        Ok(())
    }

    fn place_ids(&mut self, ids: &[u32], bytes: &[u8]) {
        let size = self.layout.sector_size();
        for (&id, chunk) in ids.iter().zip(bytes.chunks(size)) {
            let offset = self.layout.offset(id) as usize;
            self.out[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directory::DirEntry;
    use crate::sector::FREESECT;
    use crate::tree::Folder;
    use pretty_assertions::assert_eq;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_empty_tree_layout() {
        let tree = Tree::new();
        let bytes = ContainerWriter::new(&tree, CfbOptions::default())
            .build()
            .unwrap();

        // Header, one FAT sector, one directory sector
        assert_eq!(bytes.len(), 3 * 512);
        assert_eq!(u32_at(&bytes, 0x2C), 1);
        assert_eq!(u32_at(&bytes, 0x30), 1);
        assert_eq!(u32_at(&bytes, 0x3C), ENDOFCHAIN);
        assert_eq!(u32_at(&bytes, 0x4C), 0);
        assert_eq!(u32_at(&bytes, 0x50), FREESECT);

        // FAT: [FATSECT, ENDOFCHAIN, FREESECT...]
        assert_eq!(u32_at(&bytes, 512), FATSECT);
        assert_eq!(u32_at(&bytes, 516), ENDOFCHAIN);
        assert_eq!(u32_at(&bytes, 520), FREESECT);

        let root = &DirEntry::parse_all(&bytes[1024..1152]).unwrap()[0];
        assert_eq!(root.start_sector, ENDOFCHAIN);
        assert_eq!(root.stream_size, 0);
        assert_eq!(root.child, crate::directory::NOSTREAM);
    }

    #[test]
    fn test_entry_ids_follow_preorder() {
        let tree = Tree::new()
            .with_folder(Folder::new("b").with_file("inner", b"x".to_vec()))
            .with_file("a", b"y".to_vec());
        let (directory, streams) = ContainerWriter::new(&tree, CfbOptions::default())
            .plan_directory()
            .unwrap();

        assert_eq!(directory.name(1), Some("b"));
        assert_eq!(directory.name(2), Some("inner"));
        assert_eq!(directory.name(3), Some("a"));
        let ids: Vec<u32> = streams.iter().map(|s| s.entry).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_regions_in_emission_order() {
        let tree = Tree::new()
            .with_file("small", vec![1u8; 10])
            .with_file("large", vec![2u8; 5000]);
        let bytes = ContainerWriter::new(&tree, CfbOptions::default())
            .build()
            .unwrap();

        // FAT 0, MiniFAT 1, directory 2, mini stream 3, large stream 4..14
        assert_eq!(u32_at(&bytes, 0x3C), 1);
        assert_eq!(u32_at(&bytes, 0x30), 2);
        let entries = DirEntry::parse_all(&bytes[3 * 512..4 * 512]).unwrap();
        assert_eq!(entries[0].start_sector, 3);
        assert_eq!(entries[0].stream_size, 64);
        assert_eq!(entries[2].start_sector, 4);
        assert_eq!(entries[2].stream_size, 5000);
        assert_eq!(bytes.len(), 512 * (1 + 4 + 10));
        assert!(bytes[5 * 512..5 * 512 + 5000].iter().all(|&b| b == 2));
    }

    #[test]
    fn test_fat_sizing_is_self_consistent() {
        let layout = CfbVersion::V3.layout();
        assert_eq!(size_fat(1, layout), (1, 0));
        // 127 data sectors plus the FAT itself fill one FAT sector exactly
        assert_eq!(size_fat(127, layout), (1, 0));
        assert_eq!(size_fat(128, layout), (2, 0));

        // Past 109 FAT sectors a DIFAT sector is needed
        let (fat, difat) = size_fat(109 * 128, layout);
        assert!(fat > 109);
        assert_eq!(difat, 1);
        assert!((fat + difat + 109 * 128).div_ceil(128) <= fat);
    }

    #[test]
    fn test_container_limit_enforced_before_writing() {
        let tree = Tree::new().with_file("big", vec![0u8; 10_000]);
        let options = CfbOptions::default().with_max_container_size(4096);
        let mut sink = Vec::new();
        let err = ContainerWriter::new(&tree, options)
            .write_to(&mut sink)
            .unwrap_err();
        assert!(matches!(err, CfbError::TooLarge { what: "container", .. }));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_v4_header_padded_to_full_sector() {
        let tree = Tree::new().with_file("a", b"abc".to_vec());
        let options = CfbOptions::default().with_version(CfbVersion::V4);
        let bytes = ContainerWriter::new(&tree, options).build().unwrap();

        assert_eq!(bytes.len() % 4096, 0);
        assert!(bytes[512..4096].iter().all(|&b| b == 0));
        assert_eq!(u32_at(&bytes, 0x28), 1);
        assert_eq!(u32_at(&bytes, 4096), FATSECT);
    }
}
