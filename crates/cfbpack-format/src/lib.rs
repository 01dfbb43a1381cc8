//! Compound File Binary (CFB) container codec
//!
#![allow(clippy::cast_possible_truncation)] // Sector ids and counts are 32-bit on disk
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::doc_markdown)] // Format terms (MiniFAT, DIFAT) don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // fat/difat, start/stream naming
#![allow(clippy::needless_pass_by_value)] // Options types
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::use_self)] // Type clarity
//! This crate converts between an in-memory directory tree and a single
//! CFB container (the sector-based "filesystem in a file" used by legacy
//! Office documents and MSI packages), in both directions.
//!
//! # Layers
//!
//! - **Sector model**: sector offsets and views over the container bytes
//! - **FAT / MiniFAT**: next-pointer allocation tables, the DIFAT-aware FAT
//!   sector locator and the mini stream
//! - **Directory**: 128-byte entries arranged as red-black sibling trees
//! - **Header**: the fixed 512-byte prologue
//! - **Reader / Writer**: whole-container decode and encode
//!
//! # Example
//!
//! ```
//! use cfbpack_format::{CfbOptions, Folder, Tree, compress, decompress_to_tree};
//!
//! let tree = Tree::new()
//!     .with_file("readme.txt", b"hello".to_vec())
//!     .with_folder(Folder::new("data").with_file("blob.bin", vec![0u8; 5000]));
//!
//! let mut container = Vec::new();
//! compress(&tree, &mut container, &CfbOptions::default())?;
//!
//! let decoded = decompress_to_tree(container.as_slice(), &CfbOptions::default())?;
//! assert_eq!(decoded.canonical(), tree.canonical());
//! # Ok::<(), cfbpack_format::CfbError>(())
//! ```
//!
//! Whole containers are built and read in memory; the size accepted in
//! either direction is capped by [`CfbOptions::max_container_size`].

#![warn(missing_docs)]

/// Directory entries and red-black sibling trees
pub mod directory;
/// Error types
pub mod error;
/// FAT and FAT sector location, including DIFAT
pub mod fat;
/// 512-byte container header
pub mod header;
/// MiniFAT and mini stream
pub mod minifat;
/// Codec options
pub mod options;
/// Container decoding
pub mod reader;
/// Sector arithmetic
pub mod sector;
/// In-memory tree and the builder callback trait
pub mod tree;
/// Container encoding
pub mod writer;

// Test utilities module
#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub(crate) mod test_utils;

pub use error::{CfbError, CfbResult};
pub use options::CfbOptions;
pub use reader::ContainerReader;
pub use sector::CfbVersion;
pub use tree::{File, FileTime, Folder, Node, Tree, TreeBuilder};
pub use writer::ContainerWriter;

use std::io::{Read, Write};

/// Encode `tree` as a CFB container and write it to `writer`
///
/// The tree is validated in full (names, duplicates, size limits) before
/// anything is written. Returns the number of bytes written.
pub fn compress<W: Write>(tree: &Tree, writer: W, options: &CfbOptions) -> CfbResult<u64> {
    ContainerWriter::new(tree, *options).write_to(writer)
}

/// Decode a CFB container from `reader`, replaying it into `builder`
///
/// The builder sees the root folder first (empty path), then every node
/// after its parent, siblings in directory order.
pub fn decompress<R: Read, B: TreeBuilder + ?Sized>(
    reader: R,
    builder: &mut B,
    options: &CfbOptions,
) -> CfbResult<()> {
    ContainerReader::from_reader(reader, options)?.walk(builder)
}

/// Decode a CFB container into an owned [`Tree`]
pub fn decompress_to_tree<R: Read>(reader: R, options: &CfbOptions) -> CfbResult<Tree> {
    ContainerReader::from_reader(reader, options)?.to_tree()
}
