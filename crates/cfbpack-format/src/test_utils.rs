//! Test utilities shared by the unit test modules

use crate::{CfbOptions, FileTime, Folder, Tree, compress, decompress_to_tree};

/// Small tree touching every storage path: mini streams, a regular stream,
/// an empty stream, nested folders and folder timestamps
pub fn sample_tree() -> Tree {
    Tree::new()
        .with_file("notes.txt", b"plain text payload".to_vec())
        .with_file("empty", Vec::new())
        .with_folder(
            Folder::new("assets")
                .with_times(
                    Some(FileTime::from_raw(132_000_000_000_000_000)),
                    Some(FileTime::from_raw(133_000_000_000_000_000)),
                )
                .with_file("large.bin", (0..10_000u32).map(|i| i as u8).collect::<Vec<u8>>())
                .with_folder(Folder::new("nested").with_file("deep", vec![7u8; 100])),
        )
}

/// Compress then decompress, returning the canonicalized result
pub fn round_trip(tree: &Tree, options: &CfbOptions) -> Tree {
    let mut container = Vec::new();
    compress(tree, &mut container, options).expect("compress should succeed");
    let mut decoded =
        decompress_to_tree(container.as_slice(), options).expect("decompress should succeed");
    decoded.canonicalize();
    decoded
}
