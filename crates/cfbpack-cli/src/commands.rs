//! Compress and decompress operations driven by [`CliConfig`]

use crate::config::{CliConfig, Command};
use crate::fs_tree::{DiskTreeWriter, load_tree};
use anyhow::{Context, Result};
use cfbpack_format::{CfbOptions, compress, decompress};
use std::fs;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Run the configured command.
pub fn run(config: &CliConfig) -> Result<()> {
    let options = config.options();
    let destination = config.command.destination();
    match &config.command {
        Command::Compress {
            source,
            preserve_times,
            ..
        } => {
            compress_dir(source, &destination, &options, *preserve_times)?;
        }
        Command::Decompress { source, .. } => {
            decompress_file(source, &destination, &options)?;
        }
    }
    Ok(())
}

/// Pack `source` into a container at `destination`.
///
/// The container is built in memory, so nothing is written when the tree
/// is rejected. Returns the container size in bytes.
pub fn compress_dir(
    source: &Path,
    destination: &Path,
    options: &CfbOptions,
    preserve_times: bool,
) -> Result<u64> {
    let tree = load_tree(source, preserve_times)
        .with_context(|| format!("failed to load {}", source.display()))?;

    let mut container = Vec::new();
    let size = compress(&tree, &mut container, options)
        .with_context(|| format!("failed to encode {}", source.display()))?;
    fs::write(destination, &container)
        .with_context(|| format!("failed to write {}", destination.display()))?;

    info!(
        source = %source.display(),
        destination = %destination.display(),
        files = tree.root.file_count(),
        bytes = size,
        "compressed directory"
    );
    Ok(size)
}

/// Unpack the container at `source` into the directory `destination`.
///
/// The destination is created if needed; files already there with the
/// same names are overwritten. Returns the number of files written.
pub fn decompress_file(source: &Path, destination: &Path, options: &CfbOptions) -> Result<usize> {
    let file = fs::File::open(source)
        .with_context(|| format!("failed to open {}", source.display()))?;
    let mut writer = DiskTreeWriter::new(destination);
    decompress(BufReader::new(file), &mut writer, options)
        .with_context(|| format!("failed to decode {}", source.display()))?;

    info!(
        source = %source.display(),
        destination = %writer.root().display(),
        files = writer.files_written(),
        bytes = writer.bytes_written(),
        "decompressed container"
    );
    Ok(writer.files_written())
}
