//! cfbpack command-line tool
//!
//! Packs a directory into a single Compound File Binary container and
//! unpacks containers back into directories, on top of `cfbpack-format`.
//!
//! # Usage
//!
//! ```text
//! cfbpack compress <SRC> [DEST] [--preserve-times]
//! cfbpack decompress <SRC> [DEST]
//! ```
//!
//! `--sector-size` (`CFBPACK_SECTOR_SIZE`) and `--max-size`
//! (`CFBPACK_MAX_SIZE`) apply to both commands.

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod commands;
pub mod config;
pub mod error;
pub mod fs_tree;

pub use commands::{compress_dir, decompress_file, run};
pub use config::{CliConfig, Command};
pub use error::{ConfigError, FsTreeError};
pub use fs_tree::{DiskTreeWriter, load_tree};
