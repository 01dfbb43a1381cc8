//! Command-line configuration.
//!
//! Options come from CLI arguments, with environment variable fallbacks
//! for the codec settings:
//! - `--sector-size` / `CFBPACK_SECTOR_SIZE` (512 or 4096)
//! - `--max-size` / `CFBPACK_MAX_SIZE` (container size cap in bytes)
//!
//! # Example
//!
//! ```no_run
//! use cfbpack_cli::CliConfig;
//!
//! let config = CliConfig::from_args();
//! config.validate().expect("Invalid configuration");
//! println!("writing to {}", config.command.destination().display());
//! ```

use crate::error::ConfigError;
use cfbpack_format::options::DEFAULT_MAX_CONTAINER_SIZE;
use cfbpack_format::{CfbOptions, CfbVersion};
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Extension appended to compressed directories.
pub const CONTAINER_EXTENSION: &str = "cfb";

/// Top-level configuration loaded from CLI args and environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cfbpack",
    about = "Pack a directory into a Compound File Binary container and back",
    version
)]
pub struct CliConfig {
    /// Sector size of written containers (512 for version 3, 4096 for version 4)
    #[arg(
        long,
        global = true,
        env = "CFBPACK_SECTOR_SIZE",
        default_value_t = 512
    )]
    pub sector_size: usize,

    /// Largest container written or accepted, in bytes
    #[arg(
        long,
        global = true,
        env = "CFBPACK_MAX_SIZE",
        default_value_t = DEFAULT_MAX_CONTAINER_SIZE
    )]
    pub max_size: u64,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,
}

/// Operations supported by the tool.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Pack a directory into a container
    Compress {
        /// Directory to pack
        source: PathBuf,
        /// Output container (defaults to SOURCE.cfb)
        destination: Option<PathBuf>,
        /// Record directory creation and modification times in the container
        ///
        /// Times are stored for other readers; `decompress` does not restore
        /// them on the created directories.
        #[arg(long)]
        preserve_times: bool,
    },
    /// Unpack a container into a directory
    Decompress {
        /// Container to unpack
        source: PathBuf,
        /// Output directory (defaults to SOURCE without its extension)
        destination: Option<PathBuf>,
    },
}

impl Command {
    /// Input path.
    pub fn source(&self) -> &Path {
        match self {
            Self::Compress { source, .. } | Self::Decompress { source, .. } => source,
        }
    }

    /// Output path, explicit or derived from the source.
    pub fn destination(&self) -> PathBuf {
        match self {
            Self::Compress {
                source,
                destination,
                ..
            } => destination
                .clone()
                .unwrap_or_else(|| default_container_path(source)),
            Self::Decompress {
                source,
                destination,
            } => destination
                .clone()
                .unwrap_or_else(|| default_output_dir(source)),
        }
    }
}

impl CliConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Codec options selected by the flags.
    ///
    /// Call [`validate`](Self::validate) first; an unknown sector size falls
    /// back to version 3.
    pub fn options(&self) -> CfbOptions {
        CfbOptions::default()
            .with_version(CfbVersion::from_sector_size(self.sector_size).unwrap_or_default())
            .with_max_container_size(self.max_size)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The sector size is neither 512 nor 4096
    /// - The size limit is zero
    /// - The source is missing or of the wrong kind for the command
    /// - The destination resolves to the source itself
    pub fn validate(&self) -> Result<(), ConfigError> {
        if CfbVersion::from_sector_size(self.sector_size).is_none() {
            return Err(ConfigError::InvalidSectorSize(self.sector_size));
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max-size",
                reason: "must be greater than zero".to_string(),
            });
        }

        let source = self.command.source();
        match &self.command {
            Command::Compress { .. } if !source.is_dir() => {
                return Err(ConfigError::InvalidSource {
                    path: source.to_path_buf(),
                    reason: "not a directory".to_string(),
                });
            }
            Command::Decompress { .. } if !source.is_file() => {
                return Err(ConfigError::InvalidSource {
                    path: source.to_path_buf(),
                    reason: "not a file".to_string(),
                });
            }
            _ => {}
        }

        let destination = self.command.destination();
        if destination.components().eq(source.components()) {
            return Err(ConfigError::DestinationConflict(destination));
        }

        Ok(())
    }
}

/// `SOURCE.cfb`, ignoring any trailing separator on the source.
pub fn default_container_path(source: &Path) -> PathBuf {
    let mut path = OsString::from(source.components().as_path());
    path.push(".");
    path.push(CONTAINER_EXTENSION);
    PathBuf::from(path)
}

/// The source path with its final extension removed.
pub fn default_output_dir(source: &Path) -> PathBuf {
    source.components().as_path().with_extension("")
}
