//! Codec options

use crate::sector::CfbVersion;

/// Default cap on the container size: 4 GiB
pub const DEFAULT_MAX_CONTAINER_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Options for building and reading containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfbOptions {
    /// Container version written by `compress`; ignored when reading
    pub version: CfbVersion,
    /// Largest container `compress` produces or `decompress` accepts
    pub max_container_size: u64,
}

impl Default for CfbOptions {
    fn default() -> Self {
        Self {
            version: CfbVersion::V3,
            max_container_size: DEFAULT_MAX_CONTAINER_SIZE,
        }
    }
}

impl CfbOptions {
    /// Default options: version 3, 4 GiB limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container version
    pub fn with_version(mut self, version: CfbVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the container size limit
    pub fn with_max_container_size(mut self, limit: u64) -> Self {
        self.max_container_size = limit;
        self
    }
}
