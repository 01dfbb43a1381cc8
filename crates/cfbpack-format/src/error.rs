//! Error types for CFB container operations

use thiserror::Error;

/// CFB operation result type
pub type CfbResult<T> = Result<T, CfbError>;

/// Errors that can occur while building or reading a CFB container
#[derive(Debug, Error)]
pub enum CfbError {
    /// Input shorter than the fixed 512-byte header
    #[error("container too short for header: {0} bytes")]
    HeaderTooShort(usize),

    /// Header signature mismatch
    #[error("invalid CFB magic: expected D0CF11E0A1B11AE1, got {0:02X?}")]
    InvalidMagic([u8; 8]),

    /// Major version other than 3 or 4
    #[error("unsupported major version: {0}")]
    UnsupportedVersion(u16),

    /// Sector shift other than 9 or 12, or not matching the major version
    #[error("unsupported sector shift {shift} for major version {version}")]
    UnsupportedSectorShift {
        /// Sector shift found in the header
        shift: u16,
        /// Major version found in the header
        version: u16,
    },

    /// Mini sector shift other than 6
    #[error("unsupported mini sector shift: {0}")]
    UnsupportedMiniSectorShift(u16),

    /// Byte order mark other than 0xFFFE
    #[error("unsupported byte order mark: 0x{0:04X}")]
    UnsupportedByteOrder(u16),

    /// Mini stream cutoff other than 4096
    #[error("unsupported mini stream cutoff: {0}")]
    UnsupportedMiniCutoff(u32),

    /// Sector id beyond the physical end of the container
    #[error("sector {sector} out of range (container holds {count} sectors)")]
    SectorOutOfRange {
        /// Requested sector id
        sector: u32,
        /// Physical sector count
        count: u32,
    },

    /// A chain references a sector past the physical end of the container
    #[error("{owner} references sector {sector}, container holds {count} sectors")]
    DanglingSector {
        /// Structure whose chain holds the reference (`entry 3`, `directory`)
        owner: String,
        /// Referenced sector id
        sector: u32,
        /// Physical sector count
        count: u32,
    },

    /// A chain revisited one of its own sectors
    #[error("allocation chain starting at {start} loops back to sector {sector}")]
    ChainCycle {
        /// First sector of the chain
        start: u32,
        /// Sector that was reached twice
        sector: u32,
    },

    /// A chain points past the end of its allocation table
    #[error("allocation chain starting at {start} reaches sector {sector}, table holds {len}")]
    ChainOutOfRange {
        /// First sector of the chain
        start: u32,
        /// Offending sector id
        sector: u32,
        /// Allocation table length
        len: usize,
    },

    /// A chain ran into a free or reserved marker instead of ENDOFCHAIN
    #[error("allocation chain starting at {start} hits marker 0x{marker:08X} at sector {sector}")]
    UnexpectedChainMarker {
        /// First sector of the chain
        start: u32,
        /// Sector holding the marker
        sector: u32,
        /// Marker value found
        marker: u32,
    },

    /// FAT sector locator disagrees with the header's FAT sector count
    #[error("header declares {expected} FAT sectors, located {found}")]
    FatSectorCount {
        /// Count declared by the header
        expected: u32,
        /// Count found via header and DIFAT
        found: u32,
    },

    /// Directory sibling/child links revisit an entry
    #[error("directory entry {0} is reachable more than once")]
    DirectoryCycle(u32),

    /// Malformed directory entry
    #[error("invalid directory entry {entry}: {reason}")]
    InvalidDirectoryEntry {
        /// Entry index
        entry: u32,
        /// What is wrong with it
        reason: String,
    },

    /// Stream chain does not cover the recorded stream size
    #[error("entry {entry}: chain holds {actual} bytes, stream size is {expected}")]
    StreamSizeMismatch {
        /// Entry index
        entry: u32,
        /// Size recorded in the directory
        expected: u64,
        /// Bytes provided by the chain
        actual: u64,
    },

    /// Read past the end of the container data
    #[error("truncated read at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Byte offset of the read
        offset: u64,
        /// Bytes requested
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// Two siblings compare equal after name normalization
    #[error("duplicate name '{name}' under entry {parent}")]
    DuplicateName {
        /// Parent entry index
        parent: u32,
        /// Name that collided
        name: String,
    },

    /// Name cannot be stored in a directory entry
    #[error("invalid entry name '{name}': {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Children were requested for, or added to, a stream entry
    #[error("entry {0} is not a storage")]
    NotAStorage(u32),

    /// Lookup miss
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Input exceeds an explicit format or configured limit
    #[error("{what} too large: {size} exceeds limit {limit}")]
    TooLarge {
        /// Which quantity overflowed
        what: &'static str,
        /// Size requested
        size: u64,
        /// Applicable limit
        limit: u64,
    },

    /// I/O error from the byte source or sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary record decoding error
    #[error("binary format error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl CfbError {
    /// Check if this error rejects the container outright (not a CFB file)
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::HeaderTooShort(_) | Self::InvalidMagic(_) | Self::SectorOutOfRange { .. }
        )
    }

    /// Check if this error is a valid CFB file using parameters this crate does not handle
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion(_)
                | Self::UnsupportedSectorShift { .. }
                | Self::UnsupportedMiniSectorShift(_)
                | Self::UnsupportedByteOrder(_)
                | Self::UnsupportedMiniCutoff(_)
        )
    }

    /// Check if this error reports inconsistent container structures
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChainCycle { .. }
                | Self::DanglingSector { .. }
                | Self::ChainOutOfRange { .. }
                | Self::UnexpectedChainMarker { .. }
                | Self::FatSectorCount { .. }
                | Self::DirectoryCycle(_)
                | Self::InvalidDirectoryEntry { .. }
                | Self::StreamSizeMismatch { .. }
                | Self::Truncated { .. }
        )
    }

    /// Check if this error rejects caller input before anything was written
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. }
                | Self::InvalidName { .. }
                | Self::NotAStorage(_)
                | Self::TooLarge { .. }
        )
    }
}
