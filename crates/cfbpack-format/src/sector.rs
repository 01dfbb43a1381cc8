//! Sector arithmetic and sector-sized views over container bytes
//!
//! Sector `n` starts right after the header sector. The header record is
//! always 512 bytes; with 4096-byte sectors it is zero-padded to a full
//! sector, so the general offset of sector `n` is `(n + 1) * sector_size`.

use crate::error::{CfbError, CfbResult};
use tracing::warn;

/// Size of the fixed header record
pub const HEADER_SIZE: usize = 512;

/// Largest regular sector id
pub const MAXREGSECT: u32 = 0xFFFF_FFFA;
/// FAT marker for a DIFAT sector
pub const DIFSECT: u32 = 0xFFFF_FFFC;
/// FAT marker for a FAT sector
pub const FATSECT: u32 = 0xFFFF_FFFD;
/// Terminates a chain
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFF_FFFF;

/// Mini sector shift (64-byte mini sectors)
pub const MINI_SECTOR_SHIFT: u16 = 6;
/// Mini sector size in bytes
pub const MINI_SECTOR_SIZE: usize = 1 << MINI_SECTOR_SHIFT;
/// Streams smaller than this live in the mini stream
pub const MINI_STREAM_CUTOFF: u32 = 4096;

/// CFB major version, which fixes the sector size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CfbVersion {
    /// Version 3: 512-byte sectors
    #[default]
    V3,
    /// Version 4: 4096-byte sectors
    V4,
}

impl CfbVersion {
    /// Map a header major version to a supported variant
    pub fn from_major_version(major: u16) -> CfbResult<Self> {
        match major {
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            other => Err(CfbError::UnsupportedVersion(other)),
        }
    }

    /// Pick the variant for a sector size in bytes
    pub fn from_sector_size(size: usize) -> Option<Self> {
        match size {
            512 => Some(Self::V3),
            4096 => Some(Self::V4),
            _ => None,
        }
    }

    /// Major version written to the header
    pub const fn major_version(self) -> u16 {
        match self {
            Self::V3 => 3,
            Self::V4 => 4,
        }
    }

    /// log2 of the sector size
    pub const fn sector_shift(self) -> u16 {
        match self {
            Self::V3 => 9,
            Self::V4 => 12,
        }
    }

    /// Sector size in bytes
    pub const fn sector_size(self) -> usize {
        1 << self.sector_shift()
    }

    /// Sector layout for this version
    pub const fn layout(self) -> SectorLayout {
        SectorLayout::new(self.sector_shift())
    }
}

/// Offset and size arithmetic for one sector size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorLayout {
    shift: u16,
}

impl SectorLayout {
    /// Create a layout from a sector shift
    pub const fn new(shift: u16) -> Self {
        Self { shift }
    }

    /// log2 of the sector size
    pub const fn shift(self) -> u16 {
        self.shift
    }

    /// Sector size in bytes
    pub const fn sector_size(self) -> usize {
        1 << self.shift
    }

    /// Number of 32-bit sector ids that fit into one sector
    pub const fn entries_per_sector(self) -> usize {
        self.sector_size() / 4
    }

    /// Byte offset of a sector within the container
    pub fn offset(self, id: u32) -> u64 {
        (u64::from(id) + 1) << self.shift
    }

    /// Number of sectors needed to hold `len` bytes
    pub fn sectors_for(self, len: u64) -> u64 {
        len.div_ceil(self.sector_size() as u64)
    }
}

/// Read-only sector view over a fully loaded container
#[derive(Debug, Clone, Copy)]
pub struct SectorView<'a> {
    data: &'a [u8],
    layout: SectorLayout,
    count: u32,
}

impl<'a> SectorView<'a> {
    /// Create a view; the physical sector count includes a short final sector
    pub fn new(data: &'a [u8], layout: SectorLayout) -> Self {
        let size = layout.sector_size();
        let count = data.len().saturating_sub(size).div_ceil(size);
        Self {
            data,
            layout,
            count: u32::try_from(count).unwrap_or(u32::MAX),
        }
    }

    /// Sector layout of the view
    pub fn layout(&self) -> SectorLayout {
        self.layout
    }

    /// Physical number of sectors after the header sector
    pub fn sector_count(&self) -> u32 {
        self.count
    }

    /// Borrow one sector; the final sector may be shorter than the sector size
    pub fn sector(&self, id: u32) -> CfbResult<&'a [u8]> {
        if id >= self.count {
            return Err(CfbError::SectorOutOfRange {
                sector: id,
                count: self.count,
            });
        }
        let start = usize::try_from(self.layout.offset(id)).map_err(|_| {
            CfbError::SectorOutOfRange {
                sector: id,
                count: self.count,
            }
        })?;
        let end = (start + self.layout.sector_size()).min(self.data.len());
        Ok(&self.data[start..end])
    }

    /// Concatenate the sectors of a chain and cut the result to `len` bytes
    pub fn read_chain(&self, chain: &[u32], len: usize) -> CfbResult<Vec<u8>> {
        let size = self.layout.sector_size();
        let mut out = Vec::with_capacity(len.min(chain.len() * size));

        for (position, &id) in chain.iter().enumerate() {
            if out.len() >= len {
                break;
            }
            let sector = self.sector(id)?;
            if sector.len() < size {
                let is_last = position + 1 == chain.len();
                if !is_last || out.len() + sector.len() < len {
                    return Err(CfbError::Truncated {
                        offset: self.layout.offset(id),
                        needed: size,
                        available: sector.len(),
                    });
                }
                warn!(sector = id, available = sector.len(), "short final sector");
            }
            out.extend_from_slice(sector);
        }

        if out.len() < len {
            return Err(CfbError::Truncated {
                offset: chain.last().map_or(0, |&id| self.layout.offset(id)),
                needed: len,
                available: out.len(),
            });
        }
        out.truncate(len);
        Ok(out)
    }
}

/// Zero-pad a buffer to a multiple of `unit` bytes
pub(crate) fn pad_to_multiple(buf: &mut Vec<u8>, unit: usize) {
    let rem = buf.len() % unit;
    if rem != 0 {
        buf.resize(buf.len() + (unit - rem), 0);
    }
}
