//! CFB header (512 bytes, little-endian)

use crate::error::{CfbError, CfbResult};
use crate::sector::{
    CfbVersion, ENDOFCHAIN, FREESECT, HEADER_SIZE, MINI_SECTOR_SHIFT, MINI_STREAM_CUTOFF,
    SectorLayout,
};
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// Header signature
pub const CFB_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Minor version written by every known producer
pub const MINOR_VERSION: u16 = 0x003E;

/// Little-endian byte order mark
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;

/// FAT sector ids stored inline in the header
pub const HEADER_DIFAT_SLOTS: usize = 109;

/// CFB file header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CfbHeader {
    /// Magic bytes: D0 CF 11 E0 A1 B1 1A E1
    pub signature: [u8; 8],

    /// Reserved class id (zero)
    pub clsid: [u8; 16],

    /// Minor version (0x003E)
    pub minor_version: u16,

    /// Major version (3 or 4)
    pub major_version: u16,

    /// Byte order mark (0xFFFE)
    pub byte_order: u16,

    /// log2 of the sector size (9 or 12)
    pub sector_shift: u16,

    /// log2 of the mini sector size (6)
    pub mini_sector_shift: u16,

    /// Reserved, zero
    pub reserved: [u8; 6],

    /// Directory sector count (zero for version 3)
    pub num_directory_sectors: u32,

    /// FAT sector count
    pub num_fat_sectors: u32,

    /// First sector of the directory chain
    pub first_directory_sector: u32,

    /// Transaction signature (unused, zero)
    pub transaction_signature: u32,

    /// Streams smaller than this are stored in the mini stream
    pub mini_stream_cutoff: u32,

    /// First sector of the MiniFAT chain
    pub first_mini_fat_sector: u32,

    /// MiniFAT sector count
    pub num_mini_fat_sectors: u32,

    /// First DIFAT sector
    pub first_difat_sector: u32,

    /// DIFAT sector count
    pub num_difat_sectors: u32,

    /// First 109 FAT sector ids
    pub difat: [u32; HEADER_DIFAT_SLOTS],
}

impl CfbHeader {
    /// Create a header for an empty container of the given version
    pub fn new(version: CfbVersion) -> Self {
        Self {
            signature: CFB_SIGNATURE,
            clsid: [0; 16],
            minor_version: MINOR_VERSION,
            major_version: version.major_version(),
            byte_order: BYTE_ORDER_MARK,
            sector_shift: version.sector_shift(),
            mini_sector_shift: MINI_SECTOR_SHIFT,
            reserved: [0; 6],
            num_directory_sectors: 0,
            num_fat_sectors: 0,
            first_directory_sector: ENDOFCHAIN,
            transaction_signature: 0,
            mini_stream_cutoff: MINI_STREAM_CUTOFF,
            first_mini_fat_sector: ENDOFCHAIN,
            num_mini_fat_sectors: 0,
            first_difat_sector: ENDOFCHAIN,
            num_difat_sectors: 0,
            difat: [FREESECT; HEADER_DIFAT_SLOTS],
        }
    }

    /// Decode and validate the header at the start of a container
    pub fn parse(data: &[u8]) -> CfbResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CfbError::HeaderTooShort(data.len()));
        }
        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);
        let header = Self::read_options(&mut cursor, binrw::Endian::Little, ())?;
        header.validate()?;
        Ok(header)
    }

    /// Check the fixed fields against the parameters this crate supports
    pub fn validate(&self) -> CfbResult<()> {
        if self.signature != CFB_SIGNATURE {
            return Err(CfbError::InvalidMagic(self.signature));
        }

        if self.byte_order != BYTE_ORDER_MARK {
            return Err(CfbError::UnsupportedByteOrder(self.byte_order));
        }

        let version = CfbVersion::from_major_version(self.major_version)?;
        if self.sector_shift != version.sector_shift() {
            return Err(CfbError::UnsupportedSectorShift {
                shift: self.sector_shift,
                version: self.major_version,
            });
        }

        if self.mini_sector_shift != MINI_SECTOR_SHIFT {
            return Err(CfbError::UnsupportedMiniSectorShift(self.mini_sector_shift));
        }

        if self.mini_stream_cutoff != MINI_STREAM_CUTOFF {
            return Err(CfbError::UnsupportedMiniCutoff(self.mini_stream_cutoff));
        }

        Ok(())
    }

    /// Version implied by the major version field
    pub fn version(&self) -> CfbResult<CfbVersion> {
        CfbVersion::from_major_version(self.major_version)
    }

    /// Sector layout implied by the sector shift
    pub fn layout(&self) -> SectorLayout {
        SectorLayout::new(self.sector_shift)
    }

    /// Serialize to the 512-byte record
    pub fn to_bytes(&self) -> CfbResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE);
        let mut cursor = Cursor::new(&mut buffer);
        self.write_options(&mut cursor, binrw::Endian::Little, ())?;
        Ok(buffer)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encoded(header: &CfbHeader) -> Vec<u8> {
        header.to_bytes().expect("header should serialize")
    }

    #[test]
    fn test_header_is_512_bytes() {
        let bytes = encoded(&CfbHeader::new(CfbVersion::V3));
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..8], &CFB_SIGNATURE);
    }

    #[test]
    fn test_field_offsets() {
        let mut header = CfbHeader::new(CfbVersion::V4);
        header.num_fat_sectors = 0x0102_0304;
        header.first_directory_sector = 7;
        header.difat[0] = 0xAABB_CCDD;
        let bytes = encoded(&header);

        assert_eq!(&bytes[0x18..0x1A], &MINOR_VERSION.to_le_bytes());
        assert_eq!(&bytes[0x1A..0x1C], &4u16.to_le_bytes());
        assert_eq!(&bytes[0x1C..0x1E], &[0xFE, 0xFF]);
        assert_eq!(&bytes[0x1E..0x20], &12u16.to_le_bytes());
        assert_eq!(&bytes[0x20..0x22], &6u16.to_le_bytes());
        assert_eq!(&bytes[0x2C..0x30], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[0x30..0x34], &7u32.to_le_bytes());
        assert_eq!(&bytes[0x38..0x3C], &4096u32.to_le_bytes());
        assert_eq!(&bytes[0x44..0x48], &ENDOFCHAIN.to_le_bytes());
        assert_eq!(&bytes[0x4C..0x50], &0xAABB_CCDDu32.to_le_bytes());
        assert_eq!(&bytes[0x1FC..0x200], &FREESECT.to_le_bytes());
    }

    #[test]
    fn test_parse_round_trip() {
        let mut header = CfbHeader::new(CfbVersion::V3);
        header.num_fat_sectors = 1;
        header.difat[0] = 0;
        header.first_directory_sector = 1;

        let parsed = CfbHeader::parse(&encoded(&header)).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.version().unwrap(), CfbVersion::V3);
        assert_eq!(parsed.layout().sector_size(), 512);
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(matches!(
            CfbHeader::parse(&[0u8; 100]),
            Err(CfbError::HeaderTooShort(100))
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encoded(&CfbHeader::new(CfbVersion::V3));
        bytes[0] = b'P';
        let err = CfbHeader::parse(&bytes).unwrap_err();
        assert!(matches!(err, CfbError::InvalidMagic(_)));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_sector_shift_must_match_version() {
        let mut header = CfbHeader::new(CfbVersion::V3);
        header.sector_shift = 12;
        let err = header.validate().unwrap_err();
        assert!(matches!(
            err,
            CfbError::UnsupportedSectorShift {
                shift: 12,
                version: 3
            }
        ));
        assert!(err.is_unsupported());

        header.sector_shift = 10;
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_mini_sector_shift_must_be_six() {
        let mut header = CfbHeader::new(CfbVersion::V3);
        header.mini_sector_shift = 7;
        assert!(matches!(
            header.validate(),
            Err(CfbError::UnsupportedMiniSectorShift(7))
        ));
    }

    #[test]
    fn test_unknown_major_version_rejected() {
        let mut header = CfbHeader::new(CfbVersion::V3);
        header.major_version = 5;
        assert!(matches!(
            header.validate(),
            Err(CfbError::UnsupportedVersion(5))
        ));
    }

    #[test]
    fn test_byte_order_and_cutoff_checked() {
        let mut header = CfbHeader::new(CfbVersion::V3);
        header.byte_order = 0xFEFF;
        assert!(matches!(
            header.validate(),
            Err(CfbError::UnsupportedByteOrder(0xFEFF))
        ));

        let mut header = CfbHeader::new(CfbVersion::V3);
        header.mini_stream_cutoff = 2048;
        assert!(matches!(
            header.validate(),
            Err(CfbError::UnsupportedMiniCutoff(2048))
        ));
    }
}
