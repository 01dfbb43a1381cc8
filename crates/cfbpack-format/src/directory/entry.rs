//! 128-byte directory entry record

use crate::error::{CfbError, CfbResult};
use crate::sector::ENDOFCHAIN;
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// Size of one directory entry
pub const DIR_ENTRY_SIZE: usize = 128;

/// Absent left/right/child link
pub const NOSTREAM: u32 = 0xFFFF_FFFF;

/// Largest usable entry id
pub const MAXREGSID: u32 = 0xFFFF_FFFA;

/// Name of the root storage entry
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

/// Kind of object a directory entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    /// Free slot
    Unused = 0,
    /// Folder
    Storage = 1,
    /// File
    Stream = 2,
    /// Root storage, owner of the mini stream
    Root = 5,
}

impl ObjectType {
    /// Decode the on-disk byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unused),
            1 => Some(Self::Storage),
            2 => Some(Self::Stream),
            5 => Some(Self::Root),
            _ => None,
        }
    }

    /// Whether entries of this kind may have children
    pub fn is_storage(self) -> bool {
        matches!(self, Self::Storage | Self::Root)
    }
}

/// Red-black tree colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    /// Red node
    Red = 0,
    /// Black node
    Black = 1,
}

/// Raw directory entry as stored in the directory chain
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct DirEntry {
    /// UTF-16 name, NUL terminated, zero padded
    pub name: [u16; 32],
    /// Name length in bytes including the terminator
    pub name_len: u16,
    /// Raw [`ObjectType`]
    pub object_type: u8,
    /// Raw [`Color`]
    pub color: u8,
    /// Left sibling in the red-black tree
    pub left: u32,
    /// Right sibling in the red-black tree
    pub right: u32,
    /// Root of the children's red-black tree
    pub child: u32,
    /// Class id
    pub clsid: [u8; 16],
    /// User-defined flags
    pub state_bits: u32,
    /// Creation time (FILETIME)
    pub created: u64,
    /// Modification time (FILETIME)
    pub modified: u64,
    /// First sector (or mini sector) of the stream
    pub start_sector: u32,
    /// Stream size in bytes
    pub stream_size: u64,
}

impl DirEntry {
    /// All-zero entry with absent links
    pub fn unused() -> Self {
        Self {
            name: [0; 32],
            name_len: 0,
            object_type: ObjectType::Unused as u8,
            color: Color::Red as u8,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            clsid: [0; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
            start_sector: 0,
            stream_size: 0,
        }
    }

    /// Entry of the given kind with an already validated name
    pub fn new(units: &[u16], kind: ObjectType) -> Self {
        let mut name = [0u16; 32];
        let len = units.len().min(31);
        name[..len].copy_from_slice(&units[..len]);

        // Storages point at sector 0; streams and the root start empty
        let start_sector = match kind {
            ObjectType::Storage | ObjectType::Unused => 0,
            ObjectType::Stream | ObjectType::Root => ENDOFCHAIN,
        };

        Self {
            name,
            name_len: ((len + 1) * 2) as u16,
            object_type: kind as u8,
            color: Color::Black as u8,
            start_sector,
            ..Self::unused()
        }
    }

    /// Root storage entry
    pub fn root() -> Self {
        let units: Vec<u16> = ROOT_ENTRY_NAME.encode_utf16().collect();
        Self::new(&units, ObjectType::Root)
    }

    /// Decoded object type, `None` for unknown values
    pub fn kind(&self) -> Option<ObjectType> {
        ObjectType::from_u8(self.object_type)
    }

    /// Whether the entry is red
    pub fn is_red(&self) -> bool {
        self.color == Color::Red as u8
    }

    /// Name code units without the terminator
    ///
    /// The length is clamped to the 31 storable units so a corrupt length
    /// never indexes past the name field.
    pub fn name_units(&self) -> &[u16] {
        let len = (self.name_len as usize / 2).saturating_sub(1).min(31);
        &self.name[..len]
    }

    /// Decode the name, checking the recorded length
    pub fn decode_name(&self, entry: u32) -> CfbResult<String> {
        let invalid = |reason: String| CfbError::InvalidDirectoryEntry { entry, reason };

        if self.name_len < 2 || self.name_len > 64 || self.name_len % 2 != 0 {
            return Err(invalid(format!("bad name length {}", self.name_len)));
        }
        String::from_utf16(self.name_units())
            .map_err(|_| invalid("name is not valid UTF-16".to_string()))
    }

    /// Decode every entry in a directory chain
    pub fn parse_all(bytes: &[u8]) -> CfbResult<Vec<Self>> {
        let mut cursor = Cursor::new(bytes);
        let mut entries = Vec::with_capacity(bytes.len() / DIR_ENTRY_SIZE);
        for _ in 0..bytes.len() / DIR_ENTRY_SIZE {
            entries.push(Self::read_options(
                &mut cursor,
                binrw::Endian::Little,
                (),
            )?);
        }
        Ok(entries)
    }

    /// Append the 128-byte record to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) -> CfbResult<()> {
        let mut record = Vec::with_capacity(DIR_ENTRY_SIZE);
        self.write_options(&mut Cursor::new(&mut record), binrw::Endian::Little, ())?;
        out.extend_from_slice(&record);
        Ok(())
    }
}
