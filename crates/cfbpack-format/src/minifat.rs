//! Mini stream: small streams packed into 64-byte mini sectors
//!
//! The MiniFAT is an [`AllocationTable`] over mini sectors. The mini stream
//! bytes are themselves stored as one regular FAT chain owned by the root
//! entry.

use crate::error::{CfbError, CfbResult};
use crate::fat::AllocationTable;
use crate::sector::{MINI_SECTOR_SIZE, pad_to_multiple};
use tracing::trace;

/// MiniFAT plus the mini stream contents
#[derive(Debug, Clone, Default)]
pub struct MiniStream {
    table: AllocationTable,
    data: Vec<u8>,
}

impl MiniStream {
    /// Empty mini stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a loaded MiniFAT and the mini stream bytes
    pub fn from_parts(table: AllocationTable, data: Vec<u8>) -> Self {
        Self { table, data }
    }

    /// The MiniFAT
    pub fn table(&self) -> &AllocationTable {
        &self.table
    }

    /// Mini stream bytes, a whole number of mini sectors when built here
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether no mini sector has been allocated
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Store a payload and return its first mini sector
    ///
    /// Empty payloads allocate nothing and return `ENDOFCHAIN`.
    pub fn push_stream(&mut self, payload: &[u8]) -> CfbResult<u32> {
        let count = payload.len().div_ceil(MINI_SECTOR_SIZE);
        let start = self.table.allocate(count)?;
        if count == 0 {
            return Ok(start);
        }

        let needed = self.table.len() * MINI_SECTOR_SIZE;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        let chain = self.table.chain(start)?;
        for (&sector, chunk) in chain.iter().zip(payload.chunks(MINI_SECTOR_SIZE)) {
            let offset = sector as usize * MINI_SECTOR_SIZE;
            self.data[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
        pad_to_multiple(&mut self.data, MINI_SECTOR_SIZE);

        trace!(start, mini_sectors = count, "stored mini stream payload");
        Ok(start)
    }

    /// Read `size` bytes starting at mini sector `start`
    pub fn read_stream(&self, start: u32, size: u64) -> CfbResult<Vec<u8>> {
        let chain = self.table.chain(start)?;
        let len = usize::try_from(size).map_err(|_| CfbError::TooLarge {
            what: "mini stream payload",
            size,
            limit: usize::MAX as u64,
        })?;
        self.read_chain(&chain, len)
    }

    /// Concatenate the mini sectors of a chain and cut to `len` bytes
    pub fn read_chain(&self, chain: &[u32], len: usize) -> CfbResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for &sector in chain {
            if out.len() >= len {
                break;
            }
            let offset = sector as usize * MINI_SECTOR_SIZE;
            let take = MINI_SECTOR_SIZE.min(len - out.len());
            let bytes = self
                .data
                .get(offset..offset + take)
                .ok_or(CfbError::Truncated {
                    offset: offset as u64,
                    needed: take,
                    available: self.data.len().saturating_sub(offset),
                })?;
            out.extend_from_slice(bytes);
        }

        if out.len() < len {
            return Err(CfbError::Truncated {
                offset: 0,
                needed: len,
                available: out.len(),
            });
        }
        Ok(out)
    }

    /// Split into the MiniFAT and the mini stream bytes
    pub fn into_parts(self) -> (AllocationTable, Vec<u8>) {
        (self.table, self.data)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sector::ENDOFCHAIN;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_push_allocates_whole_mini_sectors() {
        let mut mini = MiniStream::new();
        let a = mini.push_stream(&[1u8; 100]).unwrap();
        let b = mini.push_stream(&[2u8; 64]).unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 2);
        assert_eq!(mini.data().len(), 3 * MINI_SECTOR_SIZE);
        assert_eq!(mini.table().chain(a).unwrap(), vec![0, 1]);
        // Tail of the first payload's last mini sector is zero padding
        assert_eq!(mini.data()[100..128], [0u8; 28]);
    }

    #[test]
    fn test_empty_payload_allocates_nothing() {
        let mut mini = MiniStream::new();
        assert_eq!(mini.push_stream(&[]).unwrap(), ENDOFCHAIN);
        assert!(mini.is_empty());
        assert!(mini.read_stream(ENDOFCHAIN, 0).unwrap().is_empty());
    }

    #[test]
    fn test_read_back_after_reload() {
        let mut mini = MiniStream::new();
        let first: Vec<u8> = (0..=255).collect();
        let second = b"hello mini stream".to_vec();
        let a = mini.push_stream(&first).unwrap();
        let b = mini.push_stream(&second).unwrap();

        let (table, data) = mini.into_parts();
        let layout = crate::sector::CfbVersion::V3.layout();
        let reloaded = MiniStream::from_parts(
            AllocationTable::from_bytes(&table.to_bytes(layout)),
            data,
        );
        assert_eq!(reloaded.read_stream(a, 256).unwrap(), first);
        assert_eq!(reloaded.read_stream(b, second.len() as u64).unwrap(), second);
    }

    #[test]
    fn test_read_past_mini_data_is_truncation() {
        let table = AllocationTable::from_entries(vec![1, ENDOFCHAIN]);
        let mini = MiniStream::from_parts(table, vec![0u8; 64]);
        assert!(matches!(
            mini.read_stream(0, 100),
            Err(CfbError::Truncated { offset: 64, .. })
        ));
    }
}
