//! Sector allocation tables and FAT sector location
//!
//! [`AllocationTable`] is the next-pointer array shared by the FAT and the
//! MiniFAT. Allocation is first-fit with a lowest-index tie-break, so a given
//! sequence of requests always yields the same layout.
//!
//! [`FatSectorLocator`] resolves where the FAT itself lives: the first 109
//! FAT sector ids are stored inline in the header, the rest in a chain of
//! DIFAT sectors. Reading and writing both go through it.

use crate::error::{CfbError, CfbResult};
use crate::header::{CfbHeader, HEADER_DIFAT_SLOTS};
use crate::sector::{ENDOFCHAIN, FREESECT, MAXREGSECT, SectorLayout, SectorView};
use std::collections::HashSet;
use tracing::trace;

/// Next-pointer array addressing sectors (FAT) or mini sectors (MiniFAT)
#[derive(Debug, Clone, Default)]
pub struct AllocationTable {
    entries: Vec<u32>,
    /// No free slot exists below this index
    first_free: usize,
}

impl AllocationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing entries
    pub fn from_entries(entries: Vec<u32>) -> Self {
        Self {
            entries,
            first_free: 0,
        }
    }

    /// Decode little-endian sector ids; trailing partial ids are ignored
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let entries = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_entries(entries)
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no slots
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw slot values
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Link `count` free slots into one chain and return its first id
    ///
    /// Returns [`ENDOFCHAIN`] for an empty request. The table grows when
    /// there are not enough free slots.
    pub fn allocate(&mut self, count: usize) -> CfbResult<u32> {
        if count == 0 {
            return Ok(ENDOFCHAIN);
        }
        let slots = self.take_free_slots(count)?;
        for pair in slots.windows(2) {
            self.entries[pair[0] as usize] = pair[1];
        }
        let last = slots[slots.len() - 1];
        self.entries[last as usize] = ENDOFCHAIN;

        trace!(start = slots[0], count, "allocated chain");
        Ok(slots[0])
    }

    /// Stamp `count` free slots with a marker such as `FATSECT`
    pub fn reserve(&mut self, count: usize, marker: u32) -> CfbResult<Vec<u32>> {
        let slots = self.take_free_slots(count)?;
        for &slot in &slots {
            self.entries[slot as usize] = marker;
        }
        Ok(slots)
    }

    /// Return every slot of a chain to the free pool
    pub fn free_chain(&mut self, start: u32) -> CfbResult<()> {
        for id in self.chain(start)? {
            self.entries[id as usize] = FREESECT;
            self.first_free = self.first_free.min(id as usize);
        }
        Ok(())
    }

    /// Follow a chain from `start` to ENDOFCHAIN
    pub fn chain(&self, start: u32) -> CfbResult<Vec<u32>> {
        let mut chain = Vec::new();
        if start == ENDOFCHAIN {
            return Ok(chain);
        }
        if start > MAXREGSECT {
            return Err(CfbError::UnexpectedChainMarker {
                start,
                sector: start,
                marker: start,
            });
        }

        let mut visited = HashSet::new();
        let mut current = start;
        loop {
            let next = self
                .entries
                .get(current as usize)
                .copied()
                .ok_or(CfbError::ChainOutOfRange {
                    start,
                    sector: current,
                    len: self.entries.len(),
                })?;
            if !visited.insert(current) {
                return Err(CfbError::ChainCycle {
                    start,
                    sector: current,
                });
            }
            chain.push(current);

            match next {
                ENDOFCHAIN => break,
                n if n <= MAXREGSECT => current = n,
                marker => {
                    return Err(CfbError::UnexpectedChainMarker {
                        start,
                        sector: current,
                        marker,
                    });
                }
            }
        }
        Ok(chain)
    }

    /// Number of sectors needed to store the table
    pub fn sector_count(&self, layout: SectorLayout) -> usize {
        self.entries.len().div_ceil(layout.entries_per_sector())
    }

    /// Serialize as little-endian ids padded with FREESECT to whole sectors
    pub fn to_bytes(&self, layout: SectorLayout) -> Vec<u8> {
        let padded = self.sector_count(layout) * layout.entries_per_sector();
        let mut out = Vec::with_capacity(padded * 4);
        for &entry in &self.entries {
            out.extend_from_slice(&entry.to_le_bytes());
        }
        for _ in self.entries.len()..padded {
            out.extend_from_slice(&FREESECT.to_le_bytes());
        }
        out
    }

    fn take_free_slots(&mut self, count: usize) -> CfbResult<Vec<u32>> {
        let mut slots = Vec::with_capacity(count);
        for index in self.first_free..self.entries.len() {
            if slots.len() == count {
                break;
            }
            if self.entries[index] == FREESECT {
                slots.push(index as u32);
            }
        }

        while slots.len() < count {
            let next = self.entries.len();
            if next > MAXREGSECT as usize {
                return Err(CfbError::TooLarge {
                    what: "sector count",
                    size: next as u64 + 1,
                    limit: u64::from(MAXREGSECT) + 1,
                });
            }
            self.entries.push(FREESECT);
            slots.push(next as u32);
        }

        // Every free slot up to the last one taken is now in use
        if let Some(&last) = slots.last() {
            self.first_free = last as usize + 1;
        }
        Ok(slots)
    }
}

/// Locates the FAT sectors of a container
#[derive(Debug, Clone, Copy)]
pub struct FatSectorLocator<'a> {
    header: &'a CfbHeader,
    view: SectorView<'a>,
}

impl<'a> FatSectorLocator<'a> {
    /// Create a locator over a parsed header and the container sectors
    pub fn new(header: &'a CfbHeader, view: SectorView<'a>) -> Self {
        Self { header, view }
    }

    /// Collect the FAT sector ids, inline slots first, then the DIFAT chain
    pub fn locate(&self) -> CfbResult<Vec<u32>> {
        let expected = self.header.num_fat_sectors as usize;
        let mut ids = Vec::with_capacity(expected.min(self.view.sector_count() as usize));

        for &id in self.header.difat.iter().take(expected) {
            if id > MAXREGSECT {
                return Err(self.count_mismatch(ids.len()));
            }
            ids.push(id);
        }

        let per_sector = self.view.layout().entries_per_sector() - 1;
        let start = self.header.first_difat_sector;
        let mut next = start;
        let mut visited = HashSet::new();

        while ids.len() < expected {
            if next > MAXREGSECT {
                return Err(self.count_mismatch(ids.len()));
            }
            if !visited.insert(next) {
                return Err(CfbError::ChainCycle {
                    start,
                    sector: next,
                });
            }
            let sector = full_sector(&self.view, next)?;
            let ids_in_sector = sector.chunks_exact(4).take(per_sector);
            for chunk in ids_in_sector {
                if ids.len() == expected {
                    break;
                }
                let id = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                if id > MAXREGSECT {
                    return Err(self.count_mismatch(ids.len()));
                }
                ids.push(id);
            }
            let link = &sector[per_sector * 4..];
            next = u32::from_le_bytes([link[0], link[1], link[2], link[3]]);
        }

        trace!(fat_sectors = ids.len(), difat_sectors = visited.len(), "located FAT");
        Ok(ids)
    }

    /// Concatenate the FAT sectors into one allocation table
    pub fn load_fat(&self) -> CfbResult<AllocationTable> {
        let ids = self.locate()?;
        let mut bytes = Vec::with_capacity(ids.len() * self.view.layout().sector_size());
        for id in ids {
            bytes.extend_from_slice(full_sector(&self.view, id)?);
        }
        Ok(AllocationTable::from_bytes(&bytes))
    }

    /// Distribute FAT sector ids over the header slots and DIFAT sectors
    ///
    /// `difat_ids` must hold enough sectors for the ids beyond the first 109.
    /// Returns the inline header slots and the serialized DIFAT sectors.
    pub fn encode(
        fat_ids: &[u32],
        difat_ids: &[u32],
        layout: SectorLayout,
    ) -> ([u32; HEADER_DIFAT_SLOTS], Vec<u8>) {
        let mut inline = [FREESECT; HEADER_DIFAT_SLOTS];
        let split = fat_ids.len().min(HEADER_DIFAT_SLOTS);
        inline[..split].copy_from_slice(&fat_ids[..split]);

        let per_sector = layout.entries_per_sector() - 1;
        let mut overflow = fat_ids[split..].chunks(per_sector);
        let mut out = Vec::with_capacity(difat_ids.len() * layout.sector_size());

        for (position, _) in difat_ids.iter().enumerate() {
            let ids = overflow.next().unwrap_or(&[]);
            for slot in 0..per_sector {
                let id = ids.get(slot).copied().unwrap_or(FREESECT);
                out.extend_from_slice(&id.to_le_bytes());
            }
            let link = difat_ids.get(position + 1).copied().unwrap_or(ENDOFCHAIN);
            out.extend_from_slice(&link.to_le_bytes());
        }
        (inline, out)
    }

    /// Number of DIFAT sectors needed for `fat_sectors` FAT sectors
    pub fn difat_sectors_for(fat_sectors: usize, layout: SectorLayout) -> usize {
        fat_sectors
            .saturating_sub(HEADER_DIFAT_SLOTS)
            .div_ceil(layout.entries_per_sector() - 1)
    }

    fn count_mismatch(&self, found: usize) -> CfbError {
        CfbError::FatSectorCount {
            expected: self.header.num_fat_sectors,
            found: found as u32,
        }
    }
}

/// Borrow a sector that must be complete
fn full_sector<'a>(view: &SectorView<'a>, id: u32) -> CfbResult<&'a [u8]> {
    let sector = view.sector(id)?;
    let size = view.layout().sector_size();
    if sector.len() < size {
        return Err(CfbError::Truncated {
            offset: view.layout().offset(id),
            needed: size,
            available: sector.len(),
        });
    }
    Ok(sector)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sector::{CfbVersion, FATSECT};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_allocate_links_consecutive_slots() {
        let mut table = AllocationTable::new();
        assert_eq!(table.allocate(3).unwrap(), 0);
        assert_eq!(table.allocate(2).unwrap(), 3);
        assert_eq!(table.entries(), &[1, 2, ENDOFCHAIN, 4, ENDOFCHAIN]);
        assert_eq!(table.chain(3).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_allocate_zero_is_empty_chain() {
        let mut table = AllocationTable::new();
        assert_eq!(table.allocate(0).unwrap(), ENDOFCHAIN);
        assert!(table.is_empty());
        assert!(table.chain(ENDOFCHAIN).unwrap().is_empty());
    }

    #[test]
    fn test_first_fit_reuses_lowest_free_slots() {
        let mut table = AllocationTable::new();
        let a = table.allocate(2).unwrap();
        let b = table.allocate(2).unwrap();
        let c = table.allocate(2).unwrap();
        table.free_chain(a).unwrap();
        table.free_chain(c).unwrap();

        // Freed slots 0,1 come first, then 4,5, then the table grows
        let d = table.allocate(5).unwrap();
        assert_eq!(d, 0);
        assert_eq!(table.chain(d).unwrap(), vec![0, 1, 4, 5, 6]);
        assert_eq!(table.chain(b).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_reserve_stamps_marker() {
        let mut table = AllocationTable::new();
        let ids = table.reserve(2, FATSECT).unwrap();
        assert_eq!(ids, vec![0, 1]);
        let start = table.allocate(1).unwrap();
        assert_eq!(start, 2);
        assert_eq!(table.entries(), &[FATSECT, FATSECT, ENDOFCHAIN]);
    }

    #[test]
    fn test_chain_detects_cycle() {
        let table = AllocationTable::from_entries(vec![1, 2, 0]);
        assert!(matches!(
            table.chain(0),
            Err(CfbError::ChainCycle {
                start: 0,
                sector: 0
            })
        ));
    }

    #[test]
    fn test_chain_detects_out_of_range() {
        let table = AllocationTable::from_entries(vec![1, 9]);
        assert!(matches!(
            table.chain(0),
            Err(CfbError::ChainOutOfRange {
                start: 0,
                sector: 9,
                len: 2
            })
        ));
    }

    #[test]
    fn test_chain_rejects_free_marker() {
        let table = AllocationTable::from_entries(vec![1, FREESECT]);
        assert!(matches!(
            table.chain(0),
            Err(CfbError::UnexpectedChainMarker {
                sector: 1,
                marker: FREESECT,
                ..
            })
        ));
        assert!(matches!(
            table.chain(FATSECT),
            Err(CfbError::UnexpectedChainMarker { .. })
        ));
    }

    #[test]
    fn test_to_bytes_pads_with_free_markers() {
        let mut table = AllocationTable::new();
        table.allocate(2).unwrap();
        let layout = CfbVersion::V3.layout();
        let bytes = table.to_bytes(layout);
        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &ENDOFCHAIN.to_le_bytes());
        assert_eq!(&bytes[8..12], &FREESECT.to_le_bytes());

        let decoded = AllocationTable::from_bytes(&bytes);
        assert_eq!(decoded.len(), 128);
        assert_eq!(decoded.chain(0).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_difat_sizing() {
        let layout = CfbVersion::V3.layout();
        assert_eq!(FatSectorLocator::difat_sectors_for(109, layout), 0);
        assert_eq!(FatSectorLocator::difat_sectors_for(110, layout), 1);
        assert_eq!(FatSectorLocator::difat_sectors_for(109 + 127, layout), 1);
        assert_eq!(FatSectorLocator::difat_sectors_for(109 + 128, layout), 2);
    }

    #[test]
    fn test_encode_fills_header_then_difat() {
        let layout = CfbVersion::V3.layout();
        let fat_ids: Vec<u32> = (0..112).collect();
        let (inline, difat) = FatSectorLocator::encode(&fat_ids, &[500], layout);

        assert_eq!(inline[0], 0);
        assert_eq!(inline[108], 108);
        assert_eq!(difat.len(), 512);
        assert_eq!(&difat[0..4], &109u32.to_le_bytes());
        assert_eq!(&difat[8..12], &111u32.to_le_bytes());
        assert_eq!(&difat[12..16], &FREESECT.to_le_bytes());
        assert_eq!(&difat[508..512], &ENDOFCHAIN.to_le_bytes());
    }
}
