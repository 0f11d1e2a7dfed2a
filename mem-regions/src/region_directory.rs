// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use arrayvec::ArrayVec;
use core::{cmp::Ordering, result};
use pkvm_pages::PageSize;

use crate::MemRange;

/// The maximum number of regions in a `MemRegionDirectory`. Statically sized since the directory
/// is built before any allocator exists.
pub const MAX_MEM_REGIONS: usize = 128;

type RegionVec = ArrayVec<MemRegion, MAX_MEM_REGIONS>;

/// What a region of physical memory is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionType {
    /// System RAM.
    Ram,
    /// Memory-mapped device registers.
    Io,
}

/// A contiguous, page-aligned region of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    base: u64,
    size: u64,
    region_type: RegionType,
}

impl MemRegion {
    /// Returns the page-aligned base address of the region.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the first address past the region.
    pub fn end(&self) -> u64 {
        // Can't overflow: checked when the region was added.
        self.base + self.size
    }

    pub fn region_type(&self) -> RegionType {
        self.region_type
    }

    /// Returns the addresses covered by the region.
    pub fn range(&self) -> MemRange {
        MemRange {
            start: self.base,
            end: self.end(),
        }
    }
}

/// Errors that can be raised while building the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Region base or size isn't page aligned, or the size is zero.
    UnalignedRegion,
    /// The region wraps the end of the address space.
    InvalidRegion,
    /// Regions must be added in ascending address order.
    UnsortedRegion,
    /// Region overlaps with the previous one.
    OverlappingRegion,
    /// No more entries available in the directory.
    OutOfSpace,
}

/// Holds the result of directory operations.
pub type Result<T> = result::Result<T, Error>;

/// The outcome of `MemRegionDirectory::find_region()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSearch {
    /// The address lies within a region; holds the region's bounds.
    Found(MemRange),
    /// The address is in no region; holds the gap between the nearest regions around it, or the
    /// ends of the address space where there is no neighbor.
    Gap(MemRange),
}

impl RegionSearch {
    /// Returns true if the address was inside a region.
    pub fn found(&self) -> bool {
        matches!(self, RegionSearch::Found(_))
    }

    /// Returns the region or gap holding the address.
    pub fn bounds(&self) -> MemRange {
        match *self {
            RegionSearch::Found(r) | RegionSearch::Gap(r) => r,
        }
    }
}

/// The sorted, non-overlapping set of memory regions. Use `MemRegionDirectoryBuilder` to create it.
#[derive(Debug, Default)]
pub struct MemRegionDirectory {
    regions: RegionVec,
}

/// A builder for a `MemRegionDirectory`. Regions are appended in ascending address order, as
/// firmware reports them.
pub struct MemRegionDirectoryBuilder {
    inner: MemRegionDirectory,
}

impl MemRegionDirectoryBuilder {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            inner: MemRegionDirectory::default(),
        }
    }

    /// Appends a region of system RAM.
    pub fn add_ram_region(self, base: u64, size: u64) -> Result<Self> {
        self.add_region(base, size, RegionType::Ram)
    }

    /// Appends a region of device memory.
    pub fn add_io_region(self, base: u64, size: u64) -> Result<Self> {
        self.add_region(base, size, RegionType::Io)
    }

    fn add_region(mut self, base: u64, size: u64, region_type: RegionType) -> Result<Self> {
        if size == 0 || !PageSize::Size4k.is_aligned(base) || !PageSize::Size4k.is_aligned(size) {
            return Err(Error::UnalignedRegion);
        }
        base.checked_add(size).ok_or(Error::InvalidRegion)?;
        if let Some(last) = self.inner.regions.last() {
            if base < last.base() {
                return Err(Error::UnsortedRegion);
            }
            if base < last.end() {
                return Err(Error::OverlappingRegion);
            }
        }
        self.inner
            .regions
            .try_push(MemRegion {
                base,
                size,
                region_type,
            })
            .map_err(|_| Error::OutOfSpace)?;
        Ok(self)
    }

    /// Returns the completed directory.
    pub fn build(self) -> MemRegionDirectory {
        self.inner
    }
}

impl Default for MemRegionDirectoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemRegionDirectory {
    /// Looks up the region containing `addr` by binary search. Misses still narrow the bounds to
    /// the gap around `addr`, so callers can tell how far the unbacked range extends.
    pub fn find_region(&self, addr: u64) -> RegionSearch {
        let mut gap = MemRange::ALL;
        let (mut left, mut right) = (0, self.regions.len());
        while left < right {
            let cur = (left + right) / 2;
            let region = &self.regions[cur];
            match (addr.cmp(&region.base()), addr < region.end()) {
                (Ordering::Less, _) => {
                    right = cur;
                    gap.end = region.base();
                }
                (_, false) => {
                    left = cur + 1;
                    gap.start = region.end();
                }
                _ => return RegionSearch::Found(region.range()),
            }
        }
        RegionSearch::Gap(gap)
    }

    /// Returns the region containing `addr`, if any.
    pub fn region_for(&self, addr: u64) -> Option<&MemRegion> {
        let index = self
            .regions
            .binary_search_by(|r| {
                if r.range().contains(addr) {
                    Ordering::Equal
                } else if addr < r.base() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            })
            .ok()?;
        self.regions.get(index)
    }

    /// Returns an iterator over the regions in ascending address order.
    pub fn regions(&self) -> impl ExactSizeIterator<Item = &MemRegion> {
        self.regions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> MemRange {
        MemRange { start, end }
    }

    fn stub_directory() -> MemRegionDirectory {
        MemRegionDirectoryBuilder::new()
            .add_ram_region(0x1000, 0x1000)
            .unwrap()
            .add_ram_region(0x4000, 0x4000)
            .unwrap()
            .add_io_region(0x1_0000, 0x1000)
            .unwrap()
            .build()
    }

    #[test]
    fn gap_between_two_regions() {
        let dir = MemRegionDirectoryBuilder::new()
            .add_ram_region(0, 0x1000)
            .unwrap()
            .add_ram_region(0x2000, 0x1000)
            .unwrap()
            .build();
        let result = dir.find_region(0x1800);
        assert!(!result.found());
        assert_eq!(result.bounds(), range(0x1000, 0x2000));
        assert_eq!(dir.find_region(0x0), RegionSearch::Found(range(0, 0x1000)));
        assert_eq!(
            dir.find_region(0x2fff),
            RegionSearch::Found(range(0x2000, 0x3000))
        );
    }

    #[test]
    fn find_in_every_position() {
        let dir = stub_directory();
        assert_eq!(dir.find_region(0x800), RegionSearch::Gap(range(0, 0x1000)));
        assert_eq!(
            dir.find_region(0x1000),
            RegionSearch::Found(range(0x1000, 0x2000))
        );
        assert_eq!(
            dir.find_region(0x2000),
            RegionSearch::Gap(range(0x2000, 0x4000))
        );
        assert_eq!(
            dir.find_region(0x7fff),
            RegionSearch::Found(range(0x4000, 0x8000))
        );
        assert_eq!(
            dir.find_region(0x8000),
            RegionSearch::Gap(range(0x8000, 0x1_0000))
        );
        assert_eq!(
            dir.find_region(0x1_0000),
            RegionSearch::Found(range(0x1_0000, 0x1_1000))
        );
        assert_eq!(
            dir.find_region(0x2_0000),
            RegionSearch::Gap(range(0x1_1000, u64::MAX))
        );
        assert_eq!(
            MemRegionDirectory::default().find_region(0x1234),
            RegionSearch::Gap(MemRange::ALL)
        );
    }

    #[test]
    fn region_for() {
        let dir = stub_directory();
        assert_eq!(dir.region_for(0x1_0008).unwrap().region_type(), RegionType::Io);
        assert_eq!(dir.region_for(0x4000).unwrap().size(), 0x4000);
        assert!(dir.region_for(0x3000).is_none());
        assert_eq!(dir.regions().len(), 3);
    }

    #[test]
    fn builder_errors() {
        let builder = MemRegionDirectoryBuilder::new().add_ram_region(0x4000, 0x2000).unwrap();
        assert!(matches!(
            MemRegionDirectoryBuilder::new().add_ram_region(0x800, 0x1000),
            Err(Error::UnalignedRegion)
        ));
        assert!(matches!(
            MemRegionDirectoryBuilder::new().add_ram_region(0, 0),
            Err(Error::UnalignedRegion)
        ));
        assert!(matches!(
            MemRegionDirectoryBuilder::new().add_ram_region(0xffff_ffff_ffff_f000, 0x2000),
            Err(Error::InvalidRegion)
        ));
        assert!(matches!(
            builder.add_io_region(0x5000, 0x1000),
            Err(Error::OverlappingRegion)
        ));
        let builder = MemRegionDirectoryBuilder::new().add_ram_region(0x4000, 0x2000).unwrap();
        assert!(matches!(
            builder.add_io_region(0x1000, 0x1000),
            Err(Error::UnsortedRegion)
        ));
    }

    #[test]
    fn directory_full() {
        let mut builder = MemRegionDirectoryBuilder::new();
        for i in 0..MAX_MEM_REGIONS as u64 {
            builder = builder.add_ram_region(i * 0x2000, 0x1000).unwrap();
        }
        assert!(matches!(
            builder.add_ram_region(0x100_0000, 0x1000),
            Err(Error::OutOfSpace)
        ));
    }
}
