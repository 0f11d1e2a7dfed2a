// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

// VA-Layout of pKVM.
//
//
// +-------------------------+ 0x0000_0000_0000_0000
// | (unused)                |
// +-------------------------+ iova_offset
// | I/O alias of device     |
// | memory (phys + offset)  |
// +-------------------------+ page_base_offset
// | Direct map of all       |
// | physical memory         |
// +-------------------------+ End of Address Space.
//
// The hypervisor image itself is linked at `symbol_base_offset` above its load address.

use pkvm_ept::MmOps;
use pkvm_pages::{HostPhysAddr, HypVirtAddr, RawAddr};

/// Offsets describing where physical memory appears in the hypervisor's address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HypMemoryLayout {
    /// Base of the I/O alias of device memory.
    pub iova_offset: u64,
    /// Base of the direct map. Must not be below `iova_offset`.
    pub page_base_offset: u64,
    /// Difference between a hypervisor symbol's link address and its physical address.
    pub symbol_base_offset: u64,
}

/// Translations between host physical and hypervisor virtual addresses.
#[derive(Debug)]
pub struct HypMemory {
    layout: HypMemoryLayout,
}

impl HypMemory {
    /// Creates the translations for `layout`, or returns `None` if the I/O alias starts above the
    /// direct map.
    pub fn new(layout: HypMemoryLayout) -> Option<Self> {
        (layout.iova_offset <= layout.page_base_offset).then_some(Self { layout })
    }

    /// Returns the direct-map address of `phys`, or `None` if it falls off the address space.
    pub fn phys_to_virt(&self, phys: HostPhysAddr) -> Option<HypVirtAddr> {
        self.layout
            .page_base_offset
            .checked_add(phys.bits())
            .map(RawAddr::hyp_virt)
    }

    /// Returns the I/O alias of device address `phys`, or `None` if the alias would run into the
    /// direct map.
    pub fn iophys_to_virt(&self, phys: HostPhysAddr) -> Option<HypVirtAddr> {
        self.layout
            .iova_offset
            .checked_add(phys.bits())
            .filter(|va| *va < self.layout.page_base_offset)
            .map(RawAddr::hyp_virt)
    }

    /// Returns the physical address behind a direct-map or I/O alias address.
    pub fn virt_to_phys(&self, virt: HypVirtAddr) -> Option<HostPhysAddr> {
        let va = virt.bits();
        if va < self.layout.iova_offset {
            None
        } else if va >= self.layout.page_base_offset {
            Some(RawAddr::host_phys(va - self.layout.page_base_offset))
        } else {
            Some(RawAddr::host_phys(va - self.layout.iova_offset))
        }
    }

    /// Returns the physical address of a symbol in the hypervisor image.
    pub fn virt_to_symbol_phys(&self, virt: HypVirtAddr) -> HostPhysAddr {
        RawAddr::host_phys(virt.bits().wrapping_sub(self.layout.symbol_base_offset))
    }
}

// Safety: page-table pages are allocated from RAM, which is entirely covered by the direct map.
unsafe impl MmOps for HypMemory {
    fn phys_to_virt(&self, phys: u64) -> u64 {
        self.layout.page_base_offset.wrapping_add(phys)
    }

    fn virt_to_phys(&self, virt: u64) -> u64 {
        virt.wrapping_sub(self.layout.page_base_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: HypMemoryLayout = HypMemoryLayout {
        iova_offset: 0xffff_a000_0000_0000,
        page_base_offset: 0xffff_c000_0000_0000,
        symbol_base_offset: 0xffff_ffff_8000_0000,
    };

    #[test]
    fn direct_map() {
        let mem = HypMemory::new(LAYOUT).unwrap();
        let va = mem.phys_to_virt(RawAddr::host_phys(0x1234_5000)).unwrap();
        assert_eq!(va.bits(), 0xffff_c000_1234_5000);
        assert_eq!(mem.virt_to_phys(va).unwrap().bits(), 0x1234_5000);
        assert_eq!(MmOps::phys_to_virt(&mem, 0x1000), 0xffff_c000_0000_1000);
        assert_eq!(MmOps::virt_to_phys(&mem, 0xffff_c000_0000_1000), 0x1000);
        assert!(mem.phys_to_virt(RawAddr::host_phys(u64::MAX)).is_none());
    }

    #[test]
    fn io_alias() {
        let mem = HypMemory::new(LAYOUT).unwrap();
        let va = mem.iophys_to_virt(RawAddr::host_phys(0xfee0_0000)).unwrap();
        assert_eq!(va.bits(), 0xffff_a000_fee0_0000);
        assert_eq!(mem.virt_to_phys(va).unwrap().bits(), 0xfee0_0000);
        // Would land in the direct map.
        assert!(mem
            .iophys_to_virt(RawAddr::host_phys(0x2000_0000_0000))
            .is_none());
        assert!(mem
            .virt_to_phys(RawAddr::hyp_virt(0x1000))
            .is_none());
    }

    #[test]
    fn symbols() {
        let mem = HypMemory::new(LAYOUT).unwrap();
        assert_eq!(
            mem.virt_to_symbol_phys(RawAddr::hyp_virt(0xffff_ffff_8100_0000))
                .bits(),
            0x100_0000
        );
        assert!(HypMemory::new(HypMemoryLayout {
            iova_offset: 2,
            page_base_offset: 1,
            symbol_base_offset: 0,
        })
        .is_none());
    }
}
