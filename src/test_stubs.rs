// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use mem_regions::MemRegionDirectory;
use pkvm_ept::{EptCaps, EptLeafPerms, EptMemType, EptPageTable, EptProt, IdentityMmOps, PagePool};
use pkvm_pages::{OwnerId, PageSize, PageState};

use crate::{HypMemory, HypMemoryLayout, Pkvm};

const PAGE_SIZE: usize = PageSize::Size4k as usize;

/// Returns a pool over `num_pages` of leaked, page-aligned heap memory.
pub fn stub_pool(num_pages: usize) -> PagePool {
    let backing_mem = vec![0u8; (num_pages + 1) * PAGE_SIZE];
    let aligned_pointer = unsafe {
        // Not safe - just a test
        backing_mem
            .as_ptr()
            .add(backing_mem.as_ptr().align_offset(PAGE_SIZE))
    };
    // Leak the backing ram so it doesn't get freed
    std::mem::forget(backing_mem);
    unsafe {
        // Not safe - just a test
        PagePool::new(aligned_pointer as u64, num_pages).unwrap()
    }
}

/// Returns a host table with the first 4MB identity mapped as owned RAM.
pub fn stub_host_table() -> EptPageTable {
    let mut table =
        EptPageTable::new(EptCaps::default(), OwnerId::host(), stub_pool(16), &IdentityMmOps)
            .unwrap();
    let prot = EptProt {
        perms: EptLeafPerms::RWX,
        mem_type: EptMemType::WriteBack,
    };
    table
        .map(0, 0, 0x40_0000, prot, PageState::Owned)
        .unwrap();
    table
}

/// Returns hypervisor memory translations where the direct map is the identity, matching the
/// addresses of heap-backed test pools.
pub fn stub_hyp_memory() -> &'static HypMemory {
    let layout = HypMemoryLayout {
        iova_offset: 0,
        page_base_offset: 0,
        symbol_base_offset: 0,
    };
    std::boxed::Box::leak(std::boxed::Box::new(HypMemory::new(layout).unwrap()))
}

/// Returns a `Pkvm` over `regions` with `pool_pages` pages for host EPT tables.
pub fn stub_pkvm(regions: MemRegionDirectory, pool_pages: usize) -> Pkvm {
    Pkvm::new(
        regions,
        stub_hyp_memory(),
        EptCaps::default(),
        stub_pool(pool_pages),
    )
    .unwrap()
}
