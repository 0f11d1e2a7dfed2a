// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use pkvm_pages::{OwnerId, PageSize};

use crate::*;

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

/// Returns an empty four-level table owned by `owner` with all huge page sizes enabled.
pub fn stub_table(owner: OwnerId, num_pages: usize) -> EptPageTable {
    EptPageTable::new(
        EptCaps::default(),
        owner,
        stub_pool(num_pages),
        &IdentityMmOps,
    )
    .unwrap()
}
