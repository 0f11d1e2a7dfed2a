// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::ptr;

use pkvm_pages::PageSize;

use crate::page_table::{Error, Result};

const PAGE_SIZE: u64 = PageSize::Size4k as u64;

/// Translates between the physical addresses stored in EPT entries and hypervisor virtual
/// addresses that can be dereferenced.
///
/// # Safety
///
/// `phys_to_virt()` must return a mapped, writable address for every page handed out by the
/// `PagePool` of any table using this translation, and `virt_to_phys()` must be its inverse.
pub unsafe trait MmOps: Sync {
    /// Returns the hypervisor virtual address of `phys`.
    fn phys_to_virt(&self, phys: u64) -> u64;
    /// Returns the physical address backing `virt`.
    fn virt_to_phys(&self, virt: u64) -> u64;
}

/// Translation for environments where physical memory is identity mapped.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityMmOps;

// Safety: identity translation is valid whenever pool memory is accessed at its own address, which
// `PagePool::new()` requires.
unsafe impl MmOps for IdentityMmOps {
    fn phys_to_virt(&self, phys: u64) -> u64 {
        phys
    }

    fn virt_to_phys(&self, virt: u64) -> u64 {
        virt
    }
}

/// A pool of 4k pages for page-table pages. Pages are carved off a contiguous region by bumping a
/// cursor; freed pages are kept on an intrusive list threaded through their first word and reused
/// before the cursor moves again. Every page returned is zeroed.
#[derive(Debug)]
pub struct PagePool {
    cur: u64,
    end: u64,
    free_head: Option<u64>,
    free_pages: usize,
}

impl PagePool {
    /// Creates a pool over `num_pages` pages starting at virtual address `base`.
    ///
    /// # Safety
    ///
    /// The region must be writable, unused by anything else for the life of the pool and of any
    /// table built from it.
    pub unsafe fn new(base: u64, num_pages: usize) -> Result<Self> {
        if !PageSize::Size4k.is_aligned(base) {
            return Err(Error::UnalignedAddress(base));
        }
        let end = (num_pages as u64)
            .checked_mul(PAGE_SIZE)
            .and_then(|size| base.checked_add(size))
            .ok_or(Error::OutOfRange(base))?;
        Ok(Self {
            cur: base,
            end,
            free_head: None,
            free_pages: 0,
        })
    }

    /// Takes a zeroed page from the pool, returning its virtual address.
    pub fn alloc_page(&mut self) -> Option<u64> {
        let page = match self.free_head {
            Some(page) => {
                // Safety: pages on the free list belong to this pool and their first word holds
                // the next free page, as written by `free_page()`.
                let next = unsafe { ptr::read_volatile(page as *const u64) };
                self.free_head = (next != 0).then_some(next);
                self.free_pages -= 1;
                page
            }
            None if self.cur < self.end => {
                let page = self.cur;
                self.cur += PAGE_SIZE;
                page
            }
            None => return None,
        };
        // Safety: the page belongs to the pool and nothing else references it.
        unsafe { ptr::write_bytes(page as *mut u8, 0, PAGE_SIZE as usize) };
        Some(page)
    }

    /// Returns a page to the pool.
    ///
    /// # Safety
    ///
    /// `page` must have been returned by `alloc_page()` on this pool and must no longer be
    /// referenced.
    pub unsafe fn free_page(&mut self, page: u64) {
        ptr::write_volatile(page as *mut u64, self.free_head.unwrap_or(0));
        self.free_head = Some(page);
        self.free_pages += 1;
    }

    /// Returns the number of pages that can still be allocated.
    pub fn pages_available(&self) -> usize {
        ((self.end - self.cur) / PAGE_SIZE) as usize + self.free_pages
    }
}
