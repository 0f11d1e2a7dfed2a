// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! # pKVM memory ownership protection for x86.
//!
//! The host kernel runs de-privileged under pKVM, and every physical page it can reach is
//! described by the host's EPT. This crate is the layer that decides who owns each page.
//!
//! ## Key types
//!
//! - `Pkvm` ties together the host EPT, the directory of memory regions and the hypervisor's
//!   address translations. Boot code builds one with `Pkvm::new()`.
//! - `HostEpt` serializes access to the host EPT. `HostEpt::lock()` returns a `HostEptGuard`;
//!   operations that need to be atomic with respect to other cores are methods on the guard.
//! - `MemTransition` describes a request to move memory between the host and the hypervisor. See
//!   `mem_protect` for the donation protocol.
//!
//! Ownership is never tracked outside the page tables: the (owner, state) of every page is
//! decoded from its leaf entry in the host EPT, which is either a mapping owned by the host or an
//! annotation naming the page's holder.
#![no_std]

// Include std when running unit tests.
#[cfg(test)]
#[macro_use]
extern crate std;

/// Console output and the `log` backend.
pub mod console;
mod host_ept;
mod hyp_memory;
/// Raw entry points returning errno-style statuses to the host.
pub mod hypercall;
pub mod mem_protect;
mod range_check;
#[cfg(test)]
mod test_stubs;

pub use host_ept::{HostEpt, HostEptGuard};
pub use hyp_memory::{HypMemory, HypMemoryLayout};
pub use mem_protect::{Error, ErrorKind, MemTransition, Result, TransitionParty};
pub use range_check::{check_range, check_range_owner};

use log::info;
use mem_regions::{MemRegionDirectory, RegionSearch};
use pkvm_ept::{EptCaps, EptPageTable, PagePool};
use pkvm_pages::OwnerId;

use host_ept::host_prot;

/// The memory protection state of the hypervisor.
pub struct Pkvm {
    host_ept: HostEpt,
    regions: MemRegionDirectory,
    hyp_mem: &'static HypMemory,
}

impl Pkvm {
    /// Builds the host EPT from `pool` and hands every region in `regions` to the host, identity
    /// mapped and owned. `hyp_mem` must translate the addresses of the pages in `pool`.
    pub fn new(
        regions: MemRegionDirectory,
        hyp_mem: &'static HypMemory,
        caps: EptCaps,
        pool: PagePool,
    ) -> Result<Self> {
        let table = EptPageTable::new(caps, OwnerId::host(), pool, hyp_mem)?;
        let host_ept = HostEpt::new(table);
        {
            let mut guard = host_ept.lock();
            for region in regions.regions() {
                guard.map(
                    region.base(),
                    region.size(),
                    host_prot(region.region_type()),
                )?;
            }
            info!(
                "host EPT: mapped {} regions, {} table pages left",
                regions.regions().len(),
                guard.table().pool().pages_available()
            );
        }
        Ok(Self {
            host_ept,
            regions,
            hyp_mem,
        })
    }

    /// Returns the host's EPT.
    pub fn host_ept(&self) -> &HostEpt {
        &self.host_ept
    }

    /// Returns the directory of memory regions.
    pub fn regions(&self) -> &MemRegionDirectory {
        &self.regions
    }

    /// Returns the hypervisor's address translations.
    pub fn hyp_memory(&self) -> &HypMemory {
        self.hyp_mem
    }

    /// Looks up the memory region containing `addr`.
    pub fn find_region(&self, addr: u64) -> RegionSearch {
        self.regions.find_region(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::{stub_hyp_memory, stub_pkvm, stub_pool};
    use mem_regions::MemRegionDirectoryBuilder;
    use pkvm_ept::{EptError, EptLeafPerms, EptLevel, EptMemType};
    use pkvm_pages::PageState;

    #[test]
    fn host_gets_every_region() {
        let regions = MemRegionDirectoryBuilder::new()
            .add_ram_region(0, 0x40_0000)
            .unwrap()
            .add_io_region(0xfee0_0000, 0x1000)
            .unwrap()
            .build();
        let pkvm = stub_pkvm(regions, 16);
        let host_ept = pkvm.host_ept().lock();
        let ram = host_ept.table().lookup(0x20_0000).unwrap();
        assert_eq!(ram.level, EptLevel::Pd);
        assert_eq!(ram.perms, EptLeafPerms::RWX);
        assert_eq!(ram.mem_type, EptMemType::WriteBack);
        let io = host_ept.table().lookup(0xfee0_0000).unwrap();
        assert_eq!(io.perms, EptLeafPerms::RW);
        assert_eq!(io.mem_type, EptMemType::Uncacheable);
        assert!(host_ept.table().lookup(0x40_0000).is_none());
        assert_eq!(host_ept.check_range(0, 0x40_0000, PageState::Owned), Ok(()));
        assert!(pkvm.find_region(0xfee0_0800).found());
        assert!(!pkvm.find_region(0x40_0000).found());
    }

    #[test]
    fn not_enough_table_pages() {
        let regions = MemRegionDirectoryBuilder::new()
            .add_ram_region(0, 0x1000)
            .unwrap()
            .build();
        assert!(matches!(
            Pkvm::new(regions, stub_hyp_memory(), EptCaps::default(), stub_pool(2)),
            Err(Error::PageTable(EptError::InsufficientPages))
        ));
    }
}
