// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use log::{debug, error};
use mem_regions::RegionType;
use pkvm_ept::{
    decode_owner_state, encode_annotation, EptLeafPerms, EptMemType, EptPageTable, EptProt,
    EptResult,
};
use pkvm_pages::{OwnerId, PageState};
use sync::{Mutex, MutexGuard};

use crate::mem_protect::{Error, Result};
use crate::range_check;

/// Returns how the host maps memory of `region_type`.
pub(crate) fn host_prot(region_type: RegionType) -> EptProt {
    match region_type {
        RegionType::Ram => EptProt {
            perms: EptLeafPerms::RWX,
            mem_type: EptMemType::WriteBack,
        },
        RegionType::Io => EptProt {
            perms: EptLeafPerms::RW,
            mem_type: EptMemType::Uncacheable,
        },
    }
}

/// The host's EPT. The host's view of physical memory is an identity map, so the addresses used
/// here are host physical addresses.
///
/// Every operation that reads page state and then changes it must do both under one `lock()`.
pub struct HostEpt {
    inner: Mutex<EptPageTable>,
}

/// Proof that the host EPT lock is held. Locked operations are methods on the guard; the lock is
/// released when it's dropped.
pub struct HostEptGuard<'a> {
    table: MutexGuard<'a, EptPageTable>,
}

impl HostEpt {
    /// Wraps a host-owned table.
    pub fn new(table: EptPageTable) -> Self {
        Self {
            inner: Mutex::new(table),
        }
    }

    /// Acquires the host EPT lock, spinning until it's available.
    pub fn lock(&self) -> HostEptGuard<'_> {
        HostEptGuard {
            table: self.inner.lock(),
        }
    }

    /// Records that `owner` holds `[addr, addr + size)`, removing it from the host.
    pub fn set_owner(&self, addr: u64, size: u64, owner: OwnerId) -> Result<()> {
        self.lock().set_owner(addr, size, owner)
    }

    /// Checks that every page in `[addr, addr + size)` is in state `expected`.
    pub fn check_range(&self, addr: u64, size: u64, expected: PageState) -> Result<()> {
        self.lock().check_range(addr, size, expected)
    }

    /// Consumes the host EPT, returning the table.
    pub fn into_inner(self) -> EptPageTable {
        self.inner.into_inner()
    }
}

impl HostEptGuard<'_> {
    /// Returns the locked table for read-only inspection.
    pub fn table(&self) -> &EptPageTable {
        &self.table
    }

    /// Unmaps `[addr, addr + size)` from the host and annotates it as `NoPage` held by `owner`.
    /// The host can't be made the owner this way; pages go back to it through a transition.
    pub fn set_owner(&mut self, addr: u64, size: u64, owner: OwnerId) -> Result<()> {
        if owner.is_host() {
            return Err(Error::InvalidOwner(owner.raw()));
        }
        self.annotate(addr, size, owner, PageState::NoPage)
            .map_err(|e| {
                if e.is_bad_request() {
                    return Error::PageTable(e);
                }
                error!("host EPT: giving {addr:#x}+{size:#x} to {owner} failed: {e:?}");
                Error::TransitionFailed(e)
            })?;
        debug!("host EPT: {addr:#x}+{size:#x} now held by {owner}");
        Ok(())
    }

    /// Checks that every page in `[addr, addr + size)` is in state `expected`.
    pub fn check_range(&self, addr: u64, size: u64, expected: PageState) -> Result<()> {
        range_check::check_range(&self.table, addr, size, expected)
    }

    /// Checks that every page in `[addr, addr + size)` is held by `owner` in state `expected`.
    pub fn check_range_owner(
        &self,
        addr: u64,
        size: u64,
        owner: OwnerId,
        expected: PageState,
    ) -> Result<()> {
        range_check::check_range_owner(&self.table, addr, size, owner, expected)
    }

    /// Identity maps `[addr, addr + size)` into the host as owned memory.
    pub fn map(&mut self, addr: u64, size: u64, prot: EptProt) -> EptResult<()> {
        self.table.map(addr, addr, size, prot, PageState::Owned)?;
        debug!("host EPT: mapped {addr:#x}+{size:#x}");
        Ok(())
    }

    /// Removes `[addr, addr + size)` from the host, leaving it host owned.
    pub fn unmap(&mut self, addr: u64, size: u64) -> EptResult<()> {
        self.table.unmap(addr, size)?;
        debug!("host EPT: unmapped {addr:#x}+{size:#x}");
        Ok(())
    }

    /// Replaces the host's entries for `[addr, addr + size)` with an annotation.
    pub fn annotate(
        &mut self,
        addr: u64,
        size: u64,
        owner: OwnerId,
        state: PageState,
    ) -> EptResult<()> {
        self.table.annotate(addr, size, encode_annotation(owner, state))
    }

    /// Returns the (owner, state) of the page at `addr`.
    pub fn owner_state(&self, addr: u64) -> Result<(OwnerId, PageState)> {
        let leaf = self.table.leaf(addr)?;
        Ok(decode_owner_state(leaf.pte, self.table.owner())?)
    }

    #[cfg(test)]
    pub(crate) fn table_mut(&mut self) -> &mut EptPageTable {
        &mut self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::stub_host_table;
    use crate::ErrorKind;
    use pkvm_ept::EptError;

    #[test]
    fn set_owner_annotates() {
        let host_ept = HostEpt::new(stub_host_table());
        let guest = OwnerId::guest(5).unwrap();
        host_ept.set_owner(0x20_0000, 0x1000, guest).unwrap();
        let guard = host_ept.lock();
        assert_eq!(
            guard.owner_state(0x20_0000).unwrap(),
            (guest, PageState::NoPage)
        );
        assert_eq!(
            guard.owner_state(0x20_1000).unwrap(),
            (OwnerId::host(), PageState::Owned)
        );
        assert!(guard.table().lookup(0x20_0000).is_none());
        assert!(guard.table().lookup(0x20_1000).is_some());
    }

    #[test]
    fn set_owner_rejects_host() {
        let host_ept = HostEpt::new(stub_host_table());
        assert_eq!(
            host_ept.set_owner(0, 0x1000, OwnerId::host()),
            Err(Error::InvalidOwner(0))
        );
        assert_eq!(
            host_ept.set_owner(0x800, 0x1000, OwnerId::hypervisor()),
            Err(Error::PageTable(EptError::UnalignedAddress(0x800)))
        );
        assert_eq!(
            Error::PageTable(EptError::UnalignedAddress(0x800)).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(host_ept.check_range(0, 0x40_0000, PageState::Owned), Ok(()));
    }

    #[test]
    fn map_and_unmap() {
        let host_ept = HostEpt::new(stub_host_table());
        let mut guard = host_ept.lock();
        guard
            .map(0x100_0000, 0x2000, host_prot(RegionType::Io))
            .unwrap();
        let mapping = guard.table().lookup(0x100_1000).unwrap();
        assert_eq!(mapping.phys, 0x100_1000);
        assert_eq!(mapping.perms, EptLeafPerms::RW);
        assert_eq!(mapping.mem_type, EptMemType::Uncacheable);
        assert_eq!(
            guard.map(0x100_0000, 0x1000, host_prot(RegionType::Ram)),
            Err(EptError::MappingExists(0x100_0000))
        );
        guard.unmap(0x100_0000, 0x2000).unwrap();
        assert!(guard.table().lookup(0x100_0000).is_none());
        assert_eq!(
            guard.owner_state(0x100_0000).unwrap(),
            (OwnerId::host(), PageState::Owned)
        );
    }

    #[test]
    fn into_inner() {
        let host_ept = HostEpt::new(stub_host_table());
        let pool = host_ept.into_inner().destroy();
        assert_eq!(pool.pages_available(), 16);
    }
}
