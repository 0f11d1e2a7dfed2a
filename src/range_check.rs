// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::cmp;

use pkvm_ept::{decode_owner_state, EptPageTable, WalkEntry};
use pkvm_pages::{OwnerId, PageState};

use crate::mem_protect::{Error, Result};

/// Checks that every page in `[addr, addr + size)` of `table` is in `expected` state, whoever
/// owns it. Stops at the first page that isn't.
pub fn check_range(table: &EptPageTable, addr: u64, size: u64, expected: PageState) -> Result<()> {
    table.walk(addr, size, true, |e: &WalkEntry| {
        let (_, found) = decode_owner_state(e.pte, table.owner())?;
        if found != expected {
            return Err(Error::PageStateMismatch {
                addr: cmp::max(e.addr, addr),
                expected,
                found,
            });
        }
        Ok(())
    })
}

/// Like `check_range()`, but also requires every page to be held by `owner`.
pub fn check_range_owner(
    table: &EptPageTable,
    addr: u64,
    size: u64,
    owner: OwnerId,
    expected: PageState,
) -> Result<()> {
    table.walk(addr, size, true, |e: &WalkEntry| {
        let page = cmp::max(e.addr, addr);
        let (found_owner, found) = decode_owner_state(e.pte, table.owner())?;
        if found_owner != owner {
            return Err(Error::PageOwnerMismatch {
                addr: page,
                expected: owner,
                found: found_owner,
            });
        }
        if found != expected {
            return Err(Error::PageStateMismatch {
                addr: page,
                expected,
                found,
            });
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::stub_host_table;
    use pkvm_ept::{encode_annotation, EptError, Pte};

    #[test]
    fn uniform_range() {
        let table = stub_host_table();
        assert_eq!(check_range(&table, 0, 0x40_0000, PageState::Owned), Ok(()));
        assert_eq!(
            check_range(&table, 0x1000, 0x1000, PageState::NoPage),
            Err(Error::PageStateMismatch {
                addr: 0x1000,
                expected: PageState::NoPage,
                found: PageState::Owned
            })
        );
    }

    #[test]
    fn stops_at_first_mismatch() {
        let mut table = stub_host_table();
        table
            .annotate(
                0x5000,
                0x2000,
                encode_annotation(OwnerId::hypervisor(), PageState::NoPage),
            )
            .unwrap();
        assert_eq!(
            check_range(&table, 0x2000, 0x8000, PageState::Owned),
            Err(Error::PageStateMismatch {
                addr: 0x5000,
                expected: PageState::Owned,
                found: PageState::NoPage
            })
        );
        assert_eq!(
            check_range_owner(&table, 0x5000, 0x2000, OwnerId::hypervisor(), PageState::NoPage),
            Ok(())
        );
        assert_eq!(
            check_range_owner(&table, 0x4000, 0x2000, OwnerId::hypervisor(), PageState::NoPage),
            Err(Error::PageOwnerMismatch {
                addr: 0x4000,
                expected: OwnerId::hypervisor(),
                found: OwnerId::host()
            })
        );
    }

    #[test]
    fn corrupt_and_invalid_ranges() {
        let mut table = stub_host_table();
        // Reserved state encoding in an otherwise valid annotation.
        let corrupt = Pte::from_bits(0b10 << 56);
        table.annotate(0x3000, 0x1000, corrupt).unwrap();
        assert_eq!(
            check_range(&table, 0x3000, 0x1000, PageState::Owned),
            Err(Error::PageTable(EptError::CorruptEntry(corrupt.bits())))
        );
        assert_eq!(
            check_range(&table, 0x3000, 0, PageState::Owned),
            Err(Error::PageTable(EptError::UnalignedSize(0)))
        );
    }
}
