// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use crate::{ErrorKind, MemTransition, Pkvm, Result, TransitionParty};

/// Operation not permitted.
pub const EPERM: i64 = 1;
/// Bad address.
pub const EFAULT: i64 = 14;
/// Invalid argument.
pub const EINVAL: i64 = 22;

impl ErrorKind {
    /// Returns the negative errno reported to the host for this kind of failure.
    pub fn errno(&self) -> i64 {
        match self {
            ErrorKind::InvalidArgument => -EINVAL,
            ErrorKind::PreconditionViolation => -EPERM,
            ErrorKind::InvariantViolation => -EFAULT,
        }
    }
}

fn status(result: Result<()>) -> i64 {
    match result {
        Ok(()) => 0,
        Err(e) => e.kind().errno(),
    }
}

/// Donates `size` bytes from the component `initiator_id`, which knows the memory as
/// `initiator_addr`, to `completer_id`, which knows it as `completer_addr`.
pub fn donate(
    pkvm: &Pkvm,
    size: u64,
    initiator_id: u64,
    initiator_addr: u64,
    completer_id: u64,
    completer_addr: u64,
) -> i64 {
    let tx = TransitionParty::from_raw(initiator_id, initiator_addr).and_then(|initiator| {
        Ok(MemTransition {
            size,
            initiator,
            completer: TransitionParty::from_raw(completer_id, completer_addr)?,
        })
    });
    status(tx.and_then(|tx| pkvm.donate(&tx)))
}

/// Annotates `[addr, addr + size)` of the host EPT as held by `owner_id`.
pub fn set_owner(pkvm: &Pkvm, addr: u64, size: u64, owner_id: u64) -> i64 {
    status(pkvm.set_owner(addr, size, owner_id))
}

/// Returns whether `addr` is in a memory region, along with the bounds of that region or of the
/// gap containing `addr`.
pub fn find_region(pkvm: &Pkvm, addr: u64) -> (bool, u64, u64) {
    let search = pkvm.find_region(addr);
    let bounds = search.bounds();
    (search.found(), bounds.start, bounds.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::stub_pkvm;
    use mem_regions::MemRegionDirectoryBuilder;
    use pkvm_pages::PageState;

    fn stub_scenario() -> Pkvm {
        let regions = MemRegionDirectoryBuilder::new()
            .add_ram_region(0, 0x1000)
            .unwrap()
            .add_ram_region(0x2000, 0x1000)
            .unwrap()
            .build();
        stub_pkvm(regions, 16)
    }

    #[test]
    fn donate_statuses() {
        let pkvm = stub_scenario();
        assert_eq!(find_region(&pkvm, 0x1800), (false, 0x1000, 0x2000));
        assert_eq!(find_region(&pkvm, 0x2800), (true, 0x2000, 0x3000));
        assert_eq!(donate(&pkvm, 0x1000, 0, 0, 1, 0), 0);
        assert_eq!(donate(&pkvm, 0x1000, 0, 0, 1, 0), -EPERM);
        assert_eq!(donate(&pkvm, 0x1000, 1, 0, 0, 0), 0);
        assert_eq!(
            pkvm.host_ept().check_range(0, 0x1000, PageState::Owned),
            Ok(())
        );
    }

    #[test]
    fn invalid_requests() {
        let pkvm = stub_scenario();
        assert_eq!(donate(&pkvm, 0, 0, 0, 1, 0), -EINVAL);
        assert_eq!(donate(&pkvm, 0x1000, 0, 0, 0, 0), -EINVAL);
        assert_eq!(donate(&pkvm, 0x1000, 3, 0, 1, 0), -EINVAL);
        assert_eq!(donate(&pkvm, 0x1000, 0, 0, 3, 0), -EINVAL);
        assert_eq!(donate(&pkvm, 0x1000, 0, 0x1000, 1, 0x1000), -EINVAL);
        assert_eq!(set_owner(&pkvm, 0x2000, 0x1000, 0x8000), -EINVAL);
        assert_eq!(set_owner(&pkvm, 0x2000, 0x1000, 0), -EINVAL);
        assert_eq!(set_owner(&pkvm, 0x2000, 0x1000, 42), 0);
        assert_eq!(donate(&pkvm, 0x1000, 0, 0x2000, 1, 0x2000), -EPERM);
    }

    #[test]
    fn errnos() {
        assert_eq!(ErrorKind::InvalidArgument.errno(), -22);
        assert_eq!(ErrorKind::PreconditionViolation.errno(), -1);
        assert_eq!(ErrorKind::InvariantViolation.errno(), -14);
    }
}
