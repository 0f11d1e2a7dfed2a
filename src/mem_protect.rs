// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Ownership transitions between the host and the hypervisor.
//!
//! A donation moves a page from the initiator, which must own it, to the completer:
//!
//! ```text
//! initiator: OWNED  => NOPAGE
//! completer: NOPAGE => OWNED
//! ```
//!
//! The hypervisor has no EPT of its own and can reach all of memory, so its side of a transition
//! is recorded entirely in the host EPT: a page the hypervisor holds is a `NoPage` annotation
//! naming it as owner. Each transition validates its arguments, checks the initiator's page state
//! and then applies the effect, all under a single acquisition of the host EPT lock.

use log::{debug, error, warn};
use mem_regions::{region_contains, MemRange, RegionType};
use pkvm_ept::EptError;
use pkvm_pages::{
    ComponentId, HostPageAddr, HostPhysAddr, HypVirtAddr, OwnerId, PageSize, PageState, RawAddr,
};

use crate::host_ept::{host_prot, HostEptGuard};
use crate::Pkvm;

/// Errors returned by memory-protection operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The size is zero or not a multiple of 4kB.
    InvalidSize(u64),
    /// The address isn't 4kB aligned.
    UnalignedAddress(u64),
    /// The range starting at this address wraps the address space.
    InvalidRange(u64),
    /// Not a component that can take part in a transition.
    UnknownComponent(u64),
    /// The owner id is out of range or can't be used for this operation.
    InvalidOwner(u64),
    /// The initiator and completer are the same component.
    SelfTransition(ComponentId),
    /// The hypervisor address isn't the direct-map address of the host address.
    AddressMismatch { host: u64, hyp: u64 },
    /// The range isn't contained in a single memory region.
    NotInRegion(u64),
    /// A page in the range isn't in the expected state.
    PageStateMismatch {
        addr: u64,
        expected: PageState,
        found: PageState,
    },
    /// A page in the range isn't held by the expected owner.
    PageOwnerMismatch {
        addr: u64,
        expected: OwnerId,
        found: OwnerId,
    },
    /// Accessing the host EPT failed.
    PageTable(EptError),
    /// Applying a transition failed after its checks had passed.
    TransitionFailed(EptError),
}

/// Holds the result of memory-protection operations.
pub type Result<T> = core::result::Result<T, Error>;

impl From<EptError> for Error {
    fn from(e: EptError) -> Self {
        Error::PageTable(e)
    }
}

/// Broad classes of `Error`, determining how a failure is reported to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was malformed. Nothing was checked or changed.
    InvalidArgument,
    /// The pages weren't in the required state. Nothing was changed.
    PreconditionViolation,
    /// The page tables are inconsistent or an update that should have succeeded didn't.
    InvariantViolation,
}

impl Error {
    /// Returns the class of the error.
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            PageStateMismatch { .. } | PageOwnerMismatch { .. } => ErrorKind::PreconditionViolation,
            PageTable(e) if e.is_bad_request() => ErrorKind::InvalidArgument,
            TransitionFailed(_) | PageTable(_) => ErrorKind::InvariantViolation,
            InvalidSize(_)
            | UnalignedAddress(_)
            | InvalidRange(_)
            | UnknownComponent(_)
            | InvalidOwner(_)
            | SelfTransition(_)
            | AddressMismatch { .. }
            | NotInRegion(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// One side of a transition and the address it knows the memory by.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransitionParty {
    Host { addr: HostPhysAddr },
    Hyp { addr: HypVirtAddr },
}

impl TransitionParty {
    /// Builds a party from a raw component id and address as passed by the host.
    pub fn from_raw(id: u64, addr: u64) -> Result<Self> {
        match ComponentId::from_raw(id).ok_or(Error::UnknownComponent(id))? {
            ComponentId::Host => Ok(TransitionParty::Host {
                addr: RawAddr::host_phys(addr),
            }),
            ComponentId::Hypervisor => Ok(TransitionParty::Hyp {
                addr: RawAddr::hyp_virt(addr),
            }),
        }
    }

    /// Returns the component this party is.
    pub fn component(&self) -> ComponentId {
        match self {
            TransitionParty::Host { .. } => ComponentId::Host,
            TransitionParty::Hyp { .. } => ComponentId::Hypervisor,
        }
    }
}

/// A request to move `size` bytes of memory from `initiator` to `completer`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemTransition {
    pub size: u64,
    pub initiator: TransitionParty,
    pub completer: TransitionParty,
}

// A transition that passed argument validation.
struct ValidTransition {
    host_addr: HostPageAddr,
    size: u64,
    region_type: RegionType,
}

impl ValidTransition {
    fn addr(&self) -> u64 {
        self.host_addr.bits()
    }
}

// Checks that the initiator holds the whole range.
fn check_donation(
    host_ept: &HostEptGuard,
    tx: &MemTransition,
    valid: &ValidTransition,
) -> Result<()> {
    let (addr, size) = (valid.addr(), valid.size);
    match tx.initiator {
        TransitionParty::Host { .. } => host_ept.check_range(addr, size, PageState::Owned)?,
        TransitionParty::Hyp { .. } => {
            host_ept.check_range_owner(addr, size, OwnerId::hypervisor(), PageState::NoPage)?
        }
    }
    // The hypervisor can access all of memory, and the host takes back exactly what the
    // initiator's annotation records, so completers have nothing further to check.
    match tx.completer {
        TransitionParty::Host { .. } | TransitionParty::Hyp { .. } => Ok(()),
    }
}

fn do_donate(
    host_ept: &mut HostEptGuard,
    tx: &MemTransition,
    valid: &ValidTransition,
) -> Result<()> {
    let (addr, size) = (valid.addr(), valid.size);
    match (tx.initiator, tx.completer) {
        (TransitionParty::Host { .. }, TransitionParty::Hyp { .. }) => host_ept
            .annotate(addr, size, OwnerId::hypervisor(), PageState::NoPage)
            .map_err(Error::TransitionFailed),
        (TransitionParty::Hyp { .. }, TransitionParty::Host { .. }) => host_ept
            .map(addr, size, host_prot(valid.region_type))
            .map_err(Error::TransitionFailed),
        (p @ TransitionParty::Host { .. }, TransitionParty::Host { .. })
        | (p @ TransitionParty::Hyp { .. }, TransitionParty::Hyp { .. }) => {
            Err(Error::SelfTransition(p.component()))
        }
    }
}

impl Pkvm {
    /// Donates the memory described by `tx` from its initiator to its completer.
    pub fn donate(&self, tx: &MemTransition) -> Result<()> {
        let valid = self.validate_transition(tx)?;
        let (from, to) = (tx.initiator.component(), tx.completer.component());
        let (addr, size) = (valid.addr(), valid.size);
        let mut host_ept = self.host_ept().lock();
        if let Err(e) = check_donation(&host_ept, tx, &valid) {
            match e.kind() {
                ErrorKind::InvariantViolation => {
                    error!("donation {from} -> {to} of {addr:#x}+{size:#x} hit a bad entry: {e:?}")
                }
                _ => warn!("donation {from} -> {to} of {addr:#x}+{size:#x} rejected: {e:?}"),
            }
            return Err(e);
        }
        if let Err(e) = do_donate(&mut host_ept, tx, &valid) {
            error!("donation {from} -> {to} of {addr:#x}+{size:#x} failed after checks: {e:?}");
            return Err(e);
        }
        debug!("donated {addr:#x}+{size:#x} from {from} to {to}");
        Ok(())
    }

    /// Donates `[hpa, hpa + size)` from the host to the hypervisor.
    pub fn host_donate_hyp(&self, hpa: u64, size: u64) -> Result<()> {
        let host = RawAddr::host_phys(hpa);
        let hyp = self
            .hyp_memory()
            .phys_to_virt(host)
            .ok_or(Error::InvalidRange(hpa))?;
        self.donate(&MemTransition {
            size,
            initiator: TransitionParty::Host { addr: host },
            completer: TransitionParty::Hyp { addr: hyp },
        })
    }

    /// Returns `[hyp_va, hyp_va + size)` from the hypervisor to the host.
    pub fn hyp_donate_host(&self, hyp_va: u64, size: u64) -> Result<()> {
        let hyp = RawAddr::hyp_virt(hyp_va);
        let host = self
            .hyp_memory()
            .virt_to_phys(hyp)
            .ok_or(Error::InvalidRange(hyp_va))?;
        self.donate(&MemTransition {
            size,
            initiator: TransitionParty::Hyp { addr: hyp },
            completer: TransitionParty::Host { addr: host },
        })
    }

    /// Records that the component with raw id `owner` holds `[addr, addr + size)`, removing it
    /// from the host.
    pub fn set_owner(&self, addr: u64, size: u64, owner: u64) -> Result<()> {
        let owner = OwnerId::new(owner).ok_or(Error::InvalidOwner(owner))?;
        self.host_ept().set_owner(addr, size, owner)
    }

    fn validate_transition(&self, tx: &MemTransition) -> Result<ValidTransition> {
        if tx.size == 0 || !PageSize::Size4k.is_aligned(tx.size) {
            return Err(Error::InvalidSize(tx.size));
        }
        let (host, hyp) = match (tx.initiator, tx.completer) {
            (TransitionParty::Host { addr: host }, TransitionParty::Hyp { addr: hyp })
            | (TransitionParty::Hyp { addr: hyp }, TransitionParty::Host { addr: host }) => {
                (host, hyp)
            }
            (p, _) => return Err(Error::SelfTransition(p.component())),
        };
        let host_addr = HostPageAddr::new(host).ok_or(Error::UnalignedAddress(host.bits()))?;
        if !PageSize::Size4k.is_aligned(hyp.bits()) {
            return Err(Error::UnalignedAddress(hyp.bits()));
        }
        if self.hyp_memory().phys_to_virt(host) != Some(hyp) {
            return Err(Error::AddressMismatch {
                host: host.bits(),
                hyp: hyp.bits(),
            });
        }
        let range =
            MemRange::with_size(host.bits(), tx.size).ok_or(Error::InvalidRange(host.bits()))?;
        let region = self
            .regions()
            .region_for(host.bits())
            .filter(|r| region_contains(&range, &r.range()))
            .ok_or(Error::NotInRegion(host.bits()))?;
        Ok(ValidTransition {
            host_addr,
            size: tx.size,
            region_type: region.region_type(),
        })
    }
}
