// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::fmt;
use static_assertions::const_assert;

/// `OwnerId` is the raw number recorded in a page table to identify who owns a page.
/// The host and the hypervisor are special cased:
/// 0 = host
/// 1 = hypervisor
/// 2..=OwnerId::MAX = guest id
///
/// The id must fit the owner field of an invalid EPT entry, so it is limited to `OwnerId::BITS`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId {
    id: u16,
}

// The id is stored in a u16 and must cover every possible guest (15-bit PASID space).
const_assert!(OwnerId::BITS <= u16::BITS);
const_assert!(OwnerId::MAX >= 0x7fff);

impl OwnerId {
    const HOST: u16 = 0;
    const HYPERVISOR: u16 = 1;

    /// Width of the owner id space in bits.
    pub const BITS: u32 = 15;
    /// Largest representable owner id.
    pub const MAX: u64 = (1 << Self::BITS) - 1;

    /// Creates an `OwnerId` from a raw value, returning `None` if it doesn't fit in `BITS`.
    pub fn new(id: u64) -> Option<Self> {
        if id > Self::MAX {
            None
        } else {
            Some(Self { id: id as u16 })
        }
    }

    /// Creates an `OwnerId` for a guest, returning `None` for out-of-range ids and for the ids
    /// reserved for the host and hypervisor.
    pub fn guest(id: u64) -> Option<Self> {
        Self::new(id).filter(|o| !o.is_host() && !o.is_hypervisor())
    }

    /// Returns the ID of the host (the de-privileged primary kernel).
    pub const fn host() -> Self {
        Self { id: Self::HOST }
    }

    /// Returns the ID of the hypervisor.
    pub const fn hypervisor() -> Self {
        Self {
            id: Self::HYPERVISOR,
        }
    }

    /// Returns true if this is the host's id.
    pub fn is_host(&self) -> bool {
        self.id == Self::HOST
    }

    /// Returns true if this is the hypervisor's id.
    pub fn is_hypervisor(&self) -> bool {
        self.id == Self::HYPERVISOR
    }

    /// Returns the raw value of the OwnerId.
    pub fn raw(&self) -> u64 {
        self.id as u64
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.id {
            Self::HOST => write!(f, "host"),
            Self::HYPERVISOR => write!(f, "hyp"),
            id => write!(f, "guest {id}"),
        }
    }
}

/// The parties that can take part in a memory transition.
///
/// Guests aren't parties yet; adding one here makes every transition `match` fail to compile until
/// it is handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComponentId {
    /// The de-privileged host kernel.
    Host,
    /// The hypervisor itself.
    Hypervisor,
}

impl ComponentId {
    /// Decodes a component id passed by the host, returning `None` if it isn't a known party.
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            r if r == OwnerId::HOST as u64 => Some(ComponentId::Host),
            r if r == OwnerId::HYPERVISOR as u64 => Some(ComponentId::Hypervisor),
            _ => None,
        }
    }

    /// Returns the owner id recorded in page tables for pages held by this component.
    pub fn owner_id(&self) -> OwnerId {
        match self {
            ComponentId::Host => OwnerId::host(),
            ComponentId::Hypervisor => OwnerId::hypervisor(),
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.owner_id().fmt(f)
    }
}

/// `AddressSpace` identifies the address space that a raw address is in.
pub trait AddressSpace: Clone + Copy {
    /// Returns the `OwnerId` of the component whose view of memory this is.
    fn id(&self) -> OwnerId;
}

/// Represents the host (i.e. "actual") physical address space. The host's EPT is an identity map
/// so host physical addresses are also the host's guest-physical addresses.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HostPhys;

impl AddressSpace for HostPhys {
    fn id(&self) -> OwnerId {
        OwnerId::host()
    }
}

/// Represents the hypervisor's virtual address space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HypVirt;

impl AddressSpace for HypVirt {
    fn id(&self) -> OwnerId {
        OwnerId::hypervisor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_id_range() {
        assert_eq!(OwnerId::new(0), Some(OwnerId::host()));
        assert_eq!(OwnerId::new(1), Some(OwnerId::hypervisor()));
        assert_eq!(OwnerId::new(0x7fff).unwrap().raw(), 0x7fff);
        assert!(OwnerId::new(0x8000).is_none());
        assert!(OwnerId::guest(0).is_none());
        assert!(OwnerId::guest(1).is_none());
        assert_eq!(OwnerId::guest(2).unwrap().raw(), 2);
    }

    #[test]
    fn component_ids() {
        assert_eq!(ComponentId::from_raw(0), Some(ComponentId::Host));
        assert_eq!(ComponentId::from_raw(1), Some(ComponentId::Hypervisor));
        assert_eq!(ComponentId::from_raw(2), None);
        assert_eq!(ComponentId::Hypervisor.owner_id(), OwnerId::hypervisor());
        assert_eq!(HostPhys.id(), ComponentId::Host.owner_id());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", OwnerId::host()), "host");
        assert_eq!(format!("{}", ComponentId::Hypervisor), "hyp");
        assert_eq!(format!("{}", OwnerId::guest(7).unwrap()), "guest 7");
    }
}
