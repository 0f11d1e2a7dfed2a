// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::marker::PhantomData;

use crate::{AddressSpace, HostPhys, HypVirt};

/// Page sizes that can be mapped by a single leaf entry.
#[repr(u64)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PageSize {
    Size4k = 4 * 1024,
    Size2M = 2 * 1024 * 1024,
    Size1G = 1024 * 1024 * 1024,
}

impl PageSize {
    /// Returns log2 of the page size.
    pub const fn shift(&self) -> u64 {
        (*self as u64).trailing_zeros() as u64
    }

    /// Checks if the given quantity is aligned to this page size.
    pub const fn is_aligned(&self, val: u64) -> bool {
        (val & (*self as u64 - 1)) == 0
    }

    /// Rounds down the quantity to the nearest multiple of this page size.
    pub const fn round_down(&self, val: u64) -> u64 {
        val & !(*self as u64 - 1)
    }
}

/// A raw address in an address space.
#[derive(Copy, Clone, Debug)]
pub struct RawAddr<AS: AddressSpace>(u64, PhantomData<AS>);

impl<AS: AddressSpace> RawAddr<AS> {
    /// Returns the inner 64 bit address.
    pub fn bits(&self) -> u64 {
        self.0
    }
}

impl RawAddr<HostPhys> {
    pub fn host_phys(addr: u64) -> Self {
        Self(addr, PhantomData)
    }
}

impl RawAddr<HypVirt> {
    pub fn hyp_virt(addr: u64) -> Self {
        Self(addr, PhantomData)
    }
}

/// Convenience type aliases for host-physical and hypervisor-virtual addresses.
pub type HostPhysAddr = RawAddr<HostPhys>;
pub type HypVirtAddr = RawAddr<HypVirt>;

impl<AS: AddressSpace> PartialEq for RawAddr<AS> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// An address of a Page in an address space. It is guaranteed to be aligned to a page boundary.
#[derive(Copy, Clone, Debug)]
pub struct PageAddr<AS: AddressSpace> {
    addr: RawAddr<AS>,
}

pub type HostPageAddr = PageAddr<HostPhys>;

impl<AS: AddressSpace> PageAddr<AS> {
    /// Creates a 4kB-aligned `PageAddr` from a `RawAddr`, returning `None` if the address isn't
    /// aligned.
    pub fn new(addr: RawAddr<AS>) -> Option<Self> {
        Self::with_alignment(addr, PageSize::Size4k)
    }

    /// Creates a `PageAddr` from a `RawAddr`, returns `None` if the address isn't aligned to the
    /// requested page size.
    pub fn with_alignment(addr: RawAddr<AS>, alignment: PageSize) -> Option<Self> {
        alignment
            .is_aligned(addr.bits())
            .then_some(PageAddr { addr })
    }

    /// Gets the raw bits of the page address.
    pub fn bits(&self) -> u64 {
        self.addr.0
    }
}

impl<AS: AddressSpace> From<PageAddr<AS>> for RawAddr<AS> {
    fn from(p: PageAddr<AS>) -> RawAddr<AS> {
        p.addr
    }
}

impl<AS: AddressSpace> PartialEq for PageAddr<AS> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}
