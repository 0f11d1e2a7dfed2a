// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use pkvm_pages::PageSize;

const ENTRIES_PER_TABLE: u64 = 512;
const LEVEL_BITS: u64 = 9;

/// A level of the EPT hierarchy, from the 4k leaf tables up to the five-level root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EptLevel {
    Pt = 1,
    Pd = 2,
    Pdpt = 3,
    Pml4 = 4,
    Pml5 = 5,
}

impl EptLevel {
    /// Number of entries in one table at any level.
    pub const ENTRIES: u64 = ENTRIES_PER_TABLE;

    /// Returns the level below this one, or `None` for the 4k leaf level.
    pub fn next(&self) -> Option<Self> {
        use EptLevel::*;
        match self {
            Pt => None,
            Pd => Some(Pt),
            Pdpt => Some(Pd),
            Pml4 => Some(Pdpt),
            Pml5 => Some(Pml4),
        }
    }

    /// Bit position of the lowest address bit used to index a table at this level.
    pub const fn shift(&self) -> u64 {
        PageSize::Size4k.shift() + LEVEL_BITS * (*self as u64 - 1)
    }

    /// Number of bytes covered by one entry at this level.
    pub const fn span(&self) -> u64 {
        1 << self.shift()
    }

    /// Returns the index of the entry translating `addr` in a table at this level.
    pub const fn index(&self, addr: u64) -> u64 {
        (addr >> self.shift()) & (ENTRIES_PER_TABLE - 1)
    }

    /// Size of the address space translated by a root table at this level.
    pub const fn addr_space_size(&self) -> u64 {
        self.span() * ENTRIES_PER_TABLE
    }
}
