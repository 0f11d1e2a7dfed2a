// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use static_assertions::assert_eq_size;

use crate::EptLevel;

// Bits 12..=51 hold the address of the next table or of the mapped page.
const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;
const MEM_TYPE_SHIFT: u64 = 3;
const MEM_TYPE_MASK: u64 = 0b111 << MEM_TYPE_SHIFT;

/// Bits from an EPT entry.
#[derive(Copy, Clone)]
pub(crate) enum EptFieldBit {
    Read = 0,
    Write = 1,
    Execute = 2,
    IgnorePat = 6,
    LargePage = 7,
}

impl EptFieldBit {
    pub const fn shift(&self) -> u64 {
        *self as u64
    }

    pub const fn mask(&self) -> u64 {
        1 << self.shift()
    }

    pub const fn is_set(&self, val: u64) -> bool {
        val & self.mask() != 0
    }
}

const MASK_RWX: u64 =
    EptFieldBit::Read.mask() | EptFieldBit::Write.mask() | EptFieldBit::Execute.mask();

/// Permissions for a leaf page entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EptLeafPerms {
    R = EptFieldBit::Read.mask() as isize,
    RW = (EptFieldBit::Read.mask() | EptFieldBit::Write.mask()) as isize,
    RX = (EptFieldBit::Read.mask() | EptFieldBit::Execute.mask()) as isize,
    RWX = MASK_RWX as isize,
}

impl EptLeafPerms {
    fn from_bits(bits: u64) -> Option<Self> {
        use EptLeafPerms::*;
        [R, RW, RX, RWX]
            .into_iter()
            .find(|p| *p as u64 == bits & MASK_RWX)
    }
}

/// EPT memory types for leaf entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EptMemType {
    Uncacheable = 0,
    WriteCombining = 1,
    WriteThrough = 4,
    WriteProtected = 5,
    WriteBack = 6,
}

impl EptMemType {
    fn from_bits(bits: u64) -> Option<Self> {
        use EptMemType::*;
        [
            Uncacheable,
            WriteCombining,
            WriteThrough,
            WriteProtected,
            WriteBack,
        ]
        .into_iter()
        .find(|t| *t as u64 == (bits & MEM_TYPE_MASK) >> MEM_TYPE_SHIFT)
    }
}

/// A raw EPT entry. Entries with none of R/W/X set are invalid and ignored by hardware, which
/// leaves the rest of their bits free for ownership annotations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(u64);

assert_eq_size!(Pte, u64);

impl Pte {
    /// Wraps raw entry bits.
    pub const fn from_bits(bits: u64) -> Self {
        Pte(bits)
    }

    /// Returns the raw bits that make up the entry.
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Returns `true` if the entry is present (any of R/W/X set).
    pub const fn valid(&self) -> bool {
        self.0 & MASK_RWX != 0
    }

    /// Returns `true` if the entry at `level` points to another table.
    pub fn is_table(&self, level: EptLevel) -> bool {
        self.valid() && level.next().is_some() && !EptFieldBit::LargePage.is_set(self.0)
    }

    /// Returns the address held by the entry: a page for leaves, a table otherwise.
    pub const fn addr(&self) -> u64 {
        self.0 & ADDR_MASK
    }

    /// Returns the access permissions of a valid leaf.
    pub fn perms(&self) -> Option<EptLeafPerms> {
        EptLeafPerms::from_bits(self.0)
    }

    /// Returns the memory type of a valid leaf.
    pub fn mem_type(&self) -> Option<EptMemType> {
        EptMemType::from_bits(self.0)
    }

    /// Creates a leaf at `level` mapping `phys` with the given access bits.
    pub(crate) fn leaf(
        phys: u64,
        perms: EptLeafPerms,
        mem_type: EptMemType,
        level: EptLevel,
    ) -> Self {
        let mut bits = (phys & ADDR_MASK)
            | perms as u64
            | (mem_type as u64) << MEM_TYPE_SHIFT
            | EptFieldBit::IgnorePat.mask();
        if level.next().is_some() {
            bits |= EptFieldBit::LargePage.mask();
        }
        Pte(bits)
    }

    /// Creates a non-leaf entry pointing at the table at `table_phys`. Non-leaf entries grant
    /// everything; access is restricted at the leaves.
    pub(crate) fn table(table_phys: u64) -> Self {
        Pte((table_phys & ADDR_MASK) | MASK_RWX)
    }

    /// Returns the entry that takes over `index` of this leaf's range when the leaf is split into a
    /// table at `child_level`. Invalid entries are replicated as-is so every page keeps its
    /// annotation.
    pub(crate) fn split_child(&self, index: u64, child_level: EptLevel) -> Self {
        if !self.valid() {
            return *self;
        }
        let addr = self.addr() + index * child_level.span();
        let mut bits = (self.0 & !ADDR_MASK) | addr;
        if child_level.next().is_none() {
            bits &= !EptFieldBit::LargePage.mask();
        }
        Pte(bits)
    }
}
