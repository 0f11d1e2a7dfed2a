// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// `PageState` is the ownership state of a page as seen from one component's page table.
///
/// The state is always stored in the page's leaf entry, never in a side table, so it can be
/// re-derived by walking the table alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    /// Exclusively held by the owner. The entry is either mapped or an annotation naming the
    /// owner.
    Owned,

    /// Accessible by more than one component. Encodable, but no transition produces it yet.
    Shared,

    /// Explicitly absent from this table: the page was donated away, and the annotation in the
    /// entry names the component now holding it.
    NoPage,
}

impl PageState {
    const OWNED: u64 = 0b00;
    const SHARED: u64 = 0b01;
    // 0b10 is reserved.
    const NOPAGE: u64 = 0b11;

    /// Width of the encoded state field in bits.
    pub const BITS: u32 = 2;

    /// Returns the value of the encoded state field.
    pub const fn bits(&self) -> u64 {
        match self {
            PageState::Owned => Self::OWNED,
            PageState::Shared => Self::SHARED,
            PageState::NoPage => Self::NOPAGE,
        }
    }

    /// Decodes a state field, returning `None` for the reserved encoding or any value wider than
    /// `BITS`.
    pub fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            Self::OWNED => Some(PageState::Owned),
            Self::SHARED => Some(PageState::Shared),
            Self::NOPAGE => Some(PageState::NoPage),
            _ => None,
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PageState::Owned => write!(f, "owned"),
            PageState::Shared => write!(f, "shared"),
            PageState::NoPage => write!(f, "nopage"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_bits() {
        for s in [PageState::Owned, PageState::Shared, PageState::NoPage] {
            assert_eq!(PageState::from_bits(s.bits()), Some(s));
            assert!(s.bits() < 1 << PageState::BITS);
        }
        assert_eq!(PageState::from_bits(0b10), None);
        assert_eq!(PageState::from_bits(0b100), None);
    }
}
