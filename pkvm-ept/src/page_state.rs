// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use pkvm_pages::{OwnerId, PageState};
use static_assertions::const_assert_eq;

use crate::page_table::{Error, Result};
use crate::Pte;

const STATE_SHIFT: u64 = 56;
const STATE_MASK: u64 = ((1 << PageState::BITS) - 1) << STATE_SHIFT;
// The owner field of an invalid entry. Bits 0..=2 stay clear so the entry is never present.
const OWNER_SHIFT: u64 = 18;
const OWNER_MASK: u64 = OwnerId::MAX << OWNER_SHIFT;

const_assert_eq!(OWNER_MASK & STATE_MASK, 0);
const_assert_eq!(OWNER_MASK & 0b111, 0);
// Bits 52..=62 are ignored by hardware in present entries.
const_assert_eq!(STATE_MASK & 0x000f_ffff_ffff_ffff, 0);

/// The ownership information carried by a leaf entry.
///
/// Present entries are implicitly owned by the component whose table they're in; only the state is
/// recorded, in bits the hardware ignores. Invalid entries record both the owner and the state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeafState {
    /// A present leaf. `entry` is the mapping with the state field cleared.
    Mapped { entry: Pte, state: PageState },
    /// An invalid leaf annotated with the component holding the page.
    Annotated { owner: OwnerId, state: PageState },
}

impl LeafState {
    /// Decodes a leaf entry. Fails for the reserved state encoding and for invalid entries with
    /// bits set outside the owner and state fields.
    pub fn decode(pte: Pte) -> Result<Self> {
        let raw = pte.bits();
        let state = PageState::from_bits((raw & STATE_MASK) >> STATE_SHIFT)
            .ok_or(Error::CorruptEntry(raw))?;
        if pte.valid() {
            return Ok(LeafState::Mapped {
                entry: Pte::from_bits(raw & !STATE_MASK),
                state,
            });
        }
        if raw & !(OWNER_MASK | STATE_MASK) != 0 {
            return Err(Error::CorruptEntry(raw));
        }
        // Can't fail: the field is exactly OwnerId::BITS wide.
        let owner =
            OwnerId::new((raw & OWNER_MASK) >> OWNER_SHIFT).ok_or(Error::CorruptEntry(raw))?;
        Ok(LeafState::Annotated { owner, state })
    }

    /// Encodes the leaf entry. Exact inverse of `decode()`.
    pub fn encode(&self) -> Pte {
        match *self {
            LeafState::Mapped { entry, state } => {
                Pte::from_bits((entry.bits() & !STATE_MASK) | state.bits() << STATE_SHIFT)
            }
            LeafState::Annotated { owner, state } => {
                Pte::from_bits(owner.raw() << OWNER_SHIFT | state.bits() << STATE_SHIFT)
            }
        }
    }

    /// Returns the (owner, state) of the page, where a present leaf is owned by `table_owner`.
    pub fn owner_state(&self, table_owner: OwnerId) -> (OwnerId, PageState) {
        match *self {
            LeafState::Mapped { state, .. } => (table_owner, state),
            LeafState::Annotated { owner, state } => (owner, state),
        }
    }
}

/// Returns the raw invalid entry recording that `owner` holds the page in `state`.
pub fn encode_annotation(owner: OwnerId, state: PageState) -> Pte {
    LeafState::Annotated { owner, state }.encode()
}

/// Decodes the (owner, state) of the page mapped by a leaf entry from a table owned by
/// `table_owner`.
pub fn decode_owner_state(pte: Pte, table_owner: OwnerId) -> Result<(OwnerId, PageState)> {
    LeafState::decode(pte).map(|s| s.owner_state(table_owner))
}
