// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! # Extended page tables for pKVM on x86.
//!
//! ## Key types
//!
//! - `EptPageTable` is a multi-level EPT owned by one component. It provides the generic leaf/level
//!   walk along with map, unmap, annotate and lookup over address ranges.
//! - `Pte` is a raw EPT entry; `EptLevel` describes one level of the hierarchy.
//! - `LeafState` is the page-state codec: the (owner, state) pair carried by every leaf entry,
//!   valid or not.
//! - `PagePool` hands out the pages backing intermediate tables; `MmOps` translates between the
//!   physical addresses stored in entries and addresses the hypervisor can dereference.
//!
//! ## Mutations
//!
//! Every range mutation runs in two passes. The first allocates and splits tables, which never
//! changes the decoded (owner, state) of any page and is the only pass that can fail. The second
//! writes the new entries and cannot fail. A request that runs out of table pages therefore leaves
//! the ownership of every page exactly as it was.
#![no_std]

// Include std when running unit tests.
#[cfg(test)]
#[macro_use]
extern crate std;

mod level;
mod page_state;
mod page_table;
mod pool;
/// Provides access to the fields of an EPT entry.
mod pte;
/// Provides stubs for test harnesses.
#[cfg(test)]
mod test_stubs;

pub use level::EptLevel;
pub use page_state::{decode_owner_state, encode_annotation, LeafState};
pub use page_table::Error as EptError;
pub use page_table::Result as EptResult;
pub use page_table::{EptCaps, EptMapping, EptPageTable, EptProt, WalkEntry};
pub use pool::{IdentityMmOps, MmOps, PagePool};
pub use pte::{EptLeafPerms, EptMemType, Pte};
