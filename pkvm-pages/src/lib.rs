// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! # pKVM page and ownership types
//!
//! - `RawAddr`/`PageAddr` are addresses tagged with the address space they live in, so a host
//!   physical address can't be handed to something expecting a hypervisor virtual one.
//! - `OwnerId` is the raw owner number recorded in page tables; `ComponentId` is the closed set of
//!   parties that can take part in a memory transition.
//! - `PageState` is the per-page ownership state encoded in every leaf page-table entry.
#![no_std]

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;

mod owner_id;
mod page;
mod state;

pub use owner_id::{AddressSpace, ComponentId, HostPhys, HypVirt, OwnerId};
pub use page::*;
pub use state::PageState;
