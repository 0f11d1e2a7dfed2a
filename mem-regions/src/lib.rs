// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! The directory of physical memory regions known to pKVM.
//!
//! The directory is built once at boot from the firmware memory map and is read-only afterwards.
//! It answers "which region holds this address?", which is how ownership transitions are kept
//! within a single RAM or I/O region.
#![no_std]

// Include std when running unit tests.
#[cfg(test)]
#[macro_use]
extern crate std;

mod mem_range;
mod region_directory;

pub use mem_range::{region_contains, MemRange};
pub use region_directory::{
    Error, MemRegion, MemRegionDirectory, MemRegionDirectoryBuilder, RegionSearch, RegionType,
    Result, MAX_MEM_REGIONS,
};
