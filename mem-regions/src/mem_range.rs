// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// A half-open range of physical addresses, `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemRange {
    pub start: u64,
    pub end: u64,
}

impl MemRange {
    /// The range covering the whole address space.
    pub const ALL: MemRange = MemRange {
        start: 0,
        end: u64::MAX,
    };

    /// Creates the range `[start, start + size)`, or `None` if it would wrap.
    pub fn with_size(start: u64, size: u64) -> Option<Self> {
        start.checked_add(size).map(|end| Self { start, end })
    }

    /// Returns true if `addr` lies inside the range.
    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }
}

impl fmt::Display for MemRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// Returns true if `child` lies entirely within `parent`.
pub fn region_contains(child: &MemRange, parent: &MemRange) -> bool {
    parent.start <= child.start && child.end <= parent.end
}
