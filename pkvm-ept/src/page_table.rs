// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::{cmp, mem, ptr};

use log::trace;
use pkvm_pages::{OwnerId, PageSize, PageState};

use crate::{EptLeafPerms, EptLevel, EptMemType, LeafState, MmOps, PagePool, Pte};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The address isn't 4k aligned.
    UnalignedAddress(u64),
    /// The size is zero or not a multiple of 4k.
    UnalignedSize(u64),
    /// The range starting at this address doesn't fit the address space.
    OutOfRange(u64),
    /// The pool ran out of pages for intermediate tables.
    InsufficientPages,
    /// A present mapping already exists at this address.
    MappingExists(u64),
    /// Annotations must leave the entry invalid.
    InvalidAnnotation(u64),
    /// Only four- and five-level tables are supported.
    UnsupportedLevels(EptLevel),
    /// The physical address width isn't in 1..=52.
    UnsupportedPhysBits(u8),
    /// The entry doesn't decode to a valid (owner, state).
    CorruptEntry(u64),
    /// A leaf that should have been split before writing was found at this address.
    UnpreparedEntry(u64),
}

impl Error {
    /// Returns true if the request itself was malformed. These are detected before the table is
    /// touched.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Error::UnalignedAddress(_) | Error::UnalignedSize(_) | Error::OutOfRange(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, Error>;

const PAGE_SIZE: u64 = PageSize::Size4k as u64;

/// Hardware EPT capabilities the table is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EptCaps {
    /// Level of the root table: `Pml4` or `Pml5`.
    pub root_level: EptLevel,
    /// 2M leaves are supported.
    pub huge_2m: bool,
    /// 1G leaves are supported.
    pub huge_1g: bool,
    /// Width of physical addresses.
    pub phys_addr_bits: u8,
}

impl Default for EptCaps {
    fn default() -> Self {
        Self {
            root_level: EptLevel::Pml4,
            huge_2m: true,
            huge_1g: true,
            phys_addr_bits: 46,
        }
    }
}

impl EptCaps {
    fn leaf_allowed(&self, level: EptLevel) -> bool {
        match level {
            EptLevel::Pt => true,
            EptLevel::Pd => self.huge_2m,
            EptLevel::Pdpt => self.huge_1g,
            _ => false,
        }
    }

    fn phys_limit(&self) -> u64 {
        1 << self.phys_addr_bits
    }
}

/// Access rights and memory type of a mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EptProt {
    pub perms: EptLeafPerms,
    pub mem_type: EptMemType,
}

/// An entry visited by `EptPageTable::walk()`.
#[derive(Clone, Copy, Debug)]
pub struct WalkEntry {
    /// First address translated by the entry. May lie below the start of the walked range.
    pub addr: u64,
    pub level: EptLevel,
    pub pte: Pte,
    /// `false` for entries pointing to a lower-level table.
    pub leaf: bool,
}

/// A present translation returned by `EptPageTable::lookup()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EptMapping {
    pub phys: u64,
    pub perms: EptLeafPerms,
    pub mem_type: EptMemType,
    pub level: EptLevel,
}

#[derive(Clone, Copy)]
enum Update {
    Map {
        virt_base: u64,
        phys_base: u64,
        prot: EptProt,
        state: PageState,
    },
    Set(Pte),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pass {
    Prepare,
    Commit,
}

/// A multi-level EPT belonging to one component.
pub struct EptPageTable {
    root: u64,
    caps: EptCaps,
    owner: OwnerId,
    pool: PagePool,
    mm_ops: &'static dyn MmOps,
}

impl EptPageTable {
    /// Creates an empty table for `owner`, taking the root page and all later table pages from
    /// `pool`. Every page of the new table decodes as (host, owned).
    pub fn new(
        caps: EptCaps,
        owner: OwnerId,
        mut pool: PagePool,
        mm_ops: &'static dyn MmOps,
    ) -> Result<Self> {
        if !matches!(caps.root_level, EptLevel::Pml4 | EptLevel::Pml5) {
            return Err(Error::UnsupportedLevels(caps.root_level));
        }
        if caps.phys_addr_bits == 0 || caps.phys_addr_bits > 52 {
            return Err(Error::UnsupportedPhysBits(caps.phys_addr_bits));
        }
        let root = pool.alloc_page().ok_or(Error::InsufficientPages)?;
        Ok(Self {
            root: mm_ops.virt_to_phys(root),
            caps,
            owner,
            pool,
            mm_ops,
        })
    }

    /// Tears down the table, returning every page it used to the pool.
    pub fn destroy(mut self) -> PagePool {
        self.free_table(self.root, self.caps.root_level);
        self.pool
    }

    /// Returns the component this table translates for.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Returns the pool backing the table.
    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    /// Calls `visitor` for each entry translating `[addr, addr + size)`, in address order. Tables
    /// are reported before their children unless `leaf_only` is set. Stops at, and returns, the
    /// first error from `visitor`. The table is not modified.
    pub fn walk<E, F>(
        &self,
        addr: u64,
        size: u64,
        leaf_only: bool,
        mut visitor: F,
    ) -> core::result::Result<(), E>
    where
        E: From<Error>,
        F: FnMut(&WalkEntry) -> core::result::Result<(), E>,
    {
        let end = self.check_range(addr, size)?;
        self.walk_table(
            self.root,
            self.caps.root_level,
            addr,
            end,
            leaf_only,
            &mut visitor,
        )
    }

    /// Returns the leaf entry translating `addr`.
    pub fn leaf(&self, addr: u64) -> Result<WalkEntry> {
        let mut found = None;
        self.walk(
            PageSize::Size4k.round_down(addr),
            PAGE_SIZE,
            true,
            |e: &WalkEntry| {
                found = Some(*e);
                Ok::<(), Error>(())
            },
        )?;
        found.ok_or(Error::OutOfRange(addr))
    }

    /// Maps `[vaddr, vaddr + size)` to `[paddr, paddr + size)` with the largest leaves the
    /// capabilities and alignment allow, recording `state` in each leaf. Fails without changing
    /// anything if a present mapping already exists in the range.
    pub fn map(
        &mut self,
        vaddr: u64,
        paddr: u64,
        size: u64,
        prot: EptProt,
        state: PageState,
    ) -> Result<()> {
        let end = self.check_range(vaddr, size)?;
        if !PageSize::Size4k.is_aligned(paddr) {
            return Err(Error::UnalignedAddress(paddr));
        }
        paddr
            .checked_add(size)
            .filter(|e| *e <= self.caps.phys_limit())
            .ok_or(Error::OutOfRange(paddr))?;
        self.walk(vaddr, size, true, |e: &WalkEntry| {
            if e.pte.valid() {
                Err(Error::MappingExists(cmp::max(e.addr, vaddr)))
            } else {
                Ok(())
            }
        })?;
        self.update(
            vaddr,
            end,
            Update::Map {
                virt_base: vaddr,
                phys_base: paddr,
                prot,
                state,
            },
        )
    }

    /// Removes every translation in `[vaddr, vaddr + size)`.
    pub fn unmap(&mut self, vaddr: u64, size: u64) -> Result<()> {
        self.annotate(vaddr, size, Pte::default())
    }

    /// Replaces the leaves translating `[vaddr, vaddr + size)` with the invalid entry
    /// `annotation`, splitting larger leaves that are only partly covered.
    pub fn annotate(&mut self, vaddr: u64, size: u64, annotation: Pte) -> Result<()> {
        let end = self.check_range(vaddr, size)?;
        if annotation.valid() {
            return Err(Error::InvalidAnnotation(annotation.bits()));
        }
        self.update(vaddr, end, Update::Set(annotation))
    }

    /// Returns the present translation of `vaddr`, if any.
    pub fn lookup(&self, vaddr: u64) -> Option<EptMapping> {
        if vaddr >= self.caps.root_level.addr_space_size() {
            return None;
        }
        let mut table = self.root;
        let mut level = self.caps.root_level;
        loop {
            let pte = self.read_pte(table, level.index(vaddr));
            match level.next() {
                Some(next) if pte.is_table(level) => {
                    table = pte.addr();
                    level = next;
                }
                _ if pte.valid() => {
                    return Some(EptMapping {
                        phys: pte.addr() + (vaddr & (level.span() - 1)),
                        perms: pte.perms()?,
                        mem_type: pte.mem_type()?,
                        level,
                    })
                }
                _ => return None,
            }
        }
    }

    fn check_range(&self, addr: u64, size: u64) -> Result<u64> {
        if !PageSize::Size4k.is_aligned(addr) {
            return Err(Error::UnalignedAddress(addr));
        }
        if size == 0 || !PageSize::Size4k.is_aligned(size) {
            return Err(Error::UnalignedSize(size));
        }
        addr.checked_add(size)
            .filter(|e| *e <= self.caps.root_level.addr_space_size())
            .ok_or(Error::OutOfRange(addr))
    }

    fn walk_table<E, F>(
        &self,
        table: u64,
        level: EptLevel,
        start: u64,
        end: u64,
        leaf_only: bool,
        visitor: &mut F,
    ) -> core::result::Result<(), E>
    where
        E: From<Error>,
        F: FnMut(&WalkEntry) -> core::result::Result<(), E>,
    {
        let mut addr = start;
        while addr < end {
            let entry_addr = addr & !(level.span() - 1);
            let next = cmp::min(entry_addr + level.span(), end);
            let pte = self.read_pte(table, level.index(addr));
            match level.next() {
                Some(child_level) if pte.is_table(level) => {
                    if !leaf_only {
                        visitor(&WalkEntry {
                            addr: entry_addr,
                            level,
                            pte,
                            leaf: false,
                        })?;
                    }
                    self.walk_table(pte.addr(), child_level, addr, next, leaf_only, visitor)?;
                }
                _ => visitor(&WalkEntry {
                    addr: entry_addr,
                    level,
                    pte,
                    leaf: true,
                })?,
            }
            addr = next;
        }
        Ok(())
    }

    // Runs `update` over `[start, end)`: first allocating and splitting tables, then writing the
    // new entries. Only the first pass can fail and it never changes a page's decoded state.
    fn update(&mut self, start: u64, end: u64, update: Update) -> Result<()> {
        let (root, level) = (self.root, self.caps.root_level);
        self.apply(root, level, start, end, update, Pass::Prepare)?;
        self.apply(root, level, start, end, update, Pass::Commit)
    }

    fn apply(
        &mut self,
        table: u64,
        level: EptLevel,
        start: u64,
        end: u64,
        update: Update,
        pass: Pass,
    ) -> Result<()> {
        let mut addr = start;
        while addr < end {
            let index = level.index(addr);
            let entry_addr = addr & !(level.span() - 1);
            let entry_end = entry_addr + level.span();
            let next = cmp::min(entry_end, end);
            let pte = self.read_pte(table, index);
            let is_table = pte.is_table(level);
            if matches!(update, Update::Set(new) if !is_table && pte == new) {
                addr = next;
                continue;
            }

            let covered = addr == entry_addr && next == entry_end;
            match self.leaf_for(update, level, addr, covered) {
                Some(new) => {
                    if pass == Pass::Commit {
                        self.write_pte(table, index, new);
                        if let Some(child_level) = level.next().filter(|_| is_table) {
                            self.free_table(pte.addr(), child_level);
                        }
                    }
                }
                None => {
                    let child_level = level.next().ok_or(Error::UnpreparedEntry(addr))?;
                    let child = if is_table {
                        pte.addr()
                    } else if pass == Pass::Prepare {
                        self.split(table, index, pte, child_level)?
                    } else {
                        return Err(Error::UnpreparedEntry(addr));
                    };
                    self.apply(child, child_level, addr, next, update, pass)?;
                }
            }
            addr = next;
        }
        Ok(())
    }

    // Returns the entry to write at `level` for `addr` if the update can be done with a single
    // entry there.
    fn leaf_for(&self, update: Update, level: EptLevel, addr: u64, covered: bool) -> Option<Pte> {
        if !covered {
            return None;
        }
        match update {
            Update::Set(pte) => Some(pte),
            Update::Map {
                virt_base,
                phys_base,
                prot,
                state,
            } => {
                let phys = phys_base + (addr - virt_base);
                let fits = self.caps.leaf_allowed(level) && phys & (level.span() - 1) == 0;
                fits.then(|| {
                    LeafState::Mapped {
                        entry: Pte::leaf(phys, prot.perms, prot.mem_type, level),
                        state,
                    }
                    .encode()
                })
            }
        }
    }

    // Replaces the leaf at `index` with a table of entries that decode identically.
    fn split(&mut self, table: u64, index: u64, pte: Pte, child_level: EptLevel) -> Result<u64> {
        let child = self
            .pool
            .alloc_page()
            .map(|va| self.mm_ops.virt_to_phys(va))
            .ok_or(Error::InsufficientPages)?;
        for i in 0..EptLevel::ENTRIES {
            self.write_pte(child, i, pte.split_child(i, child_level));
        }
        self.write_pte(table, index, Pte::table(child));
        trace!("split {:?} entry {index} of table {table:#x}", child_level);
        Ok(child)
    }

    fn free_table(&mut self, table: u64, level: EptLevel) {
        if let Some(child_level) = level.next() {
            for index in 0..EptLevel::ENTRIES {
                let pte = self.read_pte(table, index);
                if pte.is_table(level) {
                    self.free_table(pte.addr(), child_level);
                }
            }
        }
        let va = self.mm_ops.phys_to_virt(table);
        // Safety: table pages come from the pool and are no longer linked into the table.
        unsafe { self.pool.free_page(va) };
    }

    fn entry_ptr(&self, table: u64, index: u64) -> *mut u64 {
        (self.mm_ops.phys_to_virt(table) + index * mem::size_of::<u64>() as u64) as *mut u64
    }

    fn read_pte(&self, table: u64, index: u64) -> Pte {
        // Safety: `table` is a table page of this EPT, mapped through `mm_ops`, and `index` is
        // less than `EptLevel::ENTRIES`.
        Pte::from_bits(unsafe { ptr::read_volatile(self.entry_ptr(table, index)) })
    }

    fn write_pte(&mut self, table: u64, index: u64, pte: Pte) {
        // Safety: as for `read_pte()`, and `&mut self` guarantees no other writer.
        unsafe { ptr::write_volatile(self.entry_ptr(table, index), pte.bits()) };
    }
}
