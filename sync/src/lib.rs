// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! # Synchronization primitives.
//!
//! pKVM runs in a self-contained environment below the host kernel and can't borrow the host's
//! locking. Everything here spins: hypervisor critical sections are short, never sleep and never
//! re-enter, so a busy-wait bounded by the holder's own operation is all that is needed. For now
//! the primitives are those of the `spin` crate.
#![no_std]

pub use spin::{Mutex, MutexGuard};
