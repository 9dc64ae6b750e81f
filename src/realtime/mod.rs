// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Real-time safe handoff between the control path and the audio thread.
//!
//! # Real-Time Safety
//!
//! The audio thread has strict requirements:
//! - No memory allocation
//! - No blocking locks (only `try_lock`)
//! - No system calls (file I/O, network, logging)
//! - Bounded execution time
//!
//! Everything reachable from [`AudioHandle::process`] follows these rules.

pub mod slot;

pub use slot::{AudioHandle, InstanceSlot, SlotState};
