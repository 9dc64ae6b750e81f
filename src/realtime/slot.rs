// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The slot holding an adapter's inner instance.
//!
//! The control path installs the instance once, forwards messages to it and
//! eventually frees it. The audio thread only ever observes the published
//! state and `try_lock`s the slot; when the control path is holding it the
//! block is skipped instead of waiting.
//!
//! ```text
//!   Empty ──install()──► Live ──free()──► Freed
//! ```

use crate::modules::InnerInstance;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const EMPTY: u8 = 0;
const LIVE: u8 = 1;
const FREED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No instance yet.
    Empty,
    /// Instance installed and processing.
    Live,
    /// Freed by the control path. Never processes again.
    Freed,
}

pub struct InstanceSlot {
    state: AtomicU8,
    instance: Mutex<Option<Box<dyn InnerInstance>>>,
    /// Blocks forwarded to the instance.
    processed: AtomicU64,
    /// Blocks skipped because the control path held the slot.
    contended: AtomicU64,
}

impl InstanceSlot {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            instance: Mutex::new(None),
            processed: AtomicU64::new(0),
            contended: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SlotState {
        match self.state.load(Ordering::Acquire) {
            EMPTY => SlotState::Empty,
            LIVE => SlotState::Live,
            _ => SlotState::Freed,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state() == SlotState::Live
    }

    /// Publish `instance`. Only valid while the slot is empty; otherwise the
    /// instance is handed back.
    pub fn install(&self, instance: Box<dyn InnerInstance>) -> Result<(), Box<dyn InnerInstance>> {
        let mut guard = self.instance.lock();
        if self.state.load(Ordering::Acquire) != EMPTY {
            return Err(instance);
        }
        *guard = Some(instance);
        self.state.store(LIVE, Ordering::Release);
        Ok(())
    }

    /// Lock the slot from the control path. Waits for an in-flight block.
    pub fn lock(&self) -> MutexGuard<'_, Option<Box<dyn InnerInstance>>> {
        self.instance.lock()
    }

    /// Forward one block. Never blocks.
    ///
    /// Returns `true` (keep running) while no instance exists or when the
    /// slot is momentarily held by the control path, `false` once freed, and
    /// the instance's own answer otherwise. A skipped block leaves `outputs`
    /// silent.
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool {
        match self.state.load(Ordering::Acquire) {
            EMPTY => return true,
            LIVE => {}
            _ => return false,
        }

        let Some(mut guard) = self.instance.try_lock() else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            for out in outputs.iter_mut() {
                out.fill(0.0);
            }
            return true;
        };

        match guard.as_mut() {
            Some(instance) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                instance.process(inputs, outputs)
            }
            None => false,
        }
    }

    /// Move to `Freed` and tear the instance down, if there is one. Returns
    /// whether a teardown happened; it happens at most once.
    pub fn free(&self) -> bool {
        let taken = {
            let mut guard = self.instance.lock();
            self.state.store(FREED, Ordering::Release);
            guard.take()
        };

        match taken {
            Some(mut instance) => {
                instance.teardown();
                true
            }
            None => false,
        }
    }

    pub fn processed_blocks(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn contended_blocks(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }
}

impl Default for InstanceSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// The audio thread's view of an adapter.
#[derive(Clone)]
pub struct AudioHandle {
    slot: Arc<InstanceSlot>,
}

impl AudioHandle {
    pub(crate) fn new(slot: Arc<InstanceSlot>) -> Self {
        Self { slot }
    }

    /// Render one block. See [`InstanceSlot::process`].
    #[inline]
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool {
        self.slot.process(inputs, outputs)
    }

    pub fn state(&self) -> SlotState {
        self.slot.state()
    }

    pub fn processed_blocks(&self) -> u64 {
        self.slot.processed_blocks()
    }

    pub fn contended_blocks(&self) -> u64 {
        self.slot.contended_blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use procwrap_module_api::ModuleError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counts {
        processed: AtomicUsize,
        torn_down: AtomicUsize,
    }

    struct Counter(Arc<Counts>, bool);

    impl InnerInstance for Counter {
        fn message(&mut self, _message: &Message) -> Result<(), ModuleError> {
            Ok(())
        }

        fn process(&mut self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool {
            self.0.processed.fetch_add(1, Ordering::SeqCst);
            for out in outputs.iter_mut() {
                out.fill(0.5);
            }
            self.1
        }

        fn teardown(&mut self) {
            self.0.torn_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_empty_slot_keeps_running_untouched() {
        let slot = InstanceSlot::new();
        let mut buf = [0.0f32; 4];
        assert!(slot.process(&[], &mut [&mut buf[..]]));
        assert_eq!(buf, [0.0; 4]);
        assert_eq!(slot.processed_blocks(), 0);
    }

    #[test]
    fn test_live_slot_returns_instance_answer() {
        let counts = Arc::new(Counts::default());
        let slot = InstanceSlot::new();
        assert!(slot.install(Box::new(Counter(counts.clone(), false))).is_ok());
        assert_eq!(slot.state(), SlotState::Live);

        let mut buf = [0.0f32; 4];
        assert!(!slot.process(&[], &mut [&mut buf[..]]));
        assert_eq!(buf, [0.5; 4]);
        assert_eq!(counts.processed.load(Ordering::SeqCst), 1);
        assert_eq!(slot.processed_blocks(), 1);
    }

    #[test]
    fn test_second_install_is_rejected() {
        let counts = Arc::new(Counts::default());
        let slot = InstanceSlot::new();
        assert!(slot.install(Box::new(Counter(counts.clone(), true))).is_ok());
        assert!(slot.install(Box::new(Counter(counts, true))).is_err());
    }

    #[test]
    fn test_contended_block_is_skipped() {
        let counts = Arc::new(Counts::default());
        let slot = InstanceSlot::new();
        assert!(slot.install(Box::new(Counter(counts.clone(), false))).is_ok());

        let guard = slot.lock();
        let mut buf = [9.0f32; 4];
        assert!(slot.process(&[], &mut [&mut buf[..]]));
        drop(guard);

        assert_eq!(buf, [0.0; 4]);
        assert_eq!(counts.processed.load(Ordering::SeqCst), 0);
        assert_eq!(slot.contended_blocks(), 1);
    }

    #[test]
    fn test_free_tears_down_once() {
        let counts = Arc::new(Counts::default());
        let slot = InstanceSlot::new();
        assert!(slot.install(Box::new(Counter(counts.clone(), true))).is_ok());
        assert!(slot.free());
        assert!(!slot.free());
        assert_eq!(counts.torn_down.load(Ordering::SeqCst), 1);

        let mut buf = [0.0f32; 4];
        assert!(!slot.process(&[], &mut [&mut buf[..]]));
        assert_eq!(counts.processed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_free_without_instance_stops_processing() {
        let counts = Arc::new(Counts::default());
        let slot = InstanceSlot::new();
        assert!(!slot.free());
        assert_eq!(slot.state(), SlotState::Freed);

        let mut buf = [0.0f32; 4];
        assert!(!slot.process(&[], &mut [&mut buf[..]]));
        assert!(slot.install(Box::new(Counter(counts.clone(), true))).is_err());
        assert_eq!(counts.torn_down.load(Ordering::SeqCst), 0);
    }
}
