// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Inner instance backed by a stable-ABI module object.

use super::InnerInstance;
use crate::message::Message;
use abi_stable::std_types::{RSlice, RSliceMut};
use arrayvec::ArrayVec;
use libloading::Library;
use procwrap_module_api::{ModuleBox, ModuleError, ModuleInfo};
use std::sync::Arc;

/// Most buffers passed to a module per block, per direction.
pub const MAX_PORTS: usize = 32;

/// A live module object.
///
/// Keeps the shared library it came from loaded for as long as it exists.
pub struct ModuleInstance {
    // Declared before `_library` so the object is dropped while its code is
    // still mapped.
    module: ModuleBox,
    _library: Option<Arc<Library>>,
}

impl ModuleInstance {
    pub fn new(module: ModuleBox, library: Option<Arc<Library>>) -> Self {
        Self {
            module,
            _library: library,
        }
    }

    pub fn info(&self) -> ModuleInfo {
        self.module.info()
    }
}

impl InnerInstance for ModuleInstance {
    fn message(&mut self, message: &Message) -> Result<(), ModuleError> {
        self.module
            .message(RSlice::from_slice(message.payload()))
            .into_result()
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool {
        debug_assert!(
            inputs.len() <= MAX_PORTS && outputs.len() <= MAX_PORTS,
            "more than {} ports per block",
            MAX_PORTS
        );
        let (outputs, excess) = outputs.split_at_mut(outputs.len().min(MAX_PORTS));
        for out in excess.iter_mut() {
            out.fill(0.0);
        }

        // Stack-only conversion; the audio thread must not allocate.
        let inputs_r: ArrayVec<RSlice<f32>, MAX_PORTS> = inputs
            .iter()
            .take(MAX_PORTS)
            .map(|s| RSlice::from_slice(s))
            .collect();

        let mut outputs_r: ArrayVec<RSliceMut<f32>, MAX_PORTS> = outputs
            .iter_mut()
            .map(|s| RSliceMut::from_mut_slice(&mut **s))
            .collect();

        self.module.process(
            RSlice::from_slice(&inputs_r),
            RSliceMut::from_mut_slice(&mut outputs_r),
        )
    }

    fn teardown(&mut self) {
        self.module.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procwrap_module_api::ActivationContext;
    use procwrap_tone::{ChannelParams, ToneMessage, ToneModule};

    fn tone_instance() -> ModuleInstance {
        let mut module = ToneModule::boxed();
        module.activate(ActivationContext {
            sample_rate: 4000.0,
            max_block_size: 4,
        });
        let mut instance = ModuleInstance::new(module, None);
        let set = ToneMessage::SetParams {
            channel: 0,
            params: ChannelParams {
                frequency: 1000.0,
                ..Default::default()
            },
        };
        instance
            .message(&Message::from_text(&set.to_json()).unwrap())
            .unwrap();
        instance
    }

    #[test]
    fn test_renders_up_to_port_cap() {
        let mut instance = tone_instance();
        let mut bufs = vec![[9.0f32; 4]; MAX_PORTS];
        let mut outputs: Vec<&mut [f32]> = bufs.iter_mut().map(|b| &mut b[..]).collect();

        assert!(instance.process(&[], &mut outputs));
        drop(outputs);
        assert!((bufs[0][1] - 1.0).abs() < 1e-5);
        assert!(bufs[1..].iter().all(|b| *b == [0.0; 4]));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_outputs_past_cap_are_silenced() {
        let mut instance = tone_instance();
        let mut bufs = vec![[9.0f32; 4]; MAX_PORTS + 2];
        let mut outputs: Vec<&mut [f32]> = bufs.iter_mut().map(|b| &mut b[..]).collect();

        assert!(instance.process(&[], &mut outputs));
        drop(outputs);
        assert!((bufs[0][1] - 1.0).abs() < 1e-5);
        assert!(bufs[MAX_PORTS..].iter().all(|b| *b == [0.0; 4]));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "ports per block")]
    fn test_too_many_outputs_asserts_in_debug() {
        let mut instance = tone_instance();
        let mut bufs = vec![[0.0f32; 4]; MAX_PORTS + 1];
        let mut outputs: Vec<&mut [f32]> = bufs.iter_mut().map(|b| &mut b[..]).collect();
        instance.process(&[], &mut outputs);
    }
}
