// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multi-channel signal generator module.
//!
//! Every output channel runs its own oscillator. Channels are configured with
//! JSON control messages:
//!
//! ```text
//! {"set_params":{"channel":0,"params":{"shape":"sine","amplitude_db":-6.0,"frequency":440.0,"phase_degrees":0.0}}}
//! "reset"
//! ```
//!
//! Built as a `cdylib` it exports `procwrap_module_entry`; the host can also
//! link it directly as a builtin.

use abi_stable::sabi_trait::TD_Opaque;
use procwrap_module_api::{
    db_to_linear, declare_module, ActivationContext, AudioModule, AudioModule_TO, ModuleBox,
    ModuleError, ModuleInfo, RErr, ROk, RResult, RSlice, RSliceMut,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Module identifier reported in [`ModuleInfo`].
pub const MODULE_ID: &str = "org.procwrap.tone";

/// Upper bound on addressable channels.
pub const MAX_CHANNELS: usize = 64;

/// Control messages understood by the tone module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMessage {
    /// Replace the parameters of one channel and restart its oscillator.
    SetParams { channel: usize, params: ChannelParams },
    /// Restart every oscillator from phase zero.
    Reset,
}

impl ToneMessage {
    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> String {
        // Serializing this enum cannot fail: no maps with non-string keys.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Waveform of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveShape {
    #[default]
    Sine,
    Triangle,
    /// Square wave with the given duty cycle (0.0-1.0).
    Square(f64),
    Sawtooth,
}

impl WaveShape {
    pub fn name(&self) -> &'static str {
        match self {
            WaveShape::Sine => "Sine",
            WaveShape::Triangle => "Triangle",
            WaveShape::Square(_) => "Square",
            WaveShape::Sawtooth => "Sawtooth",
        }
    }

    /// Evaluate the waveform at phase `p` (radians), unit amplitude.
    #[inline]
    fn eval(&self, p: f64) -> f64 {
        match *self {
            WaveShape::Sine => p.sin(),
            WaveShape::Triangle => match (p / TAU).rem_euclid(1.0) * 4.0 {
                x if x < 1.0 => x,
                x if x < 3.0 => 2.0 - x,
                x => x - 4.0,
            },
            WaveShape::Square(duty) => {
                if (p / TAU).rem_euclid(1.0) < duty {
                    1.0
                } else {
                    -1.0
                }
            }
            WaveShape::Sawtooth => (p / TAU).rem_euclid(1.0).mul_add(-2.0, 1.0),
        }
    }
}

/// Oscillator settings of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelParams {
    pub shape: WaveShape,
    pub amplitude_db: f64,
    pub frequency: f64,
    pub phase_degrees: f64,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            shape: WaveShape::Sine,
            amplitude_db: 0.0,
            frequency: 1e3,
            phase_degrees: 0.0,
        }
    }
}

#[derive(Debug)]
struct Channel {
    params: ChannelParams,
    /// Samples rendered since the last reset.
    t: u64,
}

impl Channel {
    fn render(&mut self, buf: &mut [f32], rate: f64) {
        let amp = db_to_linear(self.params.amplitude_db);
        let theta = self.params.phase_degrees.to_radians();
        let w = self.params.frequency * TAU / rate;
        let shape = self.params.shape;

        for sample in buf {
            let p = (self.t as f64).mul_add(w, theta);
            self.t += 1;
            *sample = (shape.eval(p) * amp) as f32;
        }
    }

    fn reset(&mut self) {
        self.t = 0;
    }
}

impl From<ChannelParams> for Channel {
    fn from(params: ChannelParams) -> Self {
        Self { params, t: 0 }
    }
}

/// The tone generator instance.
#[derive(Debug)]
pub struct ToneModule {
    /// Index = output channel. `None` renders silence.
    channels: Vec<Option<Channel>>,
    sample_rate: f64,
    torn_down: bool,
}

impl Default for ToneModule {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            sample_rate: 48000.0,
            torn_down: false,
        }
    }
}

impl ToneModule {
    /// Box a fresh instance behind the stable-ABI trait object.
    pub fn boxed() -> ModuleBox {
        AudioModule_TO::from_value(Self::default(), TD_Opaque)
    }

    /// Parameters currently applied to `channel`, if it exists.
    pub fn params(&self, channel: usize) -> Option<&ChannelParams> {
        self.channels
            .get(channel)
            .and_then(Option::as_ref)
            .map(|c| &c.params)
    }

    fn apply(&mut self, message: ToneMessage) -> Result<(), ModuleError> {
        match message {
            ToneMessage::SetParams { channel, params } => {
                if channel >= MAX_CHANNELS {
                    return Err(ModuleError::InvalidChannel(channel as u32));
                }
                if self.channels.len() <= channel {
                    self.channels.resize_with(channel + 1, || None);
                }
                self.channels[channel] = Some(params.into());
            }
            ToneMessage::Reset => self.channels.iter_mut().flatten().for_each(Channel::reset),
        }
        Ok(())
    }
}

impl AudioModule for ToneModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(MODULE_ID, "Tone Generator")
            .with_vendor("procwrap")
            .with_version(env!("CARGO_PKG_VERSION"))
    }

    fn activate(&mut self, context: ActivationContext) {
        self.sample_rate = context.sample_rate as f64;
        // Channels are only added from the control path after this.
        self.channels.reserve(MAX_CHANNELS);
    }

    fn message(&mut self, payload: RSlice<u8>) -> RResult<(), ModuleError> {
        let message: ToneMessage = match serde_json::from_slice(payload.as_slice()) {
            Ok(m) => m,
            Err(e) => return RErr(ModuleError::MalformedMessage(e.to_string().into())),
        };

        match self.apply(message) {
            Ok(()) => ROk(()),
            Err(e) => RErr(e),
        }
    }

    fn process(&mut self, _inputs: RSlice<RSlice<f32>>, mut outputs: RSliceMut<RSliceMut<f32>>) -> bool {
        if self.torn_down {
            return false;
        }

        let rate = self.sample_rate;
        let mut count = 0;
        for (i, out) in outputs.iter_mut().enumerate() {
            match self.channels.get_mut(i).and_then(Option::as_mut) {
                Some(channel) => channel.render(out, rate),
                None => out.fill(0.0),
            }
            count += 1;
        }

        count != 0
    }

    fn teardown(&mut self) {
        self.channels.clear();
        self.torn_down = true;
    }
}

declare_module!(ToneModule);
