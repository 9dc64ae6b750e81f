// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Offline audio driver.
//!
//! Stands in for a real audio device: a dedicated thread calls
//! [`AudioHandle::process`] once per block and collects the output as
//! interleaved samples. All buffers are allocated before the first block.

use super::NodeError;
use crate::config::EngineConfig;
use crate::modules::MAX_PORTS;
use crate::realtime::AudioHandle;
use arrayvec::ArrayVec;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// What to render.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub blocks: usize,
    pub block_size: usize,
    pub channels: usize,
    pub sample_rate: u32,
    /// Sleep so each block takes its wall-clock duration.
    pub pacing: bool,
}

impl RenderPlan {
    pub fn from_engine(engine: &EngineConfig, blocks: usize) -> Self {
        Self {
            blocks,
            block_size: engine.block_size as usize,
            channels: engine.channels as usize,
            sample_rate: engine.sample_rate,
            pacing: engine.realtime_pacing,
        }
    }

    fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Rendered output.
#[derive(Debug, Clone)]
pub struct Rendered {
    /// Interleaved frames.
    pub samples: Vec<f32>,
    pub channels: usize,
    pub blocks: usize,
    /// The processor asked to stop before the planned block count.
    pub stopped_early: bool,
}

impl Rendered {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

/// A render running on the audio thread.
pub struct RenderHandle {
    rx: oneshot::Receiver<Rendered>,
    thread: Option<JoinHandle<()>>,
}

impl RenderHandle {
    /// Wait for the render to finish.
    pub async fn finish(mut self) -> Result<Rendered, NodeError> {
        let rendered = (&mut self.rx).await.map_err(|_| NodeError::RenderAborted)?;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(rendered)
    }
}

/// Start rendering `plan` from `audio` on a dedicated thread.
pub fn spawn_render(audio: AudioHandle, plan: RenderPlan) -> Result<RenderHandle, NodeError> {
    if plan.channels == 0 || plan.channels > MAX_PORTS {
        return Err(NodeError::InvalidChannels(plan.channels));
    }

    let (tx, rx) = oneshot::channel();
    let thread = thread::Builder::new()
        .name("procwrap-rt".to_string())
        .spawn(move || {
            let rendered = render_blocks(&audio, &plan);
            let _ = tx.send(rendered);
        })
        .map_err(NodeError::ThreadSpawn)?;

    Ok(RenderHandle {
        rx,
        thread: Some(thread),
    })
}

fn render_blocks(audio: &AudioHandle, plan: &RenderPlan) -> Rendered {
    let mut planar = vec![vec![0.0f32; plan.block_size]; plan.channels];
    let mut samples = Vec::with_capacity(plan.blocks * plan.block_size * plan.channels);
    let period = plan.block_duration();
    let start = Instant::now();

    let mut rendered_blocks = 0;
    let mut stopped_early = false;

    for block in 0..plan.blocks {
        for channel in planar.iter_mut() {
            channel.fill(0.0);
        }

        let keep_going = {
            let mut outputs: ArrayVec<&mut [f32], MAX_PORTS> =
                planar.iter_mut().map(|c| c.as_mut_slice()).collect();
            audio.process(&[], &mut outputs)
        };

        for frame in 0..plan.block_size {
            samples.extend(planar.iter().map(|channel| channel[frame]));
        }
        rendered_blocks += 1;

        if !keep_going {
            stopped_early = rendered_blocks < plan.blocks;
            break;
        }

        if plan.pacing {
            let due = start + period * (block as u32 + 1);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }

    debug!(
        "Rendered {} blocks ({} skipped on contention)",
        rendered_blocks,
        audio.contended_blocks()
    );

    Rendered {
        samples,
        channels: plan.channels,
        blocks: rendered_blocks,
        stopped_early,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::modules::InnerInstance;
    use crate::realtime::InstanceSlot;
    use procwrap_module_api::ModuleError;
    use std::sync::Arc;

    struct Countdown(usize);

    impl InnerInstance for Countdown {
        fn message(&mut self, _message: &Message) -> Result<(), ModuleError> {
            Ok(())
        }

        fn process(&mut self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool {
            for (i, out) in outputs.iter_mut().enumerate() {
                out.fill(i as f32 + 1.0);
            }
            self.0 -= 1;
            self.0 > 0
        }

        fn teardown(&mut self) {}
    }

    fn plan(blocks: usize) -> RenderPlan {
        RenderPlan {
            blocks,
            block_size: 4,
            channels: 2,
            sample_rate: 48000,
            pacing: false,
        }
    }

    #[tokio::test]
    async fn test_empty_slot_renders_silence() {
        let audio = AudioHandle::new(Arc::new(InstanceSlot::new()));
        let rendered = spawn_render(audio, plan(3)).unwrap().finish().await.unwrap();

        assert_eq!(rendered.blocks, 3);
        assert_eq!(rendered.frames(), 12);
        assert!(!rendered.stopped_early);
        assert!(rendered.samples.iter().all(|s| *s == 0.0));
    }

    #[tokio::test]
    async fn test_output_is_interleaved_and_stops_early() {
        let slot = Arc::new(InstanceSlot::new());
        assert!(slot.install(Box::new(Countdown(2))).is_ok());
        let audio = AudioHandle::new(slot);

        let rendered = spawn_render(audio, plan(5)).unwrap().finish().await.unwrap();
        assert_eq!(rendered.blocks, 2);
        assert!(rendered.stopped_early);
        assert_eq!(&rendered.samples[..4], &[1.0, 2.0, 1.0, 2.0]);
        assert_eq!(rendered.samples.len(), 2 * 4 * 2);
    }

    #[test]
    fn test_rejects_too_many_channels() {
        let audio = AudioHandle::new(Arc::new(InstanceSlot::new()));
        let mut wide = plan(1);
        wide.channels = MAX_PORTS + 1;
        assert!(matches!(
            spawn_render(audio, wide),
            Err(NodeError::InvalidChannels(_))
        ));
    }
}
