// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The module adapter.
//!
//! An adapter sits between the host and one inner instance of the shared
//! module. Until the module is loaded and the instance exists, incoming
//! messages are queued in arrival order. Once the instance exists the queue
//! is drained into it and later messages go straight through (still via the
//! queue, so ordering is never violated).
//!
//! Control-path methods take `&mut self` and run on the node's control task.
//! The audio thread only ever sees the adapter through an [`AudioHandle`].

use crate::config::AdapterConfig;
use crate::message::{Message, PortEvent, PortSender};
use crate::modules::{Claim, LoadError, ModuleCell, ModuleFactory, ModuleLoader};
use crate::realtime::{AudioHandle, InstanceSlot};
use procwrap_module_api::{ActivationContext, ModuleError};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The message channel reported an undeliverable message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The shared module failed to load.
    #[error("module load failed: {0}")]
    LoadFailed(Arc<LoadError>),

    /// The inner instance rejected a forwarded message.
    #[error("inner instance rejected message: {0}")]
    Forward(ModuleError),

    /// The inner instance could not be created.
    #[error("failed to construct inner instance: {0}")]
    Instantiate(LoadError),

    /// The adapter was already freed.
    #[error("adapter has been freed")]
    Freed,
}

pub type AdapterResult<T> = Result<T, AdapterError>;

pub struct Adapter {
    cell: Arc<ModuleCell>,
    loader: Arc<dyn ModuleLoader>,
    /// Our own port, registered with the cell while waiting on a load.
    port: PortSender,
    slot: Arc<InstanceSlot>,
    queue: VecDeque<Message>,
    config: AdapterConfig,
    activation: ActivationContext,
    constructed: bool,
    freed: bool,
    queue_warned: bool,
}

impl Adapter {
    /// Create an adapter attached to `port`. Does not touch the module cell.
    pub fn new(
        cell: Arc<ModuleCell>,
        loader: Arc<dyn ModuleLoader>,
        port: PortSender,
        config: AdapterConfig,
        activation: ActivationContext,
    ) -> Self {
        Self {
            cell,
            loader,
            port,
            slot: Arc::new(InstanceSlot::new()),
            queue: VecDeque::new(),
            config,
            activation,
            constructed: false,
            freed: false,
            queue_warned: false,
        }
    }

    /// Handle for the audio thread.
    pub fn audio_handle(&self) -> AudioHandle {
        AudioHandle::new(Arc::clone(&self.slot))
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    /// Dispatch one port event.
    pub fn handle(&mut self, event: PortEvent) -> AdapterResult<()> {
        match event {
            PortEvent::Message(message) => self.on_message(message),
            PortEvent::MessageError(reason) => Err(AdapterError::MalformedMessage(reason)),
            PortEvent::ModuleLoaded => self.on_module_loaded(),
            PortEvent::ModuleFailed(err) => Err(AdapterError::LoadFailed(err)),
            PortEvent::Close => {
                self.free();
                Ok(())
            }
        }
    }

    /// A control message arrived.
    pub fn on_message(&mut self, message: Message) -> AdapterResult<()> {
        if self.freed {
            return Err(AdapterError::Freed);
        }

        if self.constructed {
            self.enqueue(message);
            return self.drain();
        }

        match self.cell.claim(&self.port) {
            Claim::Start => {
                info!("Loading module ({} byte source)", message.len());
                if self.config.forward_load_source {
                    self.enqueue(message.clone());
                }
                self.cell.spawn_load(Arc::clone(&self.loader), message);
                Ok(())
            }
            Claim::Pending => {
                self.enqueue(message);
                trace!("Module loading, {} messages queued", self.queue.len());
                Ok(())
            }
            Claim::Ready(module) => {
                self.construct(module.as_ref())?;
                self.enqueue(message);
                self.drain()
            }
            Claim::Failed(err) => Err(AdapterError::LoadFailed(err)),
        }
    }

    /// The shared module finished loading while we were waiting on it.
    pub fn on_module_loaded(&mut self) -> AdapterResult<()> {
        if self.freed {
            return Ok(());
        }

        if !self.constructed {
            match self.cell.module() {
                Some(module) => self.construct(module.as_ref())?,
                None => {
                    warn!("Load notification without a ready module");
                    return Ok(());
                }
            }
        }

        self.drain()
    }

    /// Render one block. Never blocks and never allocates.
    #[inline]
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool {
        self.slot.process(inputs, outputs)
    }

    /// Tear down the inner instance, if any. Later calls are no-ops.
    pub fn free(&mut self) {
        if self.freed {
            return;
        }
        self.freed = true;

        if !self.queue.is_empty() {
            debug!("Dropping {} undelivered messages", self.queue.len());
            self.queue.clear();
        }

        if self.slot.free() {
            info!("Inner instance torn down");
        }
    }

    fn construct(&mut self, module: &dyn ModuleFactory) -> AdapterResult<()> {
        let instance = module
            .instantiate(&self.activation)
            .map_err(AdapterError::Instantiate)?;

        if let Err(mut rejected) = self.slot.install(instance) {
            warn!("Instance slot already occupied, discarding new instance");
            rejected.teardown();
        }
        self.constructed = true;
        info!("Constructed inner instance of {}", module.name());
        Ok(())
    }

    fn enqueue(&mut self, message: Message) {
        self.queue.push_back(message);

        let limit = self.config.queue_warn_len;
        if limit > 0 && !self.queue_warned && self.queue.len() >= limit {
            self.queue_warned = true;
            warn!("Pending message queue reached {} entries", self.queue.len());
        }
    }

    /// Forward queued messages front to back. Stops at the first rejection.
    fn drain(&mut self) -> AdapterResult<()> {
        if self.queue.is_empty() {
            return Ok(());
        }

        let mut guard = self.slot.lock();
        let Some(instance) = guard.as_mut() else {
            return Ok(());
        };

        let mut forwarded = 0usize;
        while let Some(message) = self.queue.pop_front() {
            instance.message(&message).map_err(|e| {
                warn!("Forwarding stopped after {} messages: {}", forwarded, e);
                AdapterError::Forward(e)
            })?;
            forwarded += 1;
        }

        if forwarded > 1 {
            debug!("Drained {} queued messages", forwarded);
        }
        Ok(())
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.free();
    }
}
