// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A running processor node.
//!
//! The node owns the adapter's control path: a tokio task that receives port
//! events one at a time and hands them to the adapter. Any adapter error ends
//! the task; it is logged, the adapter is freed and the error is returned from
//! [`Node::join`].

use super::{NodeError, ProcessorRegistry};
use crate::adapter::{Adapter, AdapterError};
use crate::message::{port, Message, PortEvent, PortReceiver, PortSender};
use crate::realtime::AudioHandle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Coarse lifecycle of a node as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Inner instance not constructed yet.
    Waiting,
    /// Inner instance constructed; blocks are forwarded.
    Ready,
    /// Control task has ended.
    Stopped,
}

pub struct Node {
    id: Uuid,
    port: PortSender,
    audio: AudioHandle,
    status: watch::Receiver<NodeStatus>,
    task: Option<JoinHandle<Result<(), AdapterError>>>,
}

impl Node {
    /// Instantiate `processor` from `registry` and start its control task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(registry: &ProcessorRegistry, processor: &str) -> Result<Self, NodeError> {
        let (tx, rx) = port();
        let adapter = registry.create(processor, tx.clone())?;
        let audio = adapter.audio_handle();
        let (status_tx, status) = watch::channel(NodeStatus::Waiting);

        let id = Uuid::new_v4();
        info!("Spawning node {} ({})", id, processor);
        let task = tokio::spawn(run_control(id, adapter, rx, status_tx));

        Ok(Self {
            id,
            port: tx,
            audio,
            status,
            task: Some(task),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handle for the audio thread.
    pub fn audio(&self) -> AudioHandle {
        self.audio.clone()
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    /// Post a control message.
    pub fn post(&self, message: Message) -> Result<(), NodeError> {
        self.send(PortEvent::Message(message))
    }

    /// Report a message the channel could not deliver.
    pub fn post_error(&self, reason: impl Into<String>) -> Result<(), NodeError> {
        self.send(PortEvent::MessageError(reason.into()))
    }

    /// Ask the control task to free the adapter and stop.
    pub fn close(&self) -> Result<(), NodeError> {
        self.send(PortEvent::Close)
    }

    /// Wait until the inner instance exists. Fails if the node stops first.
    pub async fn wait_ready(&self) -> Result<(), NodeError> {
        let mut status = self.status.clone();
        let ready = matches!(
            status.wait_for(|s| *s != NodeStatus::Waiting).await.as_deref(),
            Ok(NodeStatus::Ready)
        );
        if ready {
            Ok(())
        } else {
            Err(NodeError::Stopped)
        }
    }

    /// Wait for the control task to end and surface its error, if any.
    pub async fn join(mut self) -> Result<(), NodeError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result.map_err(NodeError::from),
            Err(e) => Err(NodeError::Join(e.to_string())),
        }
    }

    fn send(&self, event: PortEvent) -> Result<(), NodeError> {
        self.port.send(event).map_err(|_| NodeError::PortClosed)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // The adapter keeps its own port open, so the task only ends on Close.
        // Fails harmlessly if the task is already gone.
        let _ = self.port.send(PortEvent::Close);
    }
}

async fn run_control(
    id: Uuid,
    mut adapter: Adapter,
    mut rx: PortReceiver,
    status: watch::Sender<NodeStatus>,
) -> Result<(), AdapterError> {
    let result = loop {
        // The adapter holds a sender to its own port, so the channel only
        // ends on an explicit close (sent by `Node::drop` at the latest).
        let Some(event) = rx.recv().await else {
            break Ok(());
        };
        let closing = matches!(event, PortEvent::Close);

        if let Err(e) = adapter.handle(event) {
            error!("Node {} failed: {}", id, e);
            break Err(e);
        }
        if closing {
            debug!("Node {} closed", id);
            break Ok(());
        }

        if adapter.is_constructed() {
            status.send_if_modified(|s| {
                if *s == NodeStatus::Waiting {
                    *s = NodeStatus::Ready;
                    true
                } else {
                    false
                }
            });
        }
    };

    adapter.free();
    status.send_replace(NodeStatus::Stopped);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::host::PROCESSOR_NAME;
    use crate::modules::{ModuleCell, ModuleLoader, SourceLoader};
    use crate::realtime::SlotState;
    use procwrap_tone::{ChannelParams, ToneMessage};
    use std::sync::Arc;
    use std::time::Duration;

    /// Registry bound to a private cell so tests do not share loads.
    fn registry() -> ProcessorRegistry {
        let config = AppConfig::default();
        let loader: Arc<dyn ModuleLoader> =
            Arc::new(SourceLoader::from_config(&config.loader));
        let mut registry = ProcessorRegistry::new();
        registry.register_adapter(
            PROCESSOR_NAME,
            Arc::new(ModuleCell::new()),
            loader,
            &config,
        );
        registry
    }

    fn text(s: &str) -> Message {
        Message::from_text(s).unwrap()
    }

    #[tokio::test]
    async fn test_node_loads_builtin_and_renders() {
        let registry = registry();
        let node = Node::spawn(&registry, PROCESSOR_NAME).unwrap();
        let audio = node.audio();
        assert_eq!(node.status(), NodeStatus::Waiting);

        node.post(text("builtin:tone")).unwrap();
        let set = ToneMessage::SetParams {
            channel: 0,
            params: ChannelParams::default(),
        };
        node.post(text(&set.to_json())).unwrap();
        node.wait_ready().await.unwrap();
        assert_eq!(audio.state(), SlotState::Live);

        let mut left = [0.0f32; 64];
        assert!(audio.process(&[], &mut [&mut left[..]]));
        assert!(left.iter().any(|s| s.abs() > 0.01));

        node.close().unwrap();
        node.join().await.unwrap();
        assert_eq!(audio.state(), SlotState::Freed);
    }

    #[tokio::test]
    async fn test_load_failure_stops_node() {
        let registry = registry();
        let node = Node::spawn(&registry, PROCESSOR_NAME).unwrap();

        node.post(text("builtin:nonexistent")).unwrap();
        node.post(text("queued")).unwrap();

        assert!(matches!(node.wait_ready().await, Err(NodeError::Stopped)));
        assert_eq!(node.status(), NodeStatus::Stopped);
        assert!(matches!(
            node.join().await,
            Err(NodeError::Adapter(AdapterError::LoadFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_malformed_message_stops_node() {
        let registry = registry();
        let node = Node::spawn(&registry, PROCESSOR_NAME).unwrap();

        node.post_error("bad frame").unwrap();
        assert!(matches!(
            node.join().await,
            Err(NodeError::Adapter(AdapterError::MalformedMessage(_)))
        ));
    }

    #[tokio::test]
    async fn test_close_before_any_message() {
        let registry = registry();
        let node = Node::spawn(&registry, PROCESSOR_NAME).unwrap();
        let audio = node.audio();

        let mut out = [0.0f32; 8];
        assert!(audio.process(&[], &mut [&mut out[..]]));

        node.close().unwrap();
        node.join().await.unwrap();
        assert_eq!(audio.state(), SlotState::Freed);
        assert!(!audio.process(&[], &mut [&mut out[..]]));
    }

    #[tokio::test]
    async fn test_dropping_node_frees_adapter() {
        let registry = registry();
        let node = Node::spawn(&registry, PROCESSOR_NAME).unwrap();
        let audio = node.audio();

        node.post(text("builtin:tone")).unwrap();
        node.wait_ready().await.unwrap();
        assert_eq!(audio.state(), SlotState::Live);
        drop(node);

        for _ in 0..200 {
            if audio.state() == SlotState::Freed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(audio.state(), SlotState::Freed);
    }
}
