// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Host side: processor registration, node control tasks and the offline
//! audio driver.

pub mod node;
pub mod registry;
pub mod render;

pub use node::{Node, NodeStatus};
pub use registry::{ProcessorConstructor, ProcessorRegistry, PROCESSOR_NAME};
pub use render::{spawn_render, RenderHandle, RenderPlan, Rendered};

use crate::adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("no processor registered as {0:?}")]
    UnknownProcessor(String),

    #[error("node port is closed")]
    PortClosed,

    #[error("node stopped")]
    Stopped,

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("node task panicked: {0}")]
    Join(String),

    #[error("unsupported channel count: {0}")]
    InvalidChannels(usize),

    #[error("failed to spawn audio thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("render thread ended without output")]
    RenderAborted,
}
