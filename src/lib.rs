// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! procwrap - lazy host adapter for compiled audio modules.
//!
//! An [`Adapter`](adapter::Adapter) is registered with the host under
//! [`PROCESSOR_NAME`](host::PROCESSOR_NAME). The first message it receives
//! names the module to load; the load happens once per process on a
//! background thread while later messages queue up in order. When the module
//! is ready the adapter builds its inner instance, drains the queue into it
//! and from then on forwards messages and audio blocks directly.

pub mod adapter;
pub mod codec;
pub mod config;
pub mod host;
pub mod message;
pub mod modules;
pub mod realtime;

pub use adapter::{Adapter, AdapterError, AdapterResult};
pub use message::{Message, PortEvent};
