// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Module loading for procwrap.
//!
//! A module is loaded once per process, lazily, from the payload of the first
//! message an adapter receives. Once loaded it acts as a factory: every
//! adapter instantiates its own inner instance from it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      ModuleCell                          │
//! │       Unstarted ──► Pending ──► Ready | Failed           │
//! ├─────────────────────────────────────────────────────────┤
//! │                     SourceLoader                         │
//! │        "builtin:<id>"            anything else           │
//! │              │                         │                 │
//! │              ▼                         ▼                 │
//! │        BuiltinLoader              NativeLoader           │
//! │              └────────────┬────────────┘                 │
//! │                           ▼                              │
//! │             ModuleFactory (Arc, shared)                  │
//! │                           │ instantiate()                │
//! │                           ▼                              │
//! │               ModuleInstance (impl InnerInstance)        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod builtin;
pub mod cell;
pub mod instance;
pub mod loader;
pub mod native;

pub use builtin::BuiltinLoader;
pub use cell::{Claim, ModuleCell, ModuleState};
pub use instance::{ModuleInstance, MAX_PORTS};
pub use loader::SourceLoader;
pub use native::NativeLoader;

use crate::message::Message;
use procwrap_module_api::{ActivationContext, ModuleError};
use std::path::PathBuf;
use std::sync::Arc;

/// The inner processing object an adapter forwards to.
pub trait InnerInstance: Send {
    /// Handle one control message.
    fn message(&mut self, message: &Message) -> Result<(), ModuleError>;

    /// Render one block. The return value is handed back to the host verbatim.
    ///
    /// Module-backed instances see at most [`MAX_PORTS`] buffers per
    /// direction. Extra inputs are ignored and extra outputs are silenced.
    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool;

    /// Release the instance. Called at most once.
    fn teardown(&mut self);
}

/// A loaded module, able to produce inner instances.
pub trait ModuleFactory: Send + Sync {
    /// Display name for logging.
    fn name(&self) -> &str;

    /// Create and activate a new instance.
    fn instantiate(&self, context: &ActivationContext) -> LoadResult<Box<dyn InnerInstance>>;
}

/// Resolves a load source into a module.
///
/// Implementations may block; the module cell always calls them off the
/// control path.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, source: &Message) -> LoadResult<Arc<dyn ModuleFactory>>;
}

/// Error type for module loading.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The load source payload was empty.
    #[error("empty module source")]
    EmptySource,

    /// Module file not found.
    #[error("module not found: {0}")]
    NotFound(PathBuf),

    /// Failed to load shared library.
    #[error("failed to load library: {0}")]
    LibraryLoad(String),

    /// Module entry point not found.
    #[error("entry point not found: {0}")]
    EntryPointNotFound(String),

    /// API version mismatch.
    #[error("API version mismatch: module {module_major}.{module_minor}, host {host_major}.{host_minor}")]
    VersionMismatch {
        module_major: u32,
        module_minor: u32,
        host_major: u32,
        host_minor: u32,
    },

    /// No builtin module with this id.
    #[error("unknown builtin module: {0}")]
    UnknownBuiltin(String),

    /// Creating an instance failed.
    #[error("module instantiation failed: {0}")]
    Instantiation(String),

    /// Module file has insecure permissions.
    #[error("insecure permissions on module: {0}")]
    InsecurePermissions(PathBuf),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for module operations.
pub type LoadResult<T> = Result<T, LoadError>;
