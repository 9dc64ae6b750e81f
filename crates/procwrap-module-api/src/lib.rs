// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! procwrap Module API
//!
//! This crate defines the interface that compiled audio modules export so the
//! procwrap adapter can load them lazily and forward control messages and
//! audio blocks to them.
//!
//! # Example Module
//!
//! ```ignore
//! use procwrap_module_api::*;
//!
//! #[derive(Default)]
//! pub struct Silence;
//!
//! impl AudioModule for Silence {
//!     fn info(&self) -> ModuleInfo {
//!         ModuleInfo::new("org.example.silence", "Silence")
//!     }
//!
//!     fn message(&mut self, _payload: RSlice<u8>) -> RResult<(), ModuleError> {
//!         ROk(())
//!     }
//!
//!     fn process(&mut self, _inputs: RSlice<RSlice<f32>>, mut outputs: RSliceMut<RSliceMut<f32>>) -> bool {
//!         for out in outputs.iter_mut() {
//!             out.fill(0.0);
//!         }
//!         true
//!     }
//!     // ... implement other methods
//! }
//!
//! declare_module!(Silence);
//! ```

#![warn(missing_docs)]
#![allow(non_local_definitions)]

pub use abi_stable::std_types::{RErr, ROk, RResult, RSlice, RSliceMut, RString};

use abi_stable::{sabi_trait, std_types::RBox, StableAbi};

/// API version for compatibility checking.
/// Increment MAJOR for breaking changes, MINOR for additions.
pub const API_VERSION_MAJOR: u32 = 0;
/// Minor API version.
pub const API_VERSION_MINOR: u32 = 1;

/// Symbol name every native module exports.
pub const ENTRY_POINT_SYMBOL: &str = "procwrap_module_entry";

// ============================================================================
// Module Metadata
// ============================================================================

/// Metadata describing a module.
#[repr(C)]
#[derive(Debug, Clone, StableAbi)]
pub struct ModuleInfo {
    /// Unique identifier (reverse domain notation recommended).
    pub id: RString,

    /// Human-readable name.
    pub name: RString,

    /// Module vendor/author.
    pub vendor: RString,

    /// Version string (semver recommended).
    pub version: RString,

    /// Preferred number of output channels. Zero means "whatever the host provides".
    pub output_channels: u32,
}

impl ModuleInfo {
    /// Create a new ModuleInfo with required fields.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            vendor: "Unknown".into(),
            version: "0.0.0".into(),
            output_channels: 0,
        }
    }

    /// Builder: set vendor.
    pub fn with_vendor(mut self, vendor: &str) -> Self {
        self.vendor = vendor.into();
        self
    }

    /// Builder: set version.
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.into();
        self
    }

    /// Builder: set preferred output channel count.
    pub fn with_output_channels(mut self, channels: u32) -> Self {
        self.output_channels = channels;
        self
    }
}

// ============================================================================
// Module Errors
// ============================================================================

/// Errors a module reports back across the ABI boundary.
#[repr(C)]
#[derive(Debug, Clone, StableAbi)]
pub enum ModuleError {
    /// The payload could not be decoded by the module.
    MalformedMessage(RString),
    /// The message referred to a channel the module does not have.
    InvalidChannel(u32),
    /// Generic error with message.
    Other(RString),
}

impl std::fmt::Display for ModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedMessage(msg) => write!(f, "malformed message received: {}", msg),
            Self::InvalidChannel(idx) => write!(f, "invalid channel index: {}", idx),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ModuleError {}

// ============================================================================
// Audio Module Trait
// ============================================================================

/// Context provided to modules right after instantiation.
#[repr(C)]
#[derive(Debug, Clone, StableAbi)]
pub struct ActivationContext {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Maximum number of samples per process call.
    pub max_block_size: u32,
}

/// The trait every compiled module implements.
///
/// # Safety
///
/// The `process` method is called on a real-time audio thread. Implementations
/// MUST be real-time safe:
/// - No memory allocation
/// - No mutex locks
/// - No file I/O
/// - No unbounded loops
/// - No panics
#[sabi_trait]
pub trait AudioModule: Send + Sync {
    /// Get module metadata.
    fn info(&self) -> ModuleInfo;

    /// Called once, after instantiation and before the first message.
    fn activate(&mut self, context: ActivationContext);

    /// Handle one opaque control message.
    ///
    /// Called from the control path, never concurrently with `process`.
    fn message(&mut self, payload: RSlice<u8>) -> RResult<(), ModuleError>;

    /// Render one block.
    ///
    /// Returns `false` once the module has nothing more to produce and the
    /// host may stop calling it.
    fn process(&mut self, inputs: RSlice<RSlice<f32>>, outputs: RSliceMut<RSliceMut<f32>>) -> bool;

    /// Release everything the instance holds. Called exactly once.
    fn teardown(&mut self);
}

/// Type alias for boxed module instance.
pub type ModuleBox = AudioModule_TO<'static, RBox<()>>;

// ============================================================================
// Module Factory (for native modules)
// ============================================================================

/// Factory function type for creating module instances.
pub type ModuleFactoryFn = extern "C" fn() -> ModuleBox;

/// Entry point structure for native modules.
///
/// Native modules must export a function `procwrap_module_entry` that returns
/// this structure.
///
/// Note: This struct is #[repr(C)] but not StableAbi because function pointers
/// are handled separately. The ABI stability is ensured by:
/// 1. The struct layout being #[repr(C)]
/// 2. The ModuleBox type being StableAbi
/// 3. Version checking before using the factory function
#[repr(C)]
pub struct ModuleEntry {
    /// API version (major).
    pub api_version_major: u32,
    /// API version (minor).
    pub api_version_minor: u32,
    /// Factory function to create module instances.
    pub create: ModuleFactoryFn,
}

/// Macro to declare a native module entry point.
///
/// # Example
///
/// ```ignore
/// use procwrap_module_api::*;
///
/// struct MyModule { /* ... */ }
/// impl AudioModule for MyModule { /* ... */ }
///
/// declare_module!(MyModule);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($module_type:ty) => {
        #[no_mangle]
        pub extern "C" fn procwrap_module_entry() -> $crate::ModuleEntry {
            extern "C" fn create() -> $crate::ModuleBox {
                let module = <$module_type>::default();
                $crate::AudioModule_TO::from_value(module, abi_stable::sabi_trait::TD_Opaque)
            }

            $crate::ModuleEntry {
                api_version_major: $crate::API_VERSION_MAJOR,
                api_version_minor: $crate::API_VERSION_MINOR,
                create,
            }
        }
    };

    ($module_type:ty, $constructor:expr) => {
        #[no_mangle]
        pub extern "C" fn procwrap_module_entry() -> $crate::ModuleEntry {
            extern "C" fn create() -> $crate::ModuleBox {
                let module = $constructor;
                $crate::AudioModule_TO::from_value(module, abi_stable::sabi_trait::TD_Opaque)
            }

            $crate::ModuleEntry {
                api_version_major: $crate::API_VERSION_MAJOR,
                api_version_minor: $crate::API_VERSION_MINOR,
                create,
            }
        }
    };
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Convert decibels to linear gain.
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    if db <= -120.0 {
        0.0
    } else {
        10.0_f64.powf(db / 20.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_linear() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-9);
        assert!((db_to_linear(-6.0) - 0.5012).abs() < 0.001);
        assert_eq!(db_to_linear(-120.0), 0.0);
    }

    #[test]
    fn test_module_info_builder() {
        let info = ModuleInfo::new("org.example.x", "X")
            .with_vendor("Example")
            .with_version("1.2.3")
            .with_output_channels(2);
        assert_eq!(info.vendor.as_str(), "Example");
        assert_eq!(info.version.as_str(), "1.2.3");
        assert_eq!(info.output_channels, 2);
    }

    #[test]
    fn test_module_error_display() {
        let err = ModuleError::MalformedMessage("eof".into());
        assert_eq!(err.to_string(), "malformed message received: eof");
        assert_eq!(ModuleError::InvalidChannel(3).to_string(), "invalid channel index: 3");
    }
}
