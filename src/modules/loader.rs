// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Loader dispatching on the shape of the load source.

use super::builtin::BUILTIN_PREFIX;
use super::{BuiltinLoader, LoadResult, ModuleFactory, ModuleLoader, NativeLoader};
use crate::config::LoaderConfig;
use crate::message::Message;
use std::sync::Arc;

/// `builtin:<id>` goes to the builtin registry, anything else is a library path.
pub struct SourceLoader {
    native: NativeLoader,
    builtin: BuiltinLoader,
}

impl SourceLoader {
    pub fn new(native: NativeLoader, builtin: BuiltinLoader) -> Self {
        Self { native, builtin }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        let native = NativeLoader::new()
            .with_search_paths(config.search_paths.iter().cloned())
            .with_permission_check(config.check_permissions);
        Self::new(native, BuiltinLoader::new())
    }

    pub fn native(&self) -> &NativeLoader {
        &self.native
    }
}

impl ModuleLoader for SourceLoader {
    fn load(&self, source: &Message) -> LoadResult<Arc<dyn ModuleFactory>> {
        if source.payload().starts_with(BUILTIN_PREFIX.as_bytes()) {
            self.builtin.load(source)
        } else {
            self.native.load(source)
        }
    }
}
