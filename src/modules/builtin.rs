// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Built-in modules compiled directly into procwrap.
//!
//! Unlike native modules, builtin modules are part of the procwrap binary.
//! They are selected with a `builtin:<id>` load source and created directly
//! rather than loaded from external files.

use super::{
    InnerInstance, LoadError, LoadResult, ModuleFactory, ModuleInstance, ModuleLoader,
};
use crate::message::Message;
use procwrap_module_api::{ActivationContext, ModuleBox, ModuleInfo};
use std::sync::Arc;
use tracing::debug;

/// Load source prefix selecting a builtin module.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Metadata for a built-in module.
#[derive(Debug, Clone)]
pub struct BuiltinModuleMeta {
    /// Identifier used after the `builtin:` prefix.
    pub id: String,
    /// Module info.
    pub info: ModuleInfo,
}

/// Create a builtin module object by ID.
///
/// Returns `None` if the module ID is not recognized.
pub fn create_builtin(id: &str) -> Option<ModuleBox> {
    match id {
        "tone" => Some(procwrap_tone::ToneModule::boxed()),
        _ => None,
    }
}

/// Registry of available built-in modules.
#[derive(Debug)]
pub struct BuiltinLoader {
    modules: Vec<BuiltinModuleMeta>,
}

impl BuiltinLoader {
    /// Create a registry holding every builtin module.
    pub fn new() -> Self {
        let modules = ["tone"]
            .into_iter()
            .filter_map(|id| {
                create_builtin(id).map(|m| BuiltinModuleMeta {
                    id: id.to_string(),
                    info: m.info(),
                })
            })
            .collect();

        Self { modules }
    }

    /// Get all available builtin modules.
    pub fn modules(&self) -> &[BuiltinModuleMeta] {
        &self.modules
    }

    /// Find a builtin module by ID.
    pub fn get(&self, id: &str) -> Option<&BuiltinModuleMeta> {
        self.modules.iter().find(|m| m.id == id)
    }
}

impl Default for BuiltinLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for BuiltinLoader {
    fn load(&self, source: &Message) -> LoadResult<Arc<dyn ModuleFactory>> {
        let text = source.text();
        let id = text.strip_prefix(BUILTIN_PREFIX).unwrap_or(&text);
        if id.is_empty() {
            return Err(LoadError::EmptySource);
        }

        let meta = self
            .get(id)
            .cloned()
            .ok_or_else(|| LoadError::UnknownBuiltin(id.to_string()))?;
        debug!("Using builtin module {}", meta.id);

        Ok(Arc::new(BuiltinModule { meta }))
    }
}

struct BuiltinModule {
    meta: BuiltinModuleMeta,
}

impl ModuleFactory for BuiltinModule {
    fn name(&self) -> &str {
        self.meta.info.name.as_str()
    }

    fn instantiate(&self, context: &ActivationContext) -> LoadResult<Box<dyn InnerInstance>> {
        let mut module = create_builtin(&self.meta.id)
            .ok_or_else(|| LoadError::UnknownBuiltin(self.meta.id.clone()))?;
        module.activate(context.clone());
        Ok(Box::new(ModuleInstance::new(module, None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procwrap_tone::{ChannelParams, ToneMessage};

    fn context() -> ActivationContext {
        ActivationContext {
            sample_rate: 4000.0,
            max_block_size: 4,
        }
    }

    #[test]
    fn test_registry_lists_tone() {
        let loader = BuiltinLoader::new();
        assert_eq!(loader.modules().len(), 1);
        assert_eq!(loader.get("tone").unwrap().info.id.as_str(), procwrap_tone::MODULE_ID);
    }

    #[test]
    fn test_unknown_builtin() {
        let loader = BuiltinLoader::new();
        let result = loader.load(&Message::from_text("builtin:reverb").unwrap());
        assert!(matches!(result, Err(LoadError::UnknownBuiltin(id)) if id == "reverb"));
    }

    #[test]
    fn test_tone_instance_renders() {
        let loader = BuiltinLoader::new();
        let module = loader
            .load(&Message::from_text("builtin:tone").unwrap())
            .unwrap();
        let mut instance = module.instantiate(&context()).unwrap();

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

        let mut left = [0.0f32; 4];
        let keep = {
            let mut outputs: [&mut [f32]; 1] = [&mut left];
            instance.process(&[], &mut outputs)
        };
        assert!(keep);
        assert!((left[1] - 1.0).abs() < 1e-5);
        assert!((left[3] + 1.0).abs() < 1e-5);

        instance.teardown();
    }
}
