// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Named processor registration.

use super::NodeError;
use crate::adapter::Adapter;
use crate::config::AppConfig;
use crate::message::PortSender;
use crate::modules::{ModuleCell, ModuleLoader, SourceLoader};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name the module adapter is registered under.
pub const PROCESSOR_NAME: &str = "module-processor";

/// Builds an adapter attached to the given port.
pub type ProcessorConstructor = Arc<dyn Fn(PortSender) -> Adapter + Send + Sync>;

/// Processors the host can instantiate by name.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, ProcessorConstructor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the module adapter registered under [`PROCESSOR_NAME`],
    /// sharing the process-wide module cell.
    pub fn with_defaults(config: &AppConfig) -> Self {
        let loader: Arc<dyn ModuleLoader> = Arc::new(SourceLoader::from_config(&config.loader));
        let mut registry = Self::new();
        registry.register_adapter(PROCESSOR_NAME, ModuleCell::global(), loader, config);
        registry
    }

    /// Register a processor. Replaces any processor with the same name.
    pub fn register(&mut self, name: impl Into<String>, constructor: ProcessorConstructor) {
        let name = name.into();
        debug!("Registering processor {}", name);
        self.processors.insert(name, constructor);
    }

    /// Register a module adapter bound to `cell` and `loader`.
    pub fn register_adapter(
        &mut self,
        name: impl Into<String>,
        cell: Arc<ModuleCell>,
        loader: Arc<dyn ModuleLoader>,
        config: &AppConfig,
    ) {
        let adapter_config = config.adapter.clone();
        let activation = config.engine.activation();
        self.register(
            name,
            Arc::new(move |port: PortSender| {
                Adapter::new(
                    Arc::clone(&cell),
                    Arc::clone(&loader),
                    port,
                    adapter_config.clone(),
                    activation.clone(),
                )
            }),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.processors.keys().map(String::as_str)
    }

    /// Instantiate the processor registered under `name`.
    pub fn create(&self, name: &str, port: PortSender) -> Result<Adapter, NodeError> {
        let constructor = self
            .processors
            .get(name)
            .ok_or_else(|| NodeError::UnknownProcessor(name.to_string()))?;
        Ok(constructor(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::port;

    #[test]
    fn test_default_registration() {
        let registry = ProcessorRegistry::with_defaults(&AppConfig::default());
        assert!(registry.contains(PROCESSOR_NAME));
        assert_eq!(registry.names().collect::<Vec<_>>(), [PROCESSOR_NAME]);

        let (tx, _rx) = port();
        let adapter = registry.create(PROCESSOR_NAME, tx).unwrap();
        assert_eq!(adapter.queue_len(), 0);
        assert!(!adapter.is_constructed());
    }

    #[test]
    fn test_unknown_processor() {
        let registry = ProcessorRegistry::new();
        let (tx, _rx) = port();
        assert!(matches!(
            registry.create("missing", tx),
            Err(NodeError::UnknownProcessor(name)) if name == "missing"
        ));
    }
}
