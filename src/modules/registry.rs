//! Module registry
//!
//! Maps module ids to their definitions. The registry never reads widget
//! state; it only hands out the functions the document store calls through.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::builtin;
use super::definition::ModuleDefinition;
use crate::error::{BoardkitError, Result};
use crate::sharing::contract::ContractId;

/// Registry of available modules
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<ModuleDefinition>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }

    /// Create registry with the built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for definition in builtin::definitions() {
            // Built-ins are valid by construction; a failure here is a bug in them.
            if let Err(e) = registry.register(definition) {
                log::error!("built-in module rejected: {}", e);
            }
        }
        registry
    }

    /// Register a module.
    ///
    /// Re-registering an id replaces the previous definition and returns it.
    pub fn register(&mut self, definition: ModuleDefinition) -> Result<Option<Arc<ModuleDefinition>>> {
        definition.validate()?;

        let id = definition.module_id.clone();
        let previous = self.modules.insert(id.clone(), Arc::new(definition));
        match &previous {
            Some(old) => log::warn!(
                "module '{}' re-registered, replacing version {}",
                id,
                old.version
            ),
            None => log::info!("registered module '{}'", id),
        }
        Ok(previous)
    }

    /// Remove a module. Widgets of this module keep their state blobs.
    pub fn unregister(&mut self, module_id: &str) -> Option<Arc<ModuleDefinition>> {
        let removed = self.modules.remove(module_id);
        if removed.is_some() {
            log::info!("unregistered module '{}'", module_id);
        }
        removed
    }

    /// Get a module by ID
    pub fn resolve(&self, module_id: &str) -> Option<Arc<ModuleDefinition>> {
        self.modules.get(module_id).cloned()
    }

    /// Get a module by ID, failing if it is not registered
    pub fn get(&self, module_id: &str) -> Result<Arc<ModuleDefinition>> {
        self.resolve(module_id)
            .ok_or_else(|| BoardkitError::ModuleNotRegistered {
                module_id: module_id.to_string(),
            })
    }

    /// Check if a module is registered
    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    /// List all registered module IDs, sorted
    pub fn list_modules(&self) -> Vec<&str> {
        self.modules.keys().map(|s| s.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModuleDefinition>> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules that provide any version of `contract_id`'s contract
    pub fn providers_of(&self, contract_id: &ContractId) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|(_, def)| def.provided(contract_id).is_some())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[test]
    fn test_registry_builtins() {
        let registry = ModuleRegistry::with_builtins();

        assert!(registry.contains(builtin::TODO_MODULE_ID));
        assert!(registry.contains(builtin::TASK_RADAR_MODULE_ID));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resolve_and_get() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(ModuleDefinition::builder::<Note>("note").build())
            .unwrap();

        assert!(registry.resolve("note").is_some());
        assert!(registry.resolve("nonexistent").is_none());
        assert_eq!(registry.get("nonexistent").unwrap_err().error_code(), "MODULE_NOT_REGISTERED");
    }

    #[test]
    fn test_reregister_overwrites() {
        let mut registry = ModuleRegistry::new();
        let first = registry
            .register(ModuleDefinition::builder::<Note>("note").version("1.0.0").build())
            .unwrap();
        assert!(first.is_none());

        let replaced = registry
            .register(ModuleDefinition::builder::<Note>("note").version("1.1.0").build())
            .unwrap();
        assert_eq!(replaced.unwrap().version, "1.0.0");
        assert_eq!(registry.resolve("note").unwrap().version, "1.1.0");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_definition_is_not_registered() {
        let mut registry = ModuleRegistry::new();
        let result = registry.register(ModuleDefinition::builder::<Note>("").build());

        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister() {
        let mut registry = ModuleRegistry::with_builtins();
        assert!(registry.unregister(builtin::TODO_MODULE_ID).is_some());
        assert!(registry.unregister(builtin::TODO_MODULE_ID).is_none());
        assert!(!registry.contains(builtin::TODO_MODULE_ID));
    }

    #[test]
    fn test_providers_of() {
        let registry = ModuleRegistry::with_builtins();
        let contract = ContractId::parse(builtin::TODO_PROGRESS_CONTRACT).unwrap();
        assert_eq!(registry.providers_of(&contract), vec![builtin::TODO_MODULE_ID]);
    }
}
