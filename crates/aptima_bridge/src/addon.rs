//! Addon Registry
//!
//! Maps addon names to extension factories. Populated explicitly at startup
//! and handed to the bridge.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{BridgeError, BridgeResult};
use crate::extension::Extension;

/// Builds an extension instance given its instance name
pub type ExtensionFactory = Arc<dyn Fn(&str) -> Box<dyn Extension> + Send + Sync>;

#[derive(Default)]
pub struct AddonRegistry {
    addons: DashMap<String, ExtensionFactory>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register `factory` under `name`. Names are unique.
    pub fn register<F>(&self, name: &str, factory: F) -> BridgeResult<()>
    where
        F: Fn(&str) -> Box<dyn Extension> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(BridgeError::InvalidArgument("addon name is empty".into()));
        }
        match self.addons.entry(name.to_string()) {
            Entry::Occupied(_) => Err(BridgeError::AddonAlreadyRegistered(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(factory));
                tracing::debug!(addon = %name, "Addon registered");
                Ok(())
            }
        }
    }

    pub fn unregister(&self, name: &str) -> BridgeResult<()> {
        self.addons
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BridgeError::AddonNotFound(name.to_string()))
    }

    /// Instantiate an extension from the addon `name`.
    pub fn create(&self, name: &str, instance: &str) -> BridgeResult<Box<dyn Extension>> {
        let factory = self
            .addons
            .get(name)
            .map(|f| f.value().clone())
            .ok_or_else(|| BridgeError::AddonNotFound(name.to_string()))?;
        Ok(factory(instance))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.addons.contains_key(name)
    }

    /// Registered addon names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.addons.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AddonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonRegistry")
            .field("addons", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::DefaultExtension;

    #[test]
    fn test_register_and_create() {
        let registry = AddonRegistry::new();
        registry
            .register("default", |_| Box::new(DefaultExtension))
            .unwrap();

        assert!(registry.contains("default"));
        assert!(registry.create("default", "ext_a").is_ok());
        assert_eq!(registry.names(), vec!["default".to_string()]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = AddonRegistry::new();
        registry.register("a", |_| Box::new(DefaultExtension)).unwrap();
        assert_eq!(
            registry.register("a", |_| Box::new(DefaultExtension)).unwrap_err(),
            BridgeError::AddonAlreadyRegistered("a".into())
        );
    }

    #[test]
    fn test_unknown_addon() {
        let registry = AddonRegistry::new();
        assert!(matches!(
            registry.create("missing", "x"),
            Err(BridgeError::AddonNotFound(_))
        ));
        assert!(registry.unregister("missing").is_err());
    }

    #[test]
    fn test_unregister() {
        let registry = AddonRegistry::new();
        registry.register("a", |_| Box::new(DefaultExtension)).unwrap();
        registry.unregister("a").unwrap();
        assert!(!registry.contains("a"));
    }
}
