use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;

type BackendFactory = Box<dyn Fn() -> Box<dyn DetectorBackend> + Send + Sync>;

/// Registry of detector backends, selectable by name.
///
/// Holds factories rather than instances so each detection worker gets its
/// own backend state.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every built-in backend registered. `stub` is the default.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", || Box::new(super::StubBackend::new()));
        registry
    }

    /// Register a backend factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn DetectorBackend> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Instantiate a backend by name.
    pub fn create(&self, name: &str) -> Result<Box<dyn DetectorBackend>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        Ok(factory())
    }

    /// Instantiate the default backend.
    pub fn create_default(&self) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backends registered"))?;
        self.create(name)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FnBackend;

    #[test]
    fn builtin_registry_defaults_to_stub() -> Result<()> {
        let registry = BackendRegistry::with_builtin();
        assert_eq!(registry.create_default()?.name(), "stub");
        assert_eq!(registry.list(), vec!["stub".to_string()]);
        Ok(())
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = BackendRegistry::with_builtin();
        let err = registry.create("yolo").err().expect("unknown backend");
        assert!(err.to_string().contains("stub"));
    }

    #[test]
    fn set_default_switches_backend() -> Result<()> {
        let mut registry = BackendRegistry::with_builtin();
        registry.register("none", || Box::new(FnBackend::new("none", |_| Ok(Vec::new()))));
        assert!(registry.set_default("missing").is_err());
        registry.set_default("none")?;
        assert_eq!(registry.create_default()?.name(), "none");
        Ok(())
    }
}
