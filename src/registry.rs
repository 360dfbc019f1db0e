//! Module registry and loader.
//!
//! Peripheral modules are compiled into the host. Each one contributes a
//! [`ModuleProvider`] whose init function registers exactly one
//! [`ModuleDescriptor`]. The [`ModuleLoader`] runs every provider against a
//! [`ModuleRegistry`] once; a registry refuses a second load.
//!
//! # Example
//!
//! ```
//! use litesim::registry::{ModuleLoader, ModuleRegistry};
//!
//! let mut registry = ModuleRegistry::new();
//! ModuleLoader::builtin().load_all(&mut registry).unwrap();
//! assert!(registry.contains("clocker"));
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::error::{SimError, SimResult};
use crate::module::ModuleDescriptor;

/// Init function a provider exposes; it registers one descriptor.
pub type ModuleInit = fn(&mut ModuleRegistry) -> SimResult<()>;

/// One compiled-in module and its init entry point.
#[derive(Clone, Copy)]
pub struct ModuleProvider {
    /// Name used in diagnostics
    pub name: &'static str,
    /// Registration entry point
    pub init: ModuleInit,
}

impl fmt::Debug for ModuleProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleProvider").field("name", &self.name).finish()
    }
}

/// Registry of module descriptors, keyed by name.
#[derive(Default)]
pub struct ModuleRegistry {
    descriptors: HashMap<String, ModuleDescriptor>,
    loaded: bool,
}

impl ModuleRegistry {
    /// Creates an empty, unloaded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in module.
    pub fn with_builtin_modules() -> SimResult<Self> {
        let mut registry = Self::new();
        ModuleLoader::builtin().load_all(&mut registry)?;
        Ok(registry)
    }

    /// Registers a descriptor.
    ///
    /// # Arguments
    /// * `descriptor` - The module description; its name must be unique
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> SimResult<()> {
        if descriptor.name.is_empty() {
            return Err(SimError::InvalidArgument(
                "module descriptor without a name".to_string(),
            ));
        }
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(SimError::DuplicateModule(descriptor.name));
        }
        tracing::debug!(module = %descriptor.name, "registered module");
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Looks up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.descriptors.get(name)
    }

    /// Looks up a descriptor by name or fails with `UnknownModule`.
    pub fn require(&self, name: &str) -> SimResult<&ModuleDescriptor> {
        self.get(name)
            .ok_or_else(|| SimError::UnknownModule(name.to_string()))
    }

    /// Returns true if a module with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Returns the number of registered modules.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no modules are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Returns true once a loader has populated this registry.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Returns the registered module names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .field("loaded", &self.loaded)
            .finish()
    }
}

/// Runs module providers against a registry.
#[derive(Debug, Clone, Default)]
pub struct ModuleLoader {
    providers: Vec<ModuleProvider>,
}

impl ModuleLoader {
    /// Creates a loader with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader over every compiled-in module.
    pub fn builtin() -> Self {
        Self {
            providers: crate::modules::PROVIDERS.to_vec(),
        }
    }

    /// Adds a provider.
    pub fn with_provider(mut self, provider: ModuleProvider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Returns the number of providers.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Loads every provider into `registry`.
    ///
    /// Fails fast: if the registry was already loaded, or any provider's
    /// init fails or registers anything but exactly one module, the registry
    /// is left exactly as it was.
    ///
    /// # Returns
    /// The number of modules registered
    pub fn load_all(&self, registry: &mut ModuleRegistry) -> SimResult<usize> {
        if registry.loaded {
            tracing::error!("module loading attempted twice");
            return Err(SimError::AlreadyLoaded);
        }

        let mut staging = ModuleRegistry::new();
        for provider in &self.providers {
            let before = staging.len();
            (provider.init)(&mut staging).map_err(|e| {
                tracing::error!(provider = provider.name, error = %e, "module init failed");
                e
            })?;
            if staging.len() != before + 1 {
                return Err(SimError::Generic(format!(
                    "provider {} registered {} modules, expected exactly one",
                    provider.name,
                    staging.len() - before
                )));
            }
        }

        for (name, descriptor) in &staging.descriptors {
            if registry.contains(name) {
                return Err(SimError::DuplicateModule(descriptor.name.clone()));
            }
        }

        let count = staging.len();
        registry.descriptors.extend(staging.descriptors);
        registry.loaded = true;
        tracing::info!(count, "modules loaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, SimContext};
    use crate::pads::PadList;

    struct Nop;

    impl Module for Nop {
        fn add_pads(&mut self, _pads: &PadList) -> SimResult<()> {
            Ok(())
        }

        fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
            Ok(())
        }
    }

    fn nop_descriptor(name: &str) -> ModuleDescriptor {
        ModuleDescriptor::new(name, |_| Ok(Box::new(Nop) as Box<dyn Module>))
    }

    fn init_alpha(registry: &mut ModuleRegistry) -> SimResult<()> {
        registry.register(nop_descriptor("alpha"))
    }

    fn init_beta(registry: &mut ModuleRegistry) -> SimResult<()> {
        registry.register(nop_descriptor("beta"))
    }

    fn init_broken(_registry: &mut ModuleRegistry) -> SimResult<()> {
        Err(SimError::Generic("broken".to_string()))
    }

    fn init_silent(_registry: &mut ModuleRegistry) -> SimResult<()> {
        Ok(())
    }

    fn loader() -> ModuleLoader {
        ModuleLoader::new()
            .with_provider(ModuleProvider { name: "alpha", init: init_alpha })
            .with_provider(ModuleProvider { name: "beta", init: init_beta })
    }

    #[test]
    fn test_registry_basic() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.is_empty());

        registry.register(nop_descriptor("a")).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("a"));
        assert!(registry.require("b").is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(nop_descriptor("a")).unwrap();
        assert!(matches!(
            registry.register(nop_descriptor("a")),
            Err(SimError::DuplicateModule(_))
        ));
    }

    #[test]
    fn test_load_all() {
        let mut registry = ModuleRegistry::new();
        assert_eq!(loader().load_all(&mut registry).unwrap(), 2);
        assert!(registry.is_loaded());
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_load_twice_leaves_registry_untouched() {
        let mut registry = ModuleRegistry::new();
        loader().load_all(&mut registry).unwrap();

        let extra = ModuleLoader::new().with_provider(ModuleProvider {
            name: "gamma",
            init: |r| r.register(nop_descriptor("gamma")),
        });
        assert!(matches!(
            extra.load_all(&mut registry),
            Err(SimError::AlreadyLoaded)
        ));
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_failing_provider_aborts_load() {
        let mut registry = ModuleRegistry::new();
        let result = loader()
            .with_provider(ModuleProvider { name: "broken", init: init_broken })
            .load_all(&mut registry);
        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(!registry.is_loaded());
    }

    #[test]
    fn test_provider_must_register_one_module() {
        let mut registry = ModuleRegistry::new();
        let result = ModuleLoader::new()
            .with_provider(ModuleProvider { name: "silent", init: init_silent })
            .load_all(&mut registry);
        assert!(matches!(result, Err(SimError::Generic(_))));
    }

    #[test]
    fn test_builtin_modules() {
        let registry = ModuleRegistry::with_builtin_modules().unwrap();
        for name in [
            "clocker",
            "serial2console",
            "serial2tcp",
            "ethernet",
            "gmii_ethernet",
            "xgmii_ethernet",
            "spdeeprom",
            "gpio",
            "simctrl",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert_eq!(registry.get("simctrl").unwrap().max_instances, Some(1));
    }
}
