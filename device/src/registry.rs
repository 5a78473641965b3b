use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::warn;

use crate::api::DeviceApi;

/// Name-keyed registry of backend singletons.
///
/// A backend registers exactly one [`DeviceApi`] instance per process
/// under a fixed key (e.g. `"cuda"`); a generic dispatcher retrieves it by
/// that name.
pub struct BackendRegistry {
    backends: RwLock<HashMap<&'static str, Arc<dyn DeviceApi>>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self { backends: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, name: &'static str, api: Arc<dyn DeviceApi>) {
        let mut backends = self.backends.write();
        if backends.insert(name, api).is_some() {
            warn!(name, "replacing an already registered device backend");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DeviceApi>> {
        self.backends.read().get(name).map(Arc::clone)
    }
}

static REGISTRY: Lazy<BackendRegistry> = Lazy::new(BackendRegistry::new);

/// The global backend registry.
pub fn registry() -> &'static BackendRegistry {
    &REGISTRY
}

/// Register a backend singleton under `name`.
pub fn register(name: &'static str, api: Arc<dyn DeviceApi>) {
    registry().register(name, api);
}

/// Look up a backend by name.
pub fn get(name: &str) -> Option<Arc<dyn DeviceApi>> {
    registry().get(name)
}
