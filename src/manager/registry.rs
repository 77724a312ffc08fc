//! Process-wide mapping from function name to Function Manager.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::FunctionManager;

/// Outcome of a `create_manager` call, distinguishing a fresh registration
/// from an idempotent repeat.
pub enum Registration {
    Created(Arc<FunctionManager>),
    AlreadyExists(Arc<FunctionManager>),
}

/// Guarded by its own mutex so concurrent `create_manager` calls for the
/// same name serialise: exactly one observes `Created`.
pub struct ManagerRegistry {
    managers: Mutex<HashMap<String, Arc<FunctionManager>>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self {
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a manager under `name` if absent, or return the existing one.
    pub fn create_or_get(&self, name: &str, build: impl FnOnce() -> FunctionManager) -> Registration {
        let mut managers = self.managers.lock();
        if let Some(existing) = managers.get(name) {
            return Registration::AlreadyExists(existing.clone());
        }

        let manager = Arc::new(build());
        managers.insert(name.to_string(), manager.clone());
        info!("registered function manager '{}'", name);
        Registration::Created(manager)
    }

    pub fn get(&self, name: &str) -> Option<Arc<FunctionManager>> {
        self.managers.lock().get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<FunctionManager>> {
        self.managers.lock().values().cloned().collect()
    }
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
