//! Typed registry for process-wide services.
//!
//! Shared resources (connection pools, session stores, upload directories)
//! are registered once at startup, handed to the executor, and reached from
//! handlers through `RequestContext::services()`.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

/// `TypeId`-keyed map of shared services.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one of the same type.
    pub fn insert<T: Any + Send + Sync>(&self, service: T) -> Option<Arc<T>> {
        self.insert_arc(Arc::new(service))
    }

    pub fn insert_arc<T: Any + Send + Sync>(&self, service: Arc<T>) -> Option<Arc<T>> {
        self.services
            .insert(TypeId::of::<T>(), service)
            .and_then(|old| old.downcast::<T>().ok())
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Drop every registered service. Called once at teardown.
    pub fn shutdown(&self) {
        let count = self.services.len();
        self.services.clear();
        tracing::info!(services = count, "Service registry cleared");
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct UploadRoot(String);

    #[test]
    fn test_insert_and_get() {
        let registry = ServiceRegistry::new();
        assert!(registry.get::<UploadRoot>().is_none());

        registry.insert(UploadRoot("/srv/uploads".into()));
        assert_eq!(
            registry.get::<UploadRoot>().as_deref(),
            Some(&UploadRoot("/srv/uploads".into()))
        );
        assert!(registry.contains::<UploadRoot>());
        assert!(!registry.contains::<String>());
    }

    #[test]
    fn test_replace_returns_previous() {
        let registry = ServiceRegistry::new();
        registry.insert(7u32);
        let old = registry.insert(8u32).unwrap();
        assert_eq!(*old, 7);
        assert_eq!(*registry.get::<u32>().unwrap(), 8);
    }

    #[test]
    fn test_shutdown_clears() {
        let registry = ServiceRegistry::new();
        registry.insert(1u8);
        registry.insert(String::from("x"));
        assert_eq!(registry.len(), 2);
        registry.shutdown();
        assert!(registry.is_empty());
    }
}
