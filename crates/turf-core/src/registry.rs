//! Per-database registry of registered collections and their extensions.

use std::collections::HashMap;

use crate::error::RegistrationError;

/// Metadata recorded for one registered collection.
#[derive(Debug, Clone)]
pub(crate) struct CollectionMeta {
    pub schema_version: u64,
    pub value_cache_capacity: Option<usize>,
    /// Extension name → version.
    pub extensions: HashMap<String, u64>,
}

/// Tracks which collections and extensions are registered with a database.
/// Registration happens once, inside the setup write transaction at open.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    collections: HashMap<String, CollectionMeta>,
}

impl Registry {
    pub fn register_collection(
        &mut self,
        name: &str,
        schema_version: u64,
        value_cache_capacity: Option<usize>,
    ) -> Result<(), RegistrationError> {
        if self.collections.contains_key(name) {
            return Err(RegistrationError::DuplicateCollection(name.to_string()));
        }
        self.collections.insert(
            name.to_string(),
            CollectionMeta {
                schema_version,
                value_cache_capacity,
                extensions: HashMap::new(),
            },
        );
        Ok(())
    }

    pub fn register_extension(
        &mut self,
        collection: &str,
        name: &str,
        version: u64,
    ) -> Result<(), RegistrationError> {
        let meta = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| RegistrationError::UnknownCollection(collection.to_string()))?;
        if meta.extensions.contains_key(name) {
            return Err(RegistrationError::DuplicateExtension {
                extension: name.to_string(),
                collection: collection.to_string(),
            });
        }
        meta.extensions.insert(name.to_string(), version);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_collection_rejected() {
        let mut registry = Registry::default();
        registry.register_collection("users", 1, Some(50)).unwrap();
        let err = registry.register_collection("users", 1, Some(50)).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateCollection(n) if n == "users"));
    }

    #[test]
    fn test_extension_requires_known_collection() {
        let mut registry = Registry::default();
        let err = registry.register_extension("users", "index_users", 1).unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownCollection(n) if n == "users"));
    }

    #[test]
    fn test_duplicate_extension_rejected() {
        let mut registry = Registry::default();
        registry.register_collection("users", 1, Some(50)).unwrap();
        registry.register_extension("users", "index_users", 1).unwrap();
        let err = registry
            .register_extension("users", "index_users", 2)
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateExtension { .. }));
    }

    #[test]
    fn test_collection_names_sorted() {
        let mut registry = Registry::default();
        registry.register_collection("movies", 1, None).unwrap();
        registry.register_collection("users", 1, Some(10)).unwrap();
        assert_eq!(registry.collection_names(), vec!["movies", "users"]);
    }
}
