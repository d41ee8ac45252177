//! Namespaced key/value context shared between graph scopes.
//!
//! Several scopes can share one underlying store. Every key is stored as
//! `"{scope_id}:{key}"`, so scopes never see each other's entries.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// The underlying store shared by scope contexts.
pub type ContextStore = Arc<DashMap<String, Value>>;

/// A view of a [`ContextStore`] restricted to one scope.
///
/// Cloning shares the store. Use [`ScopeContext::snapshot`] for an
/// independent copy.
#[derive(Debug, Clone)]
pub struct ScopeContext {
    scope_id: String,
    store: ContextStore,
}

impl ScopeContext {
    /// A context backed by a fresh, unshared store.
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self::with_store(scope_id, Arc::new(DashMap::new()))
    }

    pub fn with_store(scope_id: impl Into<String>, store: ContextStore) -> Self {
        Self {
            scope_id: scope_id.into(),
            store,
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    fn qualify(&self, key: &str) -> String {
        format!("{}:{}", self.scope_id, key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store
            .get(&self.qualify(key))
            .map(|entry| entry.value().clone())
    }

    /// Set a value, returning the previous one.
    pub fn set(&self, key: &str, value: Value) -> Option<Value> {
        self.store.insert(self.qualify(key), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.store
            .remove(&self.qualify(key))
            .map(|(_, value)| value)
    }

    /// Keys of this scope, without the prefix.
    pub fn keys(&self) -> Vec<String> {
        let prefix = format!("{}:", self.scope_id);
        let mut keys: Vec<String> = self
            .store
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    /// Copy this scope's entries into a new, unshared store.
    pub fn snapshot(&self) -> Self {
        let copy = Self::new(self.scope_id.clone());
        for key in self.keys() {
            if let Some(value) = self.get(&key) {
                copy.set(&key, value);
            }
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scopes_sharing_a_store_do_not_collide() {
        let store: ContextStore = Arc::new(DashMap::new());
        let left = ScopeContext::with_store("left", store.clone());
        let right = ScopeContext::with_store("right", store.clone());

        left.set("count", json!(1));
        right.set("count", json!(2));

        assert_eq!(left.get("count"), Some(json!(1)));
        assert_eq!(right.get("count"), Some(json!(2)));
        assert_eq!(store.len(), 2);
        assert!(store.contains_key("left:count"));
        assert_eq!(left.keys(), vec!["count"]);
    }

    #[test]
    fn snapshot_is_independent() {
        let context = ScopeContext::new("scope");
        context.set("a", json!("before"));

        let copy = context.snapshot();
        context.set("a", json!("after"));
        copy.set("b", json!(true));

        assert_eq!(copy.get("a"), Some(json!("before")));
        assert_eq!(context.get("b"), None);
        assert_eq!(context.remove("a"), Some(json!("after")));
    }
}
