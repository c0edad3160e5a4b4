//! Scoped key/value configuration store
//!
//! Settings live under dotted scope paths (`services.ebs-east.driver`).
//! Loading from files or flags is the front end's concern; the store only
//! provides layered lookup and the merge semantics context joins rely on.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::trace;

/// Immutable-after-build configuration store.
///
/// Cloning is a deep copy of the key map; stores are small and contexts
/// hold one per scope, never shared mutably.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: BTreeMap<String, Value>,
    // Whether set() emits a trace event. Dropped during merges so joining
    // two configs never floods the log, restored afterward.
    trace_sets: bool,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            trace_sets: true,
        }
    }

    /// Set a value under a dotted scope path.
    pub fn set(&mut self, key: impl Into<String>, val: Value) {
        let key = key.into();
        if self.trace_sets {
            trace!(key = %key, "config set");
        }
        self.values.insert(key, val);
    }

    /// Fluent variant of [`set`](Self::set) for building stores inline.
    pub fn with(mut self, key: impl Into<String>, val: Value) -> Self {
        self.set(key, val);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate all keys and values in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys that live directly under `scope.`, with the scope prefix removed.
    pub fn keys_in_scope<'a>(&'a self, scope: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = format!("{}.", scope);
        self.values.keys().filter_map(move |k| {
            k.strip_prefix(&prefix)
        })
    }

    /// Whether set() currently emits trace events.
    pub fn traces_sets(&self) -> bool {
        self.trace_sets
    }

    /// Enable or disable trace events on set().
    pub fn set_trace_sets(&mut self, enabled: bool) {
        self.trace_sets = enabled;
    }

    /// Merge two stores: `secondary`'s entries are applied first, then
    /// `primary`'s override them on key collision. Set-tracing is disabled
    /// while the merge runs and the primary's setting is restored on the
    /// result, so a merge never produces per-key log noise.
    pub fn merged(primary: &ConfigStore, secondary: &ConfigStore) -> ConfigStore {
        let mut out = ConfigStore::new();
        out.set_trace_sets(false);
        for (k, v) in secondary.iter() {
            out.set(k, v.clone());
        }
        for (k, v) in primary.iter() {
            out.set(k, v.clone());
        }
        out.set_trace_sets(primary.traces_sets());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_typed() {
        let cfg = ConfigStore::new()
            .with("gateway.host", json!("127.0.0.1"))
            .with("gateway.port", json!(7979))
            .with("gateway.embedded", json!(true));

        assert_eq!(cfg.get_str("gateway.host"), Some("127.0.0.1"));
        assert_eq!(cfg.get_i64("gateway.port"), Some(7979));
        assert_eq!(cfg.get_bool("gateway.embedded"), Some(true));
        assert_eq!(cfg.get_str("gateway.port"), None);
        assert!(cfg.get("gateway.missing").is_none());
    }

    #[test]
    fn test_merged_primary_wins() {
        let primary = ConfigStore::new().with("x", json!("1"));
        let secondary = ConfigStore::new()
            .with("x", json!("2"))
            .with("y", json!("3"));

        let merged = ConfigStore::merged(&primary, &secondary);
        assert_eq!(merged.get_str("x"), Some("1"));
        assert_eq!(merged.get_str("y"), Some("3"));
        // The caller's trace setting survives the merge.
        assert!(merged.traces_sets());
    }

    #[test]
    fn test_merged_preserves_quiet_primary() {
        let mut primary = ConfigStore::new();
        primary.set_trace_sets(false);
        let merged = ConfigStore::merged(&primary, &ConfigStore::new());
        assert!(!merged.traces_sets());
    }

    #[test]
    fn test_keys_in_scope() {
        let cfg = ConfigStore::new()
            .with("services.ebs-east.driver", json!("memory"))
            .with("services.ebs-west.driver", json!("memory"))
            .with("gateway.port", json!(7979));

        let keys: Vec<&str> = cfg.keys_in_scope("services").collect();
        assert_eq!(keys, vec!["ebs-east.driver", "ebs-west.driver"]);
    }
}
