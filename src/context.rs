//! Request context propagation
//!
//! A `Context` is an immutable chain of scopes threading configuration,
//! identity, correlation IDs, and bound driver handles through every call
//! layer without explicit parameter plumbing. Deriving a context layers a
//! new scope over its parent; the parent is never touched, so a context is
//! always safe to share across concurrently running tasks.
//!
//! Lookup order is fixed: the local scope first, then the parent chain,
//! then (for joined contexts) the secondary side.

use crate::config::ConfigStore;
use crate::driver::{IntegrationDriver, OsDriver, StorageDriver};
use crate::error::{Error, Result};
use crate::types::{DeviceMap, InstanceId, LocalDevices};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::Level;

// =============================================================================
// Context Keys
// =============================================================================

/// The closed set of fields a context scope may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextKey {
    Config,
    Request,
    TransactionId,
    TransactionCreated,
    Route,
    ServiceName,
    CorrelationIds,
    OsDriver,
    StorageDriver,
    IntegrationDriver,
    InstanceId,
    InstanceIdsByService,
    LocalDevices,
    LocalDevicesByService,
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContextKey::Config => "config",
            ContextKey::Request => "request",
            ContextKey::TransactionId => "transactionID",
            ContextKey::TransactionCreated => "transactionCreated",
            ContextKey::Route => "route",
            ContextKey::ServiceName => "serviceName",
            ContextKey::CorrelationIds => "correlationIDs",
            ContextKey::OsDriver => "osDriver",
            ContextKey::StorageDriver => "storageDriver",
            ContextKey::IntegrationDriver => "integrationDriver",
            ContextKey::InstanceId => "instanceID",
            ContextKey::InstanceIdsByService => "instanceIDsByService",
            ContextKey::LocalDevices => "localDevices",
            ContextKey::LocalDevicesByService => "localDevicesByService",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Context Values
// =============================================================================

/// Opaque handle describing the inbound request a context was created for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub remote_addr: Option<String>,
}

/// The typed shapes a context value may take.
///
/// Keys and values are separate enums, so a writer can still store the
/// wrong shape under a key; typed accessors surface that as
/// [`Error::ContextTypeMismatch`] instead of a silent misread.
#[derive(Clone)]
pub enum ContextValue {
    Config(ConfigStore),
    Request(Arc<RequestInfo>),
    Str(String),
    Timestamp(DateTime<Utc>),
    CorrelationIds(BTreeMap<String, String>),
    OsDriver(Arc<dyn OsDriver>),
    StorageDriver(Arc<dyn StorageDriver>),
    IntegrationDriver(Arc<dyn IntegrationDriver>),
    InstanceId(InstanceId),
    InstanceIdsByService(BTreeMap<String, InstanceId>),
    LocalDevices(LocalDevices),
    LocalDevicesByService(BTreeMap<String, DeviceMap>),
}

impl ContextValue {
    /// Runtime shape name used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Config(_) => "config",
            ContextValue::Request(_) => "request",
            ContextValue::Str(_) => "string",
            ContextValue::Timestamp(_) => "timestamp",
            ContextValue::CorrelationIds(_) => "correlationIDs",
            ContextValue::OsDriver(_) => "osDriver",
            ContextValue::StorageDriver(_) => "storageDriver",
            ContextValue::IntegrationDriver(_) => "integrationDriver",
            ContextValue::InstanceId(_) => "instanceID",
            ContextValue::InstanceIdsByService(_) => "instanceIDsByService",
            ContextValue::LocalDevices(_) => "localDevices",
            ContextValue::LocalDevicesByService(_) => "localDevicesByService",
        }
    }
}

impl std::fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContextValue::{}", self.kind())
    }
}

fn mismatch(key: ContextKey, expected: &'static str, found: &ContextValue) -> Error {
    Error::ContextTypeMismatch {
        key,
        expected,
        actual: found.kind(),
    }
}

// =============================================================================
// Scoped Logger
// =============================================================================

/// Per-scope logging handle.
///
/// A derived context's logger inherits verbosity from its immediate parent
/// at creation time; because scopes are immutable, it never observes later
/// changes to the parent. Entries are emitted through `tracing` with the
/// owning context's correlation-ID map rendered into every event.
#[derive(Debug, Clone)]
pub struct ScopedLogger {
    max_level: Level,
}

impl ScopedLogger {
    fn new(max_level: Level) -> Self {
        Self { max_level }
    }

    pub fn max_level(&self) -> Level {
        self.max_level
    }

    fn enabled(&self, level: Level) -> bool {
        // tracing orders levels by verbosity: ERROR < WARN < ... < TRACE
        level <= self.max_level
    }
}

impl Default for ScopedLogger {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

// =============================================================================
// Context
// =============================================================================

struct Scope {
    values: BTreeMap<ContextKey, ContextValue>,
    parent: Option<Arc<Scope>>,
    joined: Option<Arc<Scope>>,
    logger: ScopedLogger,
}

impl Scope {
    fn lookup(&self, key: ContextKey) -> Option<&ContextValue> {
        if let Some(val) = self.values.get(&key) {
            return Some(val);
        }
        if let Some(parent) = &self.parent {
            if let Some(val) = parent.lookup(key) {
                return Some(val);
            }
        }
        if let Some(joined) = &self.joined {
            return joined.lookup(key);
        }
        None
    }
}

/// Immutable, chainable propagation object for one request or invocation.
///
/// Cloning a `Context` is cheap (an `Arc` bump) and shares the same scope.
#[derive(Clone)]
pub struct Context {
    scope: Arc<Scope>,
}

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

impl Context {
    /// An empty root context with a default (INFO) logger.
    pub fn background() -> Context {
        Context {
            scope: Arc::new(Scope {
                values: BTreeMap::new(),
                parent: None,
                joined: None,
                logger: ScopedLogger::default(),
            }),
        }
    }

    /// A root context carrying a config store and, optionally, the inbound
    /// request it was created for.
    pub fn new(config: ConfigStore, request: Option<RequestInfo>) -> Context {
        let mut ctx = Context::background().with_config(config);
        if let Some(req) = request {
            ctx = ctx.with_request(req);
        }
        ctx
    }

    fn child(&self, values: BTreeMap<ContextKey, ContextValue>) -> Context {
        Context {
            scope: Arc::new(Scope {
                values,
                parent: Some(self.scope.clone()),
                joined: None,
                logger: self.scope.logger.clone(),
            }),
        }
    }

    // =========================================================================
    // Derivation
    // =========================================================================

    /// Derive a child context with `value` layered under `key`.
    pub fn with_value(&self, key: ContextKey, value: ContextValue) -> Context {
        let mut values = BTreeMap::new();
        values.insert(key, value);
        self.child(values)
    }

    pub fn with_config(&self, val: ConfigStore) -> Context {
        self.with_value(ContextKey::Config, ContextValue::Config(val))
    }

    pub fn with_request(&self, val: RequestInfo) -> Context {
        self.with_value(ContextKey::Request, ContextValue::Request(Arc::new(val)))
    }

    pub fn with_transaction_id(&self, val: impl Into<String>) -> Context {
        self.with_value(ContextKey::TransactionId, ContextValue::Str(val.into()))
    }

    pub fn with_transaction_created(&self, val: DateTime<Utc>) -> Context {
        self.with_value(ContextKey::TransactionCreated, ContextValue::Timestamp(val))
    }

    /// Derive a context carrying a fresh transaction ID and its creation
    /// timestamp, both also recorded as correlation IDs.
    pub fn with_new_transaction(&self) -> Context {
        let now = Utc::now();
        let seq = NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed);
        let txid = format!("{:x}-{:04x}", now.timestamp_millis(), seq & 0xffff);
        self.with_transaction_id(txid.clone())
            .with_transaction_created(now)
            .with_correlation_id("tx", txid)
    }

    pub fn with_route(&self, val: impl Into<String>) -> Context {
        self.with_value(ContextKey::Route, ContextValue::Str(val.into()))
    }

    pub fn with_service_name(&self, val: impl Into<String>) -> Context {
        self.with_value(ContextKey::ServiceName, ContextValue::Str(val.into()))
    }

    /// Derive a context whose correlation map is the inherited map plus
    /// `(id, val)`; the new entry overrides an inherited entry of the same
    /// id, matching nearest-scope-wins lookup.
    pub fn with_correlation_id(
        &self,
        id: impl Into<String>,
        val: impl Into<String>,
    ) -> Context {
        let mut map = self
            .correlation_ids()
            .map(Clone::clone)
            .unwrap_or_default();
        map.insert(id.into(), val.into());
        self.with_value(
            ContextKey::CorrelationIds,
            ContextValue::CorrelationIds(map),
        )
    }

    pub fn with_os_driver(&self, val: Arc<dyn OsDriver>) -> Context {
        self.with_value(ContextKey::OsDriver, ContextValue::OsDriver(val))
    }

    pub fn with_storage_driver(&self, val: Arc<dyn StorageDriver>) -> Context {
        self.with_value(ContextKey::StorageDriver, ContextValue::StorageDriver(val))
    }

    pub fn with_integration_driver(&self, val: Arc<dyn IntegrationDriver>) -> Context {
        self.with_value(
            ContextKey::IntegrationDriver,
            ContextValue::IntegrationDriver(val),
        )
    }

    pub fn with_instance_id(&self, val: InstanceId) -> Context {
        self.with_value(ContextKey::InstanceId, ContextValue::InstanceId(val))
    }

    pub fn with_instance_ids_by_service(
        &self,
        val: BTreeMap<String, InstanceId>,
    ) -> Context {
        self.with_value(
            ContextKey::InstanceIdsByService,
            ContextValue::InstanceIdsByService(val),
        )
    }

    pub fn with_local_devices(&self, val: LocalDevices) -> Context {
        self.with_value(ContextKey::LocalDevices, ContextValue::LocalDevices(val))
    }

    pub fn with_local_devices_by_service(
        &self,
        val: BTreeMap<String, DeviceMap>,
    ) -> Context {
        self.with_value(
            ContextKey::LocalDevicesByService,
            ContextValue::LocalDevicesByService(val),
        )
    }

    /// Derive a context whose logger emits at `level` and below.
    pub fn with_log_level(&self, level: Level) -> Context {
        Context {
            scope: Arc::new(Scope {
                values: BTreeMap::new(),
                parent: Some(self.scope.clone()),
                joined: None,
                logger: ScopedLogger::new(level),
            }),
        }
    }

    // =========================================================================
    // Join
    // =========================================================================

    /// Join this context (primary) with `secondary`, so lookups check this
    /// context's chain first and fall back to the secondary's.
    ///
    /// Correlation-ID maps merge with the primary overriding on collision,
    /// and the two scoped configs merge the same way, quietly.
    ///
    /// # Panics
    ///
    /// Joining a context with itself is a programmer error and panics.
    pub fn join(&self, secondary: &Context) -> Context {
        if Arc::ptr_eq(&self.scope, &secondary.scope) {
            panic!("context join with itself");
        }

        let mut corr = BTreeMap::new();
        if let Ok(map) = secondary.correlation_ids() {
            corr.extend(map.clone());
        }
        if let Ok(map) = self.correlation_ids() {
            corr.extend(map.clone());
        }

        let empty = ConfigStore::new();
        let merged_config = ConfigStore::merged(
            self.config().unwrap_or(&empty),
            secondary.config().unwrap_or(&empty),
        );

        let mut values = BTreeMap::new();
        values.insert(
            ContextKey::CorrelationIds,
            ContextValue::CorrelationIds(corr),
        );
        values.insert(ContextKey::Config, ContextValue::Config(merged_config));

        Context {
            scope: Arc::new(Scope {
                values,
                parent: Some(self.scope.clone()),
                joined: Some(secondary.scope.clone()),
                logger: self.scope.logger.clone(),
            }),
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Raw lookup through local scope, parent chain, then joined side.
    pub fn value(&self, key: ContextKey) -> Result<&ContextValue> {
        self.scope
            .lookup(key)
            .ok_or(Error::ContextKeyNotFound { key })
    }

    pub fn config(&self) -> Result<&ConfigStore> {
        match self.value(ContextKey::Config)? {
            ContextValue::Config(v) => Ok(v),
            other => Err(mismatch(ContextKey::Config, "config", other)),
        }
    }

    pub fn request(&self) -> Result<&RequestInfo> {
        match self.value(ContextKey::Request)? {
            ContextValue::Request(v) => Ok(v),
            other => Err(mismatch(ContextKey::Request, "request", other)),
        }
    }

    pub fn transaction_id(&self) -> Result<&str> {
        match self.value(ContextKey::TransactionId)? {
            ContextValue::Str(v) => Ok(v),
            other => Err(mismatch(ContextKey::TransactionId, "string", other)),
        }
    }

    pub fn transaction_created(&self) -> Result<DateTime<Utc>> {
        match self.value(ContextKey::TransactionCreated)? {
            ContextValue::Timestamp(v) => Ok(*v),
            other => Err(mismatch(
                ContextKey::TransactionCreated,
                "timestamp",
                other,
            )),
        }
    }

    pub fn route(&self) -> Result<&str> {
        match self.value(ContextKey::Route)? {
            ContextValue::Str(v) => Ok(v),
            other => Err(mismatch(ContextKey::Route, "string", other)),
        }
    }

    pub fn service_name(&self) -> Result<&str> {
        match self.value(ContextKey::ServiceName)? {
            ContextValue::Str(v) => Ok(v),
            other => Err(mismatch(ContextKey::ServiceName, "string", other)),
        }
    }

    pub fn correlation_ids(&self) -> Result<&BTreeMap<String, String>> {
        match self.value(ContextKey::CorrelationIds)? {
            ContextValue::CorrelationIds(v) => Ok(v),
            other => Err(mismatch(
                ContextKey::CorrelationIds,
                "correlationIDs",
                other,
            )),
        }
    }

    pub fn os_driver(&self) -> Result<Arc<dyn OsDriver>> {
        match self.value(ContextKey::OsDriver)? {
            ContextValue::OsDriver(v) => Ok(v.clone()),
            other => Err(mismatch(ContextKey::OsDriver, "osDriver", other)),
        }
    }

    pub fn storage_driver(&self) -> Result<Arc<dyn StorageDriver>> {
        match self.value(ContextKey::StorageDriver)? {
            ContextValue::StorageDriver(v) => Ok(v.clone()),
            other => Err(mismatch(ContextKey::StorageDriver, "storageDriver", other)),
        }
    }

    pub fn integration_driver(&self) -> Result<Arc<dyn IntegrationDriver>> {
        match self.value(ContextKey::IntegrationDriver)? {
            ContextValue::IntegrationDriver(v) => Ok(v.clone()),
            other => Err(mismatch(
                ContextKey::IntegrationDriver,
                "integrationDriver",
                other,
            )),
        }
    }

    pub fn instance_id(&self) -> Result<&InstanceId> {
        match self.value(ContextKey::InstanceId)? {
            ContextValue::InstanceId(v) => Ok(v),
            other => Err(mismatch(ContextKey::InstanceId, "instanceID", other)),
        }
    }

    pub fn instance_ids_by_service(&self) -> Result<&BTreeMap<String, InstanceId>> {
        match self.value(ContextKey::InstanceIdsByService)? {
            ContextValue::InstanceIdsByService(v) => Ok(v),
            other => Err(mismatch(
                ContextKey::InstanceIdsByService,
                "instanceIDsByService",
                other,
            )),
        }
    }

    pub fn local_devices(&self) -> Result<&LocalDevices> {
        match self.value(ContextKey::LocalDevices)? {
            ContextValue::LocalDevices(v) => Ok(v),
            other => Err(mismatch(ContextKey::LocalDevices, "localDevices", other)),
        }
    }

    pub fn local_devices_by_service(&self) -> Result<&BTreeMap<String, DeviceMap>> {
        match self.value(ContextKey::LocalDevicesByService)? {
            ContextValue::LocalDevicesByService(v) => Ok(v),
            other => Err(mismatch(
                ContextKey::LocalDevicesByService,
                "localDevicesByService",
                other,
            )),
        }
    }

    // =========================================================================
    // Logging
    // =========================================================================

    pub fn logger(&self) -> &ScopedLogger {
        &self.scope.logger
    }

    fn render_correlation(&self) -> String {
        match self.correlation_ids() {
            Ok(map) => {
                let mut out = String::new();
                for (k, v) in map {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(k);
                    out.push('=');
                    out.push_str(v);
                }
                out
            }
            Err(_) => String::new(),
        }
    }

    pub fn log_error(&self, msg: impl std::fmt::Display) {
        if self.scope.logger.enabled(Level::ERROR) {
            tracing::error!(correlation = %self.render_correlation(), "{}", msg);
        }
    }

    pub fn log_warn(&self, msg: impl std::fmt::Display) {
        if self.scope.logger.enabled(Level::WARN) {
            tracing::warn!(correlation = %self.render_correlation(), "{}", msg);
        }
    }

    pub fn log_info(&self, msg: impl std::fmt::Display) {
        if self.scope.logger.enabled(Level::INFO) {
            tracing::info!(correlation = %self.render_correlation(), "{}", msg);
        }
    }

    pub fn log_debug(&self, msg: impl std::fmt::Display) {
        if self.scope.logger.enabled(Level::DEBUG) {
            tracing::debug!(correlation = %self.render_correlation(), "{}", msg);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.scope.values.keys().collect::<Vec<_>>())
            .field("has_parent", &self.scope.parent.is_some())
            .field("has_joined", &self.scope.joined.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_unset_key_is_not_found() {
        let ctx = Context::background();
        assert_matches!(
            ctx.transaction_id(),
            Err(Error::ContextKeyNotFound {
                key: ContextKey::TransactionId
            })
        );
    }

    #[test]
    fn test_derive_does_not_mutate_parent() {
        let parent = Context::background();
        let child = parent.with_transaction_id("tx-1");

        assert_eq!(child.transaction_id().unwrap(), "tx-1");
        assert_matches!(parent.transaction_id(), Err(Error::ContextKeyNotFound { .. }));
    }

    #[test]
    fn test_nearest_scope_wins() {
        let ctx = Context::background()
            .with_route("volumes")
            .with_route("snapshots");
        assert_eq!(ctx.route().unwrap(), "snapshots");
    }

    #[test]
    fn test_lookup_walks_parent_chain() {
        let ctx = Context::background()
            .with_service_name("ebs-east")
            .with_route("volumes")
            .with_transaction_id("tx-9");
        assert_eq!(ctx.service_name().unwrap(), "ebs-east");
        assert_eq!(ctx.route().unwrap(), "volumes");
    }

    #[test]
    fn test_type_mismatch() {
        let ctx = Context::background().with_value(
            ContextKey::TransactionId,
            ContextValue::Timestamp(Utc::now()),
        );
        assert_matches!(
            ctx.transaction_id(),
            Err(Error::ContextTypeMismatch {
                key: ContextKey::TransactionId,
                expected: "string",
                actual: "timestamp",
            })
        );
    }

    #[test]
    #[should_panic(expected = "context join with itself")]
    fn test_self_join_panics() {
        let ctx = Context::background();
        let same = ctx.clone();
        let _ = ctx.join(&same);
    }

    #[test]
    fn test_join_correlation_primary_overrides() {
        let primary = Context::background().with_correlation_id("x", "1");
        let secondary = Context::background()
            .with_correlation_id("x", "2")
            .with_correlation_id("y", "3");

        let joined = primary.join(&secondary);
        let map = joined.correlation_ids().unwrap();
        assert_eq!(map.get("x").map(String::as_str), Some("1"));
        assert_eq!(map.get("y").map(String::as_str), Some("3"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_join_falls_back_to_secondary() {
        let primary = Context::background().with_route("volumes");
        let secondary = Context::background()
            .with_service_name("ebs-west")
            .with_route("snapshots");

        let joined = primary.join(&secondary);
        // Primary chain wins where both sides have a value.
        assert_eq!(joined.route().unwrap(), "volumes");
        // Secondary fills in what the primary chain lacks.
        assert_eq!(joined.service_name().unwrap(), "ebs-west");
    }

    #[test]
    fn test_join_merges_config_primary_wins() {
        use serde_json::json;

        let pcfg = ConfigStore::new().with("x", json!("1"));
        let scfg = ConfigStore::new()
            .with("x", json!("2"))
            .with("y", json!("3"));
        let primary = Context::background().with_config(pcfg);
        let secondary = Context::background().with_config(scfg);

        let joined = primary.join(&secondary);
        let cfg = joined.config().unwrap();
        assert_eq!(cfg.get_str("x"), Some("1"));
        assert_eq!(cfg.get_str("y"), Some("3"));
    }

    #[test]
    fn test_correlation_derive_overrides_inherited() {
        let ctx = Context::background()
            .with_correlation_id("tx", "old")
            .with_correlation_id("tx", "new")
            .with_correlation_id("svc", "ebs");
        let map = ctx.correlation_ids().unwrap();
        assert_eq!(map.get("tx").map(String::as_str), Some("new"));
        assert_eq!(map.get("svc").map(String::as_str), Some("ebs"));
    }

    #[test]
    fn test_logger_inherits_level_at_creation() {
        let parent = Context::background().with_log_level(Level::DEBUG);
        let child = parent.with_route("volumes");
        assert_eq!(child.logger().max_level(), Level::DEBUG);

        // Re-deriving the parent's level afterward does not affect the child.
        let quieter = parent.with_log_level(Level::ERROR);
        assert_eq!(child.logger().max_level(), Level::DEBUG);
        assert_eq!(quieter.logger().max_level(), Level::ERROR);
    }

    #[test]
    fn test_new_transaction_sets_id_and_created() {
        let ctx = Context::background().with_new_transaction();
        let txid = ctx.transaction_id().unwrap().to_string();
        assert!(!txid.is_empty());
        assert!(ctx.transaction_created().is_ok());
        assert_eq!(
            ctx.correlation_ids().unwrap().get("tx"),
            Some(&txid)
        );

        let other = Context::background().with_new_transaction();
        assert_ne!(other.transaction_id().unwrap(), txid);
    }
}
