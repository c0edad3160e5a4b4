//! Driver registry
//!
//! Name-addressed construction for the four driver kinds. Registration is
//! idempotent-overwrite per `(kind, name)` and the maps tolerate concurrent
//! writers, since module loading can still be registering while early read
//! traffic resolves drivers.
//!
//! Executor capability masks are probed once at registration and cached on
//! the entry; they are never re-probed per call.

use crate::driver::{
    probe_capabilities, CapabilityMask, IntegrationDriver, OsDriver, StorageDriver,
    StorageExecutor,
};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Driver Kinds
// =============================================================================

/// The kinds of pluggable modules the registry tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Os,
    Storage,
    Integration,
    Executor,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Os => write!(f, "os"),
            DriverKind::Storage => write!(f, "storage"),
            DriverKind::Integration => write!(f, "integration"),
            DriverKind::Executor => write!(f, "executor"),
        }
    }
}

// =============================================================================
// Constructors
// =============================================================================

pub type OsDriverCtor = Box<dyn Fn() -> Arc<dyn OsDriver> + Send + Sync>;
pub type StorageDriverCtor = Box<dyn Fn() -> Arc<dyn StorageDriver> + Send + Sync>;
pub type IntegrationDriverCtor = Box<dyn Fn() -> Arc<dyn IntegrationDriver> + Send + Sync>;
pub type ExecutorCtor = Box<dyn Fn() -> Arc<dyn StorageExecutor> + Send + Sync>;

struct ExecutorEntry {
    ctor: ExecutorCtor,
    // Probed once when the entry is registered.
    capabilities: CapabilityMask,
}

// =============================================================================
// Registry
// =============================================================================

/// Name-to-constructor registry for all driver kinds.
#[derive(Default)]
pub struct DriverRegistry {
    os_drivers: RwLock<HashMap<String, OsDriverCtor>>,
    storage_drivers: RwLock<HashMap<String, StorageDriverCtor>>,
    integration_drivers: RwLock<HashMap<String, IntegrationDriverCtor>>,
    executors: RwLock<HashMap<String, ExecutorEntry>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub fn register_os_driver(&self, name: impl Into<String>, ctor: OsDriverCtor) {
        let name = name.into().to_lowercase();
        debug!(kind = %DriverKind::Os, driver = %name, "registering driver");
        self.os_drivers.write().insert(name, ctor);
    }

    pub fn register_storage_driver(&self, name: impl Into<String>, ctor: StorageDriverCtor) {
        let name = name.into().to_lowercase();
        debug!(kind = %DriverKind::Storage, driver = %name, "registering driver");
        self.storage_drivers.write().insert(name, ctor);
    }

    pub fn register_integration_driver(
        &self,
        name: impl Into<String>,
        ctor: IntegrationDriverCtor,
    ) {
        let name = name.into().to_lowercase();
        debug!(kind = %DriverKind::Integration, driver = %name, "registering driver");
        self.integration_drivers.write().insert(name, ctor);
    }

    /// Register an executor. The constructor is invoked once here so the
    /// capability mask can be probed and cached on the entry.
    pub fn register_executor(&self, name: impl Into<String>, ctor: ExecutorCtor) {
        let name = name.into().to_lowercase();
        let capabilities = probe_capabilities(ctor().as_ref());
        debug!(
            kind = %DriverKind::Executor,
            driver = %name,
            capabilities = %capabilities,
            "registering executor"
        );
        self.executors
            .write()
            .insert(name, ExecutorEntry { ctor, capabilities });
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    pub fn new_os_driver(&self, name: &str) -> Result<Arc<dyn OsDriver>> {
        let drivers = self.os_drivers.read();
        let ctor = drivers
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::DriverNotFound {
                kind: DriverKind::Os,
                name: name.to_string(),
            })?;
        Ok(ctor())
    }

    pub fn new_storage_driver(&self, name: &str) -> Result<Arc<dyn StorageDriver>> {
        let drivers = self.storage_drivers.read();
        let ctor = drivers
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::DriverNotFound {
                kind: DriverKind::Storage,
                name: name.to_string(),
            })?;
        Ok(ctor())
    }

    pub fn new_integration_driver(&self, name: &str) -> Result<Arc<dyn IntegrationDriver>> {
        let drivers = self.integration_drivers.read();
        let ctor = drivers
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::DriverNotFound {
                kind: DriverKind::Integration,
                name: name.to_string(),
            })?;
        Ok(ctor())
    }

    pub fn new_executor(&self, name: &str) -> Result<Arc<dyn StorageExecutor>> {
        let executors = self.executors.read();
        let entry = executors
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::DriverNotFound {
                kind: DriverKind::Executor,
                name: name.to_string(),
            })?;
        Ok((entry.ctor)())
    }

    /// Cached capability mask of a registered executor.
    pub fn executor_capabilities(&self, name: &str) -> Result<CapabilityMask> {
        let executors = self.executors.read();
        executors
            .get(&name.to_lowercase())
            .map(|e| e.capabilities)
            .ok_or_else(|| Error::DriverNotFound {
                kind: DriverKind::Executor,
                name: name.to_string(),
            })
    }

    /// Names of all registered executors, sorted. Used for CLI usage text
    /// and capability advertisement.
    pub fn executor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.read().keys().cloned().collect();
        names.sort();
        names
    }
}
