//! Service bindings
//!
//! A service is a named, configured binding of one storage executor to a
//! deployment scope. The service set is what the task engine fans out
//! over; it is resolved once from configuration at startup.

use crate::config::ConfigStore;
use crate::context::Context;
use crate::driver::StorageExecutor;
use crate::error::{Error, Result};
use crate::registry::DriverRegistry;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// One named driver binding.
#[derive(Clone)]
pub struct Service {
    pub name: String,
    pub driver: Arc<dyn StorageExecutor>,
    /// The service's scoped configuration slice
    pub config: ConfigStore,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("driver", &self.driver.name())
            .finish()
    }
}

impl Service {
    /// The instance identity this service's driver reports for the local
    /// host, stamped with the driver name.
    pub async fn instance_id(&self, ctx: &Context) -> Result<crate::types::InstanceId> {
        let mut iid = self.driver.instance_id(ctx).await?;
        iid.driver = self.driver.name().to_string();
        Ok(iid)
    }
}

/// Resolve the configured service set.
///
/// Services are declared under `services.<name>.driver`; each driver name
/// must resolve against the registry's executor map. The per-service
/// config slice is the whole store, so drivers can read both global and
/// service-scoped settings.
pub fn resolve_services(
    registry: &DriverRegistry,
    config: &ConfigStore,
) -> Result<Vec<Service>> {
    let mut names = BTreeSet::new();
    for key in config.keys_in_scope("services") {
        if let Some((name, _)) = key.split_once('.') {
            names.insert(name.to_string());
        }
    }

    let mut services = Vec::with_capacity(names.len());
    for name in names {
        let driver_key = format!("services.{}.driver", name);
        let driver_name = config.get_str(&driver_key).ok_or_else(|| {
            Error::Configuration(format!("service {} has no driver configured", name))
        })?;
        let driver = registry.new_executor(driver_name)?;
        info!(service = %name, driver = %driver_name, "resolved service");
        services.push(Service {
            name,
            driver,
            config: config.clone(),
        });
    }
    Ok(services)
}

/// Look up one service by name in a resolved set.
pub fn find_service<'a>(services: &'a [Service], name: &str) -> Result<&'a Service> {
    services
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| Error::ServiceNotFound {
            name: name.to_string(),
        })
}

/// Verify the mandatory instance identity was established for a service
/// before dispatching driver calls that require it.
///
/// Absence here is a precondition failure at the call boundary, checked
/// explicitly rather than discovered deep inside a driver.
pub fn require_instance_id<'a>(
    ctx: &'a Context,
    service: &Service,
) -> Result<&'a crate::types::InstanceId> {
    if let Ok(by_service) = ctx.instance_ids_by_service() {
        if let Some(iid) = by_service.get(&service.name) {
            return Ok(iid);
        }
    }
    ctx.instance_id().map_err(|_| {
        Error::Precondition(format!(
            "no instance ID established for service {}",
            service.name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryExecutor;
    use crate::types::InstanceId;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn registry() -> DriverRegistry {
        let r = DriverRegistry::new();
        r.register_executor("memory", Box::new(|| Arc::new(MemoryExecutor::new())));
        r
    }

    #[test]
    fn test_resolve_services_from_config() {
        let config = ConfigStore::new()
            .with("services.ebs-east.driver", json!("memory"))
            .with("services.ebs-west.driver", json!("memory"))
            .with("gateway.port", json!(7979));

        let services = resolve_services(&registry(), &config).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "ebs-east");
        assert_eq!(services[1].name, "ebs-west");
        assert_eq!(services[0].driver.name(), "memory");
    }

    #[test]
    fn test_resolve_unknown_driver_fails() {
        let config = ConfigStore::new().with("services.bad.driver", json!("no-such"));
        assert_matches!(
            resolve_services(&registry(), &config),
            Err(Error::DriverNotFound { .. })
        );
    }

    #[test]
    fn test_resolve_missing_driver_key_fails() {
        let config = ConfigStore::new().with("services.bad.region", json!("us-east-1"));
        assert_matches!(
            resolve_services(&registry(), &config),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_find_service() {
        let config = ConfigStore::new().with("services.s1.driver", json!("memory"));
        let services = resolve_services(&registry(), &config).unwrap();
        assert!(find_service(&services, "s1").is_ok());
        assert_matches!(
            find_service(&services, "s2"),
            Err(Error::ServiceNotFound { .. })
        );
    }

    #[test]
    fn test_require_instance_id() {
        let config = ConfigStore::new().with("services.s1.driver", json!("memory"));
        let services = resolve_services(&registry(), &config).unwrap();
        let svc = &services[0];

        let bare = Context::background();
        assert_matches!(require_instance_id(&bare, svc), Err(Error::Precondition(_)));

        let direct = bare.with_instance_id(InstanceId::new("i-1"));
        assert_eq!(require_instance_id(&direct, svc).unwrap().id, "i-1");

        let mut by_service = BTreeMap::new();
        by_service.insert("s1".to_string(), InstanceId::new("i-2"));
        let scoped = bare.with_instance_ids_by_service(by_service);
        assert_eq!(require_instance_id(&scoped, svc).unwrap().id, "i-2");
    }
}
