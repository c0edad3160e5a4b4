//! Built-in drivers and the composition root
//!
//! Driver modules register here, statically and explicitly, at startup.
//! There is no runtime shared-object loading; adding a driver means adding
//! a module and a line in [`register_builtin`].

pub mod memory;

use crate::registry::DriverRegistry;
use std::sync::Arc;

/// Register every built-in driver module with `registry`.
pub fn register_builtin(registry: &DriverRegistry) {
    registry.register_executor(
        memory::DRIVER_NAME,
        Box::new(|| Arc::new(memory::MemoryExecutor::new())),
    );
    registry.register_storage_driver(
        memory::DRIVER_NAME,
        Box::new(|| Arc::new(memory::MemoryExecutor::new())),
    );
    registry.register_os_driver(
        memory::DRIVER_NAME,
        Box::new(|| Arc::new(memory::MemoryOsDriver::new())),
    );
    registry.register_integration_driver(
        memory::DRIVER_NAME,
        Box::new(|| Arc::new(memory::MemoryIntegrationDriver::new())),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CapabilityMask;

    #[test]
    fn test_register_builtin_covers_all_kinds() {
        let registry = DriverRegistry::new();
        register_builtin(&registry);

        assert!(registry.new_executor("memory").is_ok());
        assert!(registry.new_storage_driver("memory").is_ok());
        assert!(registry.new_os_driver("memory").is_ok());
        assert!(registry.new_integration_driver("memory").is_ok());

        let mask = registry.executor_capabilities("memory").unwrap();
        assert!(mask.contains(
            CapabilityMask::MOUNT
                | CapabilityMask::UNMOUNT
                | CapabilityMask::MOUNTS
                | CapabilityMask::VOLUME_CREATE
                | CapabilityMask::VOLUME_REMOVE
                | CapabilityMask::VOLUME_ATTACH
                | CapabilityMask::VOLUME_DETACH
        ));
    }
}
